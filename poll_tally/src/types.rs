// ********* Input data structures ***********

use std::collections::HashMap;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::Display;

/// Maximum length, in characters, of the question and feedback texts.
pub const MAX_TEXT_CHARS: usize = 4096;

/// Maximum length, in characters, of an answer label or image location.
pub const MAX_ANSWER_CHARS: usize = 250;

/// A single answer of a poll.
///
/// The key is the stable identifier: labels and images may be edited at will,
/// the key is what votes and counters refer to.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct Answer {
    pub key: String,
    pub label: Option<String>,
    pub img: Option<String>,
}

impl Answer {
    pub fn labeled(key: &str, label: &str) -> Answer {
        Answer {
            key: key.to_string(),
            label: Some(label.to_string()),
            img: None,
        }
    }
}

/// The ordered answers of a poll.
///
/// Display order is authoritative: it is set by the editor and must survive
/// tallying and reconciliation. It is never derived from counts or keys.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct AnswerSet {
    entries: Vec<Answer>,
}

impl AnswerSet {
    /// Builds an answer set, checking the key invariants: no empty keys,
    /// no duplicated keys.
    pub fn new(entries: Vec<Answer>) -> Result<AnswerSet, AnswerSetError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for answer in entries.iter() {
            if answer.key.trim().is_empty() {
                return Err(AnswerSetError::EmptyKey);
            }
            if !seen.insert(answer.key.as_str()) {
                return Err(AnswerSetError::DuplicateKey(answer.key.clone()));
            }
        }
        Ok(AnswerSet { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Answer> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Answer> {
        self.entries.iter().find(|a| a.key == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether any answer carries an image. This changes the layout of the
    /// rendered results.
    pub fn any_image(&self) -> bool {
        self.entries.iter().any(|a| a.img.is_some())
    }
}

impl Default for AnswerSet {
    fn default() -> AnswerSet {
        AnswerSet {
            entries: vec![
                Answer::labeled("R", "Red"),
                Answer::labeled("B", "Blue"),
                Answer::labeled("G", "Green"),
                Answer::labeled("O", "Other"),
            ],
        }
    }
}

/// Errors raised when assembling an answer set that breaks its invariants.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum AnswerSetError {
    EmptyKey,
    DuplicateKey(String),
}

impl Error for AnswerSetError {}

impl Display for AnswerSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerSetError::EmptyKey => write!(f, "answer keys may not be empty"),
            AnswerSetError::DuplicateKey(key) => write!(f, "duplicate answer key {:?}", key),
        }
    }
}

/// The vote counters of a poll, keyed by answer key.
///
/// The tally is persisted in a different scope than the answers, so it can
/// drift out of sync after the answers are edited. It must be brought back in
/// line with [crate::reconcile] before every read or write.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Tally {
    counts: HashMap<String, u64>,
}

impl Tally {
    pub fn new() -> Tally {
        Tally::default()
    }

    pub fn from_counts(counts: impl IntoIterator<Item = (String, u64)>) -> Tally {
        Tally {
            counts: counts.into_iter().collect(),
        }
    }

    /// The count recorded for a key, 0 if the key has no counter yet.
    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.counts.iter()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub(crate) fn increment(&mut self, key: &str) {
        *self.counts.entry(key.to_string()).or_insert(0) += 1;
    }
}

/// The per-poll editable fields, persisted together in the host's settings
/// scope. Overwritten wholesale by a successful editor submission.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PollSettings {
    pub question: String,
    pub feedback: String,
    pub answers: AnswerSet,
}

impl PollSettings {
    /// Applies a sanitized editor submission as a single atomic swap. The
    /// tally is deliberately not touched here: it lives in a different scope
    /// and is reconciled on its next access.
    pub fn apply(&mut self, update: PollUpdate) {
        self.question = update.question;
        self.feedback = update.feedback;
        self.answers = update.answers;
    }
}

impl Default for PollSettings {
    fn default() -> PollSettings {
        PollSettings {
            question: "What is your favorite color?".to_string(),
            feedback: String::new(),
            answers: AnswerSet::default(),
        }
    }
}

// ******** Output data structures *********

/// One line of the ranked report.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RankedEntry {
    pub key: String,
    pub label: Option<String>,
    pub img: Option<String>,
    pub count: u64,
    /// Integer percentage of the total, rounded down. 0 when no vote was cast.
    pub percent: u64,
    pub top: bool,
    pub last: bool,
    /// Whether this is the answer the requesting voter picked.
    pub choice: bool,
}

/// The ranked report plus the total number of votes cast.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct TallyDetail {
    pub entries: Vec<RankedEntry>,
    pub total: u64,
}

/// The outcome of a successfully recorded vote. The caller persists the new
/// tally and the recorded choice, then notifies the host runtime.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VoteRecord {
    pub tally: Tally,
    pub choice: String,
}

/// Reasons for rejecting a vote. The `Display` forms are the user-facing
/// messages.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum VoteError {
    AlreadyVoted,
    MissingChoice,
    UnknownAnswer(String),
}

impl Error for VoteError {}

impl Display for VoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteError::AlreadyVoted => write!(f, "You have already voted in this poll."),
            VoteError::MissingChoice => write!(f, "Answer not included with request."),
            VoteError::UnknownAnswer(key) => {
                write!(f, "No key \"{}\" in answers table.", key)
            }
        }
    }
}

// ********* Editor submissions **********

/// The raw fields of an editor form submission, before sanitization.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct EditorSubmission {
    pub question: Option<String>,
    pub feedback: Option<String>,
    /// Explicit ordering of the answer keys. This list is authoritative for
    /// the final sequence order; answers whose key is not listed are dropped.
    pub poll_order: Vec<String>,
    /// The remaining raw fields as (name, value) pairs. Only names carrying
    /// the `answer-` or `img-answer-` prefix contribute an answer.
    pub fields: Vec<(String, String)>,
}

/// A sanitized editor submission. The caller swaps it into the settings as
/// one atomic update.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PollUpdate {
    pub question: String,
    pub feedback: String,
    pub answers: AnswerSet,
}

/// Reasons for rejecting an editor submission. Several may be reported for a
/// single submission.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum EditError {
    MissingQuestion,
    InsufficientAnswers,
}

impl Error for EditError {}

impl Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditError::MissingQuestion => write!(f, "You must specify a question."),
            EditError::InsufficientAnswers => {
                write!(f, "You must include at least two answers.")
            }
        }
    }
}
