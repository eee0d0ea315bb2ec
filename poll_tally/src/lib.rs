mod types;
pub mod manual;

use log::debug;

use std::collections::HashMap;

pub use crate::types::*;

/// Brings a tally in line with the current answer set: every answer key gets
/// a counter (missing ones start at 0) and counters for removed keys are
/// dropped.
///
/// The tally and the answers are persisted in different scopes, so the tally
/// is never updated when the answers are edited. Instead this runs before
/// every read or write of the tally. Reconciling twice in a row yields the
/// same result.
pub fn reconcile(answers: &AnswerSet, tally: &Tally) -> Tally {
    let stale = tally
        .iter()
        .filter(|(key, _)| !answers.contains_key(key))
        .count();
    if stale > 0 {
        debug!("reconcile: dropping {} stale counter(s)", stale);
    }
    Tally::from_counts(answers.iter().map(|a| (a.key.clone(), tally.count(&a.key))))
}

/// The voter's recorded choice, but only while that key is still part of the
/// answer set.
///
/// A choice whose answer was removed by the editor becomes ineffective: the
/// voter may vote again. The historical record is kept, not deleted.
pub fn current_choice<'a>(recorded: Option<&'a str>, answers: &AnswerSet) -> Option<&'a str> {
    match recorded {
        Some(key) if !key.is_empty() && answers.contains_key(key) => Some(key),
        _ => None,
    }
}

/// Tallies all results into a ranked report.
///
/// Entries are sorted by descending count; tied counts keep the relative
/// order of the answer set (the sort is stable, which callers rely on for a
/// deterministic display order). The first entry is marked `top` and the
/// last one `last`; a single answer carries both marks, an empty answer set
/// carries none.
pub fn compute_results(
    answers: &AnswerSet,
    tally: &Tally,
    recorded: Option<&str>,
) -> TallyDetail {
    let tally = reconcile(answers, tally);
    let choice = current_choice(recorded, answers);

    let mut entries: Vec<RankedEntry> = Vec::new();
    let mut total: u64 = 0;
    for answer in answers.iter() {
        let count = tally.count(&answer.key);
        total += count;
        entries.push(RankedEntry {
            key: answer.key.clone(),
            label: answer.label.clone(),
            img: answer.img.clone(),
            count,
            percent: 0,
            top: false,
            last: false,
            choice: choice == Some(answer.key.as_str()),
        });
    }
    debug!("compute_results: {} answers, {} votes", entries.len(), total);

    for entry in entries.iter_mut() {
        // A poll with no votes yet reports 0% everywhere rather than failing
        // on the division.
        entry.percent = if total == 0 {
            0
        } else {
            entry.count * 100 / total
        };
    }

    entries.sort_by(|a, b| b.count.cmp(&a.count));

    if let Some(first) = entries.first_mut() {
        first.top = true;
    }
    if let Some(last) = entries.last_mut() {
        last.last = true;
    }

    TallyDetail { entries, total }
}

/// Validates and records a single vote.
///
/// A voter with a still-valid recorded choice is rejected with
/// [VoteError::AlreadyVoted]; a missing or empty key with
/// [VoteError::MissingChoice]; a key that is not in the answer set with
/// [VoteError::UnknownAnswer]. On success the returned tally has been
/// reconciled and incremented exactly once. There is no way to retract a
/// vote.
pub fn record_vote(
    answers: &AnswerSet,
    tally: &Tally,
    recorded: Option<&str>,
    submitted: Option<&str>,
) -> Result<VoteRecord, VoteError> {
    if current_choice(recorded, answers).is_some() {
        return Err(VoteError::AlreadyVoted);
    }
    let key = match submitted {
        Some(k) if !k.is_empty() => k,
        _ => return Err(VoteError::MissingChoice),
    };
    if !answers.contains_key(key) {
        return Err(VoteError::UnknownAnswer(key.to_string()));
    }

    let mut next = reconcile(answers, tally);
    next.increment(key);
    debug!("record_vote: {:?} -> {}", key, next.count(key));
    Ok(VoteRecord {
        tally: next,
        choice: key.to_string(),
    })
}

/// Sanitizes an editor form submission into a new question, feedback and
/// answer set.
///
/// The checks, in order:
/// - the question is required (non-empty after trimming) and truncated to
///   [MAX_TEXT_CHARS];
/// - a blank feedback is stored as the empty string, anything else is
///   truncated to [MAX_TEXT_CHARS];
/// - answer fields are aggressively cleaned: the key is derived from the
///   field name by stripping the `answer-` / `img-answer-` prefix, entries
///   with an empty key or an empty trimmed value are discarded, values are
///   truncated to [MAX_ANSWER_CHARS], label and image contributions are
///   merged per key, and only keys listed in `poll_order` are retained;
/// - at least two answers must survive, otherwise
///   [EditError::InsufficientAnswers].
///
/// All applicable errors are reported together and nothing is applied on
/// failure. The final answer order is the `poll_order` order.
pub fn apply_editor_submission(
    submission: &EditorSubmission,
) -> Result<PollUpdate, Vec<EditError>> {
    let mut errors: Vec<EditError> = Vec::new();

    let question = match &submission.question {
        Some(q) if !q.trim().is_empty() => truncate_chars(q, MAX_TEXT_CHARS),
        _ => {
            errors.push(EditError::MissingQuestion);
            String::new()
        }
    };

    let feedback = match &submission.feedback {
        Some(f) if !f.trim().is_empty() => truncate_chars(f, MAX_TEXT_CHARS),
        _ => String::new(),
    };

    // The ordering list may carry the form prefix; keys are stored bare.
    let order: Vec<String> = submission
        .poll_order
        .iter()
        .map(|k| strip_answer_prefix(k.trim()).to_string())
        .collect();

    // (label, image) contributions, merged per derived key.
    let mut merged: HashMap<String, (Option<String>, Option<String>)> = HashMap::new();
    for (name, value) in submission.fields.iter() {
        let (key, is_img) = if let Some(k) = name.strip_prefix("img-answer-") {
            (k, true)
        } else if let Some(k) = name.strip_prefix("answer-") {
            (k, false)
        } else {
            continue;
        };
        if key.trim().is_empty() {
            continue;
        }
        let value = truncate_chars(value.trim(), MAX_ANSWER_CHARS);
        if value.is_empty() {
            continue;
        }
        if let Some((label, img)) = merged.get_mut(key) {
            if is_img {
                *img = Some(value);
            } else {
                *label = Some(value);
            }
            continue;
        }
        // First contribution for this key: only keys the editor ordered are
        // retained at all.
        if order.iter().any(|k| k == key) {
            let slot = if is_img {
                (None, Some(value))
            } else {
                (Some(value), None)
            };
            merged.insert(key.to_string(), slot);
        }
    }

    // Evaluated after the field-level cleaning on purpose, matching the
    // established editor behavior.
    if merged.len() < 2 {
        errors.push(EditError::InsufficientAnswers);
    }
    if !errors.is_empty() {
        debug!("apply_editor_submission: rejected with {:?}", errors);
        return Err(errors);
    }

    let mut entries: Vec<Answer> = merged
        .into_iter()
        .map(|(key, (label, img))| Answer { key, label, img })
        .collect();
    entries.sort_by_key(|a| order.iter().position(|k| *k == a.key));

    // Keys are non-empty and deduplicated by the merging above.
    let answers = AnswerSet::new(entries).expect("sanitized answers broke the key invariants");

    Ok(PollUpdate {
        question,
        feedback,
        answers,
    })
}

// Truncation counts characters, not bytes, so it never splits a code point.
fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn strip_answer_prefix(name: &str) -> &str {
    name.strip_prefix("answer-").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rbgo() -> AnswerSet {
        AnswerSet::default()
    }

    fn counts(pairs: &[(&str, u64)]) -> Tally {
        Tally::from_counts(pairs.iter().map(|(k, c)| (k.to_string(), *c)))
    }

    fn submission(order: &[&str], fields: &[(&str, &str)]) -> EditorSubmission {
        EditorSubmission {
            question: Some("Cats or dogs?".to_string()),
            feedback: None,
            poll_order: order.iter().map(|s| s.to_string()).collect(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn reconcile_initializes_missing_keys() {
        let t = reconcile(&rbgo(), &Tally::new());
        assert_eq!(t.len(), 4);
        for a in rbgo().iter() {
            assert_eq!(t.count(&a.key), 0);
        }
    }

    #[test]
    fn reconcile_drops_stale_keys() {
        let t = reconcile(&rbgo(), &counts(&[("R", 3), ("Z", 5)]));
        assert_eq!(t.count("R"), 3);
        assert_eq!(t.count("Z"), 0);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let once = reconcile(&rbgo(), &counts(&[("R", 3), ("Z", 5)]));
        let twice = reconcile(&rbgo(), &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn current_choice_requires_a_live_key() {
        assert_eq!(current_choice(Some("R"), &rbgo()), Some("R"));
        assert_eq!(current_choice(Some("Z"), &rbgo()), None);
        assert_eq!(current_choice(Some(""), &rbgo()), None);
        assert_eq!(current_choice(None, &rbgo()), None);
    }

    #[test]
    fn percents_are_floored() {
        let detail = compute_results(&rbgo(), &counts(&[("R", 3), ("B", 1), ("G", 1)]), None);
        assert_eq!(detail.total, 5);
        let percents: Vec<(String, u64)> = detail
            .entries
            .iter()
            .map(|e| (e.key.clone(), e.percent))
            .collect();
        assert_eq!(
            percents,
            vec![
                ("R".to_string(), 60),
                ("B".to_string(), 20),
                ("G".to_string(), 20),
                ("O".to_string(), 0)
            ]
        );
        for e in detail.entries.iter() {
            assert!(e.percent <= 100);
        }
        assert!(detail.entries.first().unwrap().top);
        assert!(detail.entries.last().unwrap().last);
        assert_eq!(detail.entries.last().unwrap().key, "O");
    }

    #[test]
    fn zero_vote_poll_reports_zero_percent() {
        let detail = compute_results(&rbgo(), &Tally::new(), None);
        assert_eq!(detail.total, 0);
        for e in detail.entries.iter() {
            assert_eq!(e.percent, 0);
            assert_eq!(e.count, 0);
        }
    }

    #[test]
    fn tied_counts_keep_answer_order() {
        let detail = compute_results(&rbgo(), &counts(&[("R", 2), ("B", 2), ("G", 2), ("O", 2)]), None);
        let keys: Vec<&str> = detail.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["R", "B", "G", "O"]);
    }

    #[test]
    fn single_answer_is_both_top_and_last() {
        let answers = AnswerSet::new(vec![Answer::labeled("only", "The only one")]).unwrap();
        let detail = compute_results(&answers, &Tally::new(), None);
        assert_eq!(detail.entries.len(), 1);
        assert!(detail.entries[0].top);
        assert!(detail.entries[0].last);
    }

    #[test]
    fn empty_answer_set_carries_no_marks() {
        let answers = AnswerSet::new(vec![]).unwrap();
        let detail = compute_results(&answers, &Tally::new(), None);
        assert!(detail.entries.is_empty());
        assert_eq!(detail.total, 0);
    }

    #[test]
    fn exactly_one_top_and_one_last_mark() {
        let detail = compute_results(&rbgo(), &counts(&[("B", 4), ("G", 4)]), None);
        assert_eq!(detail.entries.iter().filter(|e| e.top).count(), 1);
        assert_eq!(detail.entries.iter().filter(|e| e.last).count(), 1);
    }

    #[test]
    fn voter_choice_is_marked() {
        let detail = compute_results(&rbgo(), &counts(&[("B", 1)]), Some("B"));
        for e in detail.entries.iter() {
            assert_eq!(e.choice, e.key == "B");
        }
    }

    #[test]
    fn stale_voter_choice_is_not_marked() {
        let detail = compute_results(&rbgo(), &Tally::new(), Some("gone"));
        assert!(detail.entries.iter().all(|e| !e.choice));
    }

    #[test]
    fn record_vote_increments_exactly_once() {
        let record = record_vote(&rbgo(), &Tally::new(), None, Some("R")).unwrap();
        assert_eq!(record.choice, "R");
        assert_eq!(record.tally.count("R"), 1);
        assert_eq!(record.tally.count("B"), 0);
        assert_eq!(record.tally.len(), 4);
    }

    #[test]
    fn record_vote_rejects_a_second_vote() {
        let first = record_vote(&rbgo(), &Tally::new(), None, Some("R")).unwrap();
        let second = record_vote(&rbgo(), &first.tally, Some(&first.choice), Some("B"));
        assert_eq!(second, Err(VoteError::AlreadyVoted));
        assert_eq!(first.tally.count("R"), 1);
        assert_eq!(first.tally.count("B"), 0);
    }

    #[test]
    fn record_vote_requires_a_choice() {
        assert_eq!(
            record_vote(&rbgo(), &Tally::new(), None, None),
            Err(VoteError::MissingChoice)
        );
        assert_eq!(
            record_vote(&rbgo(), &Tally::new(), None, Some("")),
            Err(VoteError::MissingChoice)
        );
    }

    #[test]
    fn record_vote_rejects_unknown_keys() {
        let res = record_vote(&rbgo(), &Tally::new(), None, Some("Z"));
        assert_eq!(res, Err(VoteError::UnknownAnswer("Z".to_string())));
        assert_eq!(
            res.unwrap_err().to_string(),
            "No key \"Z\" in answers table."
        );
    }

    #[test]
    fn a_removed_choice_allows_revoting() {
        // The voter picked "x" before the editor removed it.
        let record = record_vote(&rbgo(), &Tally::new(), Some("x"), Some("G")).unwrap();
        assert_eq!(record.choice, "G");
        assert_eq!(record.tally.count("G"), 1);
    }

    #[test]
    fn editor_submission_with_two_answers() {
        let update = apply_editor_submission(&submission(
            &["x", "y"],
            &[("answer-x", "Cats"), ("answer-y", "Dogs")],
        ))
        .unwrap();
        assert_eq!(update.question, "Cats or dogs?");
        assert_eq!(update.feedback, "");
        let entries: Vec<&Answer> = update.answers.iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], &Answer::labeled("x", "Cats"));
        assert_eq!(entries[1], &Answer::labeled("y", "Dogs"));
    }

    #[test]
    fn editor_submission_merges_label_and_image() {
        let update = apply_editor_submission(&submission(
            &["x", "y"],
            &[
                ("answer-x", "Cats"),
                ("img-answer-x", "http://example.com/cat.png"),
                ("answer-y", "Dogs"),
            ],
        ))
        .unwrap();
        let x = update.answers.get("x").unwrap();
        assert_eq!(x.label.as_deref(), Some("Cats"));
        assert_eq!(x.img.as_deref(), Some("http://example.com/cat.png"));
        let y = update.answers.get("y").unwrap();
        assert_eq!(y.img, None);
        assert!(update.answers.any_image());
    }

    #[test]
    fn editor_submission_requires_a_question() {
        let mut sub = submission(&["x", "y"], &[("answer-x", "Cats"), ("answer-y", "Dogs")]);
        sub.question = Some("   ".to_string());
        assert_eq!(
            apply_editor_submission(&sub),
            Err(vec![EditError::MissingQuestion])
        );
    }

    #[test]
    fn editor_submission_reports_all_errors() {
        let mut sub = submission(&["x"], &[("answer-x", "Cats")]);
        sub.question = None;
        assert_eq!(
            apply_editor_submission(&sub),
            Err(vec![EditError::MissingQuestion, EditError::InsufficientAnswers])
        );
    }

    #[test]
    fn editor_submission_requires_two_answers() {
        let res = apply_editor_submission(&submission(&["x"], &[("answer-x", "Cats")]));
        assert_eq!(res, Err(vec![EditError::InsufficientAnswers]));
        assert_eq!(
            res.unwrap_err()[0].to_string(),
            "You must include at least two answers."
        );
    }

    #[test]
    fn editor_submission_discards_unordered_keys() {
        let update = apply_editor_submission(&submission(
            &["x", "y"],
            &[
                ("answer-x", "Cats"),
                ("answer-y", "Dogs"),
                ("answer-z", "Birds"),
            ],
        ))
        .unwrap();
        assert!(!update.answers.contains_key("z"));
        assert_eq!(update.answers.len(), 2);
    }

    #[test]
    fn editor_submission_discards_blank_entries() {
        let res = apply_editor_submission(&submission(
            &["x", "y", "z"],
            &[
                ("answer-x", "Cats"),
                ("answer-y", "   "),
                ("answer-", "No key"),
            ],
        ));
        assert_eq!(res, Err(vec![EditError::InsufficientAnswers]));
    }

    #[test]
    fn editor_submission_orders_by_poll_order() {
        // Field arrival order does not matter, the ordering list does. The
        // list may carry the raw form prefix.
        let mut sub = submission(&[], &[("answer-y", "Dogs"), ("answer-x", "Cats")]);
        sub.poll_order = vec!["answer-x".to_string(), "answer-y".to_string()];
        let update = apply_editor_submission(&sub).unwrap();
        let keys: Vec<&str> = update.answers.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn editor_submission_truncates_long_values() {
        let long_question = "q".repeat(MAX_TEXT_CHARS + 100);
        let long_label = "l".repeat(MAX_ANSWER_CHARS + 100);
        let mut sub = submission(
            &["x", "y"],
            &[("answer-y", "Dogs")],
        );
        sub.question = Some(long_question);
        sub.fields.push(("answer-x".to_string(), long_label));
        let update = apply_editor_submission(&sub).unwrap();
        assert_eq!(update.question.chars().count(), MAX_TEXT_CHARS);
        let x = update.answers.get("x").unwrap();
        assert_eq!(x.label.as_ref().unwrap().chars().count(), MAX_ANSWER_CHARS);
    }

    #[test]
    fn editor_submission_blank_feedback_is_stored_empty() {
        let mut sub = submission(&["x", "y"], &[("answer-x", "Cats"), ("answer-y", "Dogs")]);
        sub.feedback = Some("   ".to_string());
        let update = apply_editor_submission(&sub).unwrap();
        assert_eq!(update.feedback, "");
    }

    #[test]
    fn answer_set_rejects_broken_keys() {
        assert_eq!(
            AnswerSet::new(vec![Answer::labeled("", "Blank")]),
            Err(AnswerSetError::EmptyKey)
        );
        assert_eq!(
            AnswerSet::new(vec![Answer::labeled("x", "One"), Answer::labeled("x", "Two")]),
            Err(AnswerSetError::DuplicateKey("x".to_string()))
        );
    }

    #[test]
    fn settings_apply_swaps_all_three_fields() {
        let mut settings = PollSettings::default();
        let update = apply_editor_submission(&submission(
            &["x", "y"],
            &[("answer-x", "Cats"), ("answer-y", "Dogs")],
        ))
        .unwrap();
        settings.apply(update);
        assert_eq!(settings.question, "Cats or dogs?");
        assert_eq!(settings.answers.len(), 2);
        assert!(settings.answers.contains_key("x"));
    }
}
