use log::{debug, info, warn};

use poll_tally::*;
use snafu::{prelude::*, Snafu};

use std::collections::HashMap;
use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::block::scenario_reader::*;

#[derive(Debug, Snafu)]
pub enum BlockError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display(""))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Invalid answer set in scenario: {message}"))]
    InvalidAnswers { message: String },
    #[snafu(display("Error writing report to {path}"))]
    WritingReport {
        source: std::io::Error,
        path: String,
    },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

type BlockResult<T> = Result<T, BlockError>;

/// The services the host runtime provides to the block: three separately
/// scoped persisted fields, a completion event sink and a rich-text hook.
///
/// The host serializes the calls: there is at most one in-flight mutating
/// call per voter and per poll instance, so no locking happens here.
pub trait Host {
    /// Per-poll-instance settings scope: question, feedback, answers.
    fn load_settings(&self) -> PollSettings;
    fn store_settings(&mut self, settings: PollSettings);

    /// Per-poll-instance shared summary scope: the tally.
    fn load_tally(&self) -> Tally;
    fn store_tally(&mut self, tally: &Tally);

    /// Per-voter scope: the recorded choice, written once.
    fn load_choice(&self, voter: &str) -> Option<String>;
    fn store_choice(&mut self, voter: &str, key: &str);

    /// Fire-and-forget completion event, emitted after a successful vote.
    fn publish_progress(&mut self, voter: &str);

    /// Rich-text pass for the question and feedback. The block treats both
    /// as opaque strings.
    fn render_text(&self, raw: &str) -> String {
        raw.to_string()
    }
}

// ******** Handler responses (wire shapes) *********

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub key: String,
    pub label: Option<String>,
    pub image: Option<String>,
    pub count: u64,
    pub percent: u64,
    #[serde(rename = "isTop")]
    pub is_top: bool,
    #[serde(rename = "isLast")]
    pub is_last: bool,
    #[serde(rename = "isVoterChoice")]
    pub is_voter_choice: bool,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub question: String,
    pub results: Vec<ResultEntry>,
    pub total: u64,
    pub feedback: String,
    #[serde(rename = "anyImage")]
    pub any_image: bool,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub key: String,
    pub label: Option<String>,
    pub image: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AnswersResponse {
    pub answers: Vec<AnswerEntry>,
}

/// The `{success, errors}` shape shared by the mutating handlers. Failures
/// are data for the caller, never faults.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct HandlerStatus {
    pub success: bool,
    pub errors: Vec<String>,
}

impl HandlerStatus {
    fn ok() -> HandlerStatus {
        HandlerStatus {
            success: true,
            errors: vec![],
        }
    }

    fn failed(errors: Vec<String>) -> HandlerStatus {
        HandlerStatus {
            success: false,
            errors,
        }
    }
}

/// The poll block: glues the pure tallying logic to the host's scoped
/// stores and exposes the four request handlers.
pub struct PollBlock<H: Host> {
    pub host: H,
}

impl<H: Host> PollBlock<H> {
    pub fn new(host: H) -> PollBlock<H> {
        PollBlock { host }
    }

    /// Tally all results into the ranked report shown to a voter.
    pub fn get_results(&mut self, voter: &str) -> ResultsResponse {
        let settings = self.host.load_settings();
        // The tally is reconciled on every access since edits never touch it.
        let tally = reconcile(&settings.answers, &self.host.load_tally());
        self.host.store_tally(&tally);
        let recorded = self.host.load_choice(voter);

        let detail = compute_results(&settings.answers, &tally, recorded.as_deref());
        ResultsResponse {
            question: self.host.render_text(&settings.question),
            results: detail.entries.iter().map(result_entry).collect(),
            total: detail.total,
            feedback: self.host.render_text(&settings.feedback),
            any_image: settings.answers.any_image(),
        }
    }

    /// The raw answers, as shown in the editor form.
    pub fn load_answers(&self) -> AnswersResponse {
        let settings = self.host.load_settings();
        AnswersResponse {
            answers: settings
                .answers
                .iter()
                .map(|a| AnswerEntry {
                    key: a.key.clone(),
                    label: a.label.clone(),
                    image: a.img.clone(),
                })
                .collect(),
        }
    }

    /// Applies an editor form submission. On success the settings are swapped
    /// as one atomic update; the tally is deliberately left untouched and is
    /// reconciled lazily on the next access.
    pub fn studio_submit(&mut self, data: &JSValue) -> HandlerStatus {
        let submission = editor_submission_from_json(data);
        match apply_editor_submission(&submission) {
            Ok(update) => {
                let mut settings = self.host.load_settings();
                settings.apply(update);
                self.host.store_settings(settings);
                HandlerStatus::ok()
            }
            Err(errors) => {
                HandlerStatus::failed(errors.iter().map(|e| e.to_string()).collect())
            }
        }
    }

    /// Records one vote for the given voter and notifies the host of the
    /// completion exactly once.
    pub fn vote(&mut self, voter: &str, data: &JSValue) -> HandlerStatus {
        let settings = self.host.load_settings();
        let tally = self.host.load_tally();
        let recorded = self.host.load_choice(voter);
        let submitted = data.get("choice").and_then(|v| v.as_str());

        match record_vote(&settings.answers, &tally, recorded.as_deref(), submitted) {
            Ok(record) => {
                self.host.store_tally(&record.tally);
                self.host.store_choice(voter, &record.choice);
                self.host.publish_progress(voter);
                HandlerStatus::ok()
            }
            Err(e) => HandlerStatus::failed(vec![e.to_string()]),
        }
    }
}

fn result_entry(e: &RankedEntry) -> ResultEntry {
    ResultEntry {
        key: e.key.clone(),
        label: e.label.clone(),
        image: e.img.clone(),
        count: e.count,
        percent: e.percent,
        is_top: e.top,
        is_last: e.last,
        is_voter_choice: e.choice,
    }
}

// The editor form arrives as a flat JSON object. question, feedback and
// poll_order are pulled out, every other string field is passed through as a
// raw (name, value) pair for the sanitizer.
fn editor_submission_from_json(data: &JSValue) -> EditorSubmission {
    let question = data
        .get("question")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let feedback = data
        .get("feedback")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let poll_order: Vec<String> = data
        .get("poll_order")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let mut fields: Vec<(String, String)> = Vec::new();
    if let Some(obj) = data.as_object() {
        for (name, value) in obj.iter() {
            if name == "question" || name == "feedback" {
                continue;
            }
            if let Some(s) = value.as_str() {
                fields.push((name.clone(), s.to_string()));
            }
        }
    }
    EditorSubmission {
        question,
        feedback,
        poll_order,
        fields,
    }
}

/// In-memory stand-in for the host runtime, used by the workbench and the
/// tests. Progress events are kept so tests can check the completion
/// tracking.
#[derive(Debug, Clone, Default)]
pub struct WorkbenchHost {
    settings: PollSettings,
    tally: Tally,
    choices: HashMap<String, String>,
    progress_events: Vec<String>,
}

impl WorkbenchHost {
    pub fn new() -> WorkbenchHost {
        WorkbenchHost::default()
    }

    pub fn progress_events(&self) -> &[String] {
        &self.progress_events
    }
}

impl Host for WorkbenchHost {
    fn load_settings(&self) -> PollSettings {
        self.settings.clone()
    }

    fn store_settings(&mut self, settings: PollSettings) {
        self.settings = settings;
    }

    fn load_tally(&self) -> Tally {
        self.tally.clone()
    }

    fn store_tally(&mut self, tally: &Tally) {
        self.tally = tally.clone();
    }

    fn load_choice(&self, voter: &str) -> Option<String> {
        self.choices.get(voter).cloned()
    }

    fn store_choice(&mut self, voter: &str, key: &str) {
        self.choices.insert(voter.to_string(), key.to_string());
    }

    fn publish_progress(&mut self, voter: &str) {
        info!("progress event for voter {:?}", voter);
        self.progress_events.push(voter.to_string());
    }
}

pub mod scenario_reader {
    use crate::block::*;

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct ScenarioAnswer {
        pub key: String,
        pub label: Option<String>,
        pub image: Option<String>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct ScenarioSettings {
        pub question: String,
        pub feedback: Option<String>,
        pub answers: Vec<ScenarioAnswer>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct ScenarioStep {
        pub action: String,
        pub voter: Option<String>,
        pub choice: Option<String>,
        pub fields: Option<JSValue>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct Scenario {
        pub name: Option<String>,
        pub settings: Option<ScenarioSettings>,
        pub tally: Option<HashMap<String, u64>>,
        pub steps: Vec<ScenarioStep>,
    }

    pub fn read_scenario(path: String) -> BlockResult<Scenario> {
        let contents =
            fs::read_to_string(&path).context(OpeningFileSnafu { path: path.clone() })?;
        let scenario: Scenario =
            serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
        debug!("read scenario: {:?}", scenario);
        Ok(scenario)
    }
}

/// Plays a scenario against a fresh in-memory host and returns the report,
/// one entry per step.
pub fn execute_scenario(scenario: &Scenario) -> BlockResult<JSValue> {
    let mut host = WorkbenchHost::new();
    if let Some(s) = &scenario.settings {
        let entries: Vec<Answer> = s
            .answers
            .iter()
            .map(|a| Answer {
                key: a.key.clone(),
                label: a.label.clone(),
                img: a.image.clone(),
            })
            .collect();
        let answers = match AnswerSet::new(entries) {
            Ok(set) => set,
            Err(e) => {
                return InvalidAnswersSnafu {
                    message: e.to_string(),
                }
                .fail()
            }
        };
        host.store_settings(PollSettings {
            question: s.question.clone(),
            feedback: s.feedback.clone().unwrap_or_default(),
            answers,
        });
    }
    if let Some(seed) = &scenario.tally {
        host.store_tally(&Tally::from_counts(
            seed.iter().map(|(k, c)| (k.clone(), *c)),
        ));
    }

    let mut block = PollBlock::new(host);
    let mut steps: Vec<JSValue> = Vec::new();
    for (idx, step) in scenario.steps.iter().enumerate() {
        let voter = step.voter.as_deref().unwrap_or("student");
        info!("step {}: {:?} by {:?}", idx, step.action, voter);
        let response: JSValue = match step.action.as_str() {
            "vote" => {
                let data = json!({ "choice": step.choice });
                serde_json::to_value(block.vote(voter, &data)).context(ParsingJsonSnafu {})?
            }
            "edit" => {
                let fields = step.fields.clone().unwrap_or_else(|| json!({}));
                serde_json::to_value(block.studio_submit(&fields))
                    .context(ParsingJsonSnafu {})?
            }
            "results" => {
                serde_json::to_value(block.get_results(voter)).context(ParsingJsonSnafu {})?
            }
            "answers" => {
                serde_json::to_value(block.load_answers()).context(ParsingJsonSnafu {})?
            }
            x => whatever!("Unknown scenario action {:?}", x),
        };
        steps.push(json!({ "action": step.action, "response": response }));
    }
    Ok(json!({ "steps": steps }))
}

/// Reads a scenario file, executes it, writes the report and optionally
/// compares it against a reference report.
pub fn run_scenario(
    path: String,
    reference: Option<String>,
    out: Option<String>,
) -> BlockResult<()> {
    let scenario = read_scenario(path)?;
    let report = execute_scenario(&scenario)?;
    let pretty = serde_json::to_string_pretty(&report).context(ParsingJsonSnafu {})?;

    match out.as_deref() {
        None | Some("stdout") => println!("{}", pretty),
        Some(p) => fs::write(p, &pretty).context(WritingReportSnafu {
            path: p.to_string(),
        })?,
    }

    if let Some(ref_path) = reference {
        let contents =
            fs::read_to_string(&ref_path).context(OpeningFileSnafu { path: ref_path })?;
        let reference_js: JSValue =
            serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
        if reference_js != report {
            warn!("Found differences with the reference report");
            let pretty_ref =
                serde_json::to_string_pretty(&reference_js).context(ParsingJsonSnafu {})?;
            print_diff(pretty_ref.as_str(), pretty.as_str(), "\n");
            whatever!("Difference detected between scenario report and reference report");
        }
    }
    Ok(())
}
