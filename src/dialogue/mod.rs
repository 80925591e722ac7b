/// Dialogue context records and the session-aware record stream.
///
/// A context file holds one JSON record per line. Consecutive records form a
/// session; a blank or unparseable line is a session boundary. Prompt
/// assembly always works on a `(previous, current)` pair of adjacent records,
/// so the stream preserves input order and turns boundaries into explicit
/// `Line::Boundary` values.

pub mod ground_truth;

use std::path::Path;

use serde::Deserialize;

use crate::errors::HarnessError;

/// Placeholder history used when a turn has no prior utterances, and the
/// marker MSC uses for the time gap between sessions.
pub const SILENCE: &str = "__SILENCE__";

/// History-compression fragment carried by a record. Exactly one kind is
/// present in a given context file.
#[derive(Debug, Clone, PartialEq)]
pub enum HistorySignal {
    /// Generated summary of the history (`summary` field).
    Summary(String),
    /// Last-k raw utterances (`past_utterance` field).
    PastUtterances(String),
    /// Top-k semantically retrieved utterances (`semantic_utterances` field).
    SemanticUtterances(String),
}

impl HistorySignal {
    pub fn text(&self) -> &str {
        match self {
            HistorySignal::Summary(s)
            | HistorySignal::PastUtterances(s)
            | HistorySignal::SemanticUtterances(s) => s,
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            HistorySignal::Summary(_) => "summary",
            HistorySignal::PastUtterances(_) => "past_utterance",
            HistorySignal::SemanticUtterances(_) => "semantic_utterances",
        }
    }
}

/// Short biographical facts about both speakers.
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub user: String,
    pub bot: String,
}

/// Up to three summarized background-knowledge snippets.
#[derive(Debug, Clone, PartialEq)]
pub struct Knowledge {
    pub facts: [String; 3],
}

/// Conditioning context attached to a record, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum Grounding {
    None,
    Persona(Persona),
    Knowledge(Knowledge),
}

/// One dialogue turn as read from a context file.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueRecord {
    /// Newline-joined prior utterances, or `__SILENCE__`.
    pub history: String,
    pub current_utterance: String,
    /// Gold response (`response` or `gold_response` in the file).
    pub response: String,
    pub signal: Option<HistorySignal>,
    pub grounding: Grounding,
}

/// Wire shape of a context line. Unknown keys (e.g. `id`) are ignored.
#[derive(Debug, Deserialize)]
struct RawRecord {
    history: String,
    current_utterance: String,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    gold_response: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    past_utterance: Option<String>,
    #[serde(default)]
    semantic_utterances: Option<String>,
    #[serde(default)]
    user_summary: Option<String>,
    #[serde(default)]
    bot_summary: Option<String>,
    #[serde(default)]
    kg1_summary: Option<String>,
    #[serde(default)]
    kg2_summary: Option<String>,
    #[serde(default)]
    kg3_summary: Option<String>,
}

impl DialogueRecord {
    /// Parse and validate one context line. `line` is only used for error messages.
    pub fn from_json_line(text: &str, line: usize) -> Result<Self, HarnessError> {
        let raw: RawRecord = serde_json::from_str(text)?;

        let response = raw
            .response
            .or(raw.gold_response)
            .ok_or_else(|| HarnessError::MissingField { field: "response".into(), line })?;

        let signal = if let Some(s) = raw.summary {
            Some(HistorySignal::Summary(s))
        } else if let Some(s) = raw.past_utterance {
            Some(HistorySignal::PastUtterances(s))
        } else {
            raw.semantic_utterances.map(HistorySignal::SemanticUtterances)
        };

        let grounding = match (raw.user_summary, raw.bot_summary, raw.kg1_summary) {
            (Some(user), Some(bot), _) => Grounding::Persona(Persona { user, bot }),
            (Some(_), None, _) => {
                return Err(HarnessError::MissingField { field: "bot_summary".into(), line })
            }
            (None, Some(_), _) => {
                return Err(HarnessError::MissingField { field: "user_summary".into(), line })
            }
            (None, None, Some(kg1)) => Grounding::Knowledge(Knowledge {
                facts: [
                    kg1,
                    raw.kg2_summary.unwrap_or_default(),
                    raw.kg3_summary.unwrap_or_default(),
                ],
            }),
            (None, None, None) => Grounding::None,
        };

        Ok(DialogueRecord {
            history: raw.history,
            current_utterance: raw.current_utterance,
            response,
            signal,
            grounding,
        })
    }

    /// The last history line that is not the silence marker, if any.
    pub fn last_spoken_line(&self) -> Option<&str> {
        self.history
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty() && !l.starts_with(SILENCE))
    }
}

/// One line of a context file.
#[derive(Debug, Clone)]
pub enum Line {
    Record { index: usize, record: DialogueRecord },
    /// Blank line; the next record starts a new session.
    Boundary { index: usize },
    /// Line that could not be read as a record. Acts as a boundary, so the
    /// prompts on either side of it are lost.
    Malformed { index: usize, error: String },
}

impl Line {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Line::Malformed { .. })
    }
}

/// Split file content into records and session boundaries.
///
/// Malformed lines (bad JSON or a record missing a required field) are logged
/// and kept as `Line::Malformed`, which never pairs two records across it.
pub fn parse_lines(content: &str) -> Vec<Line> {
    content
        .lines()
        .enumerate()
        .map(|(index, text)| {
            let text = text.trim();
            if text.is_empty() {
                return Line::Boundary { index };
            }
            match DialogueRecord::from_json_line(text, index) {
                Ok(record) => Line::Record { index, record },
                Err(e) => {
                    tracing::warn!(line = index, error = %e, "Malformed context line, treating as session boundary");
                    Line::Malformed { index, error: e.to_string() }
                }
            }
        })
        .collect()
}

/// Read and parse a context file.
pub fn read_context_file(path: &Path) -> Result<Vec<Line>, HarnessError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_lines(&content))
}

/// Two adjacent records of the same session.
#[derive(Debug, Clone, Copy)]
pub struct RecordPair<'a> {
    /// Source line index of `current`.
    pub index: usize,
    pub previous: &'a DialogueRecord,
    pub current: &'a DialogueRecord,
}

/// Yield every `(previous, current)` pair of adjacent records, in input order.
///
/// The first line of a file and any record right after a boundary never
/// appear as `current`.
pub fn record_pairs(lines: &[Line]) -> impl Iterator<Item = RecordPair<'_>> {
    lines.windows(2).filter_map(|w| match (&w[0], &w[1]) {
        (Line::Record { record: previous, .. }, Line::Record { index, record: current }) => {
            Some(RecordPair { index: *index, previous, current })
        }
        _ => None,
    })
}
