/// Ground-truth context builders for the raw dataset dumps.
///
/// Turns Topical Chat JSON, PersonaChat text and Multi-Session Chat JSONL
/// dumps into context files: one `{history, current_utterance, response}` JSON
/// line per turn, with a blank line after each dialogue so that every dialogue
/// is its own session.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::SILENCE;
use crate::errors::HarnessError;
use crate::text::normalize_reply;

/// One gold turn: the utterance to answer, what came before it, and the reference reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthTurn {
    pub history: String,
    pub current_utterance: String,
    pub response: String,
}

#[derive(Debug, Deserialize)]
struct TopicalConversation {
    content: Vec<TopicalMessage>,
}

#[derive(Debug, Deserialize)]
struct TopicalMessage {
    message: String,
}

/// Build sessions from a Topical Chat dump (conversation id -> messages).
///
/// Conversations are emitted in conversation-id order. Each message after the
/// first becomes the response to the one before it; the first turn of a
/// conversation gets the silence marker as history. History holds only the
/// utterances before the current one.
pub fn topical_chat_sessions(json: &str) -> Result<Vec<Vec<GroundTruthTurn>>, HarnessError> {
    let conversations: BTreeMap<String, TopicalConversation> = serde_json::from_str(json)?;

    let sessions = conversations
        .into_values()
        .map(|conversation| {
            let utterances: Vec<String> = conversation
                .content
                .iter()
                .map(|m| normalize_reply(&m.message))
                .filter(|u| !u.is_empty())
                .collect();
            turns_from_utterances(&utterances)
        })
        .filter(|turns| !turns.is_empty())
        .collect();

    Ok(sessions)
}

fn turns_from_utterances(utterances: &[String]) -> Vec<GroundTruthTurn> {
    (1..utterances.len())
        .map(|i| GroundTruthTurn {
            history: history_text(&utterances[..i - 1]),
            current_utterance: utterances[i - 1].clone(),
            response: utterances[i].clone(),
        })
        .collect()
}

fn history_text(previous: &[String]) -> String {
    if previous.is_empty() {
        SILENCE.to_string()
    } else {
        previous.join("\n")
    }
}

/// Build sessions from a PersonaChat text dump.
///
/// Lines look like `<n> <context>\t<response>[\t...]`; a line numbered 1
/// starts a new dialogue. Lines without a tab (persona statements) are skipped.
/// Every exchange becomes a turn, with the dialogue's earlier exchanges as history.
pub fn persona_chat_sessions(text: &str) -> Vec<Vec<GroundTruthTurn>> {
    let mut sessions = Vec::new();
    let mut exchanges: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end();
        let Some((number, rest)) = line.split_once(' ') else {
            continue;
        };
        let Ok(number) = number.parse::<u32>() else {
            tracing::warn!(line = %line, "Skipping PersonaChat line without a turn number");
            continue;
        };
        if number == 1 && !exchanges.is_empty() {
            sessions.push(persona_turns(&std::mem::take(&mut exchanges)));
        }

        let mut fields = rest.split('\t');
        let (Some(context), Some(response)) = (fields.next(), fields.next()) else {
            continue;
        };
        exchanges.push((normalize_reply(context), normalize_reply(response)));
    }

    if !exchanges.is_empty() {
        sessions.push(persona_turns(&exchanges));
    }
    sessions.retain(|s| !s.is_empty());
    sessions
}

fn persona_turns(exchanges: &[(String, String)]) -> Vec<GroundTruthTurn> {
    let mut history: Vec<String> = Vec::new();
    let mut turns = Vec::with_capacity(exchanges.len());
    for (context, response) in exchanges {
        turns.push(GroundTruthTurn {
            history: history_text(&history),
            current_utterance: context.clone(),
            response: response.clone(),
        });
        history.push(context.clone());
        history.push(response.clone());
    }
    turns
}

const YOUR_PERSONA: &str = "your persona: ";
const PARTNER_PERSONA: &str = "partner's persona: ";

#[derive(Debug, Deserialize)]
struct MscMessage {
    text: String,
}

#[derive(Debug, Deserialize)]
struct MscPreviousDialog {
    dialog: Vec<MscMessage>,
}

#[derive(Debug, Deserialize)]
struct MscDialogue {
    dialog: Vec<MscMessage>,
    #[serde(default)]
    previous_dialogs: Vec<MscPreviousDialog>,
}

/// Normalize every line of a multi-line MSC text. Persona lines keep their
/// prefix and only the statement after it is normalized; silence markers are
/// left alone.
fn normalize_msc_text(text: &str) -> String {
    text.split('\n')
        .map(str::trim)
        .map(|line| {
            if let Some(rest) = line.strip_prefix(YOUR_PERSONA) {
                format!("{}{}", YOUR_PERSONA, normalize_reply(rest))
            } else if let Some(rest) = line.strip_prefix(PARTNER_PERSONA) {
                format!("{}{}", PARTNER_PERSONA, normalize_reply(rest))
            } else if line == SILENCE {
                line.to_string()
            } else {
                normalize_reply(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Raw text of a previous session, padded with a leading silence marker and,
/// when that leaves an odd number of messages, a trailing one.
fn previous_session_text(previous: &MscPreviousDialog) -> String {
    let mut messages: Vec<&str> = Vec::with_capacity(previous.dialog.len() + 2);
    messages.push(SILENCE);
    messages.extend(previous.dialog.iter().map(|m| m.text.as_str()));
    if messages.len() % 2 == 1 {
        messages.push(SILENCE);
    }
    messages.join("\n")
}

/// `(utterance, response)` pairs of the current session. The dialog is
/// prefixed with one silence marker per previous session before pairing.
fn msc_episodes(dialogue: &MscDialogue) -> Vec<(String, String)> {
    let padded: Vec<&str> = std::iter::repeat(SILENCE)
        .take(dialogue.previous_dialogs.len())
        .chain(dialogue.dialog.iter().map(|m| m.text.as_str()))
        .collect();
    padded
        .chunks_exact(2)
        .map(|pair| (normalize_msc_text(pair[0]), normalize_msc_text(pair[1])))
        .collect()
}

/// Build sessions from a Multi-Session Chat JSONL dump.
///
/// With `version == 1` the history of each turn is the utterances seen so far
/// in the session, starting from the silence marker. For later versions it
/// starts as the raw text of the first previous session and is kept at a
/// fixed length: each turn appends its utterance and drops the oldest line.
/// Dialogues without a previous session yield no turns in that mode.
pub fn multi_session_chat_sessions(jsonl: &str, version: u32) -> Result<Vec<Vec<GroundTruthTurn>>, HarnessError> {
    let mut sessions = Vec::new();
    for line in jsonl.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let dialogue: MscDialogue = serde_json::from_str(line)?;
        let episodes = msc_episodes(&dialogue);

        let rolling = version != 1;
        let mut utterances: Vec<String> = if rolling {
            match dialogue.previous_dialogs.first() {
                Some(previous) => previous_session_text(previous).split('\n').map(str::to_string).collect(),
                None => continue,
            }
        } else {
            Vec::new()
        };

        let mut turns = Vec::with_capacity(episodes.len());
        for (text, response) in episodes {
            if text == SILENCE {
                continue;
            }
            turns.push(GroundTruthTurn {
                history: if rolling { utterances.join("\n") } else { history_text(&utterances) },
                current_utterance: text.clone(),
                response,
            });
            if !text.is_empty() {
                utterances.push(text);
            }
            if rolling && !utterances.is_empty() {
                utterances.remove(0);
            }
        }
        sessions.push(turns);
    }
    sessions.retain(|s| !s.is_empty());
    Ok(sessions)
}

/// Write sessions as a context file, one blank line after each session.
/// Returns the number of turns written.
pub fn write_sessions(sessions: &[Vec<GroundTruthTurn>], path: &Path) -> Result<usize, HarnessError> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    let mut count = 0;
    for session in sessions {
        for turn in session {
            writeln!(out, "{}", serde_json::to_string(turn)?)?;
            count += 1;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(count)
}
