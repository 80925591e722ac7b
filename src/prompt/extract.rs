/// History/context extraction for a pair of adjacent dialogue records.
///
/// Derives the text fragments a prompt shape needs: the history-compression
/// fragment (optionally role-relabelled or speaker-merged), persona strings and
/// knowledge strings for both the previous and the current record. Extraction
/// only reads the records.

use super::{PromptConfig, Slot};
use crate::dialogue::{DialogueRecord, Grounding, HistorySignal, RecordPair};
use crate::errors::HarnessError;

/// Fragments derived from one record.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnFragments {
    pub summary: Option<String>,
    pub utterance: String,
    pub response: String,
    /// `(user, bot)` persona summaries with newlines flattened to `.`.
    pub persona: Option<(String, String)>,
    /// Knowledge snippets joined with tabs.
    pub knowledge: Option<String>,
}

/// Everything a template can ask for, for one `(previous, current)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextFragments {
    /// Source line of the current record, for error messages.
    pub line: usize,
    pub previous: TurnFragments,
    pub current: TurnFragments,
}

impl ContextFragments {
    pub fn extract(pair: &RecordPair<'_>, config: &PromptConfig) -> Self {
        ContextFragments {
            line: pair.index,
            previous: turn_fragments(pair.previous, config),
            current: turn_fragments(pair.current, config),
        }
    }

    /// Value for one template slot. Fails when the records lack the fragment.
    pub fn slot_value(&self, slot: Slot) -> Result<&str, HarnessError> {
        let missing = |field: &str| HarnessError::MissingField { field: field.to_string(), line: self.line };
        let value = match slot {
            Slot::PreviousSummary => self.previous.summary.as_deref().ok_or_else(|| missing("summary"))?,
            Slot::PreviousUtterance => &self.previous.utterance,
            Slot::PreviousResponse => &self.previous.response,
            // roles alternate between adjacent turns, so the previous user is
            // the previous record's bot and vice versa
            Slot::PreviousUserPersona => {
                self.previous.persona.as_ref().map(|(_, bot)| bot.as_str()).ok_or_else(|| missing("bot_summary"))?
            }
            Slot::PreviousBotPersona => {
                self.previous.persona.as_ref().map(|(user, _)| user.as_str()).ok_or_else(|| missing("user_summary"))?
            }
            Slot::PreviousKnowledge => self.previous.knowledge.as_deref().unwrap_or(""),
            Slot::Summary => self.current.summary.as_deref().ok_or_else(|| missing("summary"))?,
            Slot::CurrentUtterance => &self.current.utterance,
            Slot::UserPersona => {
                self.current.persona.as_ref().map(|(user, _)| user.as_str()).ok_or_else(|| missing("user_summary"))?
            }
            Slot::BotPersona => {
                self.current.persona.as_ref().map(|(_, bot)| bot.as_str()).ok_or_else(|| missing("bot_summary"))?
            }
            Slot::Knowledge => self.current.knowledge.as_deref().ok_or_else(|| missing("kg1_summary"))?,
        };
        Ok(value)
    }

    /// Current personas as `user\tbot`.
    pub fn personas(&self) -> Option<String> {
        self.current.persona.as_ref().map(|(user, bot)| format!("{}\t{}", user, bot))
    }
}

fn turn_fragments(record: &DialogueRecord, config: &PromptConfig) -> TurnFragments {
    let (persona, knowledge) = match &record.grounding {
        Grounding::None => (None, None),
        Grounding::Persona(p) => (Some((flatten(&p.user), flatten(&p.bot))), None),
        Grounding::Knowledge(k) => {
            let joined = k.facts.iter().map(|f| flatten(f)).collect::<Vec<_>>().join("\t");
            (None, Some(joined))
        }
    };

    TurnFragments {
        summary: compression_fragment(record, config),
        utterance: record.current_utterance.clone(),
        response: record.response.clone(),
        persona,
        knowledge,
    }
}

fn flatten(text: &str) -> String {
    text.replace('\n', ".")
}

/// The record's history-compression fragment after the configured rewrites.
pub fn compression_fragment(record: &DialogueRecord, config: &PromptConfig) -> Option<String> {
    let signal = record.signal.as_ref()?;
    let mut text = match signal {
        HistorySignal::Summary(s) => s.replace("<n>", "."),
        other => other.text().to_string(),
    };
    if config.segment_utterances {
        text = merge_speaker_runs(&text);
    }
    if config.bart_summary {
        text = relabel_roles(record, &text);
    }
    Some(text)
}

/// Relabel speaker roles in a generated summary according to who spoke last.
///
/// When the last spoken history line belongs to `Person2` the labels
/// `Person1` and `Person2` are swapped; otherwise the text is unchanged.
pub fn relabel_roles(record: &DialogueRecord, summary: &str) -> String {
    match record.last_spoken_line() {
        Some(line) if line.starts_with("Person2:") => swap_roles(summary),
        _ => summary.to_string(),
    }
}

fn swap_roles(text: &str) -> String {
    text.split("Person1")
        .map(|piece| piece.replace("Person2", "Person1"))
        .collect::<Vec<_>>()
        .join("Person2")
}

/// Merge every maximal run of consecutive lines spoken by the same speaker
/// into a single `"{speaker}: {utterances}"` line.
///
/// The speaker tag is the text before the first `:`. Empty lines are dropped
/// and a line identical to the previous line of its run is skipped. Lines
/// without a colon have no speaker and are kept as they are. The result never
/// has two adjacent lines with the same speaker, and merging it again leaves it
/// unchanged.
pub fn merge_speaker_runs(text: &str) -> String {
    struct Run<'a> {
        speaker: &'a str,
        parts: Vec<&'a str>,
        last_line: &'a str,
    }

    fn flush(run: Option<Run<'_>>, out: &mut Vec<String>) {
        if let Some(run) = run {
            if run.parts.is_empty() {
                out.push(format!("{}:", run.speaker));
            } else {
                out.push(format!("{}: {}", run.speaker, run.parts.join(" ")));
            }
        }
    }

    let mut out: Vec<String> = Vec::new();
    let mut run: Option<Run<'_>> = None;

    for line in text.split('\n').filter(|l| !l.trim().is_empty()) {
        match line.split_once(':') {
            Some((speaker, content)) => match run.as_mut() {
                Some(r) if r.speaker == speaker => {
                    if r.last_line != line {
                        let content = content.trim();
                        if !content.is_empty() {
                            r.parts.push(content);
                        }
                        r.last_line = line;
                    }
                }
                _ => {
                    flush(run.take(), &mut out);
                    let content = content.trim();
                    run = Some(Run {
                        speaker,
                        parts: if content.is_empty() { Vec::new() } else { vec![content] },
                        last_line: line,
                    });
                }
            },
            None => {
                flush(run.take(), &mut out);
                if out.last().map(String::as_str) != Some(line) {
                    out.push(line.to_string());
                }
            }
        }
    }
    flush(run, &mut out);

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::{Knowledge, Persona};
    use crate::prompt::{PromptShape, TemplateLength};
    use proptest::prelude::*;

    fn config(bart_summary: bool, segment_utterances: bool) -> PromptConfig {
        PromptConfig {
            shape: PromptShape::Default,
            length: TemplateLength::Long,
            bart_summary,
            segment_utterances,
        }
    }

    fn record(history: &str, signal: Option<HistorySignal>, grounding: Grounding) -> DialogueRecord {
        DialogueRecord {
            history: history.into(),
            current_utterance: "Person1: now".into(),
            response: "Person2: reply".into(),
            signal,
            grounding,
        }
    }

    #[test]
    fn test_summary_newline_markers_become_periods() {
        let r = record("", Some(HistorySignal::Summary("A met B<n>They talked".into())), Grounding::None);
        assert_eq!(compression_fragment(&r, &config(false, false)).as_deref(), Some("A met B.They talked"));
    }

    #[test]
    fn test_relabel_swaps_when_person2_spoke_last() {
        let r = record(
            "Person1: hi\nPerson2: hello\n__SILENCE__",
            Some(HistorySignal::Summary("Person1 asked Person2 a question.".into())),
            Grounding::None,
        );
        assert_eq!(
            compression_fragment(&r, &config(true, false)).as_deref(),
            Some("Person2 asked Person1 a question.")
        );
    }

    #[test]
    fn test_relabel_identity_when_person1_spoke_last() {
        let r = record(
            "Person2: hello\nPerson1: hi",
            Some(HistorySignal::Summary("Person1 asked Person2 a question.".into())),
            Grounding::None,
        );
        assert_eq!(
            compression_fragment(&r, &config(true, false)).as_deref(),
            Some("Person1 asked Person2 a question.")
        );
    }

    #[test]
    fn test_merge_speaker_runs() {
        let text = "Person1: hi\nPerson1: hi\nPerson1: how are you\n\nPerson2: fine\nPerson1: good\nPerson1: bye";
        assert_eq!(
            merge_speaker_runs(text),
            "Person1: hi how are you\nPerson2: fine\nPerson1: good bye"
        );
    }

    #[test]
    fn test_merge_keeps_text_after_later_colons() {
        assert_eq!(
            merge_speaker_runs("Person1: meet at 10:30\nPerson1: ok"),
            "Person1: meet at 10:30 ok"
        );
    }

    #[test]
    fn test_merge_passes_through_lines_without_speaker() {
        assert_eq!(
            merge_speaker_runs("__SILENCE__\n__SILENCE__\nPerson1: a"),
            "__SILENCE__\nPerson1: a"
        );
    }

    #[test]
    fn test_segment_applies_to_semantic_utterances() {
        let r = record(
            "",
            Some(HistorySignal::SemanticUtterances("Person2: a\nPerson2: b".into())),
            Grounding::None,
        );
        assert_eq!(compression_fragment(&r, &config(false, true)).as_deref(), Some("Person2: a b"));
    }

    #[test]
    fn test_persona_and_knowledge_fragments() {
        let previous = record(
            "",
            None,
            Grounding::Persona(Persona { user: "u-prev".into(), bot: "b-prev\nmore".into() }),
        );
        let current = record(
            "",
            None,
            Grounding::Persona(Persona { user: "u\nline".into(), bot: "b".into() }),
        );
        let pair = RecordPair { index: 3, previous: &previous, current: &current };
        let fragments = ContextFragments::extract(&pair, &config(false, false));
        assert_eq!(fragments.slot_value(Slot::PreviousUserPersona).unwrap(), "b-prev.more");
        assert_eq!(fragments.slot_value(Slot::PreviousBotPersona).unwrap(), "u-prev");
        assert_eq!(fragments.slot_value(Slot::UserPersona).unwrap(), "u.line");
        assert_eq!(fragments.personas().as_deref(), Some("u.line\tb"));
        // no knowledge on either side
        assert!(fragments.slot_value(Slot::Knowledge).is_err());
        assert_eq!(fragments.slot_value(Slot::PreviousKnowledge).unwrap(), "");

        let kg = record(
            "",
            None,
            Grounding::Knowledge(Knowledge { facts: ["k1".into(), "k2\nx".into(), String::new()] }),
        );
        let pair = RecordPair { index: 4, previous: &previous, current: &kg };
        let fragments = ContextFragments::extract(&pair, &config(false, false));
        assert_eq!(fragments.slot_value(Slot::Knowledge).unwrap(), "k1\tk2.x\t");
    }

    #[test]
    fn test_missing_summary_names_field_and_line() {
        let previous = record("", None, Grounding::None);
        let current = record("", None, Grounding::None);
        let pair = RecordPair { index: 9, previous: &previous, current: &current };
        let fragments = ContextFragments::extract(&pair, &config(false, false));
        let err = fragments.slot_value(Slot::Summary).unwrap_err();
        assert!(matches!(err, HarnessError::MissingField { ref field, line: 9 } if field == "summary"));
    }

    #[test]
    fn test_extraction_leaves_records_untouched() {
        let previous = record("Person2: x", Some(HistorySignal::Summary("Person1 left".into())), Grounding::None);
        let current = previous.clone();
        let before = (previous.clone(), current.clone());
        let pair = RecordPair { index: 1, previous: &previous, current: &current };
        let _ = ContextFragments::extract(&pair, &config(true, true));
        assert_eq!((previous, current), before);
    }

    proptest! {
        #[test]
        fn test_merge_is_idempotent(lines in prop::collection::vec("(Person[12]|Bot|User)?:?[a-z :]{0,12}", 0..12)) {
            let text = lines.join("\n");
            let once = merge_speaker_runs(&text);
            prop_assert_eq!(merge_speaker_runs(&once), once);
        }

        #[test]
        fn test_merge_has_no_adjacent_same_speaker(lines in prop::collection::vec("(Person1|Person2): [a-z ]{0,10}", 0..12)) {
            let merged = merge_speaker_runs(&lines.join("\n"));
            let tags: Vec<&str> = merged.lines().filter_map(|l| l.split_once(':').map(|(t, _)| t)).collect();
            for w in tags.windows(2) {
                prop_assert_ne!(w[0], w[1]);
            }
        }
    }
}
