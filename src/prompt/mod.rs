/// Prompt assembly: shape selection, context extraction, templates and filling.
///
/// A run picks one `PromptShape` up front (from the legacy boolean flags or
/// from the experiment arguments). The shape decides which fragments are
/// extracted from each `(previous, current)` record pair and in what order they
/// fill the template's positional slots.

pub mod extract;
pub mod filler;
pub mod template;

use serde::{Deserialize, Serialize};

/// Which fragment types a prompt template requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptShape {
    PersonaAndSummary,
    KnowledgeAndSummary,
    PersonaOnly,
    KnowledgeOnly,
    CurrentOnly,
    /// No template at all: the raw utterance (and summary) is the prompt.
    NoPrompt,
    Default,
}

/// Short templates cover only the current turn; long ones also carry the
/// previous turn as an in-context example.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateLength {
    Short,
    Long,
}

impl TemplateLength {
    pub fn from_shorter(use_shorter_template: bool) -> Self {
        if use_shorter_template {
            TemplateLength::Short
        } else {
            TemplateLength::Long
        }
    }
}

/// One positional slot of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Previous record's history-compression fragment.
    PreviousSummary,
    PreviousUtterance,
    PreviousResponse,
    /// Previous user persona (taken from the previous record's bot summary).
    PreviousUserPersona,
    /// Previous bot persona (taken from the previous record's user summary).
    PreviousBotPersona,
    PreviousKnowledge,
    Summary,
    CurrentUtterance,
    UserPersona,
    BotPersona,
    Knowledge,
}

use Slot::*;

impl PromptShape {
    /// Fill order of the template slots, or `None` for shapes that use no template.
    pub fn slots(self, length: TemplateLength) -> Option<&'static [Slot]> {
        let slots: &'static [Slot] = match (self, length) {
            (PromptShape::PersonaAndSummary, TemplateLength::Long) => &[
                PreviousUserPersona,
                PreviousBotPersona,
                PreviousSummary,
                PreviousUtterance,
                PreviousResponse,
                UserPersona,
                BotPersona,
                Summary,
                CurrentUtterance,
            ],
            (PromptShape::PersonaAndSummary, TemplateLength::Short) => {
                &[UserPersona, BotPersona, Summary, CurrentUtterance]
            }
            (PromptShape::KnowledgeAndSummary, TemplateLength::Long) => &[
                Knowledge,
                PreviousSummary,
                PreviousUtterance,
                PreviousResponse,
                PreviousKnowledge,
                Summary,
                CurrentUtterance,
            ],
            (PromptShape::KnowledgeAndSummary, TemplateLength::Short) => {
                &[Knowledge, Summary, CurrentUtterance]
            }
            (PromptShape::PersonaOnly, TemplateLength::Long) => &[
                PreviousUserPersona,
                PreviousBotPersona,
                PreviousUtterance,
                PreviousResponse,
                UserPersona,
                BotPersona,
                CurrentUtterance,
            ],
            (PromptShape::PersonaOnly, TemplateLength::Short) => {
                &[UserPersona, BotPersona, CurrentUtterance]
            }
            (PromptShape::KnowledgeOnly, TemplateLength::Long) => &[
                Knowledge,
                PreviousUtterance,
                PreviousResponse,
                PreviousKnowledge,
                CurrentUtterance,
            ],
            (PromptShape::KnowledgeOnly, TemplateLength::Short) => &[Knowledge, CurrentUtterance],
            (PromptShape::CurrentOnly, TemplateLength::Long) => {
                &[PreviousUtterance, PreviousResponse, CurrentUtterance]
            }
            (PromptShape::CurrentOnly, TemplateLength::Short) => &[CurrentUtterance],
            (PromptShape::NoPrompt, _) => return None,
            (PromptShape::Default, TemplateLength::Long) => &[
                PreviousSummary,
                PreviousUtterance,
                PreviousResponse,
                Summary,
                CurrentUtterance,
            ],
            (PromptShape::Default, TemplateLength::Short) => &[Summary, CurrentUtterance],
        };
        Some(slots)
    }

    /// Number of positional placeholders the template must have.
    pub fn expected_slot_count(self, length: TemplateLength) -> Option<usize> {
        self.slots(length).map(<[Slot]>::len)
    }

    pub fn uses_persona(self) -> bool {
        matches!(self, PromptShape::PersonaAndSummary | PromptShape::PersonaOnly)
    }

    pub fn uses_knowledge(self) -> bool {
        matches!(self, PromptShape::KnowledgeAndSummary | PromptShape::KnowledgeOnly)
    }

    /// Whether the emitted record carries the current summary as provenance.
    pub fn reports_summary(self, length: TemplateLength) -> bool {
        match self {
            PromptShape::CurrentOnly => false,
            PromptShape::NoPrompt => length == TemplateLength::Long,
            _ => true,
        }
    }
}

/// The boolean switches accepted by the prompt generator. Resolved once per
/// run into a `PromptConfig`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeFlags {
    pub use_shorter_template: bool,
    pub current_utterance_only: bool,
    pub bart_summary: bool,
    pub has_persona_only: bool,
    pub has_knowledge_only: bool,
    pub has_persona_and_summary: bool,
    pub has_knowledge_and_summary: bool,
    pub no_prompt_blenderbot: bool,
    pub segment_utt: bool,
}

impl ShapeFlags {
    /// Resolve the active shape in fixed priority order: persona+summary,
    /// knowledge+summary, persona-only, knowledge-only, current-only,
    /// no-prompt, default.
    pub fn shape(&self) -> PromptShape {
        if self.has_persona_and_summary {
            PromptShape::PersonaAndSummary
        } else if self.has_knowledge_and_summary {
            PromptShape::KnowledgeAndSummary
        } else if self.has_persona_only {
            PromptShape::PersonaOnly
        } else if self.has_knowledge_only {
            PromptShape::KnowledgeOnly
        } else if self.current_utterance_only {
            PromptShape::CurrentOnly
        } else if self.no_prompt_blenderbot {
            PromptShape::NoPrompt
        } else {
            PromptShape::Default
        }
    }

    pub fn resolve(&self) -> PromptConfig {
        PromptConfig {
            shape: self.shape(),
            length: TemplateLength::from_shorter(self.use_shorter_template),
            bart_summary: self.bart_summary,
            segment_utterances: self.segment_utt,
        }
    }
}

/// Per-run prompt settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub shape: PromptShape,
    pub length: TemplateLength,
    /// Relabel speaker roles in the compression fragment based on who spoke last.
    pub bart_summary: bool,
    /// Merge consecutive same-speaker lines of the compression fragment.
    pub segment_utterances: bool,
}

/// One assembled prompt plus the provenance needed to score its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub prompt: String,
    pub gold_response: String,
    pub history: String,
    pub current_utterance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personas: Option<String>,
    /// Zero-based source line index.
    pub id: usize,
}
