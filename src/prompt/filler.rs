/// Template filling: one `PromptRecord` per adjacent record pair.

use std::path::Path;

use super::extract::ContextFragments;
use super::template::TemplateSpec;
use super::{PromptConfig, PromptRecord, PromptShape, Slot, TemplateLength};
use crate::dialogue::{read_context_file, record_pairs, Line, RecordPair};
use crate::errors::HarnessError;

/// Builds prompts for a whole run with one template and one resolved shape.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: Option<TemplateSpec>,
    config: PromptConfig,
}

impl PromptBuilder {
    /// Check the template against the shape's slot table.
    ///
    /// A placeholder count that differs from what the shape supplies is fatal
    /// for the run. The no-prompt shape ignores any template.
    pub fn new(template: Option<TemplateSpec>, config: PromptConfig) -> Result<Self, HarnessError> {
        match (config.shape.expected_slot_count(config.length), &template) {
            (Some(expected), Some(t)) if t.placeholder_count() != expected => {
                return Err(HarnessError::TemplateMismatch {
                    expected,
                    found: t.placeholder_count(),
                });
            }
            (Some(_), None) => {
                return Err(HarnessError::validation(
                    "template",
                    &format!("Prompt shape {:?} needs a template", config.shape),
                ));
            }
            (None, Some(_)) => {
                tracing::warn!("No-prompt shape selected, ignoring the template");
            }
            _ => {}
        }
        Ok(PromptBuilder { template, config })
    }

    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// Assemble the prompt for one pair.
    pub fn build(&self, pair: &RecordPair<'_>) -> Result<PromptRecord, HarnessError> {
        let fragments = ContextFragments::extract(pair, &self.config);
        let shape = self.config.shape;

        let prompt = match (shape.slots(self.config.length), &self.template) {
            (Some(slots), Some(template)) => {
                let values = slots
                    .iter()
                    .map(|slot| fragments.slot_value(*slot))
                    .collect::<Result<Vec<_>, _>>()?;
                template.fill(&values)?
            }
            _ => {
                let utterance = fragments.slot_value(Slot::CurrentUtterance)?.trim();
                match self.config.length {
                    TemplateLength::Short => utterance.to_string(),
                    TemplateLength::Long => {
                        format!("{}\n{}", fragments.slot_value(Slot::Summary)?, utterance)
                    }
                }
            }
        };

        let summary = if shape.reports_summary(self.config.length) {
            match shape {
                PromptShape::NoPrompt => Some(fragments.slot_value(Slot::Summary)?.trim().to_string()),
                _ => fragments.current.summary.clone(),
            }
        } else {
            None
        };

        Ok(PromptRecord {
            prompt,
            gold_response: pair.current.response.clone(),
            history: pair.current.history.trim().to_string(),
            current_utterance: pair.current.current_utterance.trim().to_string(),
            summary,
            personas: if shape.uses_persona() { fragments.personas() } else { None },
            id: pair.index,
        })
    }

    /// Prompts for every adjacent pair, in input order.
    pub fn build_prompts(&self, lines: &[Line]) -> Result<Vec<PromptRecord>, HarnessError> {
        let prompts = record_pairs(lines)
            .map(|pair| self.build(&pair))
            .collect::<Result<Vec<_>, _>>()?;
        let skipped_lines = lines.iter().filter(|l| l.is_malformed()).count();
        if skipped_lines > 0 {
            tracing::warn!(skipped_lines, "Malformed context lines dropped the prompts next to them");
        }
        tracing::info!(count = prompts.len(), skipped_lines, shape = ?self.config.shape, "Prompts assembled");
        Ok(prompts)
    }

    pub fn build_prompts_from_path(&self, path: &Path) -> Result<Vec<PromptRecord>, HarnessError> {
        let lines = read_context_file(path)?;
        self.build_prompts(&lines)
    }
}
