/// Prompt templates and the template table.
///
/// Templates use `{}` positional placeholders, with `{{` and `}}` for literal
/// braces. The table is a TOML file of `[[templates]]` rows; an experiment
/// selects exactly one row.

use std::fmt;
use std::path::Path;

use figment::{
    Figment,
    providers::{Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::errors::HarnessError;

/// A parsed template: literal text around `placeholder_count` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
    /// Literal segments with escapes resolved. Always one more than the
    /// number of placeholders.
    segments: Vec<String>,
}

impl TemplateSpec {
    pub fn parse(template: &str) -> Result<Self, HarnessError> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' => match chars.peek() {
                    Some((_, '{')) => {
                        chars.next();
                        current.push('{');
                    }
                    Some((_, '}')) => {
                        chars.next();
                        segments.push(std::mem::take(&mut current));
                    }
                    _ => {
                        return Err(HarnessError::TemplateSyntax {
                            position,
                            message: "expected '{}' or '{{'".into(),
                        })
                    }
                },
                '}' => match chars.peek() {
                    Some((_, '}')) => {
                        chars.next();
                        current.push('}');
                    }
                    _ => {
                        return Err(HarnessError::TemplateSyntax {
                            position,
                            message: "single '}' must be escaped as '}}'".into(),
                        })
                    }
                },
                other => current.push(other),
            }
        }
        segments.push(current);

        Ok(TemplateSpec { segments })
    }

    pub fn placeholder_count(&self) -> usize {
        self.segments.len() - 1
    }

    /// Substitute `values` into the placeholders, in order.
    pub fn fill(&self, values: &[&str]) -> Result<String, HarnessError> {
        if values.len() != self.placeholder_count() {
            return Err(HarnessError::TemplateMismatch {
                expected: values.len(),
                found: self.placeholder_count(),
            });
        }

        let capacity = self.segments.iter().map(String::len).sum::<usize>()
            + values.iter().map(|v| v.len()).sum::<usize>();
        let mut out = String::with_capacity(capacity);
        for (segment, value) in self.segments.iter().zip(values) {
            out.push_str(segment);
            out.push_str(value);
        }
        if let Some(last) = self.segments.last() {
            out.push_str(last);
        }
        Ok(out)
    }
}

impl fmt::Display for TemplateSpec {
    /// Source syntax, with literal braces escaped again.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("{}")?;
            }
            f.write_str(&segment.replace('{', "{{").replace('}', "}}"))?;
        }
        Ok(())
    }
}

/// One row of the template table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRow {
    pub model: String,
    pub prompt_type: String,
    pub few_shot: bool,
    pub background_knowledge: bool,
    /// Semicolon-separated history signal types this row applies to.
    pub history_signal_type: String,
    #[serde(default)]
    pub dataset: Option<String>,
    pub value: String,
}

impl TemplateRow {
    fn covers_signal(&self, signal: &str) -> bool {
        self.history_signal_type.split(';').any(|s| s.trim() == signal)
    }
}

/// The experiment attributes a template is selected by.
#[derive(Debug, Clone, Copy)]
pub struct TemplateQuery<'a> {
    pub model: &'a str,
    pub prompt_type: &'a str,
    pub few_shot: bool,
    pub background_knowledge: bool,
    pub history_signal: &'a str,
    pub dataset: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<TemplateRow>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateTable {
    rows: Vec<TemplateRow>,
}

impl TemplateTable {
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        if !path.exists() {
            return Err(HarnessError::Config(format!("Template table not found: {}", path.display())));
        }
        Self::from_figment(Figment::from(Toml::file(path)))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, HarnessError> {
        Self::from_figment(Figment::from(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> Result<Self, HarnessError> {
        let file: TemplateFile = figment
            .extract()
            .map_err(|e| HarnessError::Config(format!("Failed to read template table: {}", e)))?;
        Ok(TemplateTable { rows: file.templates })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Find the single row matching the query and parse its template.
    ///
    /// `peg` and `peg_cd` share the `bart` templates. The model only matters
    /// for `ppl` prompts and the dataset only with background knowledge.
    pub fn lookup(&self, query: &TemplateQuery<'_>) -> Result<TemplateSpec, HarnessError> {
        let signal = match query.history_signal {
            "peg" | "peg_cd" => "bart",
            other => other,
        };

        let matches: Vec<&TemplateRow> = self
            .rows
            .iter()
            .filter(|row| query.prompt_type != "ppl" || row.model == query.model)
            .filter(|row| row.prompt_type == query.prompt_type)
            .filter(|row| row.few_shot == query.few_shot)
            .filter(|row| row.background_knowledge == query.background_knowledge)
            .filter(|row| row.covers_signal(signal))
            .filter(|row| !query.background_knowledge || row.dataset.as_deref() == Some(query.dataset))
            .collect();

        match matches.as_slice() {
            [row] => {
                tracing::debug!(model = %row.model, signal = %signal, "Template selected");
                TemplateSpec::parse(&row.value)
            }
            _ => Err(HarnessError::TemplateLookup { matches: matches.len() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TABLE: &str = r#"
[[templates]]
model = "flan-t5"
prompt_type = "manual"
few_shot = false
background_knowledge = false
history_signal_type = "bart;full;recent-k"
value = "Summary: {}\nUtterance: {}\nResponse:"

[[templates]]
model = "flan-t5"
prompt_type = "ppl"
few_shot = false
background_knowledge = false
history_signal_type = "bart"
value = "flan {} {}"

[[templates]]
model = "T0"
prompt_type = "ppl"
few_shot = false
background_knowledge = false
history_signal_type = "bart"
value = "t0 {} {}"

[[templates]]
model = "flan-t5"
prompt_type = "manual"
few_shot = false
background_knowledge = true
history_signal_type = "bart"
dataset = "MSC"
value = "{} {} {} {}"

[[templates]]
model = "flan-t5"
prompt_type = "manual"
few_shot = false
background_knowledge = true
history_signal_type = "bart"
dataset = "TC"
value = "{} {} {}"
"#;

    fn query<'a>(model: &'a str, prompt_type: &'a str, signal: &'a str) -> TemplateQuery<'a> {
        TemplateQuery {
            model,
            prompt_type,
            few_shot: false,
            background_knowledge: false,
            history_signal: signal,
            dataset: "MSC",
        }
    }

    #[test]
    fn test_parse_counts_placeholders_and_escapes() {
        let spec = TemplateSpec::parse("{{json}}: {} and {}").unwrap();
        assert_eq!(spec.placeholder_count(), 2);
        assert_eq!(spec.fill(&["a", "b"]).unwrap(), "{json}: a and b");
        assert_eq!(TemplateSpec::parse("no slots").unwrap().placeholder_count(), 0);
    }

    #[test]
    fn test_parse_rejects_stray_braces() {
        assert!(matches!(
            TemplateSpec::parse("Summary: {0}"),
            Err(HarnessError::TemplateSyntax { position: 9, .. })
        ));
        assert!(matches!(TemplateSpec::parse("oops }"), Err(HarnessError::TemplateSyntax { .. })));
        assert!(matches!(TemplateSpec::parse("tail {"), Err(HarnessError::TemplateSyntax { .. })));
    }

    #[test]
    fn test_fill_rejects_wrong_value_count() {
        let spec = TemplateSpec::parse("{} {}").unwrap();
        let err = spec.fill(&["only one"]).unwrap_err();
        assert!(matches!(err, HarnessError::TemplateMismatch { expected: 1, found: 2 }));
    }

    #[test]
    fn test_lookup_manual_ignores_model() {
        let table = TemplateTable::from_toml_str(TABLE).unwrap();
        assert_eq!(table.len(), 5);
        let spec = table.lookup(&query("T0", "manual", "full")).unwrap();
        assert_eq!(spec.placeholder_count(), 2);
    }

    #[test]
    fn test_lookup_peg_uses_bart_rows() {
        let table = TemplateTable::from_toml_str(TABLE).unwrap();
        let spec = table.lookup(&query("T0", "ppl", "peg_cd")).unwrap();
        assert_eq!(spec.fill(&["x", "y"]).unwrap(), "t0 x y");
    }

    #[test]
    fn test_lookup_background_knowledge_filters_by_dataset() {
        let table = TemplateTable::from_toml_str(TABLE).unwrap();
        let mut q = query("flan-t5", "manual", "bart");
        q.background_knowledge = true;
        q.dataset = "TC";
        assert_eq!(table.lookup(&q).unwrap().placeholder_count(), 3);
    }

    #[test]
    fn test_lookup_requires_exactly_one_match() {
        let table = TemplateTable::from_toml_str(TABLE).unwrap();
        assert!(matches!(
            table.lookup(&query("flan-t5", "manual", "semantic-k")),
            Err(HarnessError::TemplateLookup { matches: 0 })
        ));

        let doubled = format!("{}\n{}", TABLE, TABLE);
        let table = TemplateTable::from_toml_str(&doubled).unwrap();
        assert!(matches!(
            table.lookup(&query("flan-t5", "manual", "bart")),
            Err(HarnessError::TemplateLookup { matches: 2 })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();
        let table = TemplateTable::load(file.path()).unwrap();
        assert!(!table.is_empty());

        assert!(TemplateTable::load(Path::new("/nonexistent/templates.toml")).is_err());
    }

    #[test]
    fn test_display_round_trips_source() {
        let source = "{{literal}} {}\nnext {}";
        let spec = TemplateSpec::parse(source).unwrap();
        assert_eq!(spec.to_string(), source);
        assert_eq!(TemplateSpec::parse(&spec.to_string()).unwrap(), spec);
    }
}
