use crate::engine::record::cell_at;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Case-insensitive substring match over the joined `columns`.
    Contains,
    /// Truthy check of the single flag column.
    Flag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub destination: String,
    pub kind: RuleKind,
    pub columns: Vec<u32>,
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Phrases that cancel an otherwise positive match, checked first.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub exclude_columns: Option<Vec<u32>>,
}

const TRUTHY: [&str; 8] = ["true", "yes", "y", "1", "x", "checked", "✓", "✔"];

pub fn is_truthy(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    TRUTHY.contains(&lower.as_str())
}

fn joined_lower(cells: &[String], columns: &[u32]) -> String {
    columns
        .iter()
        .map(|col| cell_at(cells, *col))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .map(|needle| needle.trim().to_lowercase())
        .any(|needle| !needle.is_empty() && haystack.contains(&needle))
}

impl Rule {
    pub fn matches(&self, cells: &[String]) -> bool {
        if !self.exclude.is_empty() {
            let columns = self.exclude_columns.as_deref().unwrap_or(&self.columns);
            if contains_any(&joined_lower(cells, columns), &self.exclude) {
                return false;
            }
        }
        match self.kind {
            RuleKind::Contains => contains_any(&joined_lower(cells, &self.columns), &self.patterns),
            RuleKind::Flag => self
                .columns
                .first()
                .is_some_and(|col| is_truthy(cell_at(cells, *col))),
        }
    }
}

/// Destination of the first matching rule, or `None`.
pub fn classify<'a>(cells: &[String], rules: &'a [Rule]) -> Option<&'a str> {
    rules
        .iter()
        .find(|rule| rule.matches(cells))
        .map(|rule| rule.destination.as_str())
}
