//! Relabeling rules applied at terminal destinations.
//!
//! Rules run in configured order on each accepted series, after the
//! write is accepted and before it reaches storage. The relabeled set is
//! what gets persisted and is later queryable; the original label set is
//! gone.

use regex::Regex;
use serde::Deserialize;
use shared::wire::Series;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelabelError {
    #[error("rule #{0}: exactly one of name/value or pattern must be set")]
    AmbiguousMatch(usize),

    #[error("rule #{0}: invalid pattern: {1}")]
    BadPattern(usize, regex::Error),
}

/// Rule configuration, one YAML entry per rule.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RelabelRuleConfig {
    /// Removes matching labels from every series.
    LabelDrop {
        name: Option<String>,
        pattern: Option<String>,
    },
    /// Keeps only series whose `label` matches.
    Keep {
        label: String,
        value: Option<String>,
        pattern: Option<String>,
    },
    /// Drops series whose `label` matches.
    Drop {
        label: String,
        value: Option<String>,
        pattern: Option<String>,
    },
}

enum NameMatch {
    Exact(String),
    Pattern(Regex),
}

impl NameMatch {
    fn build(
        index: usize,
        exact: Option<String>,
        pattern: Option<String>,
    ) -> Result<Self, RelabelError> {
        match (exact, pattern) {
            (Some(exact), None) => Ok(NameMatch::Exact(exact)),
            (None, Some(pattern)) => {
                let regex = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| RelabelError::BadPattern(index, e))?;
                Ok(NameMatch::Pattern(regex))
            }
            _ => Err(RelabelError::AmbiguousMatch(index)),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            NameMatch::Exact(exact) => exact == value,
            NameMatch::Pattern(regex) => regex.is_match(value),
        }
    }
}

enum RelabelRule {
    LabelDrop(NameMatch),
    Keep { label: String, matcher: NameMatch },
    Drop { label: String, matcher: NameMatch },
}

/// Compiled, ordered rule list.
pub struct Relabeler {
    rules: Vec<RelabelRule>,
}

impl Relabeler {
    pub fn from_config(configs: &[RelabelRuleConfig]) -> Result<Self, RelabelError> {
        let mut rules = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let rule = match config.clone() {
                RelabelRuleConfig::LabelDrop { name, pattern } => {
                    RelabelRule::LabelDrop(NameMatch::build(index, name, pattern)?)
                }
                RelabelRuleConfig::Keep {
                    label,
                    value,
                    pattern,
                } => RelabelRule::Keep {
                    label,
                    matcher: NameMatch::build(index, value, pattern)?,
                },
                RelabelRuleConfig::Drop {
                    label,
                    value,
                    pattern,
                } => RelabelRule::Drop {
                    label,
                    matcher: NameMatch::build(index, value, pattern)?,
                },
            };
            rules.push(rule);
        }
        Ok(Relabeler { rules })
    }

    pub fn no_op() -> Self {
        Relabeler { rules: Vec::new() }
    }

    /// Applies all rules in order. `None` means the series was dropped.
    pub fn apply(&self, mut series: Series) -> Option<Series> {
        for rule in &self.rules {
            match rule {
                RelabelRule::LabelDrop(matcher) => {
                    series.labels.retain(|label| !matcher.matches(&label.name));
                }
                RelabelRule::Keep { label, matcher } => {
                    let keep = series
                        .label(label)
                        .map(|value| matcher.matches(value))
                        .unwrap_or(false);
                    if !keep {
                        return None;
                    }
                }
                RelabelRule::Drop { label, matcher } => {
                    let drop = series
                        .label(label)
                        .map(|value| matcher.matches(value))
                        .unwrap_or(false);
                    if drop {
                        return None;
                    }
                }
            }
        }
        Some(series)
    }
}
