//! Keyword matching for automation rules.
//!
//! A rule carries an ordered keyword list and a match mode. A comment matches
//! the rule when *any* keyword matches under that mode (logical OR, first hit
//! short-circuits). Keyword order has no semantic effect beyond evaluation
//! cost.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::DEFAULT_FUZZY_THRESHOLD;
use crate::errors::MatchError;
use crate::storage::rule::AutomationRule;

/// How a rule's keywords are compared against comment text.
///
/// Represented as a closed enum so that adding a mode is a compile-time
/// checked extension rather than an open-ended string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Comment text equals the keyword, punctuation included.
    Exact,
    /// Comment text contains the keyword as a substring.
    Partial,
    /// Keyword is a regular expression applied to the comment text.
    Regex,
    /// Approximate similarity between comment text and keyword, gated by the
    /// rule's `fuzzy_threshold`.
    Fuzzy,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Exact => "exact",
            MatchMode::Partial => "partial",
            MatchMode::Regex => "regex",
            MatchMode::Fuzzy => "fuzzy",
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMode {
    type Err = MatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "exact" => Ok(MatchMode::Exact),
            "partial" => Ok(MatchMode::Partial),
            "regex" => Ok(MatchMode::Regex),
            "fuzzy" => Ok(MatchMode::Fuzzy),
            other => Err(MatchError::UnknownMode {
                mode: other.to_string(),
            }),
        }
    }
}

/// Split a comma-delimited keyword string into the internal keyword list.
///
/// Entries are trimmed and empty entries discarded, so `"a,, b ,"` yields
/// `["a", "b"]`.
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Decide whether `text` matches `rule`.
///
/// Returns an error only for an invalid regex pattern; callers skip the
/// offending rule and keep evaluating others.
pub fn rule_matches(rule: &AutomationRule, text: &str) -> Result<bool, MatchError> {
    for keyword in &rule.trigger_keywords {
        if keyword_matches(rule, keyword, text)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn keyword_matches(rule: &AutomationRule, keyword: &str, text: &str) -> Result<bool, MatchError> {
    match rule.match_mode {
        MatchMode::Exact => {
            if rule.case_sensitive {
                Ok(text == keyword)
            } else {
                Ok(text.to_lowercase() == keyword.to_lowercase())
            }
        }
        MatchMode::Partial => {
            if rule.case_sensitive {
                Ok(text.contains(keyword))
            } else {
                Ok(text.to_lowercase().contains(&keyword.to_lowercase()))
            }
        }
        MatchMode::Regex => {
            let pattern = RegexBuilder::new(keyword)
                .case_insensitive(!rule.case_sensitive)
                .build()
                .map_err(|e| MatchError::InvalidPattern {
                    rule_id: rule.id,
                    pattern: keyword.to_string(),
                    details: e.to_string(),
                })?;
            Ok(pattern.is_match(text))
        }
        MatchMode::Fuzzy => Ok(fuzzy_matches(rule, keyword, text)),
    }
}

/// Approximate matching via normalized Levenshtein similarity.
///
/// A keyword fires when its similarity to the whole comment clears the rule's
/// threshold, or when it appears verbatim as a substring (a short keyword
/// buried in a long comment scores poorly against the full text but should
/// still trigger).
fn fuzzy_matches(rule: &AutomationRule, keyword: &str, text: &str) -> bool {
    let (text, keyword) = if rule.case_sensitive {
        (text.to_string(), keyword.to_string())
    } else {
        (text.to_lowercase(), keyword.to_lowercase())
    };

    if text.contains(&keyword) {
        return true;
    }

    let threshold = rule
        .fuzzy_threshold
        .unwrap_or(DEFAULT_FUZZY_THRESHOLD)
        .clamp(0.1, 1.0);

    strsim::normalized_levenshtein(&text, &keyword) >= threshold
}
