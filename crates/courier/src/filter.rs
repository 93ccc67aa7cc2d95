//! File-name filter built from comma-separated wildcard patterns.
//!
//! `*.csv, report_??.txt` compiles into one anchored, case-insensitive regex.
//! `*` matches any run of characters and `?` exactly one; everything else is
//! literal. An empty expression matches every name.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Invalid file filter '{expression}': {source}")]
pub struct FilterError {
    pub expression: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Debug, Clone)]
pub struct GlobFilter {
    expression: String,
    regex: Option<Regex>,
}

impl GlobFilter {
    pub fn new(expression: &str) -> Result<Self, FilterError> {
        let patterns: Vec<&str> = expression
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if patterns.is_empty() || patterns.iter().any(|p| p.chars().all(|c| c == '*')) {
            return Ok(Self {
                expression: expression.to_string(),
                regex: None,
            });
        }

        let alternatives: Vec<String> = patterns.iter().map(|p| glob_to_regex(p)).collect();
        let source = format!("^(?:{})$", alternatives.join("|"));
        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| FilterError {
                expression: expression.to_string(),
                source: e,
            })?;

        Ok(Self {
            expression: expression.to_string(),
            regex: Some(regex),
        })
    }

    /// A filter that accepts every name.
    pub fn match_all() -> Self {
        Self {
            expression: String::new(),
            regex: None,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => true,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_match_all(&self) -> bool {
        self.regex.is_none()
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }
    out
}
