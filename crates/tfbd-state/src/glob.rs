//! Segment-aware glob matching for tag names.
//!
//! `*` matches any run of characters except `/`, `?` matches one such
//! character. Everything else is literal.

use regex::Regex;

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Compiled glob pattern.
#[derive(Debug, Clone)]
pub struct TagGlob {
    pattern: String,
    regex: Regex,
}

impl TagGlob {
    pub fn new(pattern: &str) -> StorageResult<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr).map_err(|_| StorageError::InvalidName {
            name: pattern.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Longest literal `/`-terminated prefix, used to narrow remote fetches.
    ///
    /// `plan/dev/*/abc` yields `plan/dev/`.
    pub fn literal_prefix(&self) -> &str {
        let wild = self
            .pattern
            .find(|c| c == '*' || c == '?')
            .unwrap_or(self.pattern.len());
        match self.pattern[..wild].rfind('/') {
            Some(idx) => &self.pattern[..=idx],
            None => "",
        }
    }
}
