//! HTTP headers handling
//!
//! This module provides a type for managing HTTP headers with
//! case-insensitive lookups. Field order is preserved for serialization;
//! duplicate names follow a last-write-wins policy through `set`, while
//! `append` keeps every occurrence for multi-valued fields.

use super::{Error, Result, MAX_HEADER_FIELDS};
use std::fmt;

/// HTTP headers collection
///
/// Headers are stored in insertion order and support:
/// - Case-insensitive header name lookups
/// - Replacement in place (`set`) or accumulation (`append`)
/// - Iteration over all headers
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    /// Set a header, replacing any existing value
    ///
    /// If a header with the same name (case-insensitive) already exists,
    /// its first occurrence keeps its position and takes the new value;
    /// any further duplicates are removed. This is the duplicate-key
    /// policy for parsed request headers: last write wins.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        let mut slot = None;
        self.fields.retain_mut(|(n, v)| {
            if n.eq_ignore_ascii_case(&name) {
                if slot.is_none() {
                    *v = value.clone();
                    slot = Some(());
                    true
                } else {
                    false
                }
            } else {
                true
            }
        });

        if slot.is_none() {
            if self.fields.len() >= MAX_HEADER_FIELDS {
                return;
            }
            self.fields.push((name, value));
        }
    }

    /// Append a header, keeping existing values
    ///
    /// Used for fields that are legitimately multi-valued. Silently
    /// ignored once the field cap is reached.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.fields.len() >= MAX_HEADER_FIELDS {
            return;
        }
        self.fields.push((name.into(), value.into()));
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Check whether a header's first value equals `value`, ignoring case
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.get(name)
            .map(|v| v.eq_ignore_ascii_case(value))
            .unwrap_or(false)
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.fields.len()
    }

    /// Get the number of headers
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Clear all headers
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            if name.is_empty() {
                return Err(Error::InvalidHeader("empty header name".to_string()));
            }

            Ok((name, value))
        } else {
            Err(Error::InvalidHeader(format!("no colon in header: {}", line)))
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
