// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Content Info Attributes
//!
//! Contents carry a small attribute map used for flags (`anchor`, `hidden`)
//! and short metadata (`mime=text/plain`). In storage it is packed into one
//! string delimited by the record separator `\x1e`:
//!
//! ```text
//! "\x1eanchor\x1emime=text/plain\x1etag=a\x1etag=b\x1e"
//! ```
//!
//! Each name is either a bare flag or a key holding one or more values. A
//! flag may appear only once and never as a key at the same time; a key may
//! repeat to build a list. [`InfoMap`] enforces this by construction, the
//! packed string form only exists at the storage boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const INFO_DELIMITER: char = '\x1e';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InfoError {
    #[error("info must start and end with the record separator")]
    MissingDelimiter,

    #[error("invalid info name '{0}'")]
    InvalidName(String),

    #[error("info value for '{0}' contains the record separator")]
    InvalidValue(String),

    #[error("flag '{0}' appears more than once")]
    DuplicateFlag(String),

    #[error("'{0}' is used both as flag and as key")]
    FlagKeyConflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    Flag,
    Values(Vec<String>),
}

/// Update instruction for [`InfoMap::replace_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoUpdate {
    Remove,
    Flag,
    Value(String),
    Values(Vec<String>),
}

/// Ordered attribute map; insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoMap {
    entries: Vec<(String, InfoValue)>,
}

impl InfoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&InfoValue> {
        self.position(name).map(|idx| &self.entries[idx].1)
    }

    pub fn getflag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(InfoValue::Flag))
    }

    /// All values of a key; empty for flags and missing names.
    pub fn getlist(&self, name: &str) -> &[String] {
        match self.get(name) {
            Some(InfoValue::Values(values)) => values,
            _ => &[],
        }
    }

    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.getlist(name).first().map(String::as_str)
    }

    pub fn set_flag(&mut self, name: &str, enabled: bool) -> Result<(), InfoError> {
        if enabled {
            self.replace_one(name, InfoUpdate::Flag)
        } else {
            self.replace_one(name, InfoUpdate::Remove)
        }
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<String>) -> Result<(), InfoError> {
        self.replace_one(name, InfoUpdate::Value(value.into()))
    }

    pub fn remove(&mut self, name: &str) -> Option<InfoValue> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    /// Apply a batch of updates. Existing names keep their position, new
    /// names are appended. Nothing is changed if any update is invalid.
    pub fn replace_info<'a, I>(&mut self, updates: I) -> Result<(), InfoError>
    where
        I: IntoIterator<Item = (&'a str, InfoUpdate)>,
    {
        let mut next = self.clone();
        for (name, update) in updates {
            next.replace_one(name, update)?;
        }
        *self = next;
        Ok(())
    }

    fn replace_one(&mut self, name: &str, update: InfoUpdate) -> Result<(), InfoError> {
        validate_name(name)?;
        let value = match update {
            InfoUpdate::Remove => {
                self.remove(name);
                return Ok(());
            }
            InfoUpdate::Flag => InfoValue::Flag,
            InfoUpdate::Value(value) => InfoValue::Values(vec![value]),
            InfoUpdate::Values(values) => {
                if values.is_empty() {
                    self.remove(name);
                    return Ok(());
                }
                InfoValue::Values(values)
            }
        };
        if let InfoValue::Values(values) = &value {
            if values.iter().any(|v| v.contains(INFO_DELIMITER)) {
                return Err(InfoError::InvalidValue(name.to_string()));
            }
        }
        match self.position(name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
        Ok(())
    }

    /// Pack into the delimited storage form.
    pub fn to_legacy_string(&self) -> String {
        let mut out = String::from(INFO_DELIMITER);
        for (name, value) in &self.entries {
            match value {
                InfoValue::Flag => {
                    out.push_str(name);
                    out.push(INFO_DELIMITER);
                }
                InfoValue::Values(values) => {
                    for v in values {
                        out.push_str(name);
                        out.push('=');
                        out.push_str(v);
                        out.push(INFO_DELIMITER);
                    }
                }
            }
        }
        out
    }

    /// Parse the delimited storage form, enforcing the uniqueness rules.
    pub fn parse(raw: &str) -> Result<Self, InfoError> {
        info_field_validator(raw)?;
        let mut map = Self::new();
        for token in raw.split(INFO_DELIMITER).filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((key, value)) => {
                    validate_name(key)?;
                    match map.position(key) {
                        Some(idx) => match &mut map.entries[idx].1 {
                            InfoValue::Values(values) => values.push(value.to_string()),
                            InfoValue::Flag => return Err(InfoError::FlagKeyConflict(key.to_string())),
                        },
                        None => map
                            .entries
                            .push((key.to_string(), InfoValue::Values(vec![value.to_string()]))),
                    }
                }
                None => {
                    validate_name(token)?;
                    match map.get(token) {
                        Some(InfoValue::Flag) => return Err(InfoError::DuplicateFlag(token.to_string())),
                        Some(InfoValue::Values(_)) => {
                            return Err(InfoError::FlagKeyConflict(token.to_string()))
                        }
                        None => map.entries.push((token.to_string(), InfoValue::Flag)),
                    }
                }
            }
        }
        Ok(map)
    }
}

/// Validate a packed info string without building the map.
pub fn info_field_validator(raw: &str) -> Result<(), InfoError> {
    if !raw.starts_with(INFO_DELIMITER) || !raw.ends_with(INFO_DELIMITER) {
        return Err(InfoError::MissingDelimiter);
    }
    let mut flags: Vec<&str> = Vec::new();
    let mut keys: Vec<&str> = Vec::new();
    for token in raw.split(INFO_DELIMITER).filter(|t| !t.is_empty()) {
        match token.split_once('=') {
            Some((key, _)) => {
                validate_name(key)?;
                if flags.contains(&key) {
                    return Err(InfoError::FlagKeyConflict(key.to_string()));
                }
                keys.push(key);
            }
            None => {
                validate_name(token)?;
                if flags.contains(&token) {
                    return Err(InfoError::DuplicateFlag(token.to_string()));
                }
                if keys.contains(&token) {
                    return Err(InfoError::FlagKeyConflict(token.to_string()));
                }
                flags.push(token);
            }
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), InfoError> {
    if name.is_empty() || name.contains('=') || name.contains(INFO_DELIMITER) {
        return Err(InfoError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl fmt::Display for InfoMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_legacy_string())
    }
}

impl Serialize for InfoMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_legacy_string())
    }
}

impl<'de> Deserialize<'de> for InfoMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        InfoMap::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_info_then_read_back() {
        let mut info = InfoMap::new();
        info.replace_info([
            ("anchor", InfoUpdate::Flag),
            ("mime", InfoUpdate::Value("text/plain".into())),
            ("tag", InfoUpdate::Values(vec!["a".into(), "b".into()])),
        ])
        .unwrap();

        assert!(info.getflag("anchor"));
        assert!(!info.getflag("mime"));
        assert_eq!(info.get_first("mime"), Some("text/plain"));
        assert_eq!(info.getlist("tag"), ["a".to_string(), "b".to_string()]);

        let packed = info.to_legacy_string();
        assert!(info_field_validator(&packed).is_ok());
        assert_eq!(InfoMap::parse(&packed).unwrap(), info);
    }

    #[test]
    fn test_empty_map_packs_to_single_delimiter() {
        let info = InfoMap::new();
        assert_eq!(info.to_legacy_string(), "\x1e");
        assert!(InfoMap::parse("\x1e").unwrap().is_empty());
    }

    #[test]
    fn test_replace_keeps_position_and_removes() {
        let mut info = InfoMap::parse("\x1ea\x1eb=1\x1ec\x1e").unwrap();
        info.replace_info([("b", InfoUpdate::Value("2".into())), ("a", InfoUpdate::Remove)])
            .unwrap();
        assert_eq!(info.to_legacy_string(), "\x1eb=2\x1ec\x1e");
    }

    #[test]
    fn test_failed_batch_leaves_map_untouched() {
        let mut info = InfoMap::parse("\x1ea\x1e").unwrap();
        let result = info.replace_info([
            ("b", InfoUpdate::Flag),
            ("bad=name", InfoUpdate::Flag),
        ]);
        assert!(matches!(result, Err(InfoError::InvalidName(_))));
        assert_eq!(info.names().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_validator_rejects_duplicates() {
        assert_eq!(info_field_validator("anchor"), Err(InfoError::MissingDelimiter));
        assert_eq!(
            info_field_validator("\x1eanchor\x1eanchor\x1e"),
            Err(InfoError::DuplicateFlag("anchor".into()))
        );
        assert_eq!(
            info_field_validator("\x1eanchor\x1eanchor=1\x1e"),
            Err(InfoError::FlagKeyConflict("anchor".into()))
        );
        assert!(info_field_validator("\x1etag=1\x1etag=2\x1e").is_ok());
    }

    #[test]
    fn test_values_with_delimiter_rejected() {
        let mut info = InfoMap::new();
        assert!(matches!(
            info.set_value("mime", "a\x1eb"),
            Err(InfoError::InvalidValue(_))
        ));
    }
}
