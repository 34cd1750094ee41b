//! Logical dataset references.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies *what* data is wanted, independent of where it lives.
///
/// A reference names a variable, optionally a timestamp and a spatial
/// tile, plus free-form tags consumed by path templates. Immutable value
/// object; the builder methods return modified copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReference {
    /// Variable name, e.g. "precip" or "spi3"
    pub variable: String,
    /// Timestamp of the wanted slice; None for static datasets
    pub time: Option<DateTime<Utc>>,
    /// Spatial tile identifier; None for untiled datasets
    pub tile: Option<String>,
    /// Additional template tags (sorted for stable encoding)
    pub tags: BTreeMap<String, String>,
}

impl DataReference {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            time: None,
            tile: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn tile(mut self, tile: impl Into<String>) -> Self {
        self.tile = Some(tile.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Copy of this reference shifted to a different timestamp.
    ///
    /// Used by the resolver when searching a tolerance window.
    pub fn with_time(&self, time: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.time = Some(time);
        copy
    }

    /// Stable string encoding, usable as a filesystem-safe cache key.
    ///
    /// Two references compare equal iff their encodings are equal.
    pub fn cache_key(&self) -> String {
        let mut key = sanitize(&self.variable);
        match self.time {
            Some(t) => {
                key.push('_');
                key.push_str(&t.format("%Y%m%dT%H%M%S").to_string());
            }
            None => key.push_str("_static"),
        }
        if let Some(tile) = &self.tile {
            key.push('_');
            key.push_str(&sanitize(tile));
        }
        for (k, v) in &self.tags {
            key.push('_');
            key.push_str(&sanitize(k));
            key.push('-');
            key.push_str(&sanitize(v));
        }
        key
    }
}

impl fmt::Display for DataReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.variable)?;
        if let Some(t) = self.time {
            write!(f, " @ {}", t.format("%Y-%m-%d %H:%M"))?;
        }
        if let Some(tile) = &self.tile {
            write!(f, " [{}]", tile)?;
        }
        Ok(())
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
