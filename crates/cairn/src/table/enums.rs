//! Append-only enum dictionaries.
//!
//! Each ENUM column owns a bidirectional `name <-> small integer` mapping,
//! built lazily as values are first seen. Indices are never reused and the
//! dictionary never shrinks, so an index written to disk stays valid for
//! the life of the table. Size is bounded by the 16-bit on-disk index.

use std::collections::HashMap;

use crate::error::{CairnError, Result};

/// Hard bound on dictionary size; the on-disk index is a signed 16-bit
/// quantity in the legacy format, so indices stop at 32767.
pub const MAX_ENUM_ENTRIES: usize = 32767;

/// Append-only bijection between enum value names and dictionary indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumDictionary {
    by_name: HashMap<String, u16>,
    by_index: Vec<String>,
}

impl EnumDictionary {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a dictionary from its entries in index order.
    pub fn from_entries(entries: Vec<String>) -> Result<Self> {
        if entries.len() > MAX_ENUM_ENTRIES {
            return Err(CairnError::LimitExceeded(format!(
                "enum dictionary has {} entries, limit is {MAX_ENUM_ENTRIES}",
                entries.len()
            )));
        }
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i as u16))
            .collect();
        Ok(Self {
            by_name,
            by_index: entries,
        })
    }

    /// Index assigned to `name`, if it has been seen.
    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// Name stored under `index`, if assigned.
    pub fn name_of(&self, index: u16) -> Option<&str> {
        self.by_index.get(index as usize).map(String::as_str)
    }

    /// Entries in index order.
    pub fn entries(&self) -> &[String] {
        &self.by_index
    }

    /// Number of assigned indices.
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    /// Returns true if no value has been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Assigns the next index to `name`.
    ///
    /// Returns the existing index if the name is already present. Exceeding
    /// [`MAX_ENUM_ENTRIES`] is a hard failure, never a wraparound.
    pub(crate) fn append(&mut self, name: &str) -> Result<u16> {
        if let Some(idx) = self.by_name.get(name) {
            return Ok(*idx);
        }
        if self.by_index.len() >= MAX_ENUM_ENTRIES {
            return Err(CairnError::LimitExceeded(format!(
                "enum dictionary full ({MAX_ENUM_ENTRIES} entries), cannot add '{name}'"
            )));
        }
        let idx = self.by_index.len() as u16;
        self.by_index.push(name.to_string());
        self.by_name.insert(name.to_string(), idx);
        Ok(idx)
    }
}
