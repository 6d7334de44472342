//! Session symbol tables.
//!
//! Peers may negotiate a shared table of common symbol names so repeated
//! identifiers go over the wire as a 2-byte index instead of the full name.
//! Negotiation itself happens outside this crate; the codec only consults
//! the table through this trait.

use std::collections::HashMap;

/// Bidirectional mapping between symbol names and compact indices.
///
/// Both peers must hold the same table for a session, or indexed symbols
/// will decode to the wrong names. The transport layer re-negotiates the
/// table after a reconnect for exactly this reason.
pub trait SymbolTable: Send + Sync {
    /// Index for a name, if the table knows it.
    fn name_to_index(&self, name: &str) -> Option<u16>;
    /// Name for an index, if the table knows it.
    fn index_to_name(&self, index: u16) -> Option<String>;
}

/// A fixed symbol table built from an ordered list of names.
///
/// Index `i` maps to the `i`-th name. Suitable for session tables whose
/// contents are agreed once and never mutated.
#[derive(Debug, Clone, Default)]
pub struct StaticSymbolTable {
    names: Vec<String>,
    indices: HashMap<String, u16>,
}

impl StaticSymbolTable {
    /// Build a table from names in index order. Names beyond `u16::MAX`
    /// entries are ignored; duplicates keep their first index.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for name in names {
            if table.names.len() > u16::MAX as usize {
                break;
            }
            let name = name.into();
            let index = table.names.len() as u16;
            table.indices.entry(name.clone()).or_insert(index);
            table.names.push(name);
        }
        table
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl SymbolTable for StaticSymbolTable {
    fn name_to_index(&self, name: &str) -> Option<u16> {
        self.indices.get(name).copied()
    }

    fn index_to_name(&self, index: u16) -> Option<String> {
        self.names.get(index as usize).cloned()
    }
}
