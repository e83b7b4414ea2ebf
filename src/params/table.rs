//! Parameter catalog as reported by the vehicle

use std::collections::BTreeMap;

use serde::Serialize;

/// MAV_PARAM_TYPE of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Real32,
    Other(u8),
}

impl From<u8> for ParamType {
    fn from(value: u8) -> Self {
        match value {
            1 => ParamType::Uint8,
            2 => ParamType::Int8,
            3 => ParamType::Uint16,
            4 => ParamType::Int16,
            5 => ParamType::Uint32,
            6 => ParamType::Int32,
            9 => ParamType::Real32,
            other => ParamType::Other(other),
        }
    }
}

impl ParamType {
    /// Whether the vehicle stores this parameter as an integer
    pub fn is_integer(self) -> bool {
        !matches!(self, ParamType::Real32 | ParamType::Other(_))
    }
}

/// One catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamEntry {
    /// Value as carried on the wire (always float)
    pub value: f32,
    /// Raw MAV_PARAM_TYPE
    pub param_type: u8,
    /// Index as last reported; `u16::MAX` for unindexed echoes
    pub index: u16,
}

impl ParamEntry {
    pub fn kind(&self) -> ParamType {
        ParamType::from(self.param_type)
    }
}

/// Name-ordered parameter catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParamTable {
    entries: BTreeMap<String, ParamEntry>,
}

impl ParamTable {
    /// Insert or update an entry
    ///
    /// An unindexed echo keeps the index learned during download.
    pub fn insert(&mut self, name: String, mut entry: ParamEntry) {
        if entry.index == u16::MAX {
            if let Some(existing) = self.entries.get(&name) {
                entry.index = existing.index;
            }
        }
        self.entries.insert(name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&ParamEntry> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<f32> {
        self.entries.get(name).map(|e| e.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamEntry)> {
        self.entries.iter()
    }
}
