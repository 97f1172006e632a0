//! Ordered device list of one archive session.

use std::sync::Arc;

use atpack_xml::Family;
use thiserror::Error;

/// Requested device name matched no registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device {requested:?} not found ({} devices available)", registry.len())]
pub struct DeviceNotFoundError {
    pub requested: String,
    /// Snapshot of the registry's device names, in registry order.
    pub registry: Arc<[String]>,
}

impl DeviceNotFoundError {
    /// Best `top` registry names for the requested one.
    pub fn suggestions(&self, top: usize) -> Vec<crate::suggest::Suggestion> {
        crate::suggest::suggest(&self.requested, &self.registry, top)
    }
}

/// One declared device and the document that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// 1-based position in the registry.
    pub index: usize,
    pub name: String,
    pub family: Family,
    /// Position of the declaring document within the session.
    pub document: usize,
}

/// Device names in declaration order; read-only once built.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
    names: Arc<[String]>,
}

impl DeviceRegistry {
    pub(crate) fn new(entries: Vec<DeviceEntry>) -> Self {
        let names: Arc<[String]> = entries.iter().map(|entry| entry.name.clone()).collect();
        Self { entries, names }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    /// Shared snapshot of all names, in registry order.
    pub fn names(&self) -> Arc<[String]> {
        Arc::clone(&self.names)
    }

    /// Entry at a 1-based index.
    pub fn get(&self, index: usize) -> Option<&DeviceEntry> {
        index
            .checked_sub(1)
            .and_then(|position| self.entries.get(position))
    }

    /// Exact match first, then a case-insensitive one.
    pub fn lookup(&self, name: &str) -> Result<&DeviceEntry, DeviceNotFoundError> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|entry| entry.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| DeviceNotFoundError {
                requested: name.to_string(),
                registry: self.names(),
            })
    }
}
