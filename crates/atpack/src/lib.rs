#![cfg_attr(docsrs, feature(doc_cfg))]
//! Archive session facade: registers the devices of decoded ATDF/EDC
//! documents, builds device models on demand and re-exports the lower crates.
//!
//! ```rust,no_run
//! use atpack::{AtPack, AtPackError};
//!
//! # fn run(xml: String) -> Result<(), AtPackError> {
//! let pack = AtPack::builder().document("ATtiny13A.atdf", xml).build()?;
//! let device = pack.get_device("attiny13a")?;
//! let specs = device.specs();
//! println!("{}: {} bytes flash, {} bytes RAM", device.name(), specs.maximum_size, specs.maximum_ram_size);
//! # Ok(())
//! # }
//! ```

pub use atpack_core as model;
pub use atpack_xml as xml;

pub mod registry;
pub mod suggest;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, trace};

use crate::model::{ClassificationTable, Device, ModelError};
use crate::xml::{Element, Family, XmlError};

pub use registry::{DeviceEntry, DeviceNotFoundError, DeviceRegistry};
pub use suggest::Suggestion;

/// Error type produced by the session facade.
#[derive(Debug, Clone, Error)]
pub enum AtPackError {
    /// A document could not be decoded or is of an unknown dialect.
    #[error("document {label}: {source}")]
    Xml {
        label: String,
        #[source]
        source: XmlError,
    },
    /// No registry entry matches the requested name.
    #[error(transparent)]
    NotFound(#[from] DeviceNotFoundError),
    /// The device is declared but its model could not be built.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// A 1-based device index outside the registry.
    #[error("device index {index} is out of range (1..={len})")]
    IndexOutOfRange { index: usize, len: usize },
}

struct Document {
    label: String,
    root: Element,
}

/// Builder collecting documents and classification overrides.
#[derive(Default)]
pub struct AtPackBuilder {
    sources: Vec<(String, Source)>,
    tables: BTreeMap<Family, ClassificationTable>,
}

enum Source {
    Text(String),
    Tree(Element),
}

impl AtPackBuilder {
    /// Add a document as XML text.
    pub fn document(mut self, label: impl Into<String>, xml: impl Into<String>) -> Self {
        self.sources.push((label.into(), Source::Text(xml.into())));
        self
    }

    /// Add an already decoded element tree.
    pub fn element(mut self, label: impl Into<String>, root: Element) -> Self {
        self.sources.push((label.into(), Source::Tree(root)));
        self
    }

    /// Replace the classification table used for one dialect.
    pub fn classification(mut self, family: Family, table: ClassificationTable) -> Self {
        self.tables.insert(family, table);
        self
    }

    /// Decode all documents and register their devices in document order.
    pub fn build(self) -> Result<AtPack, AtPackError> {
        let mut documents = Vec::with_capacity(self.sources.len());
        let mut entries = Vec::new();
        for (position, (label, source)) in self.sources.into_iter().enumerate() {
            let root = match source {
                Source::Text(xml) => xml::parse_document(&xml),
                Source::Tree(root) => Ok(root),
            };
            let wrap = |source: XmlError| AtPackError::Xml {
                label: label.clone(),
                source,
            };
            let root = root.map_err(wrap)?;
            let family = xml::detect_family(&root).map_err(wrap)?;
            let names = xml::device_names(&root).map_err(wrap)?;
            debug!(document = %label, devices = names.len(), %family, "registered document");
            for name in names {
                entries.push(DeviceEntry {
                    index: entries.len() + 1,
                    name,
                    family,
                    document: position,
                });
            }
            documents.push(Document { label, root });
        }

        let mut tables = self.tables;
        for family in [Family::DialectA, Family::DialectB] {
            tables
                .entry(family)
                .or_insert_with(|| ClassificationTable::for_family(family));
        }

        Ok(AtPack {
            documents,
            registry: DeviceRegistry::new(entries),
            tables,
            cache: Mutex::new(HashMap::new()),
        })
    }
}

/// One archive session: decoded documents, their registry and a model cache.
///
/// Shareable across threads; device models are built at most once per
/// registry entry and handed out as `Arc<Device>`.
pub struct AtPack {
    documents: Vec<Document>,
    registry: DeviceRegistry,
    tables: BTreeMap<Family, ClassificationTable>,
    cache: Mutex<HashMap<usize, Arc<Device>>>,
}

impl AtPack {
    pub fn builder() -> AtPackBuilder {
        AtPackBuilder::default()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Device names in registry order.
    pub fn device_names(&self) -> Arc<[String]> {
        self.registry.names()
    }

    /// Label of the document declaring `entry`.
    pub fn document_label(&self, entry: &DeviceEntry) -> Option<&str> {
        self.documents
            .get(entry.document)
            .map(|document| document.label.as_str())
    }

    /// Classification table in effect for a dialect.
    pub fn classification(&self, family: Family) -> ClassificationTable {
        self.tables
            .get(&family)
            .cloned()
            .unwrap_or_else(|| ClassificationTable::for_family(family))
    }

    /// Model of the named device (exact, then case-insensitive match).
    pub fn get_device(&self, name: &str) -> Result<Arc<Device>, AtPackError> {
        let entry = self.registry.lookup(name)?;
        Ok(self.build(entry)?)
    }

    /// Model of the device at a 1-based registry index.
    pub fn device_at(&self, index: usize) -> Result<Arc<Device>, AtPackError> {
        let entry = self
            .registry
            .get(index)
            .ok_or(AtPackError::IndexOutOfRange {
                index,
                len: self.registry.len(),
            })?;
        Ok(self.build(entry)?)
    }

    /// Build every registered device in parallel; results follow registry order.
    pub fn parse_all(&self) -> Vec<(&DeviceEntry, Result<Arc<Device>, ModelError>)> {
        self.registry
            .entries()
            .par_iter()
            .map(|entry| (entry, self.build(entry)))
            .collect()
    }

    /// Ranked registry names close to `name`.
    pub fn suggest(&self, name: &str, top: usize) -> Vec<Suggestion> {
        suggest::suggest(name, &self.registry.names(), top)
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<usize, Arc<Device>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build(&self, entry: &DeviceEntry) -> Result<Arc<Device>, ModelError> {
        if let Some(device) = self.cache().get(&entry.index) {
            trace!(device = %entry.name, "model cache hit");
            return Ok(Arc::clone(device));
        }

        let document = &self.documents[entry.document];
        let ir = xml::parse_device(&document.root, &entry.name)?;
        let table = self
            .tables
            .get(&entry.family)
            .cloned()
            .unwrap_or_else(|| ClassificationTable::for_family(entry.family));
        let device = Arc::new(Device::from_ir(ir, &table)?);
        debug!(
            device = %entry.name,
            document = %document.label,
            warnings = device.warnings().len(),
            "built device"
        );

        let mut cache = self.cache();
        Ok(Arc::clone(cache.entry(entry.index).or_insert(device)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Warning;
    use crate::xml::SegmentKind;

    const TWO_DEVICES: &str = r#"<avr-tools-device-file>
  <devices>
    <device name="ATtiny4" architecture="AVR8L" family="tinyAVR">
      <address-spaces>
        <address-space name="data" id="data" start="0" size="0x60">
          <memory-segment name="IO" start="0x00" size="0x40" type="io"/>
          <memory-segment name="SRAM" start="0x40" size="0x20" type="ram"/>
        </address-space>
      </address-spaces>
    </device>
    <device name="ATtiny5" architecture="AVR8L" family="tinyAVR">
      <address-spaces>
        <address-space name="data" id="data" start="0" size="0x60">
          <memory-segment name="IO" start="0x00" size="0x40" type="io"/>
          <memory-segment name="SRAM" start="0x30" size="0x20" type="ram"/>
        </address-space>
      </address-spaces>
    </device>
  </devices>
</avr-tools-device-file>"#;

    const PIC: &str = r#"<edc:PIC xmlns:edc="http://crownking/edc" edc:name="PIC10F200" edc:arch="12xxxx">
  <edc:ProgramSpace>
    <edc:CodeSector edc:beginaddr="0x0" edc:endaddr="0x100" edc:regionid="code"/>
  </edc:ProgramSpace>
  <edc:DataSpace>
    <edc:GPRDataSector edc:bank="0" edc:beginaddr="0x10" edc:endaddr="0x20" edc:regionid="gpr0"/>
    <edc:GPRDataSector edc:bank="1" edc:beginaddr="0x30" edc:endaddr="0x40" edc:regionid="gpr1" edc:shadowidref="gone"/>
    <edc:LinearDataSector edc:beginaddr="0x2000" edc:endaddr="0x2010" edc:regionid="linear"/>
  </edc:DataSpace>
</edc:PIC>"#;

    fn pack() -> AtPack {
        AtPack::builder()
            .document("tiny.atdf", TWO_DEVICES)
            .document("PIC10F200.PIC", PIC)
            .build()
            .expect("build pack")
    }

    #[test]
    fn registry_spans_documents() {
        let pack = pack();
        assert_eq!(&*pack.device_names(), ["ATtiny4", "ATtiny5", "PIC10F200"]);
        let entry = pack.registry().lookup("pic10f200").unwrap();
        assert_eq!(entry.index, 3);
        assert_eq!(entry.family, Family::DialectB);
        assert_eq!(pack.document_label(entry), Some("PIC10F200.PIC"));
    }

    #[test]
    fn devices_are_cached() {
        let pack = pack();
        let first = pack.get_device("ATtiny4").unwrap();
        let second = pack.device_at(1).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn failures_stay_per_device() {
        let pack = pack();
        let results = pack.parse_all();
        let names: Vec<_> = results.iter().map(|(entry, _)| entry.name.as_str()).collect();
        assert_eq!(names, vec!["ATtiny4", "ATtiny5", "PIC10F200"]);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(ModelError::Overlap(_))));
        assert!(results[2].1.is_ok());
        assert!(pack.get_device("ATtiny4").is_ok());
    }

    #[test]
    fn warnings_are_attached() {
        let pack = pack();
        let device = pack.get_device("PIC10F200").unwrap();
        assert_eq!(device.series(), "PIC12");
        assert_eq!(
            device.warnings(),
            &[
                Warning::DanglingShadow {
                    segment: "gpr1".into(),
                    reference: "gone".into()
                },
                Warning::Unclassified {
                    segment: "linear".into(),
                    kind: SegmentKind::Other
                },
            ]
        );
        assert_eq!(device.specs().gpr_total_size, 0x10);
    }

    #[test]
    fn classification_override() {
        let table = ClassificationTable::dialect_b().with_kind(SegmentKind::Other, "DataSpace");
        let pack = AtPack::builder()
            .document("PIC10F200.PIC", PIC)
            .classification(Family::DialectB, table)
            .build()
            .unwrap();
        let device = pack.get_device("PIC10F200").unwrap();
        assert_eq!(device.warnings().len(), 1);
        assert_eq!(device.segments().len(), 4);
    }

    #[test]
    fn lookup_errors() {
        let pack = pack();
        let AtPackError::NotFound(err) = pack.get_device("ATtiny44").unwrap_err() else {
            panic!("lookup error expected");
        };
        let suggestions = err.suggestions(2);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].name, "ATtiny4");
        assert!(matches!(
            pack.device_at(0),
            Err(AtPackError::IndexOutOfRange { index: 0, len: 3 })
        ));
        assert!(matches!(
            pack.device_at(4),
            Err(AtPackError::IndexOutOfRange { index: 4, len: 3 })
        ));
    }

    #[test]
    fn unsupported_document_is_rejected() {
        let err = AtPack::builder()
            .document("device.svd", "<device><name>STM32</name></device>")
            .build()
            .err()
            .expect("svd is not supported");
        assert!(matches!(err, AtPackError::Xml { ref label, .. } if label == "device.svd"));
    }
}
