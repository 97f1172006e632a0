//! Load ATDF and EDC device-description XML using quick-xml and adapt both
//! dialects into one flat intermediate representation.

pub mod dialect_a;
pub mod dialect_b;
pub mod ir;
pub mod reader;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

pub use ir::{
    Access, Family, IrAddressSpace, IrBitfield, IrDevice, IrFuse, IrInterrupt, IrModule,
    IrRegister, IrRegisterGroup, IrSegment, IrSignature, IrValue, SegmentKind,
};
pub use reader::ElementReader;

/// Errors raised while turning document text into an element tree.
#[derive(Debug, Clone, Error)]
pub enum XmlError {
    #[error("xml: {0}")]
    Xml(String),
    #[error("invalid descriptor: {0}")]
    Invalid(String),
    #[error("unsupported document: root element <{0}> is neither ATDF nor EDC")]
    UnsupportedDocument(String),
}

/// Structural error raised while adapting one device.
///
/// Always scoped to a single device: other devices of the same document stay
/// parseable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device {device}: {reason} at {path}{}", raw_suffix(.raw_value))]
pub struct ParseError {
    /// Device being parsed when the error occurred.
    pub device: String,
    /// Slash separated element path, e.g. `device/address-spaces/address-space[prog]`.
    pub path: String,
    /// Offending raw attribute value, when there was one.
    pub raw_value: Option<String>,
    /// Human readable cause.
    pub reason: String,
}

impl ParseError {
    pub fn new(
        device: impl Into<String>,
        path: impl Into<String>,
        raw_value: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            path: path.into(),
            raw_value: raw_value.map(str::to_string),
            reason: reason.into(),
        }
    }
}

fn raw_suffix(raw_value: &Option<String>) -> String {
    raw_value
        .as_deref()
        .map(|raw| format!(" (raw value {raw:?})"))
        .unwrap_or_default()
}

/// Owned XML element: qualified name, attributes in document order, children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: Option<String>,
}

impl Element {
    /// Qualified element name as written, e.g. `edc:SFRDef`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Attribute value by name, ignoring empty values.
    ///
    /// An exact key match wins; otherwise the first namespaced attribute whose
    /// local part equals `name` is returned (`beginaddr` finds `edc:beginaddr`).
    pub fn attr(&self, name: &str) -> Option<&str> {
        let exact = self
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(key, _)| key.contains(':') && local_part(key) == name)
            });
        exact
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Whether a prefixed attribute with the given local name is present.
    pub fn has_namespaced_attr(&self, local: &str) -> bool {
        self.attributes
            .iter()
            .any(|(key, _)| key.contains(':') && local_part(key) == local)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Direct children with the given local name, in document order.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children
            .iter()
            .filter(move |child| child.local_name() == local)
    }

    /// First direct child with the given local name.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|child| child.local_name() == local)
    }

    /// All descendants (excluding `self`) with the given local name, depth first.
    pub fn descendants_named<'a>(&'a self, local: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        collect_named(self, local, &mut found);
        found
    }

    /// Concatenated character data directly inside this element.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

fn collect_named<'a>(element: &'a Element, local: &str, found: &mut Vec<&'a Element>) {
    for child in &element.children {
        if child.local_name() == local {
            found.push(child);
        }
        collect_named(child, local, found);
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Parse a whole document into an owned element tree rooted at its document element.
pub fn parse_document(xml: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(element_from_start(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let element = element_from_start(&e)?;
                attach(element, &mut stack, &mut root)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Xml("unbalanced closing tag".into()))?;
                attach(element, &mut stack, &mut root)?;
            }
            Ok(Event::Text(e)) => {
                let value = e.unescape().map_err(|err| XmlError::Xml(err.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.get_or_insert_with(String::new).push_str(&value);
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(XmlError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError::Xml(format!(
            "unexpected end of document inside <{}>",
            stack.last().map(Element::name).unwrap_or_default()
        )));
    }
    root.ok_or_else(|| XmlError::Invalid("document has no root element".into()))
}

fn attach(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(XmlError::Invalid("document has more than one root element".into()))
    }
}

fn element_from_start(event: &BytesStart<'_>) -> Result<Element, XmlError> {
    let name = String::from_utf8_lossy(event.name().as_ref()).to_string();
    let mut attributes = Vec::new();
    for attr in event.attributes() {
        let attr = attr.map_err(|err| XmlError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| XmlError::Xml(err.to_string()))?;
        attributes.push((key, value.to_string()));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        text: None,
    })
}

/// Identify which dialect a document root belongs to.
pub fn detect_family(root: &Element) -> Result<Family, XmlError> {
    match root.local_name() {
        "avr-tools-device-file" => Ok(Family::DialectA),
        "PIC" => Ok(Family::DialectB),
        other => Err(XmlError::UnsupportedDocument(other.to_string())),
    }
}

/// Names of the devices declared by a document, in declaration order.
pub fn device_names(root: &Element) -> Result<Vec<String>, XmlError> {
    match detect_family(root)? {
        Family::DialectA => Ok(dialect_a::device_names(root)),
        Family::DialectB => Ok(dialect_b::device_names(root)),
    }
}

/// Adapt one device of a document, dispatching on the document's dialect.
pub fn parse_device(root: &Element, device: &str) -> Result<IrDevice, ParseError> {
    match detect_family(root) {
        Ok(Family::DialectA) => dialect_a::parse(root, device),
        Ok(Family::DialectB) => dialect_b::parse(root, device),
        Err(err) => Err(ParseError::new(
            device,
            root.local_name(),
            None,
            err.to_string(),
        )),
    }
}

/// Parse a hexadecimal (`0x` prefixed) or decimal integer.
pub fn parse_int(value: &str) -> Result<u64, XmlError> {
    let trimmed = value.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
            .map_err(|err| XmlError::Invalid(format!("invalid hex value: {err}")))
    } else {
        trimmed
            .parse()
            .map_err(|err| XmlError::Invalid(format!("invalid integer: {err}")))
    }
}

/// Offset and width of a contiguous, non-zero bit mask.
pub fn contiguous_bits(mask: u64) -> Option<(u32, u32)> {
    if mask == 0 {
        return None;
    }
    let offset = mask.trailing_zeros();
    let width = (mask >> offset).trailing_ones();
    let rebuilt = if width == 64 {
        u64::MAX
    } else {
        ((1u64 << width) - 1) << offset
    };
    (rebuilt == mask).then_some((offset, width))
}

/// Contiguous runs of set bits in `mask` as `(offset, width)`, lowest first.
pub fn bit_runs(mask: u64) -> Vec<(u32, u32)> {
    let mut runs = Vec::new();
    let mut rest = mask;
    while rest != 0 {
        let offset = rest.trailing_zeros();
        let width = (rest >> offset).trailing_ones();
        runs.push((offset, width));
        if offset + width >= 64 {
            break;
        }
        rest &= !(((1u64 << width) - 1) << offset);
    }
    runs
}
