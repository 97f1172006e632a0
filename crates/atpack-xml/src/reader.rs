//! Device-scoped attribute access over the owned element tree.
//!
//! Every lookup knows which device and which element path it belongs to, so a
//! failed conversion turns straight into a [`ParseError`] with full context.

use crate::{parse_int, Element, ParseError};

/// Cursor over one element of one device's raw subtree.
#[derive(Debug, Clone)]
pub struct ElementReader<'a> {
    device: &'a str,
    path: String,
    element: &'a Element,
}

impl<'a> ElementReader<'a> {
    /// Reader positioned at `element`, whose path segment is `segment`.
    pub fn root(device: &'a str, segment: impl Into<String>, element: &'a Element) -> Self {
        Self {
            device,
            path: segment.into(),
            element,
        }
    }

    /// Reader for a child element; the path segment is `local[name]` when the
    /// child carries a `name` attribute.
    pub fn child(&self, element: &'a Element) -> Self {
        let segment = match element.attr("name") {
            Some(name) => format!("{}[{}]", element.local_name(), name),
            None => element.local_name().to_string(),
        };
        Self {
            device: self.device,
            path: format!("{}/{}", self.path, segment),
            element,
        }
    }

    pub fn element(&self) -> &'a Element {
        self.element
    }

    pub fn device(&self) -> &'a str {
        self.device
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Optional attribute; empty values read as absent.
    pub fn optional(&self, name: &str) -> Option<&'a str> {
        self.element.attr(name)
    }

    /// Attribute that must be present.
    pub fn required(&self, name: &str) -> Result<&'a str, ParseError> {
        self.element
            .attr(name)
            .ok_or_else(|| self.error(None, format!("missing required attribute `{name}`")))
    }

    /// Required integer attribute, hexadecimal (`0x`) or decimal.
    pub fn required_int(&self, name: &str) -> Result<u64, ParseError> {
        let raw = self.required(name)?;
        self.convert(name, raw)
    }

    /// Optional integer attribute; present but unparsable is still an error.
    pub fn optional_int(&self, name: &str) -> Result<Option<u64>, ParseError> {
        self.optional(name)
            .map(|raw| self.convert(name, raw))
            .transpose()
    }

    /// Required address attribute that must be written as `0x` hexadecimal.
    pub fn required_hex(&self, name: &str) -> Result<u64, ParseError> {
        let raw = self.required(name)?;
        self.hex(name, raw)
    }

    /// Optional `0x` hexadecimal attribute.
    pub fn optional_hex(&self, name: &str) -> Result<Option<u64>, ParseError> {
        self.optional(name).map(|raw| self.hex(name, raw)).transpose()
    }

    /// Whether the element carries a namespaced attribute with this local name.
    pub fn has_namespaced(&self, local: &str) -> bool {
        self.element.has_namespaced_attr(local)
    }

    /// Build a [`ParseError`] located at this element.
    pub fn error(&self, raw_value: Option<&str>, reason: impl Into<String>) -> ParseError {
        ParseError::new(self.device, self.path.clone(), raw_value, reason)
    }

    fn convert(&self, name: &str, raw: &str) -> Result<u64, ParseError> {
        parse_int(raw).map_err(|err| self.error(Some(raw), format!("attribute `{name}`: {err}")))
    }

    fn hex(&self, name: &str, raw: &str) -> Result<u64, ParseError> {
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| {
                self.error(
                    Some(raw),
                    format!("attribute `{name}` must be a 0x-prefixed hexadecimal value"),
                )
            })?;
        u64::from_str_radix(digits, 16).map_err(|err| {
            self.error(
                Some(raw),
                format!("attribute `{name}`: invalid hex value: {err}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_document;

    const FIXTURE: &str = r#"
        <device name="ATtiny13">
            <address-space name="prog" start="0x0000" size="1024" bad="12z" edc:shadowidref="gpr0"/>
            <segment edc:beginaddr="0x20" edc:endaddr="80"/>
        </device>
    "#;

    #[test]
    fn child_paths_include_names() {
        let root = parse_document(FIXTURE).unwrap();
        let reader = ElementReader::root("ATtiny13", "device", &root);
        let space = reader.child(root.child("address-space").unwrap());
        assert_eq!(space.path(), "device/address-space[prog]");
        let segment = reader.child(root.child("segment").unwrap());
        assert_eq!(segment.path(), "device/segment");
    }

    #[test]
    fn integer_attributes() {
        let root = parse_document(FIXTURE).unwrap();
        let reader = ElementReader::root("ATtiny13", "device", &root);
        let space = reader.child(root.child("address-space").unwrap());
        assert_eq!(space.required_int("start").unwrap(), 0);
        assert_eq!(space.required_int("size").unwrap(), 1024);
        assert_eq!(space.optional_int("pagesize").unwrap(), None);
        assert!(space.has_namespaced("shadowidref"));

        let err = space.required_int("bad").unwrap_err();
        assert_eq!(err.device, "ATtiny13");
        assert_eq!(err.path, "device/address-space[prog]");
        assert_eq!(err.raw_value.as_deref(), Some("12z"));

        let err = space.required("endianness").unwrap_err();
        assert!(err.reason.contains("endianness"));
        assert_eq!(err.raw_value, None);
    }

    #[test]
    fn hex_attributes_require_prefix() {
        let root = parse_document(FIXTURE).unwrap();
        let reader = ElementReader::root("PIC16F84A", "PIC", &root);
        let segment = reader.child(root.child("segment").unwrap());
        assert_eq!(segment.required_hex("beginaddr").unwrap(), 0x20);
        let err = segment.required_hex("endaddr").unwrap_err();
        assert_eq!(err.raw_value.as_deref(), Some("80"));
        assert!(err.to_string().contains("PIC16F84A"));
    }
}
