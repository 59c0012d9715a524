//! Builder owning the pending top-level subtree of the OSM event stream.
//!
//! Only one top-level element is ever in flight; finishing it moves the
//! buffered subtree out by value so nothing is retained between iterations.

use quick_xml::events::BytesStart;

/// A parsed start tag: element name plus its decoded attributes.
#[derive(Debug)]
pub(super) struct RawElement {
    name: String,
    attributes: Vec<(String, String)>,
}

impl RawElement {
    pub(super) fn from_start(start: &BytesStart<'_>) -> Result<Self, quick_xml::Error> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self { name, attributes })
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Owns the current top-level element and its accumulated children.
#[derive(Debug, Default)]
pub(super) struct SubtreeBuilder {
    current: Option<RawElement>,
    children: Vec<RawElement>,
}

impl SubtreeBuilder {
    pub(super) fn begin(&mut self, element: RawElement) {
        self.current = Some(element);
        self.children = Vec::new();
    }

    pub(super) fn push_child(&mut self, child: RawElement) {
        if self.current.is_some() {
            self.children.push(child);
        }
    }

    pub(super) fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub(super) fn closes(&self, name: &[u8]) -> bool {
        self.current
            .as_ref()
            .is_some_and(|element| element.name().as_bytes() == name)
    }

    /// Hand the finished subtree to the caller, leaving the builder empty.
    pub(super) fn finish(&mut self) -> Option<(RawElement, Vec<RawElement>)> {
        let element = self.current.take()?;
        Some((element, std::mem::take(&mut self.children)))
    }
}
