//! Minimal XML element tree for EMI requests and responses.
//!
//! EMI messages are small, attribute-heavy documents. They are held as an owned
//! [`XmlElement`] tree and converted to and from bytes with `quick-xml`.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

/// XML encode/decode errors
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Syntax(#[from] quick_xml::Error),

    #[error("Invalid attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Document has no root element")]
    Empty,

    #[error("Unbalanced document: {0}")]
    Unbalanced(String),
}

/// One element: name, attributes in document order, children and text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: add an attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Builder: add a child element.
    pub fn child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn find_child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Walk a `/`-separated path of child names and return every match of the
    /// last segment, e.g. `find_all("parameters/parameter")`.
    pub fn find_all(&self, path: &str) -> Vec<&XmlElement> {
        let mut current: Vec<&XmlElement> = vec![self];
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|e| e.children.iter().filter(|c| c.name == segment))
                .collect();
        }
        current
    }

    /// Serialize to bytes. Elements without children or text are written in
    /// self-closing form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let mut writer = Writer::new(Vec::new());
        self.write_into(&mut writer)?;
        Ok(writer.into_inner())
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), XmlError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() && self.text.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        if !self.text.is_empty() {
            writer.write_event(Event::Text(BytesText::new(&self.text)))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }

    /// Parse a complete document and return its root element.
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    stack.push(Self::from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| XmlError::Unbalanced("unexpected end tag".to_string()))?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(std::str::from_utf8(&data)?);
                    }
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Unbalanced(format!(
                "{} element(s) left open",
                stack.len()
            )));
        }
        root.ok_or(XmlError::Empty)
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut element = Self::new(name);
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    fn attach(
        stack: &mut [XmlElement],
        root: &mut Option<XmlElement>,
        element: XmlElement,
    ) -> Result<(), XmlError> {
        match stack.last_mut() {
            Some(parent) => {
                parent.children.push(element);
                Ok(())
            }
            None if root.is_none() => {
                *root = Some(element);
                Ok(())
            }
            None => Err(XmlError::Unbalanced(format!(
                "second root element <{}>",
                element.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_element_is_self_closing() {
        let bytes = XmlElement::new("logoutRequest").to_bytes().unwrap();
        assert_eq!(bytes, b"<logoutRequest/>");
    }

    #[test]
    fn test_attributes_are_escaped() {
        let bytes = XmlElement::new("loginRequest")
            .attr("username", "op")
            .attr("password", "a<b&\"c\"")
            .to_bytes()
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("<loginRequest username=\"op\""));
        assert!(!text.contains("a<b"));

        let parsed = XmlElement::parse(&text).unwrap();
        assert_eq!(parsed.get("password"), Some("a<b&\"c\""));
    }

    #[test]
    fn test_parse_nested_parameters() {
        let doc = r#"<?xml version="1.0"?>
            <getParameterValuesResponse id="1">
              <parameters>
                <parameter uri="a" parameterValue="1.5"/>
                <parameter uri="b" parameterValue="on"></parameter>
              </parameters>
            </getParameterValuesResponse>"#;
        let root = XmlElement::parse(doc).unwrap();

        assert_eq!(root.name, "getParameterValuesResponse");
        assert_eq!(root.get("id"), Some("1"));
        let params = root.find_all("parameters/parameter");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].get("parameterValue"), Some("1.5"));
        assert_eq!(params[1].get("uri"), Some("b"));
    }

    #[test]
    fn test_text_content_is_collected() {
        let root = XmlElement::parse("<phrase>Clamp &amp; force</phrase>").unwrap();
        assert_eq!(root.text, "Clamp & force");
    }

    #[test]
    fn test_unbalanced_document_is_rejected() {
        assert!(XmlElement::parse("<a><b></a>").is_err());
        assert!(XmlElement::parse("<a>").is_err());
        assert!(matches!(XmlElement::parse(""), Err(XmlError::Empty)));
    }

    #[test]
    fn test_nested_roundtrip() {
        let request = XmlElement::new("getParameterValuesRequest")
            .attr("id", "1")
            .child(
                XmlElement::new("parameters")
                    .child(XmlElement::new("parameter").attr("uri", "x"))
                    .child(XmlElement::new("parameter").attr("uri", "y")),
            );
        let bytes = request.to_bytes().unwrap();
        let parsed = XmlElement::parse(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(parsed, request);
    }
}
