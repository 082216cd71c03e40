//! Minimal XML tree + writer for vim25 SOAP envelopes.
//!
//! Responses are parsed into an owned [`XmlNode`] tree with namespace
//! prefixes stripped from element names. Requests are built with
//! [`XmlWriter`], which escapes text and knows the vim25 conventions for
//! managed object references and `xsi:type` annotations.

use crate::error::{VsphereError, VsphereResult};
use crate::types::MoRef;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    /// Local element name (prefix stripped)
    pub name: String,
    /// Attributes with their qualified names (`xsi:type`, `type`)
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a chain of child names.
    pub fn path(&self, names: &[&str]) -> Option<&XmlNode> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `xsi:type` annotation, whatever prefix the server bound it to.
    pub fn xsi_type(&self) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.ends_with(":type"))
            .map(|(_, v)| v.as_str())
    }

    /// Interpret this element as a managed object reference.
    pub fn as_moref(&self) -> Option<MoRef> {
        let type_name = self.attr("type")?;
        Some(MoRef::new(type_name, self.text.trim()))
    }

    pub fn parse_child<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.child_text(name).and_then(|t| t.trim().parse().ok())
    }
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    match s.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.into_owned(),
    }
}

fn start_node(e: &BytesStart<'_>) -> VsphereResult<XmlNode> {
    let mut node = XmlNode {
        name: local_name(e.name().as_ref()),
        ..XmlNode::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|err| VsphereError::parse(format!("Bad XML attribute: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        node.attrs.push((key, value));
    }
    Ok(node)
}

/// Parse a whole document and return its root element.
pub fn parse(doc: &str) -> VsphereResult<XmlNode> {
    let mut reader = Reader::from_str(doc);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(start_node(&e)?),
            Event::Empty(e) => {
                let node = start_node(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::Text(t) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| VsphereError::parse("Unbalanced XML end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(VsphereError::parse("Truncated XML document"));
    }
    root.ok_or_else(|| VsphereError::parse("Empty XML document"))
}

/// Append-only writer for request bodies.
#[derive(Debug, Default)]
pub struct XmlWriter {
    buf: String,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, tag: &str) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push('>');
        self
    }

    /// Open an element annotated with `xsi:type`.
    pub fn open_typed(&mut self, tag: &str, xsi_type: &str) -> &mut Self {
        self.buf
            .push_str(&format!("<{tag} xsi:type=\"{}\">", escape(xsi_type)));
        self
    }

    pub fn close(&mut self, tag: &str) -> &mut Self {
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
        self
    }

    pub fn text(&mut self, tag: &str, value: &str) -> &mut Self {
        self.buf
            .push_str(&format!("<{tag}>{}</{tag}>", escape(value)));
        self
    }

    pub fn display(&mut self, tag: &str, value: impl std::fmt::Display) -> &mut Self {
        self.text(tag, &value.to_string())
    }

    pub fn opt_display<T: std::fmt::Display>(&mut self, tag: &str, value: Option<T>) -> &mut Self {
        if let Some(v) = value {
            self.display(tag, v);
        }
        self
    }

    pub fn moref(&mut self, tag: &str, moref: &MoRef) -> &mut Self {
        self.buf.push_str(&format!(
            "<{tag} type=\"{}\">{}</{tag}>",
            escape(&moref.type_name),
            escape(&moref.value)
        ));
        self
    }

    pub fn empty(&mut self, tag: &str) -> &mut Self {
        self.buf.push_str(&format!("<{tag}/>"));
        self
    }

    pub fn empty_typed(&mut self, tag: &str, xsi_type: &str) -> &mut Self {
        self.buf
            .push_str(&format!("<{tag} xsi:type=\"{}\"/>", escape(xsi_type)));
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}
