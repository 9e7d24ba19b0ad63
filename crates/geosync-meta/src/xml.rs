//! Owned, mutable XML element tree.
//!
//! Parsing goes through `quick-xml` events; the tree keeps qualified element
//! names as written plus the namespace URI each prefix resolves to, so schema
//! queries can match by namespace while serialization reproduces the original
//! prefixes. Processing instructions and doctype declarations are dropped.

use crate::MetaError;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Unescaped character data.
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written, e.g. `gmd:linkage`.
    pub name: String,
    /// Namespace URI bound to the element prefix, if any.
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub has_declaration: bool,
    pub root: Element,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(p, _)| p)
    }

    pub fn local_name(&self) -> &str {
        self.name
            .split_once(':')
            .map_or(self.name.as_str(), |(_, local)| local)
    }

    /// True when the element lives in namespace `ns` with local name `local`.
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.namespace.as_deref() == Some(ns) && self.local_name() == local
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First direct child element matching namespace and local name.
    pub fn find(&self, ns: &str, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is(ns, local))
    }

    /// All element descendants in document order, excluding `self`.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    /// Concatenated direct text and CDATA children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Trimmed text of the first child element, e.g. the `gco:CharacterString`
    /// wrapped by an ISO property element.
    pub fn first_child_text(&self) -> Option<String> {
        self.child_elements()
            .next()
            .map(|e| e.text().trim().to_owned())
    }

    pub fn set_text(&mut self, value: impl Into<String>) {
        self.children = vec![Node::Text(value.into())];
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_owned(), value)),
        }
    }

    /// Apply `f` to every text and CDATA node below this element.
    pub fn map_text_deep(&mut self, f: &mut dyn FnMut(&mut String)) {
        for child in &mut self.children {
            match child {
                Node::Text(t) | Node::CData(t) => f(t),
                Node::Element(e) => e.map_text_deep(f),
                Node::Comment(_) => {}
            }
        }
    }

    /// Visit this element and every descendant, parents before children.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        f(self);
        for child in self.child_elements_mut() {
            child.walk_mut(f);
        }
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attributes {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write_to(out),
                Node::Text(t) => out.push_str(&partial_escape(t.as_str())),
                Node::CData(t) => {
                    out.push_str("<![CDATA[");
                    out.push_str(t);
                    out.push_str("]]>");
                }
                Node::Comment(t) => {
                    out.push_str("<!--");
                    out.push_str(t);
                    out.push_str("-->");
                }
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    fn resolve_in_scope(&mut self, scope: &mut Vec<(String, String)>) {
        let mark = scope.len();
        for (k, v) in &self.attributes {
            if k == "xmlns" {
                scope.push((String::new(), v.clone()));
            } else if let Some(prefix) = k.strip_prefix("xmlns:") {
                scope.push((prefix.to_owned(), v.clone()));
            }
        }
        let prefix = self.prefix().unwrap_or("");
        self.namespace = scope
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty());
        for child in self.child_elements_mut() {
            child.resolve_in_scope(scope);
        }
        scope.truncate(mark);
    }
}

fn collect_descendants<'a>(el: &'a Element, out: &mut Vec<&'a Element>) {
    for child in el.child_elements() {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn xml_err(e: impl std::fmt::Display) -> MetaError {
    MetaError::Xml(e.to_string())
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, MetaError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

impl XmlDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, MetaError> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut has_declaration = false;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                MetaError::Xml(format!("at byte {}: {e}", reader.buffer_position()))
            })?;
            match event {
                Event::Decl(_) => has_declaration = true,
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| MetaError::Xml("unbalanced end tag".to_owned()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let value = text.unescape().map_err(xml_err)?.into_owned();
                        parent.children.push(Node::Text(value));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(Node::CData(String::from_utf8_lossy(&data).into_owned()));
                    }
                }
                Event::Comment(text) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(Node::Comment(String::from_utf8_lossy(&text).into_owned()));
                    }
                }
                Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(MetaError::Xml(format!(
                "unclosed element <{}>",
                stack.last().map_or("", |e| e.name.as_str())
            )));
        }
        let root = root.ok_or_else(|| MetaError::Xml("document has no root element".to_owned()))?;
        let mut doc = Self {
            has_declaration,
            root,
        };
        doc.resolve_namespaces();
        Ok(doc)
    }

    /// Recompute `Element::namespace` for the whole tree from `xmlns`
    /// declarations. Needed after any edit that renames elements.
    pub fn resolve_namespaces(&mut self) {
        let mut scope = vec![(
            "xml".to_owned(),
            "http://www.w3.org/XML/1998/namespace".to_owned(),
        )];
        self.root.resolve_in_scope(&mut scope);
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        if self.has_declaration {
            out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        }
        self.root.write_to(&mut out);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml_string().into_bytes()
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), MetaError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(MetaError::Xml(format!(
            "multiple root elements (second: <{}>)",
            element.name
        )));
    }
    *root = Some(element);
    Ok(())
}
