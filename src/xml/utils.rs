use crate::xml::{Error, Result};
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

/// Prefix to namespace URI bindings; the default namespace uses the empty prefix
pub type NamespaceScope = BTreeMap<String, String>;

/// One element of a parsed document, located by byte offsets into the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written
    pub name: String,
    pub local_name: String,
    pub namespace: Option<String>,
    /// Non-namespace attributes, values unescaped
    pub attributes: Vec<(String, String)>,
    /// Offset of `<`
    pub start: usize,
    /// Offset just after the start tag
    pub content_start: usize,
    /// Offset of the end tag (equals `end` for empty elements)
    pub content_end: usize,
    /// Offset just after the element
    pub end: usize,
    pub depth: usize,
    pub parent: Option<usize>,
    /// Namespaces in scope at the parent
    pub inherited: NamespaceScope,
    /// Namespaces declared on the element itself
    pub declared: NamespaceScope,
}

impl Element {
    /// Attribute value by local name
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| local_part(name) == local_name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// SAML `ID` or XML-DSig style `Id`
    pub fn id(&self) -> Option<&str> {
        self.attribute("ID").or_else(|| self.attribute("Id"))
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Element index over an XML string
#[derive(Debug, Clone)]
pub struct Document<'a> {
    source: &'a str,
    elements: Vec<Element>,
}

impl<'a> Document<'a> {
    /// Parse and index `source`. Documents carrying a DOCTYPE are rejected.
    pub fn parse(source: &'a str) -> Result<Self> {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(false);

        let mut elements: Vec<Element> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();
        let mut root_closed = false;

        loop {
            let before = reader.buffer_position() as usize;
            let event = reader.read_event()?;
            let after = reader.buffer_position() as usize;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    if root_closed {
                        return Err(Error::Xml("Content after the root element".into()));
                    }
                    let parent = stack.last().copied();
                    let inherited = parent
                        .map(|p| scope_of(&elements[p]))
                        .unwrap_or_default();
                    let mut element = new_element(e, inherited, parent, stack.len())?;
                    element.start = before;
                    element.content_start = after;
                    if matches!(event, Event::Empty(_)) {
                        element.content_end = after;
                        element.end = after;
                        elements.push(element);
                        if stack.is_empty() {
                            root_closed = true;
                        }
                    } else {
                        elements.push(element);
                        stack.push(elements.len() - 1);
                    }
                }
                Event::End(_) => {
                    let index = stack
                        .pop()
                        .ok_or_else(|| Error::Xml("Unbalanced end tag".into()))?;
                    elements[index].content_end = before;
                    elements[index].end = after;
                    if stack.is_empty() {
                        root_closed = true;
                    }
                }
                Event::DocType(_) => {
                    return Err(Error::Xml("DOCTYPE declarations are not allowed".into()));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::Xml("Unclosed element at end of document".into()));
        }
        if elements.is_empty() {
            return Err(Error::Xml("Document has no root element".into()));
        }
        Ok(Self { source, elements })
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn root(&self) -> &Element {
        &self.elements[0]
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn find(&self, predicate: impl Fn(&Element) -> bool) -> Option<&Element> {
        self.elements.iter().find(|e| predicate(e))
    }

    pub fn find_all(&self, predicate: impl Fn(&Element) -> bool) -> Vec<&Element> {
        self.elements.iter().filter(|e| predicate(e)).collect()
    }

    /// Direct children of `element`
    pub fn children<'d>(&'d self, element: &'d Element) -> impl Iterator<Item = &'d Element> + 'd {
        let index = self.index_of(element);
        self.elements
            .iter()
            .filter(move |e| e.parent.is_some() && e.parent == index)
    }

    /// Elements nested anywhere inside `element`
    pub fn descendants<'d>(&'d self, element: &'d Element) -> impl Iterator<Item = &'d Element> + 'd {
        self.elements
            .iter()
            .filter(move |e| e.start > element.start && e.end <= element.end)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        self.find(|e| e.id() == Some(id))
    }

    fn index_of(&self, element: &Element) -> Option<usize> {
        self.elements.iter().position(|e| e.start == element.start)
    }

    /// Raw text of the element as written in the source
    pub fn raw(&self, element: &Element) -> &'a str {
        &self.source[element.start..element.end]
    }

    /// The element as a self-contained fragment: namespaces inherited from
    /// ancestors are declared on its start tag
    pub fn standalone(&self, element: &Element) -> String {
        let raw = self.raw(element);
        let mut declarations = String::new();
        for (prefix, uri) in &element.inherited {
            if element.declared.contains_key(prefix) {
                continue;
            }
            if prefix.is_empty() {
                declarations.push_str(&format!(" xmlns=\"{}\"", escape(uri.as_str())));
            } else {
                declarations.push_str(&format!(" xmlns:{prefix}=\"{}\"", escape(uri.as_str())));
            }
        }
        let split = 1 + element.name.len();
        format!("{}{}{}", &raw[..split], declarations, &raw[split..])
    }

    /// Unescaped text content of a leaf element
    pub fn text(&self, element: &Element) -> Result<String> {
        let inner = &self.source[element.content_start..element.content_end];
        Ok(unescape(inner)?.into_owned())
    }

    /// Copy of the source with `element` replaced by `replacement`
    pub fn replace(&self, element: &Element, replacement: &str) -> String {
        splice(self.source, element.start..element.end, replacement)
    }
}

fn scope_of(element: &Element) -> NamespaceScope {
    let mut scope = element.inherited.clone();
    for (prefix, uri) in &element.declared {
        if uri.is_empty() {
            scope.remove(prefix);
        } else {
            scope.insert(prefix.clone(), uri.clone());
        }
    }
    scope
}

fn new_element(
    start: &BytesStart,
    inherited: NamespaceScope,
    parent: Option<usize>,
    depth: usize,
) -> Result<Element> {
    let name = std::str::from_utf8(start.name().as_ref())?.to_string();
    let mut declared = NamespaceScope::new();
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?;
        let value = attr.unescape_value()?.into_owned();
        if key == "xmlns" {
            declared.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declared.insert(prefix.to_string(), value);
        } else {
            attributes.push((key.to_string(), value));
        }
    }

    let prefix = name.split_once(':').map_or("", |(prefix, _)| prefix);
    let namespace = declared
        .get(prefix)
        .or_else(|| inherited.get(prefix))
        .filter(|uri| !uri.is_empty())
        .cloned();

    Ok(Element {
        local_name: local_part(&name).to_string(),
        name,
        namespace,
        attributes,
        start: 0,
        content_start: 0,
        content_end: 0,
        end: 0,
        depth,
        parent,
        inherited,
        declared,
    })
}

/// Replace the byte range `range` of `source`
pub fn splice(source: &str, range: std::ops::Range<usize>, replacement: &str) -> String {
    let mut out = String::with_capacity(source.len() + replacement.len());
    out.push_str(&source[..range.start]);
    out.push_str(replacement);
    out.push_str(&source[range.end..]);
    out
}

/// Strip a leading XML declaration and surrounding whitespace
pub fn strip_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start_matches('\u{feff}').trim();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}
