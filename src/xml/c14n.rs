use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::str;

use crate::xml::{Error, Result};

const XML_NS: &[u8] = b"http://www.w3.org/XML/1998/namespace";

type Scope = BTreeMap<Vec<u8>, Vec<u8>>;

/// Exclusive XML Canonicalization (without comments) of a self-contained
/// element, with an optional `InclusiveNamespaces` prefix list
pub fn canonicalize(xml: impl AsRef<str>, inclusive_ns: &[String]) -> Result<String> {
    let mut reader = Reader::from_str(xml.as_ref());
    reader.config_mut().trim_text(false);
    reader.config_mut().expand_empty_elements = true;

    let mut out = String::with_capacity(xml.as_ref().len());

    // Stack of declared namespace maps
    let mut ns_declared_stack: Vec<Scope> = vec![BTreeMap::new()];
    // Stack of rendered namespace maps
    let mut ns_rendered_stack: Vec<Scope> = vec![BTreeMap::new()];
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                handle_start(
                    &mut out,
                    &e,
                    &mut ns_declared_stack,
                    &mut ns_rendered_stack,
                    inclusive_ns,
                )?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                out.push_str("</");
                out.push_str(str::from_utf8(e.name().as_ref())?);
                out.push('>');
                ns_declared_stack.pop();
                ns_rendered_stack.pop();
            }
            // Text outside the document element is not part of the output
            Event::Text(e) if depth > 0 => {
                let text = e.unescape()?;
                let normalized = normalize_line_endings(text.as_bytes());
                out.push_str(&escape_text_value(&normalized)?);
            }
            Event::CData(e) if depth > 0 => {
                let v = e.into_inner();
                let normalized = normalize_line_endings(&v);
                out.push_str(&escape_text_value(&normalized)?);
            }
            Event::DocType(_) => {
                return Err(Error::Xml("DOCTYPE declarations are not allowed".into()));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Normalize line endings to LF as per C14N spec
fn normalize_line_endings(text: &[u8]) -> Cow<'_, [u8]> {
    if !text.contains(&b'\r') {
        return Cow::Borrowed(text);
    }

    let mut result = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i] == b'\r' {
            result.push(b'\n');
            i += if text.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
        } else {
            result.push(text[i]);
            i += 1;
        }
    }
    Cow::Owned(result)
}

/// Escape attribute value per C14N rules.
fn escape_attr_value(v: &[u8]) -> Result<String> {
    let s = str::from_utf8(v)?;
    let mut out = String::with_capacity(s.len() + s.len() / 4);
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    Ok(out)
}

/// Escape text node value per C14N rules.
fn escape_text_value(v: &[u8]) -> Result<String> {
    let s = str::from_utf8(v)?;
    let mut out = String::with_capacity(s.len() + s.len() / 4);
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    Ok(out)
}

fn prefix_of(qname: &[u8]) -> Vec<u8> {
    qname
        .iter()
        .position(|&b| b == b':')
        .map(|pos| qname[..pos].to_vec())
        .unwrap_or_default()
}

/// Write a start tag with its visibly utilized namespaces and sorted attributes
fn handle_start(
    out: &mut String,
    e: &BytesStart,
    ns_declared_stack: &mut Vec<Scope>,
    ns_rendered_stack: &mut Vec<Scope>,
    inclusive_ns: &[String],
) -> Result<()> {
    let mut current_declared = ns_declared_stack.last().cloned().unwrap_or_default();
    let ns_rendered = ns_rendered_stack.last().cloned().unwrap_or_default();

    let mut regular_attrs = vec![];
    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        if key == b"xmlns" {
            current_declared.insert(vec![], attr.value.to_vec());
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            current_declared.insert(prefix.to_vec(), attr.value.to_vec());
        } else {
            let unescaped_value = attr.unescape_value()?;
            regular_attrs.push((key.to_vec(), unescaped_value.into_owned().into_bytes()));
        }
    }
    current_declared.retain(|_, uri| !uri.is_empty());

    // Visibly utilized prefixes: the element's own and those of its prefixed attributes
    let name = e.name();
    let mut visibly_utilized = BTreeSet::from([prefix_of(name.as_ref())]);
    for (key, _) in &regular_attrs {
        if key.contains(&b':') {
            visibly_utilized.insert(prefix_of(key));
        }
    }
    for prefix in inclusive_ns {
        let prefix = if prefix == "#default" { "" } else { prefix.as_str() };
        if current_declared.contains_key(prefix.as_bytes()) {
            visibly_utilized.insert(prefix.as_bytes().to_vec());
        }
    }

    let mut render_ns = Vec::new();
    for prefix in &visibly_utilized {
        if prefix.as_slice() == b"xml" {
            continue;
        }
        match (current_declared.get(prefix), ns_rendered.get(prefix)) {
            (Some(uri), rendered) if rendered != Some(uri) => {
                render_ns.push((prefix.clone(), uri.clone()));
            }
            // An unprefixed element whose default namespace was rendered
            // above but is now undeclared
            (None, Some(rendered)) if prefix.is_empty() && !rendered.is_empty() => {
                render_ns.push((vec![], vec![]));
            }
            _ => {}
        }
    }
    render_ns.sort_by(|a, b| a.0.cmp(&b.0));

    out.push('<');
    out.push_str(str::from_utf8(name.as_ref())?);
    for (prefix, uri) in &render_ns {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(str::from_utf8(prefix)?);
            out.push_str("=\"");
        }
        out.push_str(&escape_attr_value(uri)?);
        out.push('"');
    }

    // Attributes sort by namespace URI, then local name; unqualified ones first
    let mut attr_info = Vec::with_capacity(regular_attrs.len());
    for (key, value) in regular_attrs {
        let (ns_uri, local_name) = match key.iter().position(|&b| b == b':') {
            Some(pos) => {
                let prefix = &key[..pos];
                let uri = if prefix == b"xml" {
                    XML_NS.to_vec()
                } else {
                    current_declared.get(prefix).cloned().unwrap_or_default()
                };
                (uri, key[pos + 1..].to_vec())
            }
            None => (vec![], key.clone()),
        };
        attr_info.push((ns_uri, local_name, key, value));
    }
    attr_info.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    for (_, _, key, value) in &attr_info {
        out.push(' ');
        out.push_str(str::from_utf8(key)?);
        out.push_str("=\"");
        out.push_str(&escape_attr_value(value)?);
        out.push('"');
    }
    out.push('>');

    let mut new_rendered = ns_rendered;
    for (prefix, uri) in render_ns {
        new_rendered.insert(prefix, uri);
    }
    ns_declared_stack.push(current_declared);
    ns_rendered_stack.push(new_rendered);
    Ok(())
}
