use std::borrow::Cow;
use std::path::Path;

use quick_xml::encoding::{decode, detect_encoding};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Decoder, Reader};
use thiserror::Error;

use super::tree::{Document, NodeId};

/// A well-formedness or read failure, with the byte offset reached.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (at byte {position})")]
pub struct XmlError {
    pub message: String,
    pub position: u64,
}

impl XmlError {
    fn at_start(message: String) -> Self {
        Self { message, position: 0 }
    }
}

pub fn parse_file(path: &Path) -> Result<Document, XmlError> {
    let bytes = std::fs::read(path).map_err(|e| XmlError::at_start(e.to_string()))?;
    parse_bytes(&bytes)
}

/// Parses raw bytes, honouring a byte order mark and the encoding named in
/// the XML declaration.
pub fn parse_bytes(bytes: &[u8]) -> Result<Document, XmlError> {
    if let Some((encoding, bom)) = detect_encoding(bytes) {
        // The reader only scans ASCII-compatible input.
        if encoding.name().starts_with("UTF-16") {
            let text = decode(&bytes[bom..], encoding).map_err(|e| XmlError::at_start(e.to_string()))?;
            return parse_str(&text);
        }
    }
    let normalized = normalize_line_ends(bytes);
    build(Reader::from_reader(normalized.as_ref()), normalized.len())
}

pub fn parse_str(text: &str) -> Result<Document, XmlError> {
    let normalized = normalize_line_ends(text.as_bytes());
    // Only CR bytes were replaced, so the input is still UTF-8.
    let text = std::str::from_utf8(&normalized).map_err(|e| XmlError::at_start(e.to_string()))?;
    build(Reader::from_str(text), text.len())
}

/// Turns `\r\n` and lone `\r` into `\n` before parsing, as XML 1.0 requires.
fn normalize_line_ends(bytes: &[u8]) -> Cow<'_, [u8]> {
    if !bytes.contains(&b'\r') {
        return Cow::Borrowed(bytes);
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' {
            if iter.peek() == Some(&&b'\n') {
                iter.next();
            }
            out.push(b'\n');
        } else {
            out.push(b);
        }
    }
    Cow::Owned(out)
}

fn build(mut reader: Reader<&[u8]>, len: usize) -> Result<Document, XmlError> {
    reader.config_mut().check_end_names = true;

    let mut doc = Document::new();
    let mut stack: Vec<NodeId> = Vec::new();

    loop {
        let fail = |reader: &Reader<&[u8]>, message: String| XmlError {
            message,
            position: reader.buffer_position() as u64,
        };
        let event = reader.read_event().map_err(|e| fail(&reader, e.to_string()))?;
        let decoder = reader.decoder();
        match event {
            Event::Start(e) => {
                let parent = open_parent(&doc, &stack).map_err(|m| fail(&reader, m))?;
                let id = open_element(&mut doc, parent, &e, decoder).map_err(|m| fail(&reader, m))?;
                stack.push(id);
            }
            Event::Empty(e) => {
                let parent = open_parent(&doc, &stack).map_err(|m| fail(&reader, m))?;
                open_element(&mut doc, parent, &e, decoder).map_err(|m| fail(&reader, m))?;
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|err| fail(&reader, err.to_string()))?;
                match stack.last() {
                    Some(&parent) => doc.append_text(parent, &text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(fail(&reader, "text outside the document element".to_string()))
                    }
                }
            }
            Event::CData(e) => {
                let bytes = e.into_inner();
                let text = decoder.decode(&bytes).map_err(|err| fail(&reader, err.to_string()))?;
                match stack.last() {
                    Some(&parent) => doc.append_text(parent, &text),
                    None => {
                        return Err(fail(&reader, "CDATA outside the document element".to_string()))
                    }
                }
            }
            Event::Comment(e) => {
                let text = decoder.decode(&e).map_err(|err| fail(&reader, err.to_string()))?;
                let parent = stack.last().copied().unwrap_or_else(|| doc.root());
                doc.append_comment(parent, &text);
            }
            Event::Eof => break,
            // Declarations, doctypes and processing instructions carry
            // nothing the transform needs.
            _ => {}
        }
    }

    if let Some(&open) = stack.last() {
        return Err(XmlError {
            message: format!("unclosed element <{}>", doc.name(open).unwrap_or_default()),
            position: len as u64,
        });
    }
    if doc.document_element().is_none() {
        return Err(XmlError {
            message: "no document element".to_string(),
            position: len as u64,
        });
    }
    Ok(doc)
}

fn open_parent(doc: &Document, stack: &[NodeId]) -> Result<NodeId, String> {
    match stack.last() {
        Some(&parent) => Ok(parent),
        None if doc.document_element().is_some() => {
            Err("more than one document element".to_string())
        }
        None => Ok(doc.root()),
    }
}

fn is_attribute_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\r')
}

fn open_element(
    doc: &mut Document,
    parent: NodeId,
    start: &BytesStart,
    decoder: Decoder,
) -> Result<NodeId, String> {
    let qname = start.name();
    let name = decoder.decode(qname.as_ref()).map_err(|e| e.to_string())?;
    let id = doc.append_element(parent, &name);
    for attr in start.attributes() {
        let mut attr = attr.map_err(|e| e.to_string())?;
        // Literal whitespace becomes a space; character references survive.
        if attr.value.iter().copied().any(is_attribute_whitespace) {
            let spaced = attr
                .value
                .iter()
                .map(|&b| if is_attribute_whitespace(b) { b' ' } else { b })
                .collect();
            attr.value = Cow::Owned(spaced);
        }
        let key = decoder.decode(attr.key.as_ref()).map_err(|e| e.to_string())?;
        let value = attr.decode_and_unescape_value(decoder).map_err(|e| e.to_string())?;
        if key == "xmlns" {
            doc.add_namespace(id, "", &value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            doc.add_namespace(id, prefix, &value);
        } else {
            doc.set_attribute(id, &key, &value);
        }
    }
    Ok(id)
}
