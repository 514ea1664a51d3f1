use std::io::{self, Write};

use quick_xml::escape::{escape, partial_escape};

use super::tree::{Document, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMethod {
    #[default]
    Xml,
    Text,
}

/// Serialization settings, normally taken from `xsl:output`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputOptions {
    pub method: OutputMethod,
    pub indent: bool,
    pub encoding: String,
    pub omit_declaration: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            method: OutputMethod::Xml,
            indent: false,
            encoding: "UTF-8".to_string(),
            omit_declaration: false,
        }
    }
}

const INDENT: &str = "  ";

pub fn write_document<W: Write>(doc: &Document, options: &OutputOptions, out: &mut W) -> io::Result<()> {
    if options.method == OutputMethod::Text {
        out.write_all(doc.string_value(doc.root()).as_bytes())?;
        return out.write_all(b"\n");
    }

    if !options.omit_declaration {
        writeln!(out, "<?xml version=\"1.0\" encoding=\"{}\"?>", options.encoding)?;
    }
    let mut writer = NodeWriter {
        doc,
        indent: options.indent,
        out,
    };
    let mut wrote_any = false;
    for &child in doc.children(doc.root()) {
        if options.indent && is_blank_text(doc, child) {
            continue;
        }
        if wrote_any && options.indent {
            writer.out.write_all(b"\n")?;
        }
        writer.node(child, 0)?;
        wrote_any = true;
    }
    writer.out.write_all(b"\n")
}

fn is_blank_text(doc: &Document, id: NodeId) -> bool {
    matches!(doc.kind(id), NodeKind::Text(text) if text.trim().is_empty())
}

struct NodeWriter<'a, W: Write> {
    doc: &'a Document,
    indent: bool,
    out: &'a mut W,
}

/// Pending output, kept on an explicit stack so nesting depth costs heap
/// rather than call frames.
enum Task {
    Node(NodeId, usize),
    Newline(usize),
    Close(NodeId),
}

impl<W: Write> NodeWriter<'_, W> {
    fn node(&mut self, id: NodeId, depth: usize) -> io::Result<()> {
        let doc = self.doc;
        let mut tasks = vec![Task::Node(id, depth)];
        while let Some(task) = tasks.pop() {
            match task {
                Task::Newline(depth) => self.newline(depth)?,
                Task::Close(id) => write!(self.out, "</{}>", doc.name(id).unwrap_or_default())?,
                Task::Node(id, depth) => match doc.kind(id) {
                    NodeKind::Element { name, namespaces } => {
                        self.open_tag(id, name, namespaces)?;
                        let children = doc.children(id);
                        if children.is_empty() {
                            self.out.write_all(b"/>")?;
                            continue;
                        }
                        self.out.write_all(b">")?;
                        tasks.push(Task::Close(id));

                        let element_only = children
                            .iter()
                            .all(|&c| !matches!(doc.kind(c), NodeKind::Text(_)) || is_blank_text(doc, c));
                        if self.indent && element_only {
                            let kept: Vec<NodeId> =
                                children.iter().copied().filter(|&c| !is_blank_text(doc, c)).collect();
                            if !kept.is_empty() {
                                tasks.push(Task::Newline(depth));
                            }
                            for &child in kept.iter().rev() {
                                tasks.push(Task::Node(child, depth + 1));
                                tasks.push(Task::Newline(depth + 1));
                            }
                        } else {
                            tasks.extend(children.iter().rev().map(|&child| Task::Node(child, depth + 1)));
                        }
                    }
                    NodeKind::Text(text) => self.out.write_all(partial_escape(text.as_str()).as_bytes())?,
                    NodeKind::Comment(text) => write!(self.out, "<!--{text}-->")?,
                    NodeKind::Attribute { .. } | NodeKind::Root => {}
                },
            }
        }
        Ok(())
    }

    fn open_tag(&mut self, id: NodeId, name: &str, namespaces: &[(String, String)]) -> io::Result<()> {
        let doc = self.doc;
        write!(self.out, "<{name}")?;
        for (prefix, uri) in namespaces {
            if prefix.is_empty() {
                write!(self.out, " xmlns=\"{}\"", escape(uri.as_str()))?;
            } else {
                write!(self.out, " xmlns:{prefix}=\"{}\"", escape(uri.as_str()))?;
            }
        }
        for &attr in doc.attributes(id) {
            if let NodeKind::Attribute { name, value } = doc.kind(attr) {
                write!(self.out, " {name}=\"{}\"", escape(value.as_str()))?;
            }
        }
        Ok(())
    }

    fn newline(&mut self, depth: usize) -> io::Result<()> {
        self.out.write_all(b"\n")?;
        for _ in 0..depth {
            self.out.write_all(INDENT.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_str;

    fn render(doc: &Document, options: &OutputOptions) -> String {
        let mut out = Vec::new();
        write_document(doc, options, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_compact_output() {
        let doc = parse_str(r#"<a k="v"><b/>text</a>"#).unwrap();
        let xml = render(&doc, &OutputOptions::default());
        assert_eq!(xml, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<a k=\"v\"><b/>text</a>\n");
    }

    #[test]
    fn test_indented_element_only_content() {
        let doc = parse_str("<a>\n <b><c>1</c></b>\n <d/>\n</a>").unwrap();
        let options = OutputOptions {
            indent: true,
            omit_declaration: true,
            ..OutputOptions::default()
        };
        assert_eq!(
            render(&doc, &options),
            "<a>\n  <b>\n    <c>1</c>\n  </b>\n  <d/>\n</a>\n"
        );
    }

    #[test]
    fn test_mixed_content_stays_inline() {
        let doc = parse_str("<p>one <b>two</b> three</p>").unwrap();
        let options = OutputOptions {
            indent: true,
            omit_declaration: true,
            ..OutputOptions::default()
        };
        assert_eq!(render(&doc, &options), "<p>one <b>two</b> three</p>\n");
    }

    #[test]
    fn test_escaping() {
        let mut doc = Document::new();
        let a = doc.append_element(doc.root(), "a");
        doc.set_attribute(a, "q", "say \"hi\" & <go>");
        doc.append_text(a, "1 < 2 & \"quoted\"");
        let options = OutputOptions {
            omit_declaration: true,
            ..OutputOptions::default()
        };
        assert_eq!(
            render(&doc, &options),
            "<a q=\"say &quot;hi&quot; &amp; &lt;go&gt;\">1 &lt; 2 &amp; \"quoted\"</a>\n"
        );
    }

    #[test]
    fn test_text_method_writes_string_value() {
        let doc = parse_str("<a><b>x</b><c>y</c></a>").unwrap();
        let options = OutputOptions {
            method: OutputMethod::Text,
            ..OutputOptions::default()
        };
        assert_eq!(render(&doc, &options), "xy\n");
    }

    #[test]
    fn test_deeply_nested_document() {
        let mut doc = Document::new();
        let mut parent = doc.root();
        for _ in 0..200_000 {
            parent = doc.append_element(parent, "x");
        }
        let options = OutputOptions {
            omit_declaration: true,
            ..OutputOptions::default()
        };
        let xml = render(&doc, &options);
        assert!(xml.starts_with("<x><x>"));
        assert!(xml.ends_with("<x/></x></x>\n"));
        assert_eq!(xml.matches("</x>").count(), 199_999);
    }

    #[test]
    fn test_namespaces_are_written_before_attributes() {
        let doc = parse_str(r#"<m:a xmlns:m="urn:money" id="1"/>"#).unwrap();
        let options = OutputOptions {
            omit_declaration: true,
            ..OutputOptions::default()
        };
        assert_eq!(render(&doc, &options), "<m:a xmlns:m=\"urn:money\" id=\"1\"/>\n");
    }
}
