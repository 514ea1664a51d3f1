use std::collections::HashMap;
use std::rc::Rc;

use crate::xml::{local_name, prefix, Document, NodeId, NodeKind, OutputMethod, OutputOptions};

use super::xpath::{self, Axis, Expr, LocationPath, NodeTest, PathStart};

pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// Attribute value template: literal text interleaved with `{expr}` parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Avt(pub Vec<AvtPart>);

#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub select: Option<Expr>,
    pub body: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub select: Expr,
    pub descending: bool,
    pub numeric: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Text(String),
    LiteralElement {
        name: String,
        namespaces: Vec<(String, String)>,
        attributes: Vec<(String, Avt)>,
        body: Vec<Instruction>,
    },
    ValueOf(Expr),
    ApplyTemplates {
        select: Option<Expr>,
        mode: Option<String>,
        sorts: Vec<Sort>,
        params: Vec<Binding>,
    },
    CallTemplate {
        name: String,
        params: Vec<Binding>,
    },
    ForEach {
        select: Expr,
        sorts: Vec<Sort>,
        body: Vec<Instruction>,
    },
    If {
        test: Expr,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    Element {
        name: Avt,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Avt,
        body: Vec<Instruction>,
    },
    Comment(Vec<Instruction>),
    Copy(Vec<Instruction>),
    CopyOf(Expr),
    Variable(Binding),
    Message {
        body: Vec<Instruction>,
        terminate: bool,
    },
}

#[derive(Debug, PartialEq)]
pub struct TemplateBody {
    pub params: Vec<Binding>,
    pub instructions: Vec<Instruction>,
}

/// One alternative of a template's match pattern.
#[derive(Debug)]
pub struct TemplateRule {
    pub pattern: Expr,
    pub mode: Option<String>,
    pub priority: f64,
    pub body: Rc<TemplateBody>,
}

#[derive(Debug)]
pub struct Stylesheet {
    /// In declaration order; later rules win priority ties.
    pub rules: Vec<TemplateRule>,
    pub named: HashMap<String, Rc<TemplateBody>>,
    pub globals: Vec<Binding>,
    pub output: OutputOptions,
    strip_space: Vec<String>,
    preserve_space: Vec<String>,
}

impl Stylesheet {
    pub fn parse(text: &str) -> Result<Self, String> {
        let doc = crate::xml::parse_str(text).map_err(|e| e.to_string())?;
        Self::compile(&doc)
    }

    pub fn compile(doc: &Document) -> Result<Self, String> {
        let root = doc.document_element().ok_or("empty stylesheet")?;
        let xsl_prefix = doc
            .namespaces(root)
            .iter()
            .find(|(_, uri)| uri == XSLT_NAMESPACE)
            .map(|(p, _)| p.clone())
            .ok_or("the root element does not declare the XSLT namespace")?;
        let compiler = Compiler { doc, xsl_prefix };

        let root_name = doc.name(root).unwrap_or_default();
        if !compiler.is_xsl(root_name) || !matches!(local_name(root_name), "stylesheet" | "transform") {
            return Err(format!("<{root_name}> is not an xsl:stylesheet"));
        }

        let mut sheet = Stylesheet {
            rules: Vec::new(),
            named: HashMap::new(),
            globals: Vec::new(),
            output: OutputOptions::default(),
            strip_space: Vec::new(),
            preserve_space: Vec::new(),
        };

        for &child in doc.children(root) {
            match doc.kind(child) {
                NodeKind::Element { name, .. } if compiler.is_xsl(name) => {
                    compiler.top_level(&mut sheet, child, local_name(name))?
                }
                NodeKind::Text(text) if !text.trim().is_empty() => {
                    return Err(format!("unexpected text at top level: {}", text.trim()))
                }
                // Foreign top-level elements are user data.
                _ => {}
            }
        }
        Ok(sheet)
    }

    /// Whether whitespace-only text inside `element` is dropped from the
    /// source before transforming.
    pub fn strips_space(&self, element: &str) -> bool {
        let matches = |tests: &[String]| {
            tests.iter().any(|t| {
                t == "*" || t == element || t.strip_suffix(":*").is_some_and(|p| p == prefix(element))
            })
        };
        matches(&self.strip_space) && !matches(&self.preserve_space)
    }
}

struct Compiler<'a> {
    doc: &'a Document,
    xsl_prefix: String,
}

type CompileResult<T> = Result<T, String>;

impl Compiler<'_> {
    fn is_xsl(&self, qname: &str) -> bool {
        prefix(qname) == self.xsl_prefix
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.doc.attribute(node, name).map(str::to_string)
    }

    fn required(&self, node: NodeId, name: &str) -> CompileResult<String> {
        self.attr(node, name).ok_or_else(|| {
            format!(
                "<{}> requires the `{name}` attribute",
                self.doc.name(node).unwrap_or_default()
            )
        })
    }

    fn expr(&self, text: &str) -> CompileResult<Expr> {
        xpath::parse(text).map_err(|e| e.to_string())
    }

    fn top_level(&self, sheet: &mut Stylesheet, node: NodeId, local: &str) -> CompileResult<()> {
        match local {
            "template" => self.template(sheet, node),
            "output" => {
                let output = &mut sheet.output;
                if let Some(method) = self.attr(node, "method") {
                    output.method = match method.as_str() {
                        "xml" => OutputMethod::Xml,
                        "text" => OutputMethod::Text,
                        other => return Err(format!("unsupported output method `{other}`")),
                    };
                }
                if let Some(indent) = self.attr(node, "indent") {
                    output.indent = indent == "yes";
                }
                if let Some(encoding) = self.attr(node, "encoding") {
                    // The serializer only produces UTF-8.
                    if !encoding.eq_ignore_ascii_case("utf-8") {
                        return Err(format!("unsupported output encoding `{encoding}`"));
                    }
                    output.encoding = encoding;
                }
                if let Some(omit) = self.attr(node, "omit-xml-declaration") {
                    output.omit_declaration = omit == "yes";
                }
                Ok(())
            }
            "strip-space" | "preserve-space" => {
                let elements = self.required(node, "elements")?;
                let target = if local == "strip-space" {
                    &mut sheet.strip_space
                } else {
                    &mut sheet.preserve_space
                };
                target.extend(elements.split_whitespace().map(str::to_string));
                Ok(())
            }
            "variable" | "param" => {
                sheet.globals.push(self.binding(node)?);
                Ok(())
            }
            other => Err(format!("unsupported top-level element xsl:{other}")),
        }
    }

    fn template(&self, sheet: &mut Stylesheet, node: NodeId) -> CompileResult<()> {
        let pattern = self.attr(node, "match");
        let name = self.attr(node, "name");
        if pattern.is_none() && name.is_none() {
            return Err("xsl:template needs `match` or `name`".to_string());
        }

        // Parameters are only recognised before the first instruction.
        let mut params = Vec::new();
        let mut rest = Vec::new();
        let mut in_body = false;
        for &child in self.doc.children(node) {
            match self.doc.kind(child) {
                NodeKind::Element { name, .. }
                    if !in_body && self.is_xsl(name) && local_name(name) == "param" =>
                {
                    params.push(self.binding(child)?)
                }
                NodeKind::Text(text) if text.trim().is_empty() => {}
                _ => {
                    in_body = true;
                    rest.push(child);
                }
            }
        }
        let body = Rc::new(TemplateBody {
            params,
            instructions: self.body_of(&rest)?,
        });

        if let Some(name) = name {
            if sheet.named.insert(name.clone(), Rc::clone(&body)).is_some() {
                return Err(format!("duplicate template name `{name}`"));
            }
        }
        if let Some(pattern) = pattern {
            let explicit = match self.attr(node, "priority") {
                Some(p) => Some(
                    p.trim()
                        .parse::<f64>()
                        .map_err(|_| format!("invalid priority `{p}`"))?,
                ),
                None => None,
            };
            let mode = self.attr(node, "mode");
            let mut alternatives = Vec::new();
            split_union(self.expr(&pattern)?, &mut alternatives);
            for alternative in alternatives {
                check_pattern(&alternative, &pattern)?;
                sheet.rules.push(TemplateRule {
                    priority: explicit.unwrap_or_else(|| default_priority(&alternative)),
                    pattern: alternative,
                    mode: mode.clone(),
                    body: Rc::clone(&body),
                });
            }
        }
        Ok(())
    }

    fn binding(&self, node: NodeId) -> CompileResult<Binding> {
        let name = self.required(node, "name")?;
        let select = match self.attr(node, "select") {
            Some(s) => Some(self.expr(&s)?),
            None => None,
        };
        let body = if select.is_some() {
            Vec::new()
        } else {
            self.body(node)?
        };
        Ok(Binding { name, select, body })
    }

    fn body(&self, node: NodeId) -> CompileResult<Vec<Instruction>> {
        self.body_of(self.doc.children(node))
    }

    fn body_of(&self, children: &[NodeId]) -> CompileResult<Vec<Instruction>> {
        let mut out = Vec::new();
        for &child in children {
            match self.doc.kind(child) {
                NodeKind::Text(text) if !text.trim().is_empty() => out.push(Instruction::Text(text.clone())),
                NodeKind::Element { name, namespaces } => {
                    if self.is_xsl(name) {
                        out.push(self.instruction(child, local_name(name))?);
                    } else {
                        out.push(self.literal_element(child, name, namespaces)?);
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn literal_element(
        &self,
        node: NodeId,
        name: &str,
        namespaces: &[(String, String)],
    ) -> CompileResult<Instruction> {
        let mut attributes = Vec::new();
        for &attr in self.doc.attributes(node) {
            if let NodeKind::Attribute { name, value } = self.doc.kind(attr) {
                if !self.is_xsl(name) {
                    attributes.push((name.clone(), parse_avt(value)?));
                }
            }
        }
        Ok(Instruction::LiteralElement {
            name: name.to_string(),
            namespaces: namespaces
                .iter()
                .filter(|(_, uri)| uri != XSLT_NAMESPACE)
                .cloned()
                .collect(),
            attributes,
            body: self.body(node)?,
        })
    }

    /// Splits leading `xsl:sort` / `xsl:with-param` children from the rest.
    fn sorts_and_params(&self, node: NodeId) -> CompileResult<(Vec<Sort>, Vec<Binding>, Vec<NodeId>)> {
        let mut sorts = Vec::new();
        let mut params = Vec::new();
        let mut rest = Vec::new();
        for &child in self.doc.children(node) {
            let local = self
                .doc
                .name(child)
                .filter(|n| self.is_xsl(n))
                .map(local_name);
            match local {
                Some("sort") => {
                    let select = self.attr(child, "select").unwrap_or_else(|| ".".to_string());
                    sorts.push(Sort {
                        select: self.expr(&select)?,
                        descending: self.attr(child, "order").as_deref() == Some("descending"),
                        numeric: self.attr(child, "data-type").as_deref() == Some("number"),
                    });
                }
                Some("with-param") => params.push(self.binding(child)?),
                _ => rest.push(child),
            }
        }
        Ok((sorts, params, rest))
    }

    fn instruction(&self, node: NodeId, local: &str) -> CompileResult<Instruction> {
        let instruction = match local {
            "apply-templates" => {
                let select = match self.attr(node, "select") {
                    Some(s) => Some(self.expr(&s)?),
                    None => None,
                };
                let (sorts, params, _) = self.sorts_and_params(node)?;
                Instruction::ApplyTemplates {
                    select,
                    mode: self.attr(node, "mode"),
                    sorts,
                    params,
                }
            }
            "call-template" => {
                let (_, params, _) = self.sorts_and_params(node)?;
                Instruction::CallTemplate {
                    name: self.required(node, "name")?,
                    params,
                }
            }
            "for-each" => {
                let select = self.expr(&self.required(node, "select")?)?;
                let (sorts, _, rest) = self.sorts_and_params(node)?;
                Instruction::ForEach {
                    select,
                    sorts,
                    body: self.body_of(&rest)?,
                }
            }
            "value-of" => Instruction::ValueOf(self.expr(&self.required(node, "select")?)?),
            "copy-of" => Instruction::CopyOf(self.expr(&self.required(node, "select")?)?),
            "text" => Instruction::Text(self.doc.string_value(node)),
            "if" => Instruction::If {
                test: self.expr(&self.required(node, "test")?)?,
                body: self.body(node)?,
            },
            "choose" => {
                let mut branches = Vec::new();
                let mut otherwise = Vec::new();
                for &child in self.doc.children(node) {
                    match self.doc.name(child).filter(|n| self.is_xsl(n)).map(local_name) {
                        Some("when") => branches.push((
                            self.expr(&self.required(child, "test")?)?,
                            self.body(child)?,
                        )),
                        Some("otherwise") => otherwise = self.body(child)?,
                        Some(other) => return Err(format!("xsl:{other} is not allowed in xsl:choose")),
                        None => {}
                    }
                }
                if branches.is_empty() {
                    return Err("xsl:choose needs at least one xsl:when".to_string());
                }
                Instruction::Choose { branches, otherwise }
            }
            "element" => Instruction::Element {
                name: parse_avt(&self.required(node, "name")?)?,
                body: self.body(node)?,
            },
            "attribute" => Instruction::Attribute {
                name: parse_avt(&self.required(node, "name")?)?,
                body: self.body(node)?,
            },
            "comment" => Instruction::Comment(self.body(node)?),
            "copy" => Instruction::Copy(self.body(node)?),
            "variable" | "param" => Instruction::Variable(self.binding(node)?),
            "message" => Instruction::Message {
                body: self.body(node)?,
                terminate: self.attr(node, "terminate").as_deref() == Some("yes"),
            },
            other => return Err(format!("unsupported instruction xsl:{other}")),
        };
        Ok(instruction)
    }
}

fn split_union(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Union(a, b) => {
            split_union(*a, out);
            split_union(*b, out);
        }
        other => out.push(other),
    }
}

/// Patterns are location paths of child and attribute steps joined by `/`
/// or `//`, with no variable references.
fn check_pattern(pattern: &Expr, source: &str) -> CompileResult<()> {
    let invalid = || format!("`{source}` is not a valid match pattern");
    let Expr::Path(LocationPath {
        start: PathStart::Root | PathStart::Context,
        steps,
    }) = pattern
    else {
        return Err(invalid());
    };
    for step in steps {
        let allowed = match step.axis {
            Axis::Child | Axis::Attribute => true,
            Axis::DescendantOrSelf => step.test == NodeTest::Node && step.predicates.is_empty(),
            _ => false,
        };
        if !allowed {
            return Err(invalid());
        }
        if step.predicates.iter().any(references_variable) {
            return Err(format!("`{source}`: variable references are not allowed in match patterns"));
        }
    }
    Ok(())
}

fn references_variable(expr: &Expr) -> bool {
    match expr {
        Expr::Variable(_) => true,
        Expr::Or(a, b) | Expr::And(a, b) | Expr::Compare(_, a, b) | Expr::Arith(_, a, b) | Expr::Union(a, b) => {
            references_variable(a) || references_variable(b)
        }
        Expr::Negate(a) => references_variable(a),
        Expr::Literal(_) | Expr::Number(_) => false,
        Expr::Function(_, args) => args.iter().any(references_variable),
        Expr::Filter(base, predicates) => references_variable(base) || predicates.iter().any(references_variable),
        Expr::Path(path) => {
            matches!(&path.start, PathStart::Expr(start) if references_variable(start))
                || path.steps.iter().any(|step| step.predicates.iter().any(references_variable))
        }
    }
}

fn default_priority(pattern: &Expr) -> f64 {
    if let Expr::Path(LocationPath {
        start: PathStart::Context,
        steps,
    }) = pattern
    {
        if let [step] = steps.as_slice() {
            if step.predicates.is_empty() && matches!(step.axis, Axis::Child | Axis::Attribute) {
                return match step.test {
                    NodeTest::Name(_) => 0.0,
                    NodeTest::PrefixWildcard(_) => -0.25,
                    _ => -0.5,
                };
            }
        }
    }
    0.5
}

pub fn parse_avt(text: &str) -> CompileResult<Avt> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut expr = String::new();
                let mut quote: Option<char> = None;
                let mut closed = false;
                for c in chars.by_ref() {
                    match (quote, c) {
                        (None, '}') => {
                            closed = true;
                            break;
                        }
                        (None, '"' | '\'') => quote = Some(c),
                        (Some(q), _) if q == c => quote = None,
                        _ => {}
                    }
                    expr.push(c);
                }
                if !closed {
                    return Err(format!("unterminated expression in `{text}`"));
                }
                if !literal.is_empty() {
                    parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(AvtPart::Expr(xpath::parse(&expr).map_err(|e| e.to_string())?));
            }
            '}' => return Err(format!("unmatched `}}` in `{text}`")),
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        parts.push(AvtPart::Literal(literal));
    }
    Ok(Avt(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(body: &str) -> Result<Stylesheet, String> {
        Stylesheet::parse(&format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{body}</xsl:stylesheet>"#
        ))
    }

    #[test]
    fn test_output_and_space_declarations() {
        let s = sheet(
            r#"<xsl:output method="xml" indent="yes" omit-xml-declaration="yes"/>
               <xsl:strip-space elements="*"/>
               <xsl:preserve-space elements="comment"/>"#,
        )
        .unwrap();
        assert!(s.output.indent);
        assert!(s.output.omit_declaration);
        assert!(s.strips_space("entry"));
        assert!(!s.strips_space("comment"));
    }

    #[test]
    fn test_union_patterns_become_separate_rules() {
        let s = sheet(r#"<xsl:template match="entry | record[@kind] | *"><x/></xsl:template>"#).unwrap();
        let priorities: Vec<f64> = s.rules.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![0.0, 0.5, -0.5]);
        assert!(Rc::ptr_eq(&s.rules[0].body, &s.rules[2].body));
    }

    #[test]
    fn test_explicit_priority_and_named_templates() {
        let s = sheet(
            r#"<xsl:template match="entry" name="row" priority="3" mode="list">
                 <xsl:param name="total" select="0"/>
                 <xsl:value-of select="$total"/>
               </xsl:template>"#,
        )
        .unwrap();
        assert_eq!(s.rules[0].priority, 3.0);
        assert_eq!(s.rules[0].mode.as_deref(), Some("list"));
        let body = &s.named["row"];
        assert_eq!(body.params.len(), 1);
        assert_eq!(body.instructions.len(), 1);
    }

    #[test]
    fn test_custom_prefix_is_recognised() {
        let s = Stylesheet::parse(
            r#"<t:transform version="1.0" xmlns:t="http://www.w3.org/1999/XSL/Transform">
                 <t:template match="/"><out><t:value-of select="1"/></out></t:template>
               </t:transform>"#,
        )
        .unwrap();
        let Instruction::LiteralElement { name, body, namespaces, .. } = &s.rules[0].body.instructions[0] else {
            panic!("expected a literal result element");
        };
        assert_eq!(name, "out");
        assert!(namespaces.is_empty());
        assert!(matches!(body[0], Instruction::ValueOf(_)));
    }

    #[test]
    fn test_literal_text_and_xsl_text() {
        let s = sheet(r#"<xsl:template match="/">  <a>x <xsl:text> </xsl:text></a></xsl:template>"#).unwrap();
        let Instruction::LiteralElement { body, .. } = &s.rules[0].body.instructions[0] else {
            panic!("expected a literal result element");
        };
        assert_eq!(body, &vec![Instruction::Text("x ".to_string()), Instruction::Text(" ".to_string())]);
    }

    #[test]
    fn test_avt_parsing() {
        let avt = parse_avt("id-{@id}-{{x}}").unwrap();
        assert_eq!(avt.0.len(), 3);
        assert_eq!(avt.0[0], AvtPart::Literal("id-".to_string()));
        assert!(matches!(avt.0[1], AvtPart::Expr(_)));
        assert_eq!(avt.0[2], AvtPart::Literal("-{x}".to_string()));
        assert!(parse_avt("{concat('}', 'a')}").is_ok());
        assert!(parse_avt("{@id").is_err());
        assert!(parse_avt("a}b").is_err());
    }

    #[test]
    fn test_rejects_invalid_stylesheets() {
        assert!(Stylesheet::parse("<root/>").is_err());
        assert!(Stylesheet::parse(r#"<x:root xmlns:x="http://www.w3.org/1999/XSL/Transform"/>"#).is_err());
        assert!(sheet(r#"<xsl:import href="other.xslt"/>"#).is_err());
        assert!(sheet(r#"<xsl:template match="/"><xsl:number/></xsl:template>"#).is_err());
        assert!(sheet(r#"<xsl:template match="/"><xsl:value-of/></xsl:template>"#).is_err());
        assert!(sheet(r#"<xsl:template><x/></xsl:template>"#).is_err());
        assert!(sheet(r#"<xsl:template match="count(a)"/>"#).is_err());
        assert!(sheet(r#"<xsl:template match="a[" />"#).is_err());
        assert!(sheet(r#"<xsl:template match="ancestor::a"/>"#).is_err());
        assert!(sheet(r#"<xsl:template match="a/.."/>"#).is_err());
        assert!(sheet(r#"<xsl:template match="a[@id = $wanted]"/>"#).is_err());
        assert!(sheet(r#"<xsl:template match="/a//b/@id | text()"/>"#).is_ok());
        assert!(sheet(r#"<xsl:template name="a"/><xsl:template name="a"/>"#).is_err());
        assert!(sheet(r#"<xsl:template match="/"><xsl:choose/></xsl:template>"#).is_err());
    }
}
