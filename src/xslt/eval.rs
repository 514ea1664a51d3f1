use std::cmp::Ordering;

use crate::xml::{local_name, prefix, Document, NodeId, NodeKind};

use super::xpath::{ArithOp, Axis, CompareOp, Expr, LocationPath, NodeTest, PathStart, Step};

/// XPath 1.0 value. Node-sets are kept sorted in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    NodeSet(Vec<NodeId>),
    String(String),
    Number(f64),
    Boolean(bool),
}

impl Value {
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
        }
    }

    pub fn to_number(&self, doc: &Document) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            _ => string_to_number(&self.to_text(doc)),
        }
    }

    /// XPath `string()` conversion. The string of a node-set is the value of
    /// its first node.
    pub fn to_text(&self, doc: &Document) -> String {
        match self {
            Value::NodeSet(nodes) => nodes.first().map(|&n| doc.string_value(n)).unwrap_or_default(),
            Value::String(s) => s.clone(),
            Value::Number(n) => number_to_string(*n),
            Value::Boolean(b) => b.to_string(),
        }
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    let digits = s.strip_prefix('-').unwrap_or(s);
    let valid = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|&c| c == '.').count() <= 1
        && digits != ".";
    if valid {
        s.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

/// Variable lookup for the expression being evaluated.
pub trait Bindings {
    fn variable(&self, name: &str) -> Option<Value>;
}

impl Bindings for () {
    fn variable(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Dynamic context of an evaluation.
pub struct Context<'a> {
    pub doc: &'a Document,
    pub node: NodeId,
    pub position: usize,
    pub size: usize,
    /// The XSLT current node, returned by `current()`.
    pub current: NodeId,
    pub bindings: &'a dyn Bindings,
}

impl<'a> Context<'a> {
    #[cfg(test)]
    pub fn new(doc: &'a Document, node: NodeId, bindings: &'a dyn Bindings) -> Self {
        Self {
            doc,
            node,
            position: 1,
            size: 1,
            current: node,
            bindings,
        }
    }

    fn at(&self, node: NodeId, position: usize, size: usize) -> Context<'a> {
        Context {
            doc: self.doc,
            node,
            position,
            size,
            current: self.current,
            bindings: self.bindings,
        }
    }
}

pub type EvalResult<T> = Result<T, String>;

pub fn evaluate(expr: &Expr, ctx: &Context) -> EvalResult<Value> {
    match expr {
        Expr::Or(a, b) => Ok(Value::Boolean(
            evaluate(a, ctx)?.to_boolean() || evaluate(b, ctx)?.to_boolean(),
        )),
        Expr::And(a, b) => Ok(Value::Boolean(
            evaluate(a, ctx)?.to_boolean() && evaluate(b, ctx)?.to_boolean(),
        )),
        Expr::Compare(op, a, b) => {
            let left = evaluate(a, ctx)?;
            let right = evaluate(b, ctx)?;
            Ok(Value::Boolean(compare(ctx.doc, *op, &left, &right)))
        }
        Expr::Arith(op, a, b) => {
            let x = evaluate(a, ctx)?.to_number(ctx.doc);
            let y = evaluate(b, ctx)?.to_number(ctx.doc);
            Ok(Value::Number(match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
                ArithOp::Mod => x % y,
            }))
        }
        Expr::Negate(inner) => Ok(Value::Number(-evaluate(inner, ctx)?.to_number(ctx.doc))),
        Expr::Union(a, b) => {
            let mut nodes = node_set(evaluate(a, ctx)?, "|")?;
            nodes.extend(node_set(evaluate(b, ctx)?, "|")?);
            Ok(Value::NodeSet(document_order(nodes)))
        }
        Expr::Literal(s) => Ok(Value::String(s.clone())),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Variable(name) => ctx
            .bindings
            .variable(name)
            .ok_or_else(|| format!("undefined variable ${name}")),
        Expr::Function(name, args) => call_function(name, args, ctx),
        Expr::Filter(primary, predicates) => {
            let nodes = node_set(evaluate(primary, ctx)?, "a predicate")?;
            let nodes = apply_predicates(nodes, predicates, ctx)?;
            Ok(Value::NodeSet(nodes))
        }
        Expr::Path(path) => Ok(Value::NodeSet(evaluate_path(path, ctx)?)),
    }
}

/// Evaluates `expr` and requires a node-set.
pub fn select(expr: &Expr, ctx: &Context) -> EvalResult<Vec<NodeId>> {
    node_set(evaluate(expr, ctx)?, "select")
}

fn node_set(value: Value, what: &str) -> EvalResult<Vec<NodeId>> {
    match value {
        Value::NodeSet(nodes) => Ok(nodes),
        other => Err(format!("{what} needs a node-set, got {other:?}")),
    }
}

fn document_order(mut nodes: Vec<NodeId>) -> Vec<NodeId> {
    nodes.sort();
    nodes.dedup();
    nodes
}

fn evaluate_path(path: &LocationPath, ctx: &Context) -> EvalResult<Vec<NodeId>> {
    let mut nodes = match &path.start {
        PathStart::Root => vec![ctx.doc.root()],
        PathStart::Context => vec![ctx.node],
        PathStart::Expr(expr) => node_set(evaluate(expr, ctx)?, "a path")?,
    };
    for step in &path.steps {
        let mut next = Vec::new();
        for &node in &nodes {
            next.extend(evaluate_step(step, node, ctx)?);
        }
        nodes = document_order(next);
    }
    Ok(nodes)
}

fn evaluate_step(step: &Step, node: NodeId, ctx: &Context) -> EvalResult<Vec<NodeId>> {
    let doc = ctx.doc;
    let mut candidates: Vec<NodeId> = axis_nodes(doc, step.axis, node)
        .into_iter()
        .filter(|&n| node_test(doc, step.axis, &step.test, n))
        .collect();
    // Predicates see proximity positions: reverse axes count backwards.
    if step.axis.is_reverse() {
        candidates.reverse();
    }
    apply_predicates(candidates, &step.predicates, ctx)
}

/// Nodes `step` selects from the context node, predicates applied.
pub fn select_step(step: &Step, ctx: &Context) -> EvalResult<Vec<NodeId>> {
    evaluate_step(step, ctx.node, ctx)
}

/// Whether `node` passes the node test of `step` for its axis. Predicates
/// are not checked.
pub fn step_accepts(doc: &Document, step: &Step, node: NodeId) -> bool {
    node_test(doc, step.axis, &step.test, node)
}

fn apply_predicates(mut nodes: Vec<NodeId>, predicates: &[Expr], ctx: &Context) -> EvalResult<Vec<NodeId>> {
    for predicate in predicates {
        let size = nodes.len();
        let mut kept = Vec::with_capacity(size);
        for (i, &node) in nodes.iter().enumerate() {
            let inner = ctx.at(node, i + 1, size);
            let keep = match evaluate(predicate, &inner)? {
                Value::Number(n) => n == (i + 1) as f64,
                other => other.to_boolean(),
            };
            if keep {
                kept.push(node);
            }
        }
        nodes = kept;
    }
    Ok(nodes)
}

fn axis_nodes(doc: &Document, axis: Axis, node: NodeId) -> Vec<NodeId> {
    match axis {
        Axis::Child => doc.children(node).to_vec(),
        Axis::Attribute => doc.attributes(node).to_vec(),
        Axis::SelfAxis => vec![node],
        Axis::Parent => doc.parent(node).into_iter().collect(),
        Axis::Descendant => doc.descendants(node),
        Axis::DescendantOrSelf => {
            let mut out = vec![node];
            out.extend(doc.descendants(node));
            out
        }
        Axis::Ancestor | Axis::AncestorOrSelf => {
            let mut out = Vec::new();
            if axis == Axis::AncestorOrSelf {
                out.push(node);
            }
            let mut cursor = doc.parent(node);
            while let Some(parent) = cursor {
                out.push(parent);
                cursor = doc.parent(parent);
            }
            out.reverse();
            out
        }
        Axis::FollowingSibling | Axis::PrecedingSibling => {
            if doc.is_attribute(node) {
                return Vec::new();
            }
            let Some(parent) = doc.parent(node) else {
                return Vec::new();
            };
            let siblings = doc.children(parent);
            let index = siblings.iter().position(|&s| s == node).unwrap_or(0);
            if axis == Axis::FollowingSibling {
                siblings[index + 1..].to_vec()
            } else {
                siblings[..index].to_vec()
            }
        }
        Axis::Following | Axis::Preceding => {
            let all = doc.descendants(doc.root());
            // Attributes sort right after their element, so an attribute's
            // following nodes start after its owner's subtree.
            let anchor = if doc.is_attribute(node) {
                doc.parent(node).unwrap_or(node)
            } else {
                node
            };
            let mut ancestors = Vec::new();
            let mut cursor = doc.parent(anchor);
            while let Some(parent) = cursor {
                ancestors.push(parent);
                cursor = doc.parent(parent);
            }
            let inside: Vec<NodeId> = doc.descendants(anchor);
            all.into_iter()
                .filter(|&n| {
                    if axis == Axis::Following {
                        n > anchor && !inside.contains(&n)
                    } else {
                        n < anchor && !ancestors.contains(&n)
                    }
                })
                .collect()
        }
    }
}

fn node_test(doc: &Document, axis: Axis, test: &NodeTest, node: NodeId) -> bool {
    let kind = doc.kind(node);
    // The principal node type of the attribute axis is attribute, of every
    // other axis element.
    let principal = if axis == Axis::Attribute {
        matches!(kind, NodeKind::Attribute { .. })
    } else {
        matches!(kind, NodeKind::Element { .. })
    };
    match test {
        NodeTest::Node => true,
        NodeTest::Text => matches!(kind, NodeKind::Text(_)),
        NodeTest::Comment => matches!(kind, NodeKind::Comment(_)),
        NodeTest::ProcessingInstruction => false,
        NodeTest::Wildcard => principal,
        NodeTest::PrefixWildcard(p) => principal && doc.name(node).is_some_and(|n| prefix(n) == p),
        NodeTest::Name(name) => principal && doc.name(node) == Some(name.as_str()),
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

fn compare(doc: &Document, op: CompareOp, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::NodeSet(a), Value::NodeSet(b)) => a.iter().any(|&x| {
            let xs = doc.string_value(x);
            b.iter()
                .any(|&y| compare_atoms(doc, op, &Value::String(xs.clone()), &Value::String(doc.string_value(y))))
        }),
        (Value::NodeSet(nodes), other) => compare_node_set(doc, op, nodes, other, false),
        (other, Value::NodeSet(nodes)) => compare_node_set(doc, op, nodes, other, true),
        _ => compare_atoms(doc, op, left, right),
    }
}

fn compare_node_set(doc: &Document, op: CompareOp, nodes: &[NodeId], other: &Value, flipped: bool) -> bool {
    if let Value::Boolean(_) = other {
        let set = Value::Boolean(!nodes.is_empty());
        return if flipped {
            compare_atoms(doc, op, other, &set)
        } else {
            compare_atoms(doc, op, &set, other)
        };
    }
    nodes.iter().any(|&node| {
        let text = doc.string_value(node);
        let atom = match other {
            Value::Number(_) => Value::Number(string_to_number(&text)),
            _ => Value::String(text),
        };
        if flipped {
            compare_atoms(doc, op, other, &atom)
        } else {
            compare_atoms(doc, op, &atom, other)
        }
    })
}

fn compare_atoms(doc: &Document, op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq | CompareOp::NotEq => {
            let equal = match (left, right) {
                (Value::Boolean(_), _) | (_, Value::Boolean(_)) => left.to_boolean() == right.to_boolean(),
                (Value::Number(_), _) | (_, Value::Number(_)) => left.to_number(doc) == right.to_number(doc),
                _ => left.to_text(doc) == right.to_text(doc),
            };
            equal == (op == CompareOp::Eq)
        }
        _ => {
            let x = left.to_number(doc);
            let y = right.to_number(doc);
            match op {
                CompareOp::Lt => x < y,
                CompareOp::Le => x <= y,
                CompareOp::Gt => x > y,
                _ => x >= y,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Function library
// ---------------------------------------------------------------------------

fn call_function(name: &str, args: &[Expr], ctx: &Context) -> EvalResult<Value> {
    let doc = ctx.doc;
    let arity = |min: usize, max: usize| -> EvalResult<()> {
        if args.len() < min || args.len() > max {
            Err(format!("{name}() takes {min}..{max} arguments, got {}", args.len()))
        } else {
            Ok(())
        }
    };
    let text = |i: usize| -> EvalResult<String> { Ok(evaluate(&args[i], ctx)?.to_text(doc)) };
    let number = |i: usize| -> EvalResult<f64> { Ok(evaluate(&args[i], ctx)?.to_number(doc)) };
    // String functions default to the context node when called without one.
    let text_or_context = |i: usize| -> EvalResult<String> {
        if args.len() > i {
            text(i)
        } else {
            Ok(doc.string_value(ctx.node))
        }
    };
    let first_node = |i: usize| -> EvalResult<Option<NodeId>> {
        if args.len() > i {
            Ok(node_set(evaluate(&args[i], ctx)?, name)?.first().copied())
        } else {
            Ok(Some(ctx.node))
        }
    };

    let value = match name {
        "last" => {
            arity(0, 0)?;
            Value::Number(ctx.size as f64)
        }
        "position" => {
            arity(0, 0)?;
            Value::Number(ctx.position as f64)
        }
        "count" => {
            arity(1, 1)?;
            Value::Number(node_set(evaluate(&args[0], ctx)?, name)?.len() as f64)
        }
        "current" => {
            arity(0, 0)?;
            Value::NodeSet(vec![ctx.current])
        }
        "name" | "local-name" => {
            arity(0, 1)?;
            let qname = first_node(0)?
                .and_then(|n| doc.name(n))
                .unwrap_or_default();
            let result = if name == "name" { qname } else { local_name(qname) };
            Value::String(result.to_string())
        }
        "string" => {
            arity(0, 1)?;
            Value::String(text_or_context(0)?)
        }
        "concat" => {
            if args.len() < 2 {
                return Err("concat() takes at least 2 arguments".to_string());
            }
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(&text(i)?);
            }
            Value::String(out)
        }
        "starts-with" => {
            arity(2, 2)?;
            Value::Boolean(text(0)?.starts_with(&text(1)?))
        }
        "contains" => {
            arity(2, 2)?;
            Value::Boolean(text(0)?.contains(&text(1)?))
        }
        "substring-before" => {
            arity(2, 2)?;
            let haystack = text(0)?;
            let needle = text(1)?;
            Value::String(
                haystack
                    .find(&needle)
                    .map(|i| haystack[..i].to_string())
                    .unwrap_or_default(),
            )
        }
        "substring-after" => {
            arity(2, 2)?;
            let haystack = text(0)?;
            let needle = text(1)?;
            Value::String(
                haystack
                    .find(&needle)
                    .map(|i| haystack[i + needle.len()..].to_string())
                    .unwrap_or_default(),
            )
        }
        "substring" => {
            arity(2, 3)?;
            let source = text(0)?;
            let start = round_half_up(number(1)?);
            let end = if args.len() == 3 {
                start + round_half_up(number(2)?)
            } else {
                f64::INFINITY
            };
            // Characters are numbered from 1; keep those with start <= p < end.
            let out: String = source
                .chars()
                .enumerate()
                .filter(|(i, _)| {
                    let p = (*i + 1) as f64;
                    p >= start && p < end
                })
                .map(|(_, c)| c)
                .collect();
            Value::String(out)
        }
        "string-length" => {
            arity(0, 1)?;
            Value::Number(text_or_context(0)?.chars().count() as f64)
        }
        "normalize-space" => {
            arity(0, 1)?;
            Value::String(text_or_context(0)?.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        "translate" => {
            arity(3, 3)?;
            let from: Vec<char> = text(1)?.chars().collect();
            let to: Vec<char> = text(2)?.chars().collect();
            let out: String = text(0)?
                .chars()
                .filter_map(|c| match from.iter().position(|&f| f == c) {
                    Some(i) => to.get(i).copied(),
                    None => Some(c),
                })
                .collect();
            Value::String(out)
        }
        "boolean" => {
            arity(1, 1)?;
            Value::Boolean(evaluate(&args[0], ctx)?.to_boolean())
        }
        "not" => {
            arity(1, 1)?;
            Value::Boolean(!evaluate(&args[0], ctx)?.to_boolean())
        }
        "true" => {
            arity(0, 0)?;
            Value::Boolean(true)
        }
        "false" => {
            arity(0, 0)?;
            Value::Boolean(false)
        }
        "number" => {
            arity(0, 1)?;
            if args.is_empty() {
                Value::Number(string_to_number(&doc.string_value(ctx.node)))
            } else {
                Value::Number(number(0)?)
            }
        }
        "sum" => {
            arity(1, 1)?;
            let nodes = node_set(evaluate(&args[0], ctx)?, name)?;
            Value::Number(nodes.iter().map(|&n| string_to_number(&doc.string_value(n))).sum())
        }
        "floor" => {
            arity(1, 1)?;
            Value::Number(number(0)?.floor())
        }
        "ceiling" => {
            arity(1, 1)?;
            Value::Number(number(0)?.ceil())
        }
        "round" => {
            arity(1, 1)?;
            Value::Number(round_half_up(number(0)?))
        }
        "format-number" => {
            arity(2, 2)?;
            Value::String(format_number(number(0)?, &text(1)?))
        }
        other => return Err(format!("unknown function {other}()")),
    };
    Ok(value)
}

/// XPath `round()`: halves round towards positive infinity.
fn round_half_up(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        n
    } else {
        (n + 0.5).floor()
    }
}

/// `format-number` for the common decimal pictures: `0`/`#` digits, an
/// optional `.` fraction part and `,` grouping.
pub fn format_number(n: f64, picture: &str) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return number_to_string(n);
    }
    let (integer_picture, fraction_picture) = picture.split_once('.').unwrap_or((picture, ""));
    let min_int = integer_picture.chars().filter(|&c| c == '0').count();
    let min_frac = fraction_picture.chars().filter(|&c| c == '0').count();
    let max_frac = fraction_picture.chars().filter(|&c| c == '0' || c == '#').count();
    let grouping = integer_picture
        .rfind(',')
        .map(|i| integer_picture[i + 1..].chars().filter(|c| matches!(c, '0' | '#')).count());

    let negative = n < 0.0;
    let formatted = format!("{:.*}", max_frac, n.abs());
    let (int_digits, frac_digits) = formatted.split_once('.').unwrap_or((&formatted, ""));

    let mut frac = frac_digits.to_string();
    while frac.len() > min_frac && frac.ends_with('0') {
        frac.pop();
    }
    let mut int = int_digits.trim_start_matches('0').to_string();
    while int.len() < min_int {
        int.insert(0, '0');
    }
    if let Some(size) = grouping.filter(|&s| s > 0) {
        let chars: Vec<char> = int.chars().collect();
        let mut grouped = String::new();
        for (i, c) in chars.iter().enumerate() {
            if i > 0 && (chars.len() - i) % size == 0 {
                grouped.push(',');
            }
            grouped.push(*c);
        }
        int = grouped;
    }

    let mut out = String::new();
    if negative && (int.chars().any(|c| c != '0' && c != ',') || frac.chars().any(|c| c != '0')) {
        out.push('-');
    }
    out.push_str(&int);
    if !frac.is_empty() {
        out.push('.');
        out.push_str(&frac);
    }
    if out.is_empty() || out == "-" {
        out = "0".to_string();
    }
    out
}

/// Ordering used by `xsl:sort` for numeric keys: NaN first.
pub fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_str;
    use crate::xslt::xpath::parse;

    const EXPORT: &str = r#"<icash>
  <entries>
    <entry date="2024-01-05" amount="10.00" from="1" to="2">Coffee</entry>
    <entry date="2024-02-11" amount="-3.50" from="2" to="1">Refund</entry>
    <entry date="2024-02-20" amount="120" from="1" to="3"/>
  </entries>
</icash>"#;

    fn eval(doc: &Document, expr: &str) -> Value {
        let ctx = Context::new(doc, doc.root(), &());
        evaluate(&parse(expr).unwrap(), &ctx).unwrap()
    }

    fn text(doc: &Document, expr: &str) -> String {
        eval(doc, expr).to_text(doc)
    }

    #[test]
    fn test_paths_and_predicates() {
        let doc = parse_str(EXPORT).unwrap();
        assert_eq!(text(&doc, "count(//entry)"), "3");
        assert_eq!(text(&doc, "/icash/entries/entry[2]"), "Refund");
        assert_eq!(text(&doc, "//entry[last()]/@amount"), "120");
        assert_eq!(text(&doc, "//entry[@from = '2']/@date"), "2024-02-11");
        assert_eq!(text(&doc, "count(//entry[@amount > 0])"), "2");
        assert_eq!(text(&doc, "name(/*)"), "icash");
    }

    #[test]
    fn test_reverse_axis_positions() {
        let doc = parse_str(EXPORT).unwrap();
        assert_eq!(text(&doc, "//entry[3]/preceding-sibling::entry[1]"), "Refund");
        assert_eq!(text(&doc, "name(//entry[1]/ancestor::*[1])"), "entries");
        assert_eq!(text(&doc, "count(//entry[1]/following::entry)"), "2");
        assert_eq!(text(&doc, "count(//entry[3]/preceding::entry)"), "2");
        assert_eq!(text(&doc, "//entry[1]/following-sibling::entry[1]"), "Refund");
    }

    #[test]
    fn test_string_functions() {
        let doc = parse_str(EXPORT).unwrap();
        assert_eq!(text(&doc, "substring('2024-01-05', 9, 2)"), "05");
        assert_eq!(text(&doc, "substring('12345', 1.5, 2.6)"), "234");
        assert_eq!(text(&doc, "substring-before('2024-01-05', '-')"), "2024");
        assert_eq!(text(&doc, "substring-after('2024-01-05', '-')"), "01-05");
        assert_eq!(text(&doc, "normalize-space('  a   b ')"), "a b");
        assert_eq!(text(&doc, "translate('a-b-c', '-', '')"), "abc");
        assert_eq!(text(&doc, "concat('a', 1, true())"), "a1true");
        assert_eq!(text(&doc, "string-length('héllo')"), "5");
        assert_eq!(eval(&doc, "starts-with('icash', 'ic')"), Value::Boolean(true));
        assert_eq!(eval(&doc, "contains('icash', 'zz')"), Value::Boolean(false));
    }

    #[test]
    fn test_number_conversions() {
        let doc = parse_str(EXPORT).unwrap();
        assert_eq!(text(&doc, "number(substring('2024-01-05', 9, 2))"), "5");
        assert_eq!(text(&doc, "sum(//entry/@amount)"), "126.5");
        assert_eq!(text(&doc, "number('abc')"), "NaN");
        assert_eq!(text(&doc, "1 div 0"), "Infinity");
        assert_eq!(text(&doc, "7 mod 3"), "1");
        assert_eq!(text(&doc, "round(2.5)"), "3");
        assert_eq!(text(&doc, "round(-2.5)"), "-2");
        assert_eq!(text(&doc, "-0"), "0");
        assert_eq!(string_to_number(" 12.50 "), 12.5);
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("").is_nan());
    }

    #[test]
    fn test_comparisons_follow_xpath_rules() {
        let doc = parse_str(EXPORT).unwrap();
        assert_eq!(eval(&doc, "//entry/@from = 2"), Value::Boolean(true));
        assert_eq!(eval(&doc, "//entry/@from != 1"), Value::Boolean(true));
        assert_eq!(eval(&doc, "//missing = ''"), Value::Boolean(false));
        assert_eq!(eval(&doc, "//entry = true()"), Value::Boolean(true));
        assert_eq!(eval(&doc, "'10' = 10.0"), Value::Boolean(true));
        assert_eq!(eval(&doc, "3 > //entry/@to"), Value::Boolean(true));
    }

    #[test]
    fn test_union_is_in_document_order() {
        let doc = parse_str(EXPORT).unwrap();
        let Value::NodeSet(nodes) = eval(&doc, "//entry[3] | //entry[1]") else {
            panic!("expected a node-set");
        };
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0] < nodes[1]);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(10.0, "0.00"), "10.00");
        assert_eq!(format_number(-3.5, "0.00"), "-3.50");
        assert_eq!(format_number(1234567.891, "#,##0.00"), "1,234,567.89");
        assert_eq!(format_number(0.5, "#.##"), ".5");
        assert_eq!(format_number(7.0, "000"), "007");
        assert_eq!(format_number(f64::NAN, "0"), "NaN");
        assert_eq!(format_number(f64::INFINITY, "0.00"), "Infinity");
        assert_eq!(format_number(f64::NEG_INFINITY, "#,##0.00"), "-Infinity");
    }

    #[test]
    fn test_errors() {
        let doc = parse_str(EXPORT).unwrap();
        let ctx = Context::new(&doc, doc.root(), &());
        assert!(evaluate(&parse("$missing").unwrap(), &ctx).is_err());
        assert!(evaluate(&parse("frobnicate()").unwrap(), &ctx).is_err());
        assert!(evaluate(&parse("count('x')").unwrap(), &ctx).is_err());
        assert!(evaluate(&parse("substring('x')").unwrap(), &ctx).is_err());
    }
}
