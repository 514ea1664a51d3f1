use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::xml::{Document, NodeId, NodeKind};

use super::eval::{compare_numbers, evaluate, select, select_step, step_accepts, Bindings, Context, Value};
use super::stylesheet::{Avt, AvtPart, Binding, Instruction, Sort, Stylesheet, TemplateBody};
use super::xpath::{Axis, Expr, LocationPath, PathStart};

const MAX_DEPTH: usize = 200;

type TransformResult<T> = Result<T, String>;

/// Applies `sheet` to `source` and returns the result tree.
pub fn apply(sheet: &Stylesheet, mut source: Document) -> TransformResult<Document> {
    source.strip_whitespace(|name| sheet.strips_space(name));
    let mut processor = Processor {
        sheet,
        source: &source,
        result: Document::new(),
        scope: Scope {
            globals: Vec::new(),
            frames: vec![Vec::new()],
        },
        depth: 0,
        step_matches: RefCell::new(HashMap::new()),
    };
    debug!(rules = sheet.rules.len(), globals = sheet.globals.len(), "applying stylesheet");

    let root = Focus::single(source.root());
    for global in &sheet.globals {
        let value = processor.binding_value(global, root)?;
        processor.scope.globals.push((global.name.clone(), value));
    }
    let out = processor.result.root();
    processor.apply_templates(&[source.root()], None, &[], out)?;
    Ok(processor.result)
}

struct Scope {
    globals: Vec<(String, Value)>,
    /// One frame per active template invocation.
    frames: Vec<Vec<(String, Value)>>,
}

impl Bindings for Scope {
    fn variable(&self, name: &str) -> Option<Value> {
        let local = self
            .frames
            .last()
            .and_then(|frame| frame.iter().rev().find(|(n, _)| n == name));
        local
            .or_else(|| self.globals.iter().rev().find(|(n, _)| n == name))
            .map(|(_, value)| value.clone())
    }
}

#[derive(Debug, Clone, Copy)]
struct Focus {
    node: NodeId,
    position: usize,
    size: usize,
}

impl Focus {
    fn single(node: NodeId) -> Self {
        Self {
            node,
            position: 1,
            size: 1,
        }
    }
}

enum SortKey {
    Text(String),
    Number(f64),
}

struct Processor<'s> {
    sheet: &'s Stylesheet,
    source: &'s Document,
    result: Document,
    scope: Scope,
    depth: usize,
    /// Nodes selected by a predicated pattern step, keyed by rule, step
    /// index and the parent the step was evaluated from.
    step_matches: RefCell<HashMap<(usize, usize, NodeId), Rc<HashSet<NodeId>>>>,
}

impl<'s> Processor<'s> {
    fn context(&self, focus: Focus) -> Context<'_> {
        Context {
            doc: self.source,
            node: focus.node,
            position: focus.position,
            size: focus.size,
            current: focus.node,
            bindings: &self.scope,
        }
    }

    fn eval(&self, expr: &Expr, focus: Focus) -> TransformResult<Value> {
        evaluate(expr, &self.context(focus))
    }

    fn eval_text(&self, expr: &Expr, focus: Focus) -> TransformResult<String> {
        Ok(self.eval(expr, focus)?.to_text(self.source))
    }

    fn select(&self, expr: &Expr, focus: Focus) -> TransformResult<Vec<NodeId>> {
        select(expr, &self.context(focus))
    }

    fn avt(&self, avt: &Avt, focus: Focus) -> TransformResult<String> {
        let mut out = String::new();
        for part in &avt.0 {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(expr) => out.push_str(&self.eval_text(expr, focus)?),
            }
        }
        Ok(out)
    }

    fn push_variable(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.scope.frames.last_mut() {
            frame.push((name.to_string(), value));
        }
    }

    fn binding_value(&mut self, binding: &'s Binding, focus: Focus) -> TransformResult<Value> {
        match &binding.select {
            Some(expr) => self.eval(expr, focus),
            None if binding.body.is_empty() => Ok(Value::String(String::new())),
            None => Ok(Value::String(self.fragment_text(&binding.body, focus)?)),
        }
    }

    /// Runs `body` into a scratch tree and returns its string value.
    fn fragment_text(&mut self, body: &'s [Instruction], focus: Focus) -> TransformResult<String> {
        let saved = std::mem::take(&mut self.result);
        let root = self.result.root();
        let outcome = self.execute(body, focus, root);
        let fragment = std::mem::replace(&mut self.result, saved);
        outcome?;
        Ok(fragment.string_value(fragment.root()))
    }

    fn arguments(&mut self, params: &'s [Binding], focus: Focus) -> TransformResult<Vec<(String, Value)>> {
        let mut args = Vec::with_capacity(params.len());
        for param in params {
            args.push((param.name.clone(), self.binding_value(param, focus)?));
        }
        Ok(args)
    }

    /// Executes a sequence of instructions. Variables declared inside go out
    /// of scope when it ends.
    fn execute(&mut self, body: &'s [Instruction], focus: Focus, out: NodeId) -> TransformResult<()> {
        let mark = self.scope.frames.last().map_or(0, Vec::len);
        let mut outcome = Ok(());
        for instruction in body {
            outcome = self.instruction(instruction, focus, out);
            if outcome.is_err() {
                break;
            }
        }
        if let Some(frame) = self.scope.frames.last_mut() {
            frame.truncate(mark);
        }
        outcome
    }

    fn instruction(&mut self, instruction: &'s Instruction, focus: Focus, out: NodeId) -> TransformResult<()> {
        match instruction {
            Instruction::Text(text) => self.result.append_text(out, text),
            Instruction::LiteralElement {
                name,
                namespaces,
                attributes,
                body,
            } => {
                let element = self.result.append_element(out, name);
                for (prefix, uri) in namespaces {
                    self.result.add_namespace(element, prefix, uri);
                }
                for (attr, avt) in attributes {
                    let value = self.avt(avt, focus)?;
                    self.result.set_attribute(element, attr, &value);
                }
                self.execute(body, focus, element)?;
            }
            Instruction::ValueOf(expr) => {
                let text = self.eval_text(expr, focus)?;
                self.result.append_text(out, &text);
            }
            Instruction::ApplyTemplates {
                select,
                mode,
                sorts,
                params,
            } => {
                let nodes = match select {
                    Some(expr) => self.select(expr, focus)?,
                    None => self.source.children(focus.node).to_vec(),
                };
                let nodes = self.sort(nodes, sorts)?;
                let args = self.arguments(params, focus)?;
                self.apply_templates(&nodes, mode.as_deref(), &args, out)?;
            }
            Instruction::CallTemplate { name, params } => {
                let sheet = self.sheet;
                let body = sheet
                    .named
                    .get(name)
                    .ok_or_else(|| format!("no template named `{name}`"))?;
                let args = self.arguments(params, focus)?;
                self.invoke(body, focus, &args, out)?;
            }
            Instruction::ForEach { select, sorts, body } => {
                let nodes = self.select(select, focus)?;
                let nodes = self.sort(nodes, sorts)?;
                let size = nodes.len();
                for (i, &node) in nodes.iter().enumerate() {
                    let inner = Focus {
                        node,
                        position: i + 1,
                        size,
                    };
                    self.execute(body, inner, out)?;
                }
            }
            Instruction::If { test, body } => {
                if self.eval(test, focus)?.to_boolean() {
                    self.execute(body, focus, out)?;
                }
            }
            Instruction::Choose { branches, otherwise } => {
                let mut chosen = otherwise;
                for (test, body) in branches {
                    if self.eval(test, focus)?.to_boolean() {
                        chosen = body;
                        break;
                    }
                }
                self.execute(chosen, focus, out)?;
            }
            Instruction::Element { name, body } => {
                let name = self.avt(name, focus)?;
                if !is_valid_name(&name) {
                    return Err(format!("xsl:element produced an invalid name `{name}`"));
                }
                let element = self.result.append_element(out, &name);
                self.execute(body, focus, element)?;
            }
            Instruction::Attribute { name, body } => {
                let name = self.avt(name, focus)?;
                if !is_valid_name(&name) || name == "xmlns" || name.starts_with("xmlns:") {
                    return Err(format!("xsl:attribute produced an invalid name `{name}`"));
                }
                let value = self.fragment_text(body, focus)?;
                if !self.result.is_element(out) {
                    return Err(format!("attribute `{name}` has no element to attach to"));
                }
                self.result.set_attribute(out, &name, &value);
            }
            Instruction::Comment(body) => {
                let text = self.fragment_text(body, focus)?;
                self.result.append_comment(out, &text);
            }
            Instruction::Copy(body) => self.shallow_copy(body, focus, out)?,
            Instruction::CopyOf(expr) => match self.eval(expr, focus)? {
                Value::NodeSet(nodes) => {
                    for node in nodes {
                        self.result.copy_from(self.source, node, out);
                    }
                }
                other => {
                    let text = other.to_text(self.source);
                    self.result.append_text(out, &text);
                }
            },
            Instruction::Variable(binding) => {
                let value = self.binding_value(binding, focus)?;
                self.push_variable(&binding.name, value);
            }
            Instruction::Message { body, terminate } => {
                let text = self.fragment_text(body, focus)?;
                if *terminate {
                    warn!("xsl:message terminated the transform: {text}");
                    return Err(format!("terminated by xsl:message: {text}"));
                }
                info!("xsl:message: {text}");
            }
        }
        Ok(())
    }

    fn shallow_copy(&mut self, body: &'s [Instruction], focus: Focus, out: NodeId) -> TransformResult<()> {
        match self.source.kind(focus.node) {
            NodeKind::Root => self.execute(body, focus, out),
            NodeKind::Element { name, namespaces } => {
                let element = self.result.append_element(out, name);
                for (prefix, uri) in namespaces {
                    self.result.add_namespace(element, prefix, uri);
                }
                self.execute(body, focus, element)
            }
            NodeKind::Attribute { name, value } => {
                if self.result.is_element(out) {
                    self.result.set_attribute(out, name, value);
                }
                Ok(())
            }
            NodeKind::Text(text) => {
                self.result.append_text(out, text);
                Ok(())
            }
            NodeKind::Comment(text) => {
                self.result.append_comment(out, text);
                Ok(())
            }
        }
    }

    fn sort(&self, nodes: Vec<NodeId>, sorts: &[Sort]) -> TransformResult<Vec<NodeId>> {
        if sorts.is_empty() {
            return Ok(nodes);
        }
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (i, &node) in nodes.iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
            };
            let mut keys = Vec::with_capacity(sorts.len());
            for sort in sorts {
                let value = self.eval(&sort.select, focus)?;
                keys.push(if sort.numeric {
                    SortKey::Number(value.to_number(self.source))
                } else {
                    SortKey::Text(value.to_text(self.source))
                });
            }
            keyed.push((keys, node));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), sort) in a.iter().zip(b).zip(sorts) {
                let ordering = match (x, y) {
                    (SortKey::Number(x), SortKey::Number(y)) => compare_numbers(*x, *y),
                    (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
                    _ => Ordering::Equal,
                };
                let ordering = if sort.descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, node)| node).collect())
    }

    fn apply_templates(
        &mut self,
        nodes: &[NodeId],
        mode: Option<&str>,
        args: &[(String, Value)],
        out: NodeId,
    ) -> TransformResult<()> {
        let size = nodes.len();
        for (i, &node) in nodes.iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
            };
            match self.find_rule(node, mode)? {
                Some(body) => self.invoke(body, focus, args, out)?,
                None => self.builtin_rule(focus, mode, out)?,
            }
        }
        Ok(())
    }

    fn builtin_rule(&mut self, focus: Focus, mode: Option<&str>, out: NodeId) -> TransformResult<()> {
        let source = self.source;
        match source.kind(focus.node) {
            NodeKind::Root | NodeKind::Element { .. } => {
                self.descend()?;
                let outcome = self.apply_templates(source.children(focus.node), mode, &[], out);
                self.depth -= 1;
                outcome
            }
            NodeKind::Text(text) => {
                self.result.append_text(out, text);
                Ok(())
            }
            NodeKind::Attribute { value, .. } => {
                self.result.append_text(out, value);
                Ok(())
            }
            NodeKind::Comment(_) => Ok(()),
        }
    }

    /// Best rule for `node` in `mode`: highest priority, the last declared
    /// among equals.
    fn find_rule(&self, node: NodeId, mode: Option<&str>) -> TransformResult<Option<&'s TemplateBody>> {
        let sheet = self.sheet;
        let mut best = None;
        let mut best_priority = f64::NEG_INFINITY;
        for (index, rule) in sheet.rules.iter().enumerate() {
            if rule.mode.as_deref() != mode || rule.priority < best_priority {
                continue;
            }
            if self.matches(index, &rule.pattern, node)? {
                best = Some(&*rule.body);
                best_priority = rule.priority;
            }
        }
        Ok(best)
    }

    /// Patterns match right to left: the last step must accept the node
    /// and the steps before it must match its parent, or after `//` the
    /// parent or one of its ancestors.
    fn matches(&self, rule: usize, pattern: &Expr, node: NodeId) -> TransformResult<bool> {
        match pattern {
            Expr::Path(path) => self.match_steps(rule, path, path.steps.len(), node),
            _ => Ok(false),
        }
    }

    fn match_steps(&self, rule: usize, path: &LocationPath, count: usize, node: NodeId) -> TransformResult<bool> {
        let doc = self.source;
        let Some(index) = count.checked_sub(1) else {
            return Ok(match path.start {
                PathStart::Root => node == doc.root(),
                _ => true,
            });
        };
        let step = &path.steps[index];
        if step.axis == Axis::DescendantOrSelf {
            let mut cursor = Some(node);
            while let Some(candidate) = cursor {
                if self.match_steps(rule, path, index, candidate)? {
                    return Ok(true);
                }
                cursor = doc.parent(candidate);
            }
            return Ok(false);
        }

        let Some(parent) = doc.parent(node) else {
            return Ok(false);
        };
        let on_axis = (step.axis == Axis::Attribute) == doc.is_attribute(node);
        if !on_axis || !step_accepts(doc, step, node) {
            return Ok(false);
        }
        if !step.predicates.is_empty() && !self.selected_by_step(rule, index, parent)?.contains(&node) {
            return Ok(false);
        }
        self.match_steps(rule, path, index, parent)
    }

    fn selected_by_step(&self, rule: usize, index: usize, parent: NodeId) -> TransformResult<Rc<HashSet<NodeId>>> {
        let key = (rule, index, parent);
        if let Some(selected) = self.step_matches.borrow().get(&key) {
            return Ok(Rc::clone(selected));
        }
        let Expr::Path(path) = &self.sheet.rules[rule].pattern else {
            return Ok(Rc::default());
        };
        let selected: Rc<HashSet<NodeId>> =
            Rc::new(select_step(&path.steps[index], &self.context(Focus::single(parent)))?.into_iter().collect());
        self.step_matches.borrow_mut().insert(key, Rc::clone(&selected));
        Ok(selected)
    }

    fn descend(&mut self) -> TransformResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(format!("template recursion deeper than {MAX_DEPTH} levels"));
        }
        self.depth += 1;
        Ok(())
    }

    fn invoke(
        &mut self,
        body: &'s TemplateBody,
        focus: Focus,
        args: &[(String, Value)],
        out: NodeId,
    ) -> TransformResult<()> {
        self.descend()?;
        self.scope.frames.push(Vec::new());
        let outcome = self.invoke_in_frame(body, focus, args, out);
        self.scope.frames.pop();
        self.depth -= 1;
        outcome
    }

    fn invoke_in_frame(
        &mut self,
        body: &'s TemplateBody,
        focus: Focus,
        args: &[(String, Value)],
        out: NodeId,
    ) -> TransformResult<()> {
        for param in &body.params {
            let value = match args.iter().find(|(name, _)| *name == param.name) {
                Some((_, value)) => value.clone(),
                None => self.binding_value(param, focus)?,
            };
            self.push_variable(&param.name, value);
        }
        self.execute(&body.instructions, focus, out)
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        }
        _ => false,
    }
}
