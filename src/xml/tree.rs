/// Index of a node inside its owning [`Document`].
///
/// For parsed documents ids increase in document order: an element comes
/// first, then its attributes, then its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Element {
        name: String,
        /// `(prefix, uri)`; the default namespace has an empty prefix.
        namespaces: Vec<(String, String)>,
    },
    Attribute {
        name: String,
        value: String,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: Vec<NodeId>,
}

/// Arena-backed XML tree.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
                attributes: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The single top-level element, if the document has one.
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|&id| self.is_element(id))
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn attributes(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].attributes
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Element { .. })
    }

    pub fn is_attribute(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Attribute { .. })
    }

    /// Qualified name of an element or attribute.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Element { name, .. } | NodeKind::Attribute { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn namespaces(&self, id: NodeId) -> &[(String, String)] {
        match self.kind(id) {
            NodeKind::Element { namespaces, .. } => namespaces,
            _ => &[],
        }
    }

    pub fn attribute(&self, element: NodeId, name: &str) -> Option<&str> {
        self.attributes(element)
            .iter()
            .find_map(|&attr| match self.kind(attr) {
                NodeKind::Attribute { name: n, value } if n == name => Some(value.as_str()),
                _ => None,
            })
    }

    /// XPath string-value: concatenated descendant text for roots and
    /// elements, the literal content for everything else.
    pub fn string_value(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Root | NodeKind::Element { .. } => self
                .descendants(id)
                .into_iter()
                .filter_map(|node| match self.kind(node) {
                    NodeKind::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
            NodeKind::Attribute { value, .. } => value.clone(),
            NodeKind::Text(text) | NodeKind::Comment(text) => text.clone(),
        }
    }

    /// Every node below `id` (attributes excluded) in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = pending.pop() {
            out.push(node);
            pending.extend(self.children(node).iter().rev());
        }
        out
    }

    fn push_node(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            attributes: Vec::new(),
        });
        id
    }

    pub fn append_element(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.push_node(
            parent,
            NodeKind::Element {
                name: name.to_string(),
                namespaces: Vec::new(),
            },
        );
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Sets an attribute, replacing the value when the name already exists.
    pub fn set_attribute(&mut self, element: NodeId, name: &str, value: &str) -> NodeId {
        if let Some(&existing) = self
            .attributes(element)
            .iter()
            .find(|&&attr| self.name(attr) == Some(name))
        {
            self.nodes[existing.0].kind = NodeKind::Attribute {
                name: name.to_string(),
                value: value.to_string(),
            };
            return existing;
        }
        let id = self.push_node(
            element,
            NodeKind::Attribute {
                name: name.to_string(),
                value: value.to_string(),
            },
        );
        self.nodes[element.0].attributes.push(id);
        id
    }

    pub fn add_namespace(&mut self, element: NodeId, prefix: &str, uri: &str) {
        if let NodeKind::Element { namespaces, .. } = &mut self.nodes[element.0].kind {
            if !namespaces.iter().any(|(p, _)| p == prefix) {
                namespaces.push((prefix.to_string(), uri.to_string()));
            }
        }
    }

    /// Appends text, merging with a preceding text sibling.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(&last) = self.nodes[parent.0].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last.0].kind {
                existing.push_str(text);
                return;
            }
        }
        let id = self.push_node(parent, NodeKind::Text(text.to_string()));
        self.nodes[parent.0].children.push(id);
    }

    pub fn append_comment(&mut self, parent: NodeId, text: &str) {
        let id = self.push_node(parent, NodeKind::Comment(text.to_string()));
        self.nodes[parent.0].children.push(id);
    }

    /// Deep-copies `node` from `source` under `parent`. Attribute nodes are
    /// attached to `parent`, roots contribute their children.
    pub fn copy_from(&mut self, source: &Document, node: NodeId, parent: NodeId) {
        let mut pending = vec![(node, parent)];
        while let Some((node, parent)) = pending.pop() {
            match source.kind(node) {
                NodeKind::Root => {
                    pending.extend(source.children(node).iter().rev().map(|&child| (child, parent)));
                }
                NodeKind::Element { name, namespaces } => {
                    let copy = self.append_element(parent, name);
                    for (prefix, uri) in namespaces {
                        self.add_namespace(copy, prefix, uri);
                    }
                    for &attr in source.attributes(node) {
                        if let NodeKind::Attribute { name, value } = source.kind(attr) {
                            self.set_attribute(copy, name, value);
                        }
                    }
                    pending.extend(source.children(node).iter().rev().map(|&child| (child, copy)));
                }
                NodeKind::Attribute { name, value } => {
                    if self.is_element(parent) {
                        self.set_attribute(parent, name, value);
                    }
                }
                NodeKind::Text(text) => self.append_text(parent, text),
                NodeKind::Comment(text) => self.append_comment(parent, text),
            }
        }
    }

    /// Drops whitespace-only text children of every element for which
    /// `strip` returns true.
    pub fn strip_whitespace<F>(&mut self, strip: F)
    where
        F: Fn(&str) -> bool,
    {
        for index in 0..self.nodes.len() {
            let strip_here = match &self.nodes[index].kind {
                NodeKind::Element { name, .. } => strip(name),
                _ => false,
            };
            if !strip_here {
                continue;
            }
            let children = std::mem::take(&mut self.nodes[index].children);
            let kept: Vec<NodeId> = children
                .into_iter()
                .filter(|child| {
                    !matches!(&self.nodes[child.0].kind, NodeKind::Text(t) if t.trim().is_empty())
                })
                .collect();
            self.nodes[index].children = kept;
        }
    }
}

/// Local part of a qualified name.
pub fn local_name(qname: &str) -> &str {
    qname.rsplit_once(':').map_or(qname, |(_, local)| local)
}

/// Prefix of a qualified name, empty when unprefixed.
pub fn prefix(qname: &str) -> &str {
    qname.split_once(':').map_or("", |(prefix, _)| prefix)
}
