//! In-memory document model
//!
//! An arena tree standing in for the host page's live DOM. Nodes are
//! addressed by `NodeId`, a plain index that never owns anything: detached
//! nodes stay in the arena until the document itself is dropped, so a stale
//! id is always safe to look up.

mod parser;
mod serialize;

use crate::error::DomError;

/// Handle to a node inside one `Document`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

/// Elements whose content never renders as page text
const NON_RENDERED: &[&str] = &["script", "style", "noscript", "template", "head", "title"];

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document holding only its root node
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
        }
    }

    /// Parse an HTML string into a fresh document
    pub fn parse_html(html: &str) -> Result<Self, DomError> {
        parser::parse(html)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes ever allocated, attached or not
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        id
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(NodeData::Element(ElementData {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Comment(text.to_string()))
    }

    /// Create `<name>text</name>` and append it under `parent`
    pub fn append_element_with_text(
        &mut self,
        parent: NodeId,
        name: &str,
        text: &str,
    ) -> Result<NodeId, DomError> {
        let element = self.create_element(name);
        let text = self.create_text(text);
        self.append_child(element, text)?;
        self.append_child(parent, element)?;
        Ok(element)
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    /// `None` for the root, detached nodes and ids from another document
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Whether `id` was allocated by this document
    pub fn owns(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(id.0).map(|n| &n.data),
            Some(NodeData::Element(_))
        )
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id.0).map(|n| &n.data) {
            Some(NodeData::Element(el)) => Some(el.name.as_str()),
            _ => None,
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.nodes.get(id.0).map(|n| &n.data) {
            Some(NodeData::Element(el)) => el
                .attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Set an attribute. Ignored on non-element nodes.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeData::Element(el) = &mut self.nodes[id.0].data {
            match el.attrs.iter_mut().find(|(k, _)| k == name) {
                Some((_, v)) => *v = value.to_string(),
                None => el.attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        if let NodeData::Element(el) = &mut self.nodes[id.0].data {
            if let Some(pos) = el.attrs.iter().position(|(k, _)| k == name) {
                return Some(el.attrs.remove(pos).1);
            }
        }
        None
    }

    /// Replace the content of a text or comment node
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        match &mut self.nodes[id.0].data {
            NodeData::Text(t) | NodeData::Comment(t) => *t = text.to_string(),
            _ => {}
        }
    }

    /// Whether `node` is `ancestor` or lies beneath it
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Whether the node is reachable from the document root
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.contains(self.root(), id)
    }

    /// Number of ancestors between the node and the top of its tree
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[id.0].parent;
        while let Some(p) = current {
            depth += 1;
            current = self.nodes[p.0].parent;
        }
        depth
    }

    /// Remove the node from its parent. The subtree stays intact.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` under `parent` before `reference`, or last when `None`.
    /// The child is detached from wherever it was first.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        if self.contains(child, parent) {
            return Err(DomError::HierarchyRequest);
        }
        self.detach(child);

        let siblings = &mut self.nodes[parent.0].children;
        let pos = reference
            .and_then(|r| siblings.iter().position(|&c| c == r))
            .unwrap_or(siblings.len());
        siblings.insert(pos, child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Put `wrapper` where `target` is and move `target` inside it
    pub fn wrap(&mut self, target: NodeId, wrapper: NodeId) -> Result<(), DomError> {
        if target == wrapper {
            return Err(DomError::HierarchyRequest);
        }
        let parent = self.nodes[target.0]
            .parent
            .ok_or(DomError::HierarchyRequest)?;
        if self.contains(wrapper, parent) {
            return Err(DomError::HierarchyRequest);
        }

        self.detach(wrapper);
        let pos = self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == target)
            .ok_or(DomError::HierarchyRequest)?;
        self.nodes[parent.0].children[pos] = wrapper;
        self.nodes[wrapper.0].parent = Some(parent);
        self.nodes[target.0].parent = None;

        self.append_child(wrapper, target)
    }

    /// Replace `wrapper` with its children, in order. Returns false when the
    /// wrapper has no parent.
    pub fn unwrap(&mut self, wrapper: NodeId) -> bool {
        let Some(parent) = self.nodes[wrapper.0].parent else {
            return false;
        };
        let Some(pos) = self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == wrapper)
        else {
            return false;
        };

        let children = std::mem::take(&mut self.nodes[wrapper.0].children);
        for &child in &children {
            self.nodes[child.0].parent = Some(parent);
        }
        self.nodes[parent.0]
            .children
            .splice(pos..=pos, children);
        self.nodes[wrapper.0].parent = None;
        true
    }

    /// Preorder traversal of everything below `id`, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.nodes[id.0].children.clone();
        stack.reverse();
        Descendants { doc: self, stack }
    }

    /// Rendered text below a node, skipping script/style-like content
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.0].data {
            NodeData::Text(t) => out.push_str(t),
            NodeData::Comment(_) => {}
            NodeData::Element(el) if NON_RENDERED.contains(&el.name.as_str()) => {}
            NodeData::Element(_) | NodeData::Document => {
                for &child in &self.nodes[id.0].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Attached elements carrying `name="value"`, in document order
    pub fn find_by_attribute(&self, name: &str, value: &str) -> Vec<NodeId> {
        self.descendants(self.root())
            .filter(|&id| self.attr(id, name) == Some(value))
            .collect()
    }

    /// First `<body>` element, or the root when there is none
    pub fn body(&self) -> NodeId {
        self.descendants(self.root())
            .find(|&id| self.tag_name(id) == Some("body"))
            .unwrap_or_else(|| self.root())
    }

    /// CSS-like path to an element, e.g. `#main > ul > li:nth-of-type(3)`.
    /// Stops early at the nearest ancestor with an id.
    pub fn structural_path(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);

        while let Some(node) = current {
            let Some(name) = self.tag_name(node) else {
                break;
            };
            if let Some(element_id) = self.attr(node, "id").filter(|v| !v.is_empty()) {
                segments.push(format!("#{}", element_id));
                break;
            }

            let parent = self.parent(node);
            let segment = match parent {
                Some(p) => {
                    let same_tag: Vec<NodeId> = self
                        .children(p)
                        .iter()
                        .copied()
                        .filter(|&c| self.tag_name(c) == Some(name))
                        .collect();
                    if same_tag.len() > 1 {
                        let index = same_tag.iter().position(|&c| c == node).unwrap_or(0) + 1;
                        format!("{}:nth-of-type({})", name, index)
                    } else {
                        name.to_string()
                    }
                }
                None => name.to_string(),
            };
            segments.push(segment);
            current = parent;
        }

        segments.reverse();
        segments.join(" > ")
    }

    /// Serialize the whole document
    pub fn to_html(&self) -> String {
        serialize::serialize_children(self, self.root())
    }

    /// Serialize one node including its own tag
    pub fn outer_html(&self, id: NodeId) -> String {
        serialize::serialize_node(self, id)
    }
}

/// Preorder iterator returned by `Document::descendants`
pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.nodes[id.0].children.iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let body = doc.create_element("body");
        doc.append_child(doc.root(), body).unwrap();
        let p = doc.append_element_with_text(body, "p", "hello world").unwrap();
        (doc, body, p)
    }

    #[test]
    fn test_text_content() {
        let (mut doc, body, _) = sample();
        let script = doc.append_element_with_text(body, "script", "var x = 1;").unwrap();
        assert_eq!(doc.text_content(body), "hello world");
        assert_eq!(doc.text_content(script), "");
    }

    #[test]
    fn test_wrap_and_unwrap_restore_shape() {
        let (mut doc, body, p) = sample();
        let before: Vec<NodeId> = doc.children(body).to_vec();

        let wrapper = doc.create_element("span");
        doc.wrap(p, wrapper).unwrap();
        assert_eq!(doc.children(body), &[wrapper]);
        assert_eq!(doc.parent(p), Some(wrapper));
        assert_eq!(doc.text_content(body), "hello world");

        assert!(doc.unwrap(wrapper));
        assert_eq!(doc.children(body), before.as_slice());
        assert_eq!(doc.parent(p), Some(body));
        assert!(!doc.is_attached(wrapper));
    }

    #[test]
    fn test_unwrap_keeps_sibling_order() {
        let (mut doc, body, p) = sample();
        let first = doc.append_element_with_text(body, "p", "a").unwrap();
        let last = doc.append_element_with_text(body, "p", "b").unwrap();

        let wrapper = doc.create_element("span");
        doc.wrap(first, wrapper).unwrap();
        doc.unwrap(wrapper);

        assert_eq!(doc.children(body), &[p, first, last]);
    }

    #[test]
    fn test_wrap_detached_target_fails() {
        let mut doc = Document::new();
        let orphan = doc.create_element("p");
        let wrapper = doc.create_element("span");
        assert!(doc.wrap(orphan, wrapper).is_err());
    }

    #[test]
    fn test_insert_into_descendant_rejected() {
        let (mut doc, body, p) = sample();
        assert!(matches!(
            doc.append_child(p, body),
            Err(DomError::HierarchyRequest)
        ));
    }

    #[test]
    fn test_detach_and_attachment() {
        let (mut doc, _, p) = sample();
        assert!(doc.is_attached(p));
        doc.detach(p);
        assert!(!doc.is_attached(p));
        assert_eq!(doc.text_content(p), "hello world");
    }

    #[test]
    fn test_foreign_ids_read_as_absent() {
        let (doc, _, _) = sample();
        let mut other = Document::new();
        for _ in 0..10 {
            other.create_element("div");
        }
        let foreign = other.create_element("span");

        assert!(!doc.owns(foreign));
        assert_eq!(doc.parent(foreign), None);
        assert_eq!(doc.attr(foreign, "id"), None);
        assert_eq!(doc.tag_name(foreign), None);
        assert!(!doc.is_element(foreign));
        assert!(!doc.is_attached(foreign));
    }

    #[test]
    fn test_descendants_preorder() {
        let (mut doc, body, p) = sample();
        let div = doc.create_element("div");
        doc.append_child(body, div).unwrap();
        let inner = doc.append_element_with_text(div, "em", "x").unwrap();

        let elements: Vec<NodeId> = doc
            .descendants(doc.root())
            .filter(|&id| doc.is_element(id))
            .collect();
        assert_eq!(elements, vec![body, p, div, inner]);
    }

    #[test]
    fn test_attributes() {
        let (mut doc, _, p) = sample();
        doc.set_attr(p, "class", "intro");
        doc.set_attr(p, "class", "lead");
        assert_eq!(doc.attr(p, "class"), Some("lead"));
        assert_eq!(doc.find_by_attribute("class", "lead"), vec![p]);
        assert_eq!(doc.remove_attr(p, "class").as_deref(), Some("lead"));
        assert_eq!(doc.attr(p, "class"), None);
    }

    #[test]
    fn test_structural_path() {
        let (mut doc, body, _) = sample();
        let second = doc.append_element_with_text(body, "p", "second").unwrap();
        assert_eq!(doc.structural_path(second), "body > p:nth-of-type(2)");

        let section = doc.create_element("section");
        doc.set_attr(section, "id", "main");
        doc.append_child(body, section).unwrap();
        let li = doc.append_element_with_text(section, "li", "item").unwrap();
        assert_eq!(doc.structural_path(li), "#main > li");
    }
}
