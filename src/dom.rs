use std::collections::HashMap;

use crate::html::{parse_html, serialize_node};
use crate::{Error, Result};

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    // Source order is kept so serialization is stable.
    pub(crate) attrs: Vec<(String, String)>,
}

impl Element {
    pub(crate) fn new(tag_name: String, attrs: Vec<(String, String)>) -> Self {
        Self { tag_name, attrs }
    }

    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn set_attr(&mut self, name: &str, value: &str) -> bool {
        if let Some(slot) = self.attrs.iter_mut().find(|(key, _)| key == name) {
            if slot.1 == value {
                return false;
            }
            slot.1 = value.to_string();
        } else {
            self.attrs.push((name.to_string(), value.to_string()));
        }
        true
    }

    fn remove_attr(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|(key, _)| key != name);
        before != self.attrs.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes,
    CharacterData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub attribute: Option<String>,
}

impl MutationRecord {
    fn child_list(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            added,
            removed,
            attribute: None,
        }
    }

    pub fn is_child_list(&self) -> bool {
        self.kind == MutationKind::ChildList
    }
}

#[derive(Debug, Clone)]
pub struct Dom {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    id_index: HashMap<String, NodeId>,
    mutations: Vec<MutationRecord>,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
            mutations: Vec::new(),
        }
    }

    pub fn from_html(html: &str) -> Result<Self> {
        parse_html(html)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// `<body>` when the document has one, the document node otherwise.
    pub fn body(&self) -> NodeId {
        self.all_element_nodes()
            .into_iter()
            .find(|node| self.tag_name(*node) == Some("body"))
            .unwrap_or(self.root)
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    // Parser entry point: builds the tree without mutation records.
    pub(crate) fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: Vec<(String, String)>,
    ) -> NodeId {
        let id = self.create_node(Some(parent), NodeType::Element(Element::new(tag_name, attrs)));
        if let Some(id_attr) = self.attr(id, "id").map(ToOwned::to_owned) {
            if !id_attr.is_empty() && self.is_connected(id) {
                self.id_index.entry(id_attr).or_insert(id);
            }
        }
        id
    }

    pub(crate) fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub fn create_detached_element(&mut self, tag_name: &str) -> NodeId {
        let element = Element::new(tag_name.to_ascii_lowercase(), Vec::new());
        self.create_node(None, NodeType::Element(element))
    }

    pub fn create_detached_text(&mut self, text: &str) -> NodeId {
        self.create_node(None, NodeType::Text(text.to_string()))
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes.get(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, node_id: NodeId) -> bool {
        self.element(node_id).is_some()
    }

    pub fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    pub fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes.get(node_id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, node_id: NodeId) -> &[NodeId] {
        self.nodes
            .get(node_id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn element_children(&self, node_id: NodeId) -> Vec<NodeId> {
        self.children(node_id)
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
            .collect()
    }

    pub fn child_element_count(&self, node_id: NodeId) -> usize {
        self.children(node_id)
            .iter()
            .filter(|child| self.is_element(**child))
            .count()
    }

    pub fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    /// Data of a text node; `None` for elements and the document.
    pub fn text(&self, node_id: NodeId) -> Option<&str> {
        match &self.nodes.get(node_id.0)?.node_type {
            NodeType::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn set_text(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        let changed = match self.nodes.get_mut(node_id.0).map(|node| &mut node.node_type) {
            Some(NodeType::Text(text)) => {
                if text == value {
                    false
                } else {
                    *text = value.to_string();
                    true
                }
            }
            _ => return Err(Error::Dom("set_text target is not a text node".into())),
        };
        if changed {
            self.record(MutationRecord {
                kind: MutationKind::CharacterData,
                target: node_id,
                added: Vec::new(),
                removed: Vec::new(),
                attribute: None,
            });
        }
        Ok(())
    }

    pub fn text_content(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        self.push_text_content(node_id, &mut out);
        out
    }

    fn push_text_content(&self, node_id: NodeId, out: &mut String) {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            match &self.nodes[node_id.0].node_type {
                NodeType::Document | NodeType::Element(_) => {
                    for child in &self.nodes[node_id.0].children {
                        self.push_text_content(*child, out);
                    }
                }
                NodeType::Text(text) => out.push_str(text),
            }
        })
    }

    pub fn set_text_content(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::Dom("textContent target is not an element".into()));
        }
        let removed = self.detach_children(node_id);
        let mut added = Vec::new();
        if !value.is_empty() {
            added.push(self.create_text(node_id, value.to_string()));
        }
        self.rebuild_id_index();
        if !removed.is_empty() || !added.is_empty() {
            self.record(MutationRecord::child_list(node_id, added, removed));
        }
        Ok(())
    }

    pub fn inner_html(&self, node_id: NodeId) -> Result<String> {
        if self.element(node_id).is_none() {
            return Err(Error::Dom("innerHTML target is not an element".into()));
        }
        let mut out = String::new();
        for child in &self.nodes[node_id.0].children {
            out.push_str(&serialize_node(self, *child));
        }
        Ok(out)
    }

    pub fn set_inner_html(&mut self, node_id: NodeId, html: &str) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::Dom("innerHTML target is not an element".into()));
        }
        let fragment = parse_html(html)?;
        let removed = self.detach_children(node_id);
        let added = self.adopt_fragment(&fragment, node_id)?;
        self.rebuild_id_index();
        if !removed.is_empty() || !added.is_empty() {
            self.record(MutationRecord::child_list(node_id, added, removed));
        }
        Ok(())
    }

    /// Parses `html` and appends the resulting nodes after the existing
    /// children of `node_id`.
    pub fn append_html(&mut self, node_id: NodeId, html: &str) -> Result<Vec<NodeId>> {
        if !self.can_have_children(node_id) {
            return Err(Error::Dom("append target cannot have children".into()));
        }
        let fragment = parse_html(html)?;
        let added = self.adopt_fragment(&fragment, node_id)?;
        self.rebuild_id_index();
        if !added.is_empty() {
            self.record(MutationRecord::child_list(node_id, added.clone(), Vec::new()));
        }
        Ok(added)
    }

    fn adopt_fragment(&mut self, fragment: &Dom, parent: NodeId) -> Result<Vec<NodeId>> {
        let mut added = Vec::new();
        for child in fragment.nodes[fragment.root.0].children.clone() {
            added.push(self.clone_subtree_from_dom(fragment, child, Some(parent))?);
        }
        Ok(added)
    }

    fn clone_subtree_from_dom(
        &mut self,
        source: &Dom,
        source_node: NodeId,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            let node_type = match &source.nodes[source_node.0].node_type {
                NodeType::Document => {
                    return Err(Error::Dom("cannot adopt a document node".into()));
                }
                other => other.clone(),
            };
            let node = self.create_node(parent, node_type);
            for child in &source.nodes[source_node.0].children {
                self.clone_subtree_from_dom(source, *child, Some(node))?;
            }
            Ok(node)
        })
    }

    fn detach_children(&mut self, node_id: NodeId) -> Vec<NodeId> {
        let old_children = std::mem::take(&mut self.nodes[node_id.0].children);
        for child in &old_children {
            self.nodes[child.0].parent = None;
        }
        old_children
    }

    pub fn attr(&self, node_id: NodeId, name: &str) -> Option<&str> {
        self.element(node_id).and_then(|e| e.attr(name))
    }

    pub fn set_attr(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let lowered = name.to_ascii_lowercase();
        let old_id = if lowered == "id" {
            self.attr(node_id, "id").map(ToOwned::to_owned)
        } else {
            None
        };
        let changed = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Dom("setAttribute target is not an element".into()))?
            .set_attr(&lowered, value);
        if !changed {
            return Ok(());
        }

        if lowered == "id" && self.is_connected(node_id) {
            if let Some(old) = old_id {
                self.id_index.remove(&old);
            }
            if !value.is_empty() {
                self.id_index.insert(value.to_string(), node_id);
            }
        }
        self.record(MutationRecord {
            kind: MutationKind::Attributes,
            target: node_id,
            added: Vec::new(),
            removed: Vec::new(),
            attribute: Some(lowered),
        });
        Ok(())
    }

    pub fn remove_attr(&mut self, node_id: NodeId, name: &str) -> Result<()> {
        let lowered = name.to_ascii_lowercase();
        let removed = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Dom("removeAttribute target is not an element".into()))?
            .remove_attr(&lowered);
        if !removed {
            return Ok(());
        }
        if lowered == "id" {
            self.rebuild_id_index();
        }
        self.record(MutationRecord {
            kind: MutationKind::Attributes,
            target: node_id,
            added: Vec::new(),
            removed: Vec::new(),
            attribute: Some(lowered),
        });
        Ok(())
    }

    pub fn class_contains(&self, node_id: NodeId, class_name: &str) -> bool {
        self.element(node_id)
            .is_some_and(|element| element_has_class(element, class_name))
    }

    pub fn class_add(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let mut classes = class_tokens(self.attr(node_id, "class"));
        if classes.iter().any(|name| name == class_name) {
            return Ok(());
        }
        classes.push(class_name.to_string());
        self.set_attr(node_id, "class", &classes.join(" "))
    }

    pub fn class_remove(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let mut classes = class_tokens(self.attr(node_id, "class"));
        let before = classes.len();
        classes.retain(|name| name != class_name);
        if before == classes.len() {
            return Ok(());
        }
        if classes.is_empty() {
            self.remove_attr(node_id, "class")
        } else {
            self.set_attr(node_id, "class", &classes.join(" "))
        }
    }

    pub fn style_get(&self, node_id: NodeId, property: &str) -> Option<String> {
        let decls = parse_style_declarations(self.attr(node_id, "style"));
        let name = property.to_ascii_lowercase();
        decls
            .into_iter()
            .find(|(prop, _)| *prop == name)
            .map(|(_, value)| value)
    }

    pub fn style_set(&mut self, node_id: NodeId, property: &str, value: &str) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::Dom("style target is not an element".into()));
        }
        let name = property.to_ascii_lowercase();
        let mut decls = parse_style_declarations(self.attr(node_id, "style"));
        if let Some(pos) = decls.iter().position(|(prop, _)| *prop == name) {
            if value.is_empty() {
                decls.remove(pos);
            } else {
                decls[pos].1 = value.to_string();
            }
        } else if !value.is_empty() {
            decls.push((name, value.to_string()));
        }

        if decls.is_empty() {
            self.remove_attr(node_id, "style")
        } else {
            self.set_attr(node_id, "style", &serialize_style_declarations(&decls))
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.can_have_children(parent) {
            return Err(Error::Dom("appendChild target cannot have children".into()));
        }
        if child == self.root || child == parent || !self.is_valid_node(child) {
            return Err(Error::Dom("invalid appendChild node".into()));
        }

        // Prevent cycles: parent must not be inside child's subtree.
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if node == child {
                return Err(Error::Dom("appendChild would create a cycle".into()));
            }
            cursor = self.parent(node);
        }

        if let Some(old_parent) = self.parent(child) {
            self.remove_child(old_parent, child)?;
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        self.rebuild_id_index();
        self.record(MutationRecord::child_list(parent, vec![child], Vec::new()));
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child) != Some(parent) {
            return Err(Error::Dom("removeChild target is not a direct child".into()));
        }
        self.nodes[parent.0].children.retain(|id| *id != child);
        self.nodes[child.0].parent = None;
        self.rebuild_id_index();
        self.record(MutationRecord::child_list(parent, Vec::new(), vec![child]));
        Ok(())
    }

    /// Detaches `node` from its parent. Removing an already detached node is
    /// a no-op.
    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(Error::Dom("cannot remove document root".into()));
        }
        let Some(parent) = self.parent(node) else {
            return Ok(());
        };
        self.remove_child(parent, node)
    }

    pub(crate) fn can_have_children(&self, node_id: NodeId) -> bool {
        matches!(
            self.nodes.get(node_id.0).map(|n| &n.node_type),
            Some(NodeType::Document | NodeType::Element(_))
        )
    }

    fn is_valid_node(&self, node_id: NodeId) -> bool {
        node_id.0 < self.nodes.len()
    }

    pub fn is_connected(&self, node_id: NodeId) -> bool {
        let mut cursor = Some(node_id);
        while let Some(node) = cursor {
            if node == self.root {
                return true;
            }
            cursor = self.parent(node);
        }
        false
    }

    fn rebuild_id_index(&mut self) {
        let mut next = HashMap::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if let NodeType::Element(element) = &self.nodes[node.0].node_type {
                if let Some(id) = element.attr("id") {
                    if !id.is_empty() {
                        next.entry(id.to_string()).or_insert(node);
                    }
                }
            }
            for child in self.nodes[node.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        self.id_index = next;
    }

    pub(crate) fn collect_elements_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            if matches!(self.nodes[node_id.0].node_type, NodeType::Element(_)) {
                out.push(node_id);
            }
            for child in &self.nodes[node_id.0].children {
                self.collect_elements_dfs(*child, out);
            }
        })
    }

    pub fn all_element_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements_dfs(self.root, &mut out);
        out
    }

    /// Text nodes under `node_id` in document order, skipping the raw text
    /// of `<script>` and `<style>`.
    pub fn text_nodes_under(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node_id];
        while let Some(node) = stack.pop() {
            match &self.nodes[node.0].node_type {
                NodeType::Text(_) => out.push(node),
                NodeType::Element(element)
                    if matches!(element.tag_name.as_str(), "script" | "style") => {}
                NodeType::Element(_) | NodeType::Document => {
                    for child in self.nodes[node.0].children.iter().rev() {
                        stack.push(*child);
                    }
                }
            }
        }
        out
    }

    pub fn dump_node(&self, node_id: NodeId) -> String {
        serialize_node(self, node_id)
    }

    fn record(&mut self, record: MutationRecord) {
        if self.is_connected(record.target) {
            self.mutations.push(record);
        }
    }

    pub fn take_mutation_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations)
    }

    pub fn pending_mutation_count(&self) -> usize {
        self.mutations.len()
    }
}

pub(crate) fn element_has_class(element: &Element, class_name: &str) -> bool {
    element
        .attr("class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

fn class_tokens(class_attr: Option<&str>) -> Vec<String> {
    class_attr
        .map(|value| {
            value
                .split_whitespace()
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn parse_style_declarations(style_attr: Option<&str>) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    let Some(style_attr) = style_attr else {
        return out;
    };

    for decl in style_attr.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((name, value)) = decl.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().to_string();
        if let Some(pos) = out.iter().position(|(existing, _)| *existing == name) {
            out[pos].1 = value;
        } else {
            out.push((name, value));
        }
    }

    out
}

fn serialize_style_declarations(decls: &[(String, String)]) -> String {
    let mut out = String::new();
    for (idx, (name, value)) in decls.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push(';');
    }
    out
}
