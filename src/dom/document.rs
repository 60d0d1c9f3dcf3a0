use super::{Mutation, NodeId, PageDom};
use ego_tree::NodeId as TreeId;
use html5ever::{Attribute, LocalName, Namespace, QualName};
use log::warn;
use scraper::node::{Element, Text};
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashMap;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Document tree on top of scraper's HTML tree, so selectors match exactly as
/// they do when scraping a saved page. Handles are indices into `handles` and
/// stay valid while a node is detached. Structural and attribute edits are
/// recorded as [`Mutation`]s that a host drains with
/// [`Document::take_mutations`] and feeds to the change detector, the way a
/// mutation observer would.
#[derive(Clone, Debug)]
pub struct Document {
  html: Html,
  handles: Vec<TreeId>,
  index: HashMap<TreeId, NodeId>,
  location: String,
  mutations: Vec<Mutation>,
  clicks: Vec<NodeId>,
}

impl Document {
  pub fn new(location: &str) -> Self {
    let html = Html::new_document();
    let root = html.tree.root().id();
    Self {
      html,
      handles: vec![root],
      index: HashMap::from([(root, NodeId(0))]),
      location: location.to_string(),
      mutations: Vec::new(),
      clicks: Vec::new(),
    }
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn set_location(&mut self, location: &str) {
    self.location = location.to_string();
  }

  pub fn append_element(&mut self, parent: NodeId, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
    let attributes = attributes
      .iter()
      .map(|(name, value)| Attribute {
        name: attribute_name(name),
        value: (*value).into(),
      })
      .collect();
    let node = self.push(Node::Element(Element::new(element_name(tag), attributes)));
    self.append_child(parent, node);
    node
  }

  pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
    let node = self.push(Node::Text(Text { text: text.into() }));
    self.append_child(parent, node);
    node
  }

  /// Mutations recorded since the last call.
  pub fn take_mutations(&mut self) -> Vec<Mutation> {
    std::mem::take(&mut self.mutations)
  }

  /// Nodes that received a synthetic click, oldest first.
  pub fn clicks(&self) -> &[NodeId] {
    &self.clicks
  }

  pub fn query_all(&self, selector: &str) -> Vec<NodeId> {
    let Some(selector) = parse(selector) else {
      return Vec::new();
    };
    self
      .html
      .tree
      .root()
      .descendants()
      .filter_map(ElementRef::wrap)
      .filter(|element| selector.matches(element))
      .filter_map(|element| self.handle_of(element.id()))
      .collect()
  }

  pub fn count(&self, selector: &str) -> usize {
    self.query_all(selector).len()
  }

  fn push(&mut self, node: Node) -> NodeId {
    let id = self.html.tree.orphan(node).id();
    let handle = NodeId(self.handles.len());
    self.handles.push(id);
    self.index.insert(id, handle);
    handle
  }

  fn tree_id(&self, node: NodeId) -> Option<TreeId> {
    self.handles.get(node.0).copied()
  }

  fn handle_of(&self, id: TreeId) -> Option<NodeId> {
    self.index.get(&id).copied()
  }

  fn node_ref(&self, node: NodeId) -> Option<ego_tree::NodeRef<'_, Node>> {
    self.tree_id(node).and_then(|id| self.html.tree.get(id))
  }

  fn element_ref(&self, node: NodeId) -> Option<ElementRef<'_>> {
    self.node_ref(node).and_then(ElementRef::wrap)
  }

  /// Strict descendants of `scope` in document order.
  fn first_match(&self, scope: NodeId, selector: &str) -> Option<NodeId> {
    let selector = parse(selector)?;
    self
      .node_ref(scope)?
      .descendants()
      .skip(1)
      .filter_map(ElementRef::wrap)
      .find(|element| selector.matches(element))
      .and_then(|element| self.handle_of(element.id()))
  }

  /// Replaces one attribute, or drops it when `value` is `None`. The element
  /// is rebuilt so scraper's cached id and class lists follow the edit.
  fn write_attribute(&mut self, node: NodeId, name: &str, value: Option<&str>) -> bool {
    let Some(mut tree_node) = self.tree_id(node).and_then(|id| self.html.tree.get_mut(id)) else {
      return false;
    };
    let Node::Element(element) = tree_node.value() else {
      return false;
    };
    let key = attribute_name(name);
    let mut attributes: Vec<Attribute> = element
      .attrs
      .iter()
      .filter(|(existing, _)| **existing != key)
      .map(|(existing, value)| Attribute {
        name: existing.clone(),
        value: value.clone(),
      })
      .collect();
    if let Some(value) = value {
      attributes.push(Attribute {
        name: key,
        value: value.into(),
      });
    }
    *element = Element::new(element.name.clone(), attributes);
    true
  }

  fn declarations(&self, node: NodeId) -> Vec<(String, String)> {
    self
      .element_ref(node)
      .and_then(|element| element.value().attr("style"))
      .map(parse_declarations)
      .unwrap_or_default()
  }

  fn write_declarations(&mut self, node: NodeId, declarations: &[(String, String)]) {
    let style = declarations
      .iter()
      .map(|(name, value)| format!("{}: {}", name, value))
      .collect::<Vec<_>>()
      .join("; ");
    let value = (!style.is_empty()).then_some(style.as_str());
    if self.write_attribute(node, "style", value) {
      self.mutations.push(Mutation::attribute(node, "style"));
    }
  }

  fn detach(&mut self, node: NodeId) {
    let Some(parent) = self.parent(node) else {
      return;
    };
    if let Some(mut tree_node) = self.tree_id(node).and_then(|id| self.html.tree.get_mut(id)) {
      tree_node.detach();
    }
    self.mutations.push(Mutation::child_list(parent));
  }
}

fn element_name(tag: &str) -> QualName {
  QualName::new(
    None,
    Namespace::from(HTML_NAMESPACE),
    LocalName::from(tag.to_ascii_lowercase().as_str()),
  )
}

fn attribute_name(name: &str) -> QualName {
  QualName::new(None, Namespace::from(""), LocalName::from(name))
}

fn parse(selector: &str) -> Option<Selector> {
  match Selector::parse(selector) {
    Ok(selector) => Some(selector),
    Err(e) => {
      warn!("unparseable selector {:?}: {}", selector, e);
      None
    }
  }
}

/// Splits an inline style into declarations. Semicolons inside parentheses or
/// quotes (gradients, `url(...)`) do not end a declaration.
fn parse_declarations(style: &str) -> Vec<(String, String)> {
  let mut declarations = Vec::new();
  let mut depth = 0usize;
  let mut quote = None;
  let mut start = 0;
  for (i, c) in style.char_indices() {
    match (quote, c) {
      (Some(open), c) if c == open => quote = None,
      (Some(_), _) => {}
      (None, '"' | '\'') => quote = Some(c),
      (None, '(') => depth += 1,
      (None, ')') => depth = depth.saturating_sub(1),
      (None, ';') if depth == 0 => {
        push_declaration(&mut declarations, &style[start..i]);
        start = i + 1;
      }
      _ => {}
    }
  }
  push_declaration(&mut declarations, &style[start..]);
  declarations
}

fn push_declaration(declarations: &mut Vec<(String, String)>, text: &str) {
  let Some((name, value)) = text.split_once(':') else {
    return;
  };
  let name = name.trim();
  if name.is_empty() {
    return;
  }
  declarations.retain(|(existing, _)| existing != name);
  declarations.push((name.to_string(), value.trim().to_string()));
}

impl PageDom for Document {
  fn location(&self) -> String {
    self.location.clone()
  }

  fn query(&self, selector: &str) -> Option<NodeId> {
    self.first_match(self.root(), selector)
  }

  fn query_within(&self, scope: NodeId, selector: &str) -> Option<NodeId> {
    self.first_match(scope, selector)
  }

  fn element_by_id(&self, id: &str) -> Option<NodeId> {
    self
      .html
      .tree
      .root()
      .descendants()
      .filter_map(ElementRef::wrap)
      .find(|element| element.value().id() == Some(id))
      .and_then(|element| self.handle_of(element.id()))
  }

  fn matches(&self, node: NodeId, selector: &str) -> bool {
    let Some(element) = self.element_ref(node) else {
      return false;
    };
    parse(selector).is_some_and(|selector| selector.matches(&element))
  }

  fn closest(&self, node: NodeId, selector: &str) -> Option<NodeId> {
    let start = self.node_ref(node)?;
    let selector = parse(selector)?;
    std::iter::once(start)
      .chain(start.ancestors())
      .filter_map(ElementRef::wrap)
      .find(|element| selector.matches(element))
      .and_then(|element| self.handle_of(element.id()))
  }

  fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
    let (Some(ancestor), Some(node)) = (self.tree_id(ancestor), self.node_ref(node)) else {
      return false;
    };
    node.id() == ancestor || node.ancestors().any(|parent| parent.id() == ancestor)
  }

  fn parent(&self, node: NodeId) -> Option<NodeId> {
    self
      .node_ref(node)?
      .parent()
      .and_then(|parent| self.handle_of(parent.id()))
  }

  fn is_connected(&self, node: NodeId) -> bool {
    self.contains(self.root(), node)
  }

  fn text_content(&self, node: NodeId) -> String {
    let Some(node) = self.node_ref(node) else {
      return String::new();
    };
    node
      .descendants()
      .filter_map(|descendant| descendant.value().as_text())
      .map(|text| &**text)
      .collect()
  }

  fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
    self
      .element_ref(node)?
      .value()
      .attr(name)
      .map(str::to_string)
  }

  fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
    if self.write_attribute(node, name, Some(value)) {
      self.mutations.push(Mutation::attribute(node, name));
    }
  }

  fn style_property(&self, node: NodeId, name: &str) -> Option<String> {
    self
      .declarations(node)
      .into_iter()
      .find(|(existing, _)| existing == name)
      .map(|(_, value)| value)
  }

  fn set_style_property(&mut self, node: NodeId, name: &str, value: &str) {
    if self.element_ref(node).is_none() {
      return;
    }
    let mut declarations = self.declarations(node);
    match declarations.iter_mut().find(|(existing, _)| existing == name) {
      Some((_, existing)) => *existing = value.to_string(),
      None => declarations.push((name.to_string(), value.to_string())),
    }
    self.write_declarations(node, &declarations);
  }

  fn remove_style_property(&mut self, node: NodeId, name: &str) {
    let mut declarations = self.declarations(node);
    let before = declarations.len();
    declarations.retain(|(existing, _)| existing != name);
    if declarations.len() != before {
      self.write_declarations(node, &declarations);
    }
  }

  fn create_element(&mut self, tag: &str) -> NodeId {
    self.push(Node::Element(Element::new(element_name(tag), Vec::new())))
  }

  fn set_text(&mut self, node: NodeId, text: &str) {
    let Some(id) = self.tree_id(node) else {
      return;
    };
    let children: Vec<TreeId> = match self.html.tree.get(id) {
      Some(parent) => parent.children().map(|child| child.id()).collect(),
      None => return,
    };
    for child in children {
      if let Some(mut child) = self.html.tree.get_mut(child) {
        child.detach();
      }
    }
    let text_node = self.push(Node::Text(Text { text: text.into() }));
    if let (Some(text_id), Some(mut parent)) = (self.tree_id(text_node), self.html.tree.get_mut(id)) {
      parent.append_id(text_id);
    }
    self.mutations.push(Mutation::child_list(node));
  }

  fn append_child(&mut self, parent: NodeId, child: NodeId) {
    let (Some(parent_id), Some(child_id)) = (self.tree_id(parent), self.tree_id(child)) else {
      warn!("append_child called with an unknown node");
      return;
    };
    if self.contains(child, parent) {
      warn!("refusing to append a node into its own subtree");
      return;
    }
    self.detach(child);
    if let Some(mut parent_node) = self.html.tree.get_mut(parent_id) {
      parent_node.append_id(child_id);
    }
    self.mutations.push(Mutation::child_list(parent));
  }

  fn remove(&mut self, node: NodeId) {
    self.detach(node);
  }

  fn click(&mut self, node: NodeId) {
    self.clicks.push(node);
  }
}
