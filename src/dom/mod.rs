//! The page document as seen by the overlay engine.
//!
//! Everything the engine knows about a page goes through [`PageDom`]: locator
//! probes, text reads, inline style writes and the handful of structural edits
//! the overlay needs. [`Document`] is the in-memory implementation used by the
//! desktop host and by tests; a browser host would back the trait with the
//! real DOM.

pub mod document;
pub mod snapshot;

pub use document::Document;

/// Opaque handle to a node of a [`PageDom`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationKind {
  ChildList,
  Attributes { name: String },
}

/// One mutation record, as a mutation observer would deliver it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
  pub target: NodeId,
  pub kind: MutationKind,
}

impl Mutation {
  pub fn child_list(target: NodeId) -> Self {
    Self {
      target,
      kind: MutationKind::ChildList,
    }
  }

  pub fn attribute(target: NodeId, name: &str) -> Self {
    Self {
      target,
      kind: MutationKind::Attributes {
        name: name.to_string(),
      },
    }
  }
}

pub trait PageDom {
  /// Current address of the page.
  fn location(&self) -> String;

  /// First element in document order matching `selector`.
  fn query(&self, selector: &str) -> Option<NodeId>;
  /// First descendant of `scope` matching `selector`.
  fn query_within(&self, scope: NodeId, selector: &str) -> Option<NodeId>;
  fn element_by_id(&self, id: &str) -> Option<NodeId>;
  fn matches(&self, node: NodeId, selector: &str) -> bool;
  /// `node` itself or its nearest ancestor matching `selector`.
  fn closest(&self, node: NodeId, selector: &str) -> Option<NodeId>;
  fn contains(&self, ancestor: NodeId, node: NodeId) -> bool;
  fn parent(&self, node: NodeId) -> Option<NodeId>;
  /// Whether the node is currently attached to the document tree.
  fn is_connected(&self, node: NodeId) -> bool;

  fn text_content(&self, node: NodeId) -> String;
  fn attribute(&self, node: NodeId, name: &str) -> Option<String>;
  fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);

  /// Inline style property, `None` when unset.
  fn style_property(&self, node: NodeId, name: &str) -> Option<String>;
  fn set_style_property(&mut self, node: NodeId, name: &str, value: &str);
  fn remove_style_property(&mut self, node: NodeId, name: &str);

  /// Creates a detached element.
  fn create_element(&mut self, tag: &str) -> NodeId;
  fn set_text(&mut self, node: NodeId, text: &str);
  fn append_child(&mut self, parent: NodeId, child: NodeId);
  /// Detaches `node` from its parent. The handle stays valid and the node may
  /// be appended again.
  fn remove(&mut self, node: NodeId);
  fn click(&mut self, node: NodeId);
}
