use super::{Document, PageDom};
use scraper::{Html, Node};

/// Builds a [`Document`] from saved page HTML. Comments, doctypes and
/// whitespace-only text are dropped.
pub fn document_from_html(html: &str, location: &str) -> Document {
  let parsed = Html::parse_document(html);
  let mut document = Document::new(location);
  let root = document.root();

  let mut stack = vec![(parsed.tree.root(), root)];
  while let Some((source, target)) = stack.pop() {
    let mut pending = Vec::new();
    for child in source.children() {
      match child.value() {
        Node::Element(element) => {
          let node = document.create_element(element.name());
          for (name, value) in element.attrs() {
            document.set_attribute(node, name, value);
          }
          document.append_child(target, node);
          pending.push((child, node));
        }
        Node::Text(text) => {
          let content: &str = text;
          if !content.trim().is_empty() {
            document.append_text(target, content);
          }
        }
        _ => {}
      }
    }
    stack.extend(pending);
  }

  document.take_mutations();
  document
}
