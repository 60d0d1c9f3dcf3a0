//! Debounced change detection over the page's mutation records.
//!
//! An [`ObserverHandle`] watches one mount point. Mutation batches offered to
//! it are filtered for relevance; relevant ones feed a channel that
//! [`debounce`] turns into a stream of coalesced [`ChangeEvent`]s. Dropping
//! the handle ends the subscription.

use crate::core::page::PageKind;
use crate::dom::{Mutation, MutationKind, NodeId, PageDom};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use log::debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const MUSIC_MOUNT_LOCATOR: &str = "ytmusic-player-bar";
pub const VIDEO_MOUNT_LOCATORS: [&str; 2] = ["#content", "body"];

const MUSIC_RELEVANT_LOCATOR: &str = ".title, .byline";
const VIDEO_RELEVANT_LOCATOR: &str = "h1";
const VIDEO_CONTENT_ID: &str = "content";

/// One debounced re-evaluation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
  /// Relevant mutation batches folded into this event.
  pub coalesced: usize,
}

pub fn mount_point<D: PageDom + ?Sized>(dom: &D, kind: PageKind) -> Option<NodeId> {
  match kind {
    PageKind::MusicPage => dom.query(MUSIC_MOUNT_LOCATOR),
    PageKind::VideoPage => VIDEO_MOUNT_LOCATORS
      .iter()
      .find_map(|locator| dom.query(locator)),
    PageKind::Unsupported => None,
  }
}

fn is_relevant_target<D: PageDom + ?Sized>(dom: &D, kind: PageKind, target: NodeId) -> bool {
  match kind {
    PageKind::MusicPage => {
      dom.closest(target, MUSIC_RELEVANT_LOCATOR).is_some()
        || dom.query_within(target, MUSIC_RELEVANT_LOCATOR).is_some()
    }
    PageKind::VideoPage => {
      dom.closest(target, VIDEO_RELEVANT_LOCATOR).is_some()
        || dom.query_within(target, VIDEO_RELEVANT_LOCATOR).is_some()
        || dom.attribute(target, "id").as_deref() == Some(VIDEO_CONTENT_ID)
    }
    PageKind::Unsupported => false,
  }
}

/// Whether a batch touches the title/byline area under `mount`. Only
/// child-list changes count; attribute churn is noise.
pub fn is_relevant<D: PageDom + ?Sized>(
  dom: &D,
  kind: PageKind,
  mount: NodeId,
  mutations: &[Mutation],
) -> bool {
  mutations.iter().any(|mutation| {
    mutation.kind == MutationKind::ChildList
      && dom.contains(mount, mutation.target)
      && is_relevant_target(dom, kind, mutation.target)
  })
}

/// Emits one event `delay` after the first signal of a burst, folding in
/// every signal that arrives before then. Ends when the sender is dropped.
pub fn debounce(
  signals: mpsc::UnboundedReceiver<()>,
  delay: Duration,
) -> impl Stream<Item = ChangeEvent> {
  stream::unfold(signals, move |mut signals| async move {
    signals.recv().await?;
    let deadline = Instant::now() + delay;
    let mut coalesced = 1;
    while let Ok(Some(())) = tokio::time::timeout_at(deadline, signals.recv()).await {
      coalesced += 1;
    }
    Some((ChangeEvent { coalesced }, signals))
  })
}

pub struct ObserverHandle {
  mount: NodeId,
  kind: PageKind,
  signals: mpsc::UnboundedSender<()>,
  events: BoxStream<'static, ChangeEvent>,
}

impl ObserverHandle {
  /// `None` while the page has not rendered the mount point yet.
  pub fn attach<D: PageDom + ?Sized>(dom: &D, kind: PageKind, delay: Duration) -> Option<Self> {
    let mount = mount_point(dom, kind)?;
    let (signals, receiver) = mpsc::unbounded_channel();
    debug!("observer attached to {:?}", mount);
    Some(Self {
      mount,
      kind,
      signals,
      events: debounce(receiver, delay).boxed(),
    })
  }

  pub fn mount(&self) -> NodeId {
    self.mount
  }

  /// The page may replace the subtree the observer was mounted on.
  pub fn is_attached<D: PageDom + ?Sized>(&self, dom: &D) -> bool {
    dom.is_connected(self.mount)
  }

  /// Feeds a mutation batch; returns whether it was relevant.
  pub fn offer<D: PageDom + ?Sized>(&self, dom: &D, mutations: &[Mutation]) -> bool {
    let relevant = is_relevant(dom, self.kind, self.mount, mutations);
    if relevant {
      debug!("relevant track change detected");
      // The receiver lives in `events`, which we own.
      let _ = self.signals.send(());
    }
    relevant
  }

  pub async fn next_change(&mut self) -> Option<ChangeEvent> {
    self.events.next().await
  }
}
