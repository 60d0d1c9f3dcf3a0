//! The tab-level services the background coordinator relies on.

use crate::core::messages::{PageEvent, TabMessage};
use crate::error::RpcError;
use anyhow::{anyhow, Result};
use log::{debug, info};
use regex::Regex;
use std::cell::RefCell;
use tokio::sync::mpsc;

pub type TabId = u32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tab {
  pub id: TabId,
  pub url: String,
  pub active: bool,
}

pub trait TabHost {
  /// Open tabs whose address matches a `scheme://host/path` pattern with
  /// `*` wildcards.
  fn query_tabs(&self, pattern: &str) -> Vec<Tab>;
  fn send_to_tab(&self, tab: TabId, message: TabMessage) -> Result<(), RpcError>;
  fn open_tab(&self, url: &str, active: bool) -> Result<()>;
  fn inject_page_script(&self, tab: TabId, client_id: &str) -> Result<()>;
}

/// Match-pattern check. A `*` scheme stands for http or https.
pub fn url_matches_pattern(pattern: &str, url: &str) -> bool {
  let Some((scheme, rest)) = pattern.split_once("://") else {
    return false;
  };
  let scheme = if scheme == "*" {
    "https?".to_string()
  } else {
    regex::escape(scheme)
  };
  let rest = regex::escape(rest).replace(r"\*", ".*");
  match Regex::new(&format!("^{}://{}$", scheme, rest)) {
    Ok(re) => re.is_match(url),
    Err(_) => false,
  }
}

struct RegisteredTab {
  tab: Tab,
  events: mpsc::UnboundedSender<PageEvent>,
}

/// In-process host: every "tab" is a page controller fed through its event
/// channel. Opening a tab launches the system browser when enabled.
pub struct DesktopHost {
  launch_browser: bool,
  tabs: RefCell<Vec<RegisteredTab>>,
  injected: RefCell<Vec<(TabId, String)>>,
  opened: RefCell<Vec<String>>,
}

impl DesktopHost {
  pub fn new(launch_browser: bool) -> Self {
    Self {
      launch_browser,
      tabs: RefCell::new(Vec::new()),
      injected: RefCell::new(Vec::new()),
      opened: RefCell::new(Vec::new()),
    }
  }

  pub fn register(&self, url: &str, events: mpsc::UnboundedSender<PageEvent>) -> Tab {
    let mut tabs = self.tabs.borrow_mut();
    let tab = Tab {
      id: tabs.len() as TabId + 1,
      url: url.to_string(),
      active: tabs.is_empty(),
    };
    tabs.push(RegisteredTab {
      tab: tab.clone(),
      events,
    });
    tab
  }

  pub fn injected(&self) -> Vec<(TabId, String)> {
    self.injected.borrow().clone()
  }

  pub fn opened(&self) -> Vec<String> {
    self.opened.borrow().clone()
  }
}

impl TabHost for DesktopHost {
  fn query_tabs(&self, pattern: &str) -> Vec<Tab> {
    self
      .tabs
      .borrow()
      .iter()
      .filter(|registered| url_matches_pattern(pattern, &registered.tab.url))
      .map(|registered| registered.tab.clone())
      .collect()
  }

  fn send_to_tab(&self, tab: TabId, message: TabMessage) -> Result<(), RpcError> {
    let tabs = self.tabs.borrow();
    let registered = tabs
      .iter()
      .find(|registered| registered.tab.id == tab)
      .ok_or(RpcError::Disconnected)?;
    debug!("sending {:?} to tab {}", message, tab);
    registered
      .events
      .send(PageEvent::Message {
        message,
        reply: None,
      })
      .map_err(|_| RpcError::Disconnected)
  }

  fn open_tab(&self, url: &str, active: bool) -> Result<()> {
    info!("opening tab (active: {}): {}", active, url);
    self.opened.borrow_mut().push(url.to_string());
    if self.launch_browser {
      open::that(url).map_err(|e| anyhow!("Could not open {} in a browser: {}", url, e))?;
    }
    Ok(())
  }

  fn inject_page_script(&self, tab: TabId, client_id: &str) -> Result<()> {
    if !self.tabs.borrow().iter().any(|registered| registered.tab.id == tab) {
      return Err(anyhow!("no tab with id {}", tab));
    }
    debug!("page script injected into tab {}", tab);
    self
      .injected
      .borrow_mut()
      .push((tab, client_id.to_string()));
    Ok(())
  }
}
