//! Connection status as shown in the toolbar popup.

use crate::auth::{AuthLifecycle, TokenService};
use crate::core::messages::TabMessage;
use crate::core::page::MUSIC_TAB_PATTERN;
use crate::infra::host::{TabHost, TabId};
use crate::infra::storage::{keys, KeyValueStore, StorageChange};
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::fmt;

/// Opened when connect is pressed away from YouTube Music.
pub const MUSIC_HOME_URL: &str = "https://music.youtube.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
  Connected,
  NotConnected,
}

impl ConnectionStatus {
  /// Derived from the presence of an access token alone.
  pub fn from_store<S: KeyValueStore + ?Sized>(store: &S) -> Self {
    if store.get(keys::ACCESS_TOKEN).is_some() {
      ConnectionStatus::Connected
    } else {
      ConnectionStatus::NotConnected
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      ConnectionStatus::Connected => "Connected to Spotify",
      ConnectionStatus::NotConnected => "Not Connected",
    }
  }

  /// Changes that should make an open popup re-read its status.
  pub fn affects_status(change: &StorageChange) -> bool {
    change.key == keys::ACCESS_TOKEN || change.key == keys::REFRESH_TOKEN
  }
}

impl fmt::Display for ConnectionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectAction {
  /// Authorization was started in this tab.
  Triggered(TabId),
  OpenedMusicTab,
}

/// The popup's connect button. Authorization starts in the active music
/// tab; a tab whose page script does not answer gets it injected and is
/// asked once more. Without an active music tab, one is opened instead.
pub fn connect<H: TabHost>(host: &H, client_id: &str) -> Result<ConnectAction> {
  let active = host
    .query_tabs(MUSIC_TAB_PATTERN)
    .into_iter()
    .find(|tab| tab.active);
  let Some(tab) = active else {
    info!("not on YouTube Music, opening {}", MUSIC_HOME_URL);
    host.open_tab(MUSIC_HOME_URL, true)?;
    return Ok(ConnectAction::OpenedMusicTab);
  };

  if let Err(e) = host.send_to_tab(tab.id, TabMessage::ManualAuthTrigger) {
    warn!("tab {} did not answer ({}), injecting the page script", tab.id, e);
    host.inject_page_script(tab.id, client_id)?;
    host
      .send_to_tab(tab.id, TabMessage::ManualAuthTrigger)
      .map_err(|e| anyhow!("still could not reach tab {}: {}", tab.id, e))?;
  }
  Ok(ConnectAction::Triggered(tab.id))
}

/// The popup's disconnect button.
pub fn disconnect<S: KeyValueStore, T: TokenService>(auth: &mut AuthLifecycle<S, T>) -> ConnectionStatus {
  auth.disconnect();
  ConnectionStatus::from_store(&**auth.store())
}
