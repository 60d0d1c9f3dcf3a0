//! The privileged side: storage reads, artwork lookups and tab routing on
//! behalf of page contexts.

use crate::artwork::ArtworkLookup;
use crate::core::messages::{BackgroundRequest, BackgroundResponse, TabMessage};
use crate::core::page::{MUSIC_TAB_PATTERN, VIDEO_TAB_PATTERN};
use crate::infra::host::{url_matches_pattern, Tab, TabHost};
use crate::infra::rpc::RpcEnvelope;
use crate::infra::storage::{keys, KeyValueStore};
use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Background<S, H, L> {
  store: Arc<S>,
  host: H,
  lookup: L,
  client_id: String,
}

impl<S, H, L> Background<S, H, L>
where
  S: KeyValueStore,
  H: TabHost,
  L: ArtworkLookup,
{
  pub fn new(store: Arc<S>, host: H, lookup: L, client_id: &str) -> Self {
    Self {
      store,
      host,
      lookup,
      client_id: client_id.to_string(),
    }
  }

  pub fn host(&self) -> &H {
    &self.host
  }

  pub fn on_installed(&self) -> Result<()> {
    info!("storing client id");
    self.store.set(keys::CLIENT_ID, &self.client_id)
  }

  /// Injects the page script once a music tab has finished loading.
  pub fn on_tab_updated(&self, tab: &Tab, load_complete: bool) {
    if !load_complete || !url_matches_pattern(MUSIC_TAB_PATTERN, &tab.url) {
      return;
    }
    let Some(client_id) = self.store.get(keys::CLIENT_ID) else {
      debug!("no client id stored yet, not injecting into tab {}", tab.id);
      return;
    };
    if let Err(e) = self.host.inject_page_script(tab.id, &client_id) {
      error!("script injection into tab {} failed: {}", tab.id, e);
    }
  }

  /// Toolbar button: on a music tab, (re)start authorization there.
  pub fn on_action_clicked(&self, tab: &Tab) {
    if !url_matches_pattern(MUSIC_TAB_PATTERN, &tab.url) {
      return;
    }
    if let Err(e) = self.host.send_to_tab(tab.id, TabMessage::ManualAuthTrigger) {
      error!("could not reach tab {}: {}", tab.id, e);
    }
  }

  fn first_page_tab(&self) -> Option<Tab> {
    self
      .host
      .query_tabs(MUSIC_TAB_PATTERN)
      .into_iter()
      .next()
      .or_else(|| self.host.query_tabs(VIDEO_TAB_PATTERN).into_iter().next())
  }

  fn page_tabs(&self) -> Vec<Tab> {
    let mut tabs = self.host.query_tabs(MUSIC_TAB_PATTERN);
    tabs.extend(self.host.query_tabs(VIDEO_TAB_PATTERN));
    tabs
  }

  async fn fetch_album_image(&self, artist: &str, track: &str) -> BackgroundResponse {
    let (image_url, unauthorized) = match self.lookup.find_artwork(artist, track).await {
      Ok(url) => (url, false),
      Err(e) if e.is_unauthorized() => {
        warn!("artwork search rejected the token");
        (None, true)
      }
      Err(e) => {
        warn!("artwork search failed: {}", e);
        (None, false)
      }
    };
    BackgroundResponse::AlbumImage {
      image_url,
      unauthorized,
    }
  }

  pub async fn handle(&self, request: BackgroundRequest) -> BackgroundResponse {
    debug!("background received {:?}", request);
    match request {
      BackgroundRequest::GetClientId => BackgroundResponse::Value {
        value: self
          .store
          .get(keys::CLIENT_ID)
          .or_else(|| Some(self.client_id.clone())),
      },
      BackgroundRequest::GetAccessToken => BackgroundResponse::Value {
        value: self.store.get(keys::ACCESS_TOKEN),
      },
      BackgroundRequest::GetRefreshToken => BackgroundResponse::Value {
        value: self
          .store
          .get(keys::REFRESH_TOKEN)
          .or_else(|| self.store.get(keys::LEGACY_REFRESH_TOKEN)),
      },
      BackgroundRequest::GetCodeVerifier => BackgroundResponse::Value {
        value: self.store.get(keys::CODE_VERIFIER),
      },
      BackgroundRequest::FetchAlbumImage { artist, track } => {
        self.fetch_album_image(&artist, &track).await
      }
      BackgroundRequest::OpenAuthTab { url } => {
        if let Err(e) = self.host.open_tab(&url, true) {
          error!("could not open the authorization page: {}", e);
        }
        BackgroundResponse::Ack
      }
      BackgroundRequest::SpotifyCallback { code } => {
        match self.first_page_tab() {
          Some(tab) => {
            info!("forwarding authorization code to tab {}", tab.id);
            if let Err(e) = self
              .host
              .send_to_tab(tab.id, TabMessage::ProcessAuthCode { code })
            {
              error!("could not forward authorization code: {}", e);
            }
          }
          None => error!("no page tab open to complete authorization"),
        }
        BackgroundResponse::Ack
      }
      BackgroundRequest::RestartAuthorization => {
        match self.first_page_tab() {
          Some(tab) => {
            if let Err(e) = self.host.send_to_tab(tab.id, TabMessage::ManualAuthTrigger) {
              error!("could not restart authorization: {}", e);
            }
          }
          None => warn!("no page tab open to restart authorization"),
        }
        BackgroundResponse::Ack
      }
      BackgroundRequest::AuthorizationComplete => {
        for tab in self.page_tabs() {
          if let Err(e) = self.host.send_to_tab(tab.id, TabMessage::AuthorizationComplete) {
            debug!("tab {} missed authorization notice: {}", tab.id, e);
          }
        }
        BackgroundResponse::Ack
      }
    }
  }

  /// Answers requests until every client is gone.
  pub async fn serve(&self, mut requests: mpsc::Receiver<RpcEnvelope>) {
    while let Some(envelope) = requests.recv().await {
      let response = self.handle(envelope.request.clone()).await;
      envelope.respond(response);
    }
    debug!("background request channel closed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::messages::PageEvent;
  use crate::infra::host::DesktopHost;
  use crate::infra::rpc::RpcClient;
  use crate::infra::storage::MemoryStore;
  use crate::testing::FakeLookup;
  use std::time::Duration;
  use tokio::sync::mpsc::UnboundedReceiver;

  type TestBackground = Background<MemoryStore, DesktopHost, FakeLookup>;

  fn background(lookup: FakeLookup) -> (TestBackground, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let background = Background::new(
      Arc::clone(&store),
      DesktopHost::new(false),
      lookup,
      "client-id",
    );
    (background, store)
  }

  fn next_message(receiver: &mut UnboundedReceiver<PageEvent>) -> Option<TabMessage> {
    match receiver.try_recv() {
      Ok(PageEvent::Message { message, .. }) => Some(message),
      _ => None,
    }
  }

  #[tokio::test]
  async fn test_storage_reads() {
    let (background, store) = background(FakeLookup::default());
    background.on_installed().unwrap();
    store.set(keys::ACCESS_TOKEN, "access").unwrap();
    store.set(keys::LEGACY_REFRESH_TOKEN, "legacy").unwrap();

    assert_eq!(
      background.handle(BackgroundRequest::GetClientId).await,
      BackgroundResponse::Value {
        value: Some("client-id".to_string())
      }
    );
    assert_eq!(
      background.handle(BackgroundRequest::GetAccessToken).await,
      BackgroundResponse::Value {
        value: Some("access".to_string())
      }
    );
    assert_eq!(
      background.handle(BackgroundRequest::GetRefreshToken).await,
      BackgroundResponse::Value {
        value: Some("legacy".to_string())
      }
    );
    assert_eq!(
      background.handle(BackgroundRequest::GetCodeVerifier).await,
      BackgroundResponse::Value { value: None }
    );
  }

  #[tokio::test]
  async fn test_fetch_album_image() {
    let (background, _) = background(
      FakeLookup::default()
        .with_artwork("Artist", "Song", "https://img/1")
        .unauthorized_times(1),
    );
    let request = BackgroundRequest::FetchAlbumImage {
      artist: "Artist".to_string(),
      track: "Song".to_string(),
    };

    assert_eq!(
      background.handle(request.clone()).await,
      BackgroundResponse::AlbumImage {
        image_url: None,
        unauthorized: true
      }
    );
    assert_eq!(
      background.handle(request).await,
      BackgroundResponse::AlbumImage {
        image_url: Some("https://img/1".to_string()),
        unauthorized: false
      }
    );
  }

  #[tokio::test]
  async fn test_failed_search_is_absent() {
    let (background, _) = background(FakeLookup::default().failing());
    assert_eq!(
      background
        .handle(BackgroundRequest::FetchAlbumImage {
          artist: "Artist".to_string(),
          track: "Song".to_string(),
        })
        .await,
      BackgroundResponse::AlbumImage {
        image_url: None,
        unauthorized: false
      }
    );
  }

  #[tokio::test]
  async fn test_callback_code_goes_to_first_music_tab() {
    let (background, _) = background(FakeLookup::default());
    let (video_events, mut video) = mpsc::unbounded_channel();
    background
      .host()
      .register("https://www.youtube.com/watch?v=1", video_events);
    let (music_events, mut music) = mpsc::unbounded_channel();
    background
      .host()
      .register("https://music.youtube.com/watch?v=2", music_events);

    let response = background
      .handle(BackgroundRequest::SpotifyCallback {
        code: "abc".to_string(),
      })
      .await;
    assert_eq!(response, BackgroundResponse::Ack);
    assert_eq!(
      next_message(&mut music),
      Some(TabMessage::ProcessAuthCode {
        code: "abc".to_string()
      })
    );
    assert_eq!(next_message(&mut video), None);

    background
      .handle(BackgroundRequest::AuthorizationComplete)
      .await;
    assert_eq!(
      next_message(&mut music),
      Some(TabMessage::AuthorizationComplete)
    );
    assert_eq!(
      next_message(&mut video),
      Some(TabMessage::AuthorizationComplete)
    );
  }

  #[tokio::test]
  async fn test_callback_falls_back_to_video_tab() {
    let (background, _) = background(FakeLookup::default());
    let (video_events, mut video) = mpsc::unbounded_channel();
    background
      .host()
      .register("https://www.youtube.com/watch?v=1", video_events);

    background
      .handle(BackgroundRequest::RestartAuthorization)
      .await;
    assert_eq!(next_message(&mut video), Some(TabMessage::ManualAuthTrigger));
  }

  #[tokio::test]
  async fn test_tab_events() {
    let (background, store) = background(FakeLookup::default());
    let (music_events, mut music) = mpsc::unbounded_channel();
    let music_tab = background
      .host()
      .register("https://music.youtube.com/", music_events);
    let (video_events, mut video) = mpsc::unbounded_channel();
    let video_tab = background
      .host()
      .register("https://www.youtube.com/", video_events);

    background.on_tab_updated(&music_tab, true);
    assert!(background.host().injected().is_empty());

    store.set(keys::CLIENT_ID, "client-id").unwrap();
    background.on_tab_updated(&music_tab, false);
    background.on_tab_updated(&video_tab, true);
    background.on_tab_updated(&music_tab, true);
    assert_eq!(
      background.host().injected(),
      vec![(music_tab.id, "client-id".to_string())]
    );

    background.on_action_clicked(&video_tab);
    background.on_action_clicked(&music_tab);
    assert_eq!(next_message(&mut video), None);
    assert_eq!(next_message(&mut music), Some(TabMessage::ManualAuthTrigger));
  }

  #[tokio::test]
  async fn test_serve_answers_rpc_clients() {
    let (background, store) = background(FakeLookup::default());
    store.set(keys::ACCESS_TOKEN, "access").unwrap();
    let (rpc, requests) = RpcClient::channel(4, Duration::from_secs(1));

    let client = async move {
      let token = rpc.value(BackgroundRequest::GetAccessToken).await;
      rpc
        .notify(BackgroundRequest::OpenAuthTab {
          url: "https://accounts.spotify.com/authorize".to_string(),
        })
        .unwrap();
      token
    };
    let (token, ()) = tokio::join!(client, background.serve(requests));

    assert_eq!(token, Ok(Some("access".to_string())));
    assert_eq!(
      background.host().opened(),
      vec!["https://accounts.spotify.com/authorize".to_string()]
    );
  }
}
