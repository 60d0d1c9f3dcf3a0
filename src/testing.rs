//! Fakes and page fixtures shared by the unit tests.

use crate::artwork::ArtworkLookup;
use crate::auth::{AuthSettings, CodeExchange, TokenResponse, TokenService};
use crate::dom::{Document, NodeId, PageDom};
use crate::error::ServiceError;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

pub const VIDEO_URL: &str = "https://www.youtube.com/watch?v=abc123";
pub const MUSIC_URL: &str = "https://music.youtube.com/watch?v=abc123";

pub fn auth_settings() -> AuthSettings {
  AuthSettings {
    client_id: Some("test-client".to_string()),
    redirect_uri: "http://127.0.0.1:8888/callback".to_string(),
    authorize_url: "https://accounts.spotify.com/authorize".to_string(),
    scopes: "user-read-private user-read-email".to_string(),
    validation_timeout: Duration::from_secs(5),
  }
}

/// Answers one HTTP request on a loopback port with `status` and `body`.
/// Returns the address to fetch.
pub fn serve_once(status: &'static str, body: Vec<u8>) -> String {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let port = listener.local_addr().unwrap().port();
  thread::spawn(move || {
    let Ok((mut stream, _)) = listener.accept() else {
      return;
    };
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
      match stream.read(&mut chunk) {
        Ok(0) | Err(_) => break,
        Ok(n) => request.extend_from_slice(&chunk[..n]),
      }
    }
    let head = format!(
      "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
      status,
      body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&body);
  });
  format!("http://127.0.0.1:{}/artwork.png", port)
}

/// Client that never routes loopback requests through a proxy.
pub fn test_client() -> reqwest::Client {
  reqwest::Client::builder().no_proxy().build().unwrap()
}

/// A small single-colour PNG.
#[cfg(feature = "palette")]
pub fn png_bytes(rgba: [u8; 4]) -> Vec<u8> {
  let image = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(8, 8, image::Rgba(rgba)));
  let mut bytes = Vec::new();
  image
    .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
    .unwrap();
  bytes
}

fn token_response(access: &str, refresh: Option<&str>) -> TokenResponse {
  TokenResponse {
    access_token: access.to_string(),
    refresh_token: refresh.map(str::to_string),
  }
}

/// Token service with canned answers. Exchange and refresh fail unless
/// configured; validation accepts only the configured token.
#[derive(Default)]
pub struct FakeTokens {
  exchange: Option<TokenResponse>,
  refresh: Option<TokenResponse>,
  valid_token: Option<String>,
  hang_validation: bool,
  exchanges: Mutex<Vec<CodeExchange>>,
  refresh_tokens: Mutex<Vec<String>>,
}

impl FakeTokens {
  pub fn with_exchange(mut self, access: &str, refresh: Option<&str>) -> Self {
    self.exchange = Some(token_response(access, refresh));
    self
  }

  pub fn with_refresh(mut self, access: &str, refresh: Option<&str>) -> Self {
    self.refresh = Some(token_response(access, refresh));
    self
  }

  pub fn with_valid_token(mut self, token: &str) -> Self {
    self.valid_token = Some(token.to_string());
    self
  }

  pub fn hanging_validation(mut self) -> Self {
    self.hang_validation = true;
    self
  }

  pub fn last_exchange(&self) -> Option<CodeExchange> {
    self.exchanges.lock().unwrap().last().cloned()
  }

  pub fn last_refresh_token(&self) -> Option<String> {
    self.refresh_tokens.lock().unwrap().last().cloned()
  }
}

impl TokenService for FakeTokens {
  async fn exchange_code(&self, exchange: &CodeExchange) -> Result<TokenResponse, ServiceError> {
    self.exchanges.lock().unwrap().push(exchange.clone());
    self.exchange.clone().ok_or(ServiceError::Status {
      status: 400,
      body: "invalid_grant".to_string(),
    })
  }

  async fn refresh_token(
    &self,
    _client_id: &str,
    refresh_token: &str,
  ) -> Result<TokenResponse, ServiceError> {
    self
      .refresh_tokens
      .lock()
      .unwrap()
      .push(refresh_token.to_string());
    self.refresh.clone().ok_or(ServiceError::Status {
      status: 400,
      body: "invalid_grant".to_string(),
    })
  }

  async fn validate(&self, access_token: &str) -> Result<(), ServiceError> {
    if self.hang_validation {
      std::future::pending::<()>().await;
    }
    if self.valid_token.as_deref() == Some(access_token) {
      Ok(())
    } else {
      Err(ServiceError::Unauthorized(401))
    }
  }
}

/// Artwork lookup answering from a fixed table.
#[derive(Default)]
pub struct FakeLookup {
  artwork: HashMap<(String, String), String>,
  unauthorized_left: Cell<usize>,
  failing: bool,
  delay: Option<Duration>,
  calls: RefCell<Vec<(String, String)>>,
}

impl FakeLookup {
  pub fn with_artwork(mut self, artist: &str, track: &str, url: &str) -> Self {
    self
      .artwork
      .insert((artist.to_string(), track.to_string()), url.to_string());
    self
  }

  /// The next `count` lookups are rejected with a 401.
  pub fn unauthorized_times(self, count: usize) -> Self {
    self.unauthorized_left.set(count);
    self
  }

  pub fn failing(mut self) -> Self {
    self.failing = true;
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn call_count(&self) -> usize {
    self.calls.borrow().len()
  }

  pub fn calls(&self) -> Vec<(String, String)> {
    self.calls.borrow().clone()
  }
}

impl ArtworkLookup for FakeLookup {
  async fn find_artwork(&self, artist: &str, track: &str) -> Result<Option<String>, ServiceError> {
    self
      .calls
      .borrow_mut()
      .push((artist.to_string(), track.to_string()));
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    let left = self.unauthorized_left.get();
    if left > 0 {
      self.unauthorized_left.set(left - 1);
      return Err(ServiceError::Unauthorized(401));
    }
    if self.failing {
      return Err(ServiceError::Status {
        status: 500,
        body: "server error".to_string(),
      });
    }
    Ok(
      self
        .artwork
        .get(&(artist.to_string(), track.to_string()))
        .cloned(),
    )
  }
}

/// Handles into a generic video page fixture.
pub struct VideoPage {
  pub doc: Document,
  pub content: NodeId,
  pub title: NodeId,
  pub description: NodeId,
  pub channel: NodeId,
  pub player: NodeId,
  pub video: NodeId,
  pub controls: NodeId,
}

impl VideoPage {
  pub fn new(title: &str) -> Self {
    let mut doc = Document::new(VIDEO_URL);
    let root = doc.root();
    let head = doc.append_element(root, "head", &[]);
    doc.append_element(head, "title", &[]);
    let body = doc.append_element(root, "body", &[]);
    let content = doc.append_element(body, "div", &[("id", "content")]);

    let player = doc.append_element(
      content,
      "div",
      &[("id", "movie_player"), ("class", "html5-video-player")],
    );
    let container = doc.append_element(player, "div", &[("class", "html5-video-container")]);
    let video = doc.append_element(
      container,
      "video",
      &[("class", "video-stream html5-main-video")],
    );
    let controls = doc.append_element(player, "div", &[("class", "ytp-chrome-bottom")]);

    let metadata = doc.append_element(content, "ytd-watch-metadata", &[]);
    let heading = doc.append_element(metadata, "h1", &[("class", "style-scope ytd-watch-metadata")]);
    let title_node = doc.append_element(heading, "yt-formatted-string", &[]);
    doc.append_text(title_node, title);

    let owner = doc.append_element(metadata, "div", &[("id", "channel-name")]);
    let channel = doc.append_element(owner, "a", &[]);

    let description_box = doc.append_element(metadata, "div", &[("id", "description")]);
    let description = doc.append_element(description_box, "yt-formatted-string", &[]);

    doc.take_mutations();
    Self {
      doc,
      content,
      title: title_node,
      description,
      channel,
      player,
      video,
      controls,
    }
  }

  pub fn with_description(mut self, text: &str) -> Self {
    self.doc.set_text(self.description, text);
    self.doc.take_mutations();
    self
  }

  pub fn with_channel(mut self, name: &str) -> Self {
    self.doc.set_text(self.channel, name);
    self.doc.take_mutations();
    self
  }
}

/// Handles into a dedicated music page fixture.
pub struct MusicPage {
  pub doc: Document,
  pub player_bar: NodeId,
  pub title: NodeId,
  pub artist: NodeId,
  pub player: NodeId,
  pub song_video: NodeId,
  pub video: NodeId,
  pub toggle: NodeId,
}

impl MusicPage {
  pub fn new(artist: &str, title: &str, video_variant: bool) -> Self {
    let mut doc = Document::new(MUSIC_URL);
    let root = doc.root();
    let head = doc.append_element(root, "head", &[]);
    doc.append_element(head, "title", &[]);
    let body = doc.append_element(root, "body", &[]);
    let app = doc.append_element(body, "ytmusic-app", &[]);

    let player = doc.append_element(app, "ytmusic-player", &[("id", "player")]);
    let song_video = doc.append_element(player, "div", &[("id", "song-video")]);
    let video = doc.append_element(
      song_video,
      "video",
      &[("class", "video-stream html5-main-video")],
    );

    let toggle_attributes: &[(&str, &str)] = if video_variant {
      &[("id", "ytmusic-av-toggle"), ("selected-item-has-video", "")]
    } else {
      &[("id", "ytmusic-av-toggle")]
    };
    let toggle = doc.append_element(app, "ytmusic-av-toggle", toggle_attributes);

    let player_bar = doc.append_element(app, "ytmusic-player-bar", &[]);
    let title_node = doc.append_element(
      player_bar,
      "yt-formatted-string",
      &[("class", "title style-scope ytmusic-player-bar")],
    );
    doc.append_text(title_node, title);
    let byline = doc.append_element(
      player_bar,
      "yt-formatted-string",
      &[("class", "byline style-scope ytmusic-player-bar")],
    );
    let artist_node = doc.append_element(byline, "a", &[]);
    doc.append_text(artist_node, artist);

    doc.take_mutations();
    Self {
      doc,
      player_bar,
      title: title_node,
      artist: artist_node,
      player,
      song_video,
      video,
      toggle,
    }
  }

  /// Simulates the player bar moving to the next song.
  pub fn play(&mut self, artist: &str, title: &str) {
    self.doc.set_text(self.artist, artist);
    self.doc.set_text(self.title, title);
  }
}
