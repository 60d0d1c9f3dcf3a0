use crate::dom::Mutation;
use crate::infra::storage::StorageChange;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Messages delivered to a page context, discriminated by `action`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum TabMessage {
  #[serde(rename = "process_auth_code")]
  ProcessAuthCode { code: String },
  #[serde(rename = "manual_auth_trigger")]
  ManualAuthTrigger,
  #[serde(rename = "authorizationComplete")]
  AuthorizationComplete,
  #[serde(rename = "extensionDisconnected")]
  ExtensionDisconnected,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReply {
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl MessageReply {
  pub fn ok() -> Self {
    Self {
      success: true,
      error: None,
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      success: false,
      error: Some(error.into()),
    }
  }
}

/// Requests a page context (or the redirect page) sends to the background
/// coordinator, discriminated by `type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundRequest {
  GetClientId,
  GetAccessToken,
  GetRefreshToken,
  GetCodeVerifier,
  FetchAlbumImage { artist: String, track: String },
  OpenAuthTab { url: String },
  /// Authorization code captured by the redirect page.
  SpotifyCallback { code: String },
  /// The redirect page loaded without a code or error.
  RestartAuthorization,
  AuthorizationComplete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundResponse {
  Value {
    value: Option<String>,
  },
  AlbumImage {
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
    /// The lookup was rejected with a 401 and the token needs a refresh.
    #[serde(default)]
    unauthorized: bool,
  },
  Ack,
}

/// Everything the platform delivers to a page controller.
#[derive(Debug)]
pub enum PageEvent {
  Mutations(Vec<Mutation>),
  /// In-page navigation finished (`yt-navigate-finish` / `popstate`).
  Navigated,
  VisibilityChanged {
    visible: bool,
  },
  Storage(StorageChange),
  Message {
    message: TabMessage,
    reply: Option<oneshot::Sender<MessageReply>>,
  },
  Unload,
}
