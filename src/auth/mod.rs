//! OAuth PKCE token lifecycle.
//!
//! [`AuthLifecycle`] is the only writer of the token keys in the shared
//! store. Everything else reads them. There is no local expiry timer: a token
//! is confirmed against the token service or found out by a 401.

pub mod pkce;

use crate::error::ServiceError;
use crate::infra::storage::{keys, KeyValueStore};
use log::{error, info, warn};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthPhase {
  Unauthenticated,
  /// A verifier is stored and the authorize page is open.
  AwaitingCode,
  Authenticated,
  /// The access token was rejected; a refresh is due.
  Expired,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
  pub access_token: String,
  #[serde(default)]
  pub refresh_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeExchange {
  pub client_id: String,
  pub code: String,
  pub redirect_uri: String,
  pub code_verifier: String,
}

pub trait TokenService {
  async fn exchange_code(&self, exchange: &CodeExchange) -> Result<TokenResponse, ServiceError>;
  async fn refresh_token(
    &self,
    client_id: &str,
    refresh_token: &str,
  ) -> Result<TokenResponse, ServiceError>;
  /// Succeeds only while `access_token` is accepted by the service.
  async fn validate(&self, access_token: &str) -> Result<(), ServiceError>;
}

#[derive(Clone, Debug)]
pub struct AuthSettings {
  /// Used when the store has no `CLIENT_ID`.
  pub client_id: Option<String>,
  pub redirect_uri: String,
  pub authorize_url: String,
  pub scopes: String,
  pub validation_timeout: Duration,
}

pub struct AuthLifecycle<S, T> {
  store: Arc<S>,
  tokens: T,
  settings: AuthSettings,
  phase: AuthPhase,
}

impl<S: KeyValueStore, T: TokenService> AuthLifecycle<S, T> {
  /// The starting phase is read off the store. A stored access token only
  /// counts as `Authenticated` until the first validation says otherwise.
  pub fn new(store: Arc<S>, tokens: T, settings: AuthSettings) -> Self {
    let phase = if store.get(keys::ACCESS_TOKEN).is_some() {
      AuthPhase::Authenticated
    } else if store.get(keys::CODE_VERIFIER).is_some() {
      AuthPhase::AwaitingCode
    } else {
      AuthPhase::Unauthenticated
    };

    Self {
      store,
      tokens,
      settings,
      phase,
    }
  }

  pub fn phase(&self) -> AuthPhase {
    self.phase
  }

  pub fn access_token(&self) -> Option<String> {
    self.store.get(keys::ACCESS_TOKEN)
  }

  pub fn tokens(&self) -> &T {
    &self.tokens
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  fn client_id(&self) -> Option<String> {
    self
      .store
      .get(keys::CLIENT_ID)
      .or_else(|| self.settings.client_id.clone())
  }

  fn stored_refresh_token(&self) -> Option<String> {
    self
      .store
      .get(keys::REFRESH_TOKEN)
      .or_else(|| self.store.get(keys::LEGACY_REFRESH_TOKEN))
  }

  fn write(&self, key: &str, value: &str) {
    if let Err(e) = self.store.set(key, value) {
      error!("failed to persist '{}': {}", key, e);
    }
  }

  fn erase(&self, keys: &[&str]) {
    if let Err(e) = self.store.remove(keys) {
      error!("failed to clear {:?}: {}", keys, e);
    }
  }

  fn persist_tokens(&self, response: &TokenResponse) {
    self.write(keys::ACCESS_TOKEN, &response.access_token);
    if let Some(refresh_token) = &response.refresh_token {
      self.write(keys::REFRESH_TOKEN, refresh_token);
    }
  }

  /// Starts a PKCE authorization: stores a fresh verifier and returns the
  /// authorize URL carrying its challenge. `None` when no client id is known
  /// or the URL cannot be built.
  pub fn begin_authorization(&mut self) -> Option<String> {
    let Some(client_id) = self.client_id() else {
      error!("no client id available, cannot start authorization");
      self.phase = AuthPhase::Unauthenticated;
      return None;
    };

    let verifier = pkce::generate_code_verifier();
    let challenge = pkce::code_challenge(&verifier);

    let url = Url::parse_with_params(
      &self.settings.authorize_url,
      &[
        ("response_type", "code"),
        ("client_id", client_id.as_str()),
        ("scope", self.settings.scopes.as_str()),
        ("redirect_uri", self.settings.redirect_uri.as_str()),
        ("code_challenge_method", "S256"),
        ("code_challenge", challenge.as_str()),
      ],
    );

    match url {
      Ok(url) => {
        self.write(keys::CODE_VERIFIER, &verifier);
        self.phase = AuthPhase::AwaitingCode;
        info!("authorization started, waiting for redirect");
        Some(url.to_string())
      }
      Err(e) => {
        error!("invalid authorize url {}: {}", self.settings.authorize_url, e);
        self.phase = AuthPhase::Unauthenticated;
        None
      }
    }
  }

  /// Exchanges an authorization code with the stored verifier. The verifier
  /// is cleared whatever the outcome.
  pub async fn complete_authorization(&mut self, code: &str) -> AuthPhase {
    let Some(code_verifier) = self.store.get(keys::CODE_VERIFIER) else {
      error!("no code verifier found, ignoring authorization code");
      self.phase = AuthPhase::Unauthenticated;
      return self.phase;
    };
    let Some(client_id) = self.client_id() else {
      error!("no client id available, cannot exchange authorization code");
      self.erase(&[keys::CODE_VERIFIER]);
      self.phase = AuthPhase::Unauthenticated;
      return self.phase;
    };

    let exchange = CodeExchange {
      client_id,
      code: code.to_string(),
      redirect_uri: self.settings.redirect_uri.clone(),
      code_verifier,
    };
    let result = self.tokens.exchange_code(&exchange).await;
    self.erase(&[keys::CODE_VERIFIER]);

    self.phase = match result {
      Ok(response) => {
        self.persist_tokens(&response);
        info!("tokens stored successfully");
        AuthPhase::Authenticated
      }
      Err(e) => {
        error!("authorization code exchange failed: {}", e);
        AuthPhase::Unauthenticated
      }
    };
    self.phase
  }

  /// Confirms the stored access token against the token service, bounded by
  /// the validation timeout. A timeout counts as a rejection.
  pub async fn validate(&mut self) -> AuthPhase {
    let Some(access_token) = self.access_token() else {
      self.phase = AuthPhase::Unauthenticated;
      return self.phase;
    };

    let outcome = tokio::time::timeout(
      self.settings.validation_timeout,
      self.tokens.validate(&access_token),
    )
    .await;

    self.phase = match outcome {
      Ok(Ok(())) => AuthPhase::Authenticated,
      Ok(Err(e)) => {
        warn!("stored access token failed validation: {}", e);
        AuthPhase::Expired
      }
      Err(_) => {
        warn!(
          "token validation timed out after {} ms",
          self.settings.validation_timeout.as_millis()
        );
        AuthPhase::Expired
      }
    };
    self.phase
  }

  /// A protected call came back 401.
  pub fn mark_expired(&mut self) {
    if self.phase == AuthPhase::Authenticated {
      info!("access token rejected, marking as expired");
      self.phase = AuthPhase::Expired;
    }
  }

  /// Trades the stored refresh token for a new access token. Any failure, or
  /// a missing refresh token, clears every stored token.
  pub async fn refresh(&mut self) -> AuthPhase {
    let Some(client_id) = self.client_id() else {
      error!("no client id available, cannot refresh");
      self.phase = AuthPhase::Unauthenticated;
      return self.phase;
    };
    let Some(refresh_token) = self.stored_refresh_token() else {
      info!("no refresh token stored, signing out");
      self.clear();
      return self.phase;
    };

    match self.tokens.refresh_token(&client_id, &refresh_token).await {
      Ok(response) => {
        self.persist_tokens(&response);
        info!("access token refreshed");
        self.phase = AuthPhase::Authenticated;
      }
      Err(e) => {
        warn!("token refresh failed: {}", e);
        self.clear();
      }
    }
    self.phase
  }

  /// Validation followed by a refresh when the token turns out stale.
  pub async fn ensure_valid(&mut self) -> AuthPhase {
    match self.validate().await {
      AuthPhase::Expired => self.refresh().await,
      phase => phase,
    }
  }

  /// User-initiated sign out. Dependent sessions learn about it through the
  /// store's change notifications.
  pub fn disconnect(&mut self) {
    info!("disconnecting, clearing stored tokens");
    self.clear();
  }

  fn clear(&mut self) {
    self.erase(&keys::AUTH_KEYS);
    self.phase = AuthPhase::Unauthenticated;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::infra::storage::MemoryStore;
  use crate::testing::{auth_settings, FakeTokens};

  fn lifecycle(store: &Arc<MemoryStore>, tokens: FakeTokens) -> AuthLifecycle<MemoryStore, FakeTokens> {
    AuthLifecycle::new(Arc::clone(store), tokens, auth_settings())
  }

  #[test]
  fn test_initial_phase_follows_store() {
    let store = Arc::new(MemoryStore::new());
    assert_eq!(
      lifecycle(&store, FakeTokens::default()).phase(),
      AuthPhase::Unauthenticated
    );

    store.set(keys::CODE_VERIFIER, "v").unwrap();
    assert_eq!(
      lifecycle(&store, FakeTokens::default()).phase(),
      AuthPhase::AwaitingCode
    );

    store.set(keys::ACCESS_TOKEN, "a").unwrap();
    assert_eq!(
      lifecycle(&store, FakeTokens::default()).phase(),
      AuthPhase::Authenticated
    );
  }

  #[test]
  fn test_begin_authorization_stores_verifier_and_challenge() {
    let store = Arc::new(MemoryStore::new());
    let mut auth = lifecycle(&store, FakeTokens::default());

    let url = Url::parse(&auth.begin_authorization().unwrap()).unwrap();
    assert_eq!(auth.phase(), AuthPhase::AwaitingCode);

    let verifier = store.get(keys::CODE_VERIFIER).unwrap();
    let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(params["code_challenge"], pkce::code_challenge(&verifier));
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(params["client_id"], "test-client");
    assert_eq!(params["redirect_uri"], "http://127.0.0.1:8888/callback");
    assert_eq!(params["response_type"], "code");
  }

  #[test]
  fn test_begin_authorization_without_client_id() {
    let store = Arc::new(MemoryStore::new());
    let mut settings = auth_settings();
    settings.client_id = None;
    let mut auth = AuthLifecycle::new(Arc::clone(&store), FakeTokens::default(), settings);

    assert_eq!(auth.begin_authorization(), None);
    assert_eq!(auth.phase(), AuthPhase::Unauthenticated);
    assert_eq!(store.get(keys::CODE_VERIFIER), None);
  }

  #[tokio::test]
  async fn test_code_exchange_persists_tokens_and_clears_verifier() {
    let store = Arc::new(MemoryStore::new());
    let tokens = FakeTokens::default().with_exchange("access-1", Some("refresh-1"));
    let mut auth = lifecycle(&store, tokens);

    auth.begin_authorization().unwrap();
    let verifier = store.get(keys::CODE_VERIFIER).unwrap();

    assert_eq!(
      auth.complete_authorization("the-code").await,
      AuthPhase::Authenticated
    );
    assert_eq!(store.get(keys::ACCESS_TOKEN).as_deref(), Some("access-1"));
    assert_eq!(store.get(keys::REFRESH_TOKEN).as_deref(), Some("refresh-1"));
    assert_eq!(store.get(keys::CODE_VERIFIER), None);

    let exchange = auth.tokens().last_exchange().unwrap();
    assert_eq!(exchange.code, "the-code");
    assert_eq!(exchange.code_verifier, verifier);
  }

  #[tokio::test]
  async fn test_failed_exchange_returns_to_unauthenticated() {
    let store = Arc::new(MemoryStore::new());
    let mut auth = lifecycle(&store, FakeTokens::default());

    auth.begin_authorization().unwrap();
    assert_eq!(
      auth.complete_authorization("bad-code").await,
      AuthPhase::Unauthenticated
    );
    assert_eq!(store.get(keys::CODE_VERIFIER), None);
    assert_eq!(store.get(keys::ACCESS_TOKEN), None);
  }

  #[tokio::test]
  async fn test_code_without_verifier_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    let mut auth = lifecycle(&store, FakeTokens::default().with_exchange("a", None));

    assert_eq!(
      auth.complete_authorization("code").await,
      AuthPhase::Unauthenticated
    );
    assert!(auth.tokens().last_exchange().is_none());
  }

  #[tokio::test]
  async fn test_refresh_rotates_tokens() {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::ACCESS_TOKEN, "old").unwrap();
    store.set(keys::REFRESH_TOKEN, "refresh-old").unwrap();
    let mut auth = lifecycle(
      &store,
      FakeTokens::default().with_refresh("new", Some("refresh-new")),
    );

    auth.mark_expired();
    assert_eq!(auth.phase(), AuthPhase::Expired);
    assert_eq!(auth.refresh().await, AuthPhase::Authenticated);
    assert_eq!(store.get(keys::ACCESS_TOKEN).as_deref(), Some("new"));
    assert_eq!(store.get(keys::REFRESH_TOKEN).as_deref(), Some("refresh-new"));
  }

  #[tokio::test]
  async fn test_refresh_uses_legacy_key() {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::LEGACY_REFRESH_TOKEN, "legacy").unwrap();
    let mut auth = lifecycle(&store, FakeTokens::default().with_refresh("new", None));

    assert_eq!(auth.refresh().await, AuthPhase::Authenticated);
    assert_eq!(
      auth.tokens().last_refresh_token().as_deref(),
      Some("legacy")
    );
    assert_eq!(store.get(keys::LEGACY_REFRESH_TOKEN).as_deref(), Some("legacy"));
  }

  #[tokio::test]
  async fn test_refresh_failure_clears_everything() {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::ACCESS_TOKEN, "old").unwrap();
    store.set(keys::REFRESH_TOKEN, "refresh").unwrap();
    store.set(keys::CODE_VERIFIER, "stale").unwrap();
    let mut auth = lifecycle(&store, FakeTokens::default());

    assert_eq!(auth.refresh().await, AuthPhase::Unauthenticated);
    for key in keys::AUTH_KEYS {
      assert_eq!(store.get(key), None, "{} should be cleared", key);
    }
  }

  #[tokio::test]
  async fn test_refresh_without_refresh_token() {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::ACCESS_TOKEN, "old").unwrap();
    let mut auth = lifecycle(&store, FakeTokens::default().with_refresh("new", None));

    assert_eq!(auth.refresh().await, AuthPhase::Unauthenticated);
    assert_eq!(store.get(keys::ACCESS_TOKEN), None);
    assert_eq!(auth.tokens().last_refresh_token(), None);
  }

  #[tokio::test]
  async fn test_ensure_valid_refreshes_rejected_token() {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::ACCESS_TOKEN, "stale").unwrap();
    store.set(keys::REFRESH_TOKEN, "refresh").unwrap();
    let tokens = FakeTokens::default()
      .with_valid_token("fresh")
      .with_refresh("fresh", None);
    let mut auth = lifecycle(&store, tokens);

    assert_eq!(auth.ensure_valid().await, AuthPhase::Authenticated);
    assert_eq!(store.get(keys::ACCESS_TOKEN).as_deref(), Some("fresh"));
    assert_eq!(auth.validate().await, AuthPhase::Authenticated);
  }

  #[tokio::test(start_paused = true)]
  async fn test_validation_timeout_counts_as_invalid() {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::ACCESS_TOKEN, "token").unwrap();
    let mut auth = lifecycle(&store, FakeTokens::default().hanging_validation());

    assert_eq!(auth.validate().await, AuthPhase::Expired);
  }

  #[test]
  fn test_disconnect_clears_all_auth_keys() {
    let store = Arc::new(MemoryStore::new());
    for key in keys::AUTH_KEYS {
      store.set(key, "x").unwrap();
    }
    store.set(keys::CLIENT_ID, "client").unwrap();
    let mut auth = lifecycle(&store, FakeTokens::default());

    auth.disconnect();
    assert_eq!(auth.phase(), AuthPhase::Unauthenticated);
    for key in keys::AUTH_KEYS {
      assert_eq!(store.get(key), None);
    }
    assert_eq!(store.get(keys::CLIENT_ID).as_deref(), Some("client"));
  }
}
