//! HTTP clients for the Spotify accounts service and Web API search.

use crate::artwork::{build_search_query, ArtworkLookup};
use crate::auth::{CodeExchange, TokenResponse, TokenService};
use crate::config::{PROFILE_URL, SEARCH_URL, TOKEN_URL};
use crate::error::ServiceError;
use crate::infra::storage::{keys, KeyValueStore};
use log::{debug, warn};
use reqwest::{Response, StatusCode, Url};
use rspotify::model::Image;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const SPOTIFY_API_MIN_INTERVAL: Duration = Duration::from_millis(250);
const MAX_ATTEMPTS: u8 = 4;

async fn check_status(response: Response) -> Result<Response, ServiceError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  if status == StatusCode::UNAUTHORIZED {
    return Err(ServiceError::Unauthorized(status.as_u16()));
  }
  let body = response.text().await.unwrap_or_default();
  Err(ServiceError::Status {
    status: status.as_u16(),
    body,
  })
}

/// Token endpoint and profile validation.
#[derive(Clone, Debug)]
pub struct SpotifyAccounts {
  client: reqwest::Client,
  token_url: String,
  profile_url: String,
}

impl SpotifyAccounts {
  pub fn new(client: reqwest::Client) -> Self {
    Self {
      client,
      token_url: TOKEN_URL.to_string(),
      profile_url: PROFILE_URL.to_string(),
    }
  }

  async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ServiceError> {
    let response = self.client.post(&self.token_url).form(form).send().await?;
    check_status(response)
      .await?
      .json::<TokenResponse>()
      .await
      .map_err(|e| ServiceError::Decode(e.to_string()))
  }
}

impl TokenService for SpotifyAccounts {
  async fn exchange_code(&self, exchange: &CodeExchange) -> Result<TokenResponse, ServiceError> {
    self
      .token_request(&[
        ("client_id", exchange.client_id.as_str()),
        ("grant_type", "authorization_code"),
        ("code", exchange.code.as_str()),
        ("redirect_uri", exchange.redirect_uri.as_str()),
        ("code_verifier", exchange.code_verifier.as_str()),
      ])
      .await
  }

  async fn refresh_token(
    &self,
    client_id: &str,
    refresh_token: &str,
  ) -> Result<TokenResponse, ServiceError> {
    self
      .token_request(&[
        ("client_id", client_id),
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
      ])
      .await
  }

  async fn validate(&self, access_token: &str) -> Result<(), ServiceError> {
    let response = self
      .client
      .get(&self.profile_url)
      .bearer_auth(access_token)
      .send()
      .await?;
    check_status(response).await.map(|_| ())
  }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
  #[serde(default)]
  pub tracks: Option<TrackPage>,
}

#[derive(Debug, Deserialize)]
pub struct TrackPage {
  #[serde(default)]
  pub items: Vec<Option<SearchTrack>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchTrack {
  pub album: SearchAlbum,
}

#[derive(Debug, Deserialize)]
pub struct SearchAlbum {
  #[serde(default)]
  pub images: Vec<Image>,
}

impl SearchResponse {
  /// First album image of the first track, if any.
  pub fn first_album_image(&self) -> Option<String> {
    self
      .tracks
      .as_ref()?
      .items
      .iter()
      .flatten()
      .next()?
      .album
      .images
      .first()
      .map(|image| image.url.clone())
  }
}

/// Track search with the bearer token read from storage at call time.
pub struct SpotifySearch<S> {
  client: reqwest::Client,
  store: Arc<S>,
  search_url: String,
  last_request_started_at: Mutex<Option<Instant>>,
}

impl<S: KeyValueStore> SpotifySearch<S> {
  pub fn new(client: reqwest::Client, store: Arc<S>) -> Self {
    Self {
      client,
      store,
      search_url: SEARCH_URL.to_string(),
      last_request_started_at: Mutex::new(None),
    }
  }

  async fn pace(&self) {
    let mut last_request_started_at = self.last_request_started_at.lock().await;
    if let Some(last) = *last_request_started_at {
      let elapsed = last.elapsed();
      if elapsed < SPOTIFY_API_MIN_INTERVAL {
        tokio::time::sleep(SPOTIFY_API_MIN_INTERVAL - elapsed).await;
      }
    }
    *last_request_started_at = Some(Instant::now());
  }
}

impl<S: KeyValueStore> ArtworkLookup for SpotifySearch<S> {
  async fn find_artwork(&self, artist: &str, track: &str) -> Result<Option<String>, ServiceError> {
    let access_token = self
      .store
      .get(keys::ACCESS_TOKEN)
      .ok_or(ServiceError::Unauthorized(401))?;

    let query = build_search_query(artist, track);
    let url = Url::parse_with_params(
      &self.search_url,
      &[("q", query.as_str()), ("type", "track"), ("limit", "1")],
    )
    .map_err(|e| ServiceError::Decode(e.to_string()))?;
    debug!("searching spotify: {}", query);

    let mut attempt: u8 = 0;
    loop {
      self.pace().await;
      let response = self
        .client
        .get(url.clone())
        .bearer_auth(&access_token)
        .send()
        .await?;

      if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt + 1 < MAX_ATTEMPTS {
        let retry_after_secs = response
          .headers()
          .get("retry-after")
          .and_then(|h| h.to_str().ok())
          .and_then(|v| v.parse::<u64>().ok())
          .unwrap_or(1);
        let backoff_secs = retry_after_secs.max(1) + u64::from(attempt);
        warn!("search rate limited, retrying in {}s", backoff_secs);
        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
        attempt += 1;
        continue;
      }

      let results = check_status(response)
        .await?
        .json::<SearchResponse>()
        .await
        .map_err(|e| ServiceError::Decode(e.to_string()))?;
      return Ok(results.first_album_image());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_first_album_image() {
    let response: SearchResponse = serde_json::from_str(
      r#"{"tracks":{"items":[{"album":{"images":[
        {"url":"https://i.scdn.co/image/large","height":640,"width":640},
        {"url":"https://i.scdn.co/image/small","height":64,"width":64}
      ]}}]}}"#,
    )
    .unwrap();
    assert_eq!(
      response.first_album_image().as_deref(),
      Some("https://i.scdn.co/image/large")
    );
  }

  #[test]
  fn test_empty_results() {
    let empty: SearchResponse = serde_json::from_str(r#"{"tracks":{"items":[]}}"#).unwrap();
    assert_eq!(empty.first_album_image(), None);

    let missing: SearchResponse = serde_json::from_str("{}").unwrap();
    assert_eq!(missing.first_album_image(), None);

    let no_images: SearchResponse =
      serde_json::from_str(r#"{"tracks":{"items":[null,{"album":{"images":[]}}]}}"#).unwrap();
    assert_eq!(no_images.first_album_image(), None);
  }
}
