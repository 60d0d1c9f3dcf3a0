//! Identity to artwork URL, with at most one lookup per identity.

use crate::core::identity::TrackIdentity;
use crate::error::ServiceError;
use log::{debug, info, warn};

/// The metadata service that knows album covers.
pub trait ArtworkLookup {
  /// First album image of the best match, `None` when nothing matched.
  async fn find_artwork(&self, artist: &str, track: &str) -> Result<Option<String>, ServiceError>;
}

/// Exact-phrase search on both fields: `track:"T" artist:"A"`.
pub fn build_search_query(artist: &str, track: &str) -> String {
  let clean = |s: &str| s.replace('"', "").trim().to_string();
  format!("track:\"{}\" artist:\"{}\"", clean(track), clean(artist))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupResult {
  Found(String),
  NotFound,
  /// The lookup was rejected with a 401; the token needs a refresh.
  Unauthorized,
  Failed,
}

impl LookupResult {
  pub fn url(&self) -> Option<&str> {
    match self {
      LookupResult::Found(url) => Some(url),
      _ => None,
    }
  }
}

/// A finished lookup, tagged with the identity it was issued for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtworkOutcome {
  pub identity: TrackIdentity,
  pub result: LookupResult,
}

/// A lookup the resolver decided to issue. Running it needs no access to the
/// resolver, so callers can drive it as a detached future.
#[derive(Debug)]
pub struct ArtworkRequest {
  identity: TrackIdentity,
}

impl ArtworkRequest {
  pub fn identity(&self) -> &TrackIdentity {
    &self.identity
  }

  pub async fn run<L: ArtworkLookup + ?Sized>(self, lookup: &L) -> ArtworkOutcome {
    let result = match self.identity.as_pair() {
      Some((artist, track)) => {
        info!("looking up artwork for {} - {}", artist, track);
        match lookup.find_artwork(artist, track).await {
          Ok(Some(url)) => {
            info!("artwork found: {}", url);
            LookupResult::Found(url)
          }
          Ok(None) => {
            info!("no artwork found for {}", self.identity);
            LookupResult::NotFound
          }
          Err(e) if e.is_unauthorized() => {
            warn!("artwork lookup unauthorized: {}", e);
            LookupResult::Unauthorized
          }
          Err(e) => {
            warn!("artwork lookup failed: {}", e);
            LookupResult::Failed
          }
        }
      }
      None => LookupResult::NotFound,
    };

    ArtworkOutcome {
      identity: self.identity,
      result,
    }
  }
}

#[derive(Debug)]
pub enum Resolution {
  /// Artist or track missing; nothing to look up.
  Skip,
  /// Same identity as last time, already answered.
  Cached(Option<String>),
  /// Same identity as last time, answer still pending.
  InFlight,
  Fetch(ArtworkRequest),
}

#[derive(Debug, Default)]
pub struct ArtworkResolver {
  last_identity: Option<TrackIdentity>,
  /// `None` while the lookup for `last_identity` is in flight.
  last_result: Option<Option<String>>,
}

impl ArtworkResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn begin(&mut self, identity: &TrackIdentity) -> Resolution {
    if !identity.is_complete() {
      return Resolution::Skip;
    }
    if self.last_identity.as_ref() == Some(identity) {
      debug!("artwork for {} already requested", identity);
      return match &self.last_result {
        Some(url) => Resolution::Cached(url.clone()),
        None => Resolution::InFlight,
      };
    }

    self.last_identity = Some(identity.clone());
    self.last_result = None;
    Resolution::Fetch(ArtworkRequest {
      identity: identity.clone(),
    })
  }

  /// Records a finished lookup. Outcomes for an identity other than the last
  /// requested one are ignored; a 401 is not cached so the lookup can be
  /// retried after a refresh.
  pub fn complete(&mut self, outcome: &ArtworkOutcome) {
    if self.last_identity.as_ref() != Some(&outcome.identity) {
      debug!("ignoring artwork outcome for superseded {}", outcome.identity);
      return;
    }
    match &outcome.result {
      LookupResult::Unauthorized => self.forget(),
      result => self.last_result = Some(result.url().map(str::to_string)),
    }
  }

  pub fn forget(&mut self) {
    self.last_identity = None;
    self.last_result = None;
  }

  /// Begin, run and complete in one go.
  pub async fn resolve<L: ArtworkLookup + ?Sized>(
    &mut self,
    lookup: &L,
    identity: &TrackIdentity,
  ) -> Option<String> {
    match self.begin(identity) {
      Resolution::Skip | Resolution::InFlight => None,
      Resolution::Cached(url) => url,
      Resolution::Fetch(request) => {
        let outcome = request.run(lookup).await;
        self.complete(&outcome);
        outcome.result.url().map(str::to_string)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::FakeLookup;

  fn identity(artist: &str, track: &str) -> TrackIdentity {
    TrackIdentity::from_raw(Some(artist), Some(track))
  }

  #[test]
  fn test_search_query_uses_exact_phrases() {
    assert_eq!(
      build_search_query("Artist", "Song \"Title\""),
      r#"track:"Song Title" artist:"Artist""#
    );
  }

  #[tokio::test]
  async fn test_same_identity_is_looked_up_once() {
    let lookup = FakeLookup::default().with_artwork("Artist", "Song", "https://img/1");
    let mut resolver = ArtworkResolver::new();
    let song = identity("Artist", "Song");

    assert_eq!(
      resolver.resolve(&lookup, &song).await.as_deref(),
      Some("https://img/1")
    );
    assert_eq!(
      resolver.resolve(&lookup, &song).await.as_deref(),
      Some("https://img/1")
    );
    assert_eq!(lookup.call_count(), 1);
  }

  #[tokio::test]
  async fn test_incomplete_identity_is_skipped() {
    let lookup = FakeLookup::default();
    let mut resolver = ArtworkResolver::new();

    let missing_artist = TrackIdentity::from_raw(None, Some("Song"));
    assert_eq!(resolver.resolve(&lookup, &missing_artist).await, None);
    assert_eq!(resolver.resolve(&lookup, &TrackIdentity::absent()).await, None);
    assert_eq!(lookup.call_count(), 0);
  }

  #[tokio::test]
  async fn test_failures_collapse_to_absent() {
    let lookup = FakeLookup::default().failing();
    let mut resolver = ArtworkResolver::new();
    let song = identity("Artist", "Song");

    assert_eq!(resolver.resolve(&lookup, &song).await, None);
    assert_eq!(resolver.resolve(&lookup, &song).await, None);
    assert_eq!(lookup.call_count(), 1);
  }

  #[tokio::test]
  async fn test_unauthorized_is_not_cached() {
    let lookup = FakeLookup::default()
      .with_artwork("Artist", "Song", "https://img/1")
      .unauthorized_times(1);
    let mut resolver = ArtworkResolver::new();
    let song = identity("Artist", "Song");

    assert_eq!(resolver.resolve(&lookup, &song).await, None);
    assert_eq!(
      resolver.resolve(&lookup, &song).await.as_deref(),
      Some("https://img/1")
    );
    assert_eq!(lookup.call_count(), 2);
  }

  #[tokio::test]
  async fn test_in_flight_and_superseded_outcomes() {
    let lookup = FakeLookup::default().with_artwork("A", "One", "https://img/1");
    let mut resolver = ArtworkResolver::new();
    let one = identity("A", "One");
    let two = identity("A", "Two");

    let Resolution::Fetch(first) = resolver.begin(&one) else {
      panic!("expected a fetch");
    };
    assert!(matches!(resolver.begin(&one), Resolution::InFlight));

    let Resolution::Fetch(_second) = resolver.begin(&two) else {
      panic!("expected a fetch");
    };
    let outcome = first.run(&lookup).await;
    assert_eq!(outcome.identity, one);
    resolver.complete(&outcome);

    // The late answer for "One" must not be filed under "Two".
    assert!(matches!(resolver.begin(&two), Resolution::InFlight));
  }
}
