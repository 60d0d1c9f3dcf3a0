use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

static ANNOTATION: OnceLock<Regex> = OnceLock::new();

fn annotation_pattern() -> &'static Regex {
  ANNOTATION.get_or_init(|| {
    Regex::new(r"\[[^\]]*\]|\([^)]*\)|\{[^}]*\}").expect("annotation pattern is valid")
  })
}

/// Strips `[..]`, `(..)` and `{..}` annotations ("(Live)", "[Official Video]")
/// from a track title and collapses runs of whitespace.
pub fn normalize_track_title(title: &str) -> String {
  let stripped = annotation_pattern().replace_all(title, " ");
  stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.is_empty())
}

/// The (artist, track) pair used as the de-duplication key for artwork
/// lookups. Equality is structural, so two absent identities are equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackIdentity {
  pub artist: Option<String>,
  pub track: Option<String>,
}

impl TrackIdentity {
  pub fn absent() -> Self {
    Self::default()
  }

  /// Builds an identity from raw page text. The artist is trimmed and the
  /// track normalized; fields that end up empty are treated as absent.
  pub fn from_raw(artist: Option<&str>, track: Option<&str>) -> Self {
    Self {
      artist: non_empty(artist.map(|a| a.trim().to_string())),
      track: non_empty(track.map(normalize_track_title)),
    }
  }

  pub fn is_absent(&self) -> bool {
    self.artist.is_none() && self.track.is_none()
  }

  pub fn is_complete(&self) -> bool {
    self.as_pair().is_some()
  }

  pub fn as_pair(&self) -> Option<(&str, &str)> {
    match (&self.artist, &self.track) {
      (Some(artist), Some(track)) => Some((artist.as_str(), track.as_str())),
      _ => None,
    }
  }
}

impl fmt::Display for TrackIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} - {}",
      self.artist.as_deref().unwrap_or("<no artist>"),
      self.track.as_deref().unwrap_or("<no track>")
    )
  }
}
