use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Tab query pattern for the dedicated music page.
pub const MUSIC_TAB_PATTERN: &str = "*://music.youtube.com/*";
pub const VIDEO_TAB_PATTERN: &str = "*://www.youtube.com/*";

const MUSIC_HOST: &str = "music.youtube.com";
const VIDEO_HOSTS: [&str; 2] = ["www.youtube.com", "youtube.com"];

/// Which family of markup the current document belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKind {
  /// music.youtube.com, where the player bar carries artist and title.
  MusicPage,
  /// A regular youtube.com watch page; identity comes from the video title.
  VideoPage,
  Unsupported,
}

impl PageKind {
  pub fn from_url(url: &str) -> Self {
    let host = match Url::parse(url) {
      Ok(parsed) => parsed.host_str().map(str::to_ascii_lowercase),
      Err(_) => None,
    };

    match host.as_deref() {
      Some(MUSIC_HOST) => PageKind::MusicPage,
      Some(h) if VIDEO_HOSTS.contains(&h) => PageKind::VideoPage,
      _ => PageKind::Unsupported,
    }
  }

  pub fn is_supported(self) -> bool {
    !matches!(self, PageKind::Unsupported)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_page_kind_from_url() {
    assert_eq!(
      PageKind::from_url("https://music.youtube.com/watch?v=abc"),
      PageKind::MusicPage
    );
    assert_eq!(
      PageKind::from_url("https://www.youtube.com/watch?v=abc"),
      PageKind::VideoPage
    );
    assert_eq!(
      PageKind::from_url("https://youtube.com/watch?v=abc"),
      PageKind::VideoPage
    );
    assert_eq!(
      PageKind::from_url("https://example.com/youtube.com"),
      PageKind::Unsupported
    );
    assert_eq!(PageKind::from_url("not a url"), PageKind::Unsupported);
  }
}
