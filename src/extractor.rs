//! Reads the (artist, track) identity off a page and decides whether the
//! page is showing music at all.
//!
//! Locators are tried in order and the first element with non-empty text
//! wins. Nothing in here writes to the page or fails on missing elements.

use crate::core::identity::TrackIdentity;
use crate::core::page::PageKind;
use crate::dom::PageDom;
use log::debug;
use regex::Regex;
use std::sync::OnceLock;

pub const MUSIC_ARTIST_LOCATORS: [&str; 3] = [
  "ytmusic-player-bar yt-formatted-string.byline a",
  ".ytmusic-player-bar .subtitle a",
  ".byline.ytmusic-player-bar a",
];

pub const MUSIC_TITLE_LOCATORS: [&str; 3] = [
  "yt-formatted-string.title.style-scope.ytmusic-player-bar",
  ".title.ytmusic-player-bar",
  "ytmusic-player-bar .title",
];

pub const VIDEO_TITLE_LOCATORS: [&str; 4] = [
  "h1.ytd-watch-metadata yt-formatted-string",
  "h1.title yt-formatted-string",
  "#container h1 yt-formatted-string",
  ".ytd-video-primary-info-renderer h1 yt-formatted-string",
];

pub const DESCRIPTION_LOCATOR: &str = "#description yt-formatted-string, .content yt-formatted-string";

pub const CHANNEL_LOCATORS: [&str; 3] = ["#channel-name a", ".ytd-channel-name a", "#owner-name a"];

/// Present on the music page while the video variant of the song is selected.
pub const VIDEO_VARIANT_LOCATOR: &str = "ytmusic-av-toggle[selected-item-has-video]";

/// "Artist – Song", "Artist: Song", `Artist "Song"` and friends, tried in
/// order. Group 1 is the artist, group 2 the track.
const TITLE_PATTERNS: [&str; 5] = [
  r"^(.+?)\s*[-–—]\s*(.+)$",
  r"^(.+?)\s*[:|]\s*(.+)$",
  r#"^(.+?)\s*"(.+?)""#,
  r"^(.+?)\s*'(.+?)'",
  r"^(.+?)\s*\(\s*(.+?)\s*\)",
];

const DESCRIPTION_ARTIST_PATTERNS: [&str; 4] = [
  r"(?i)Artist:\s*(.+?)[\n\r]",
  r"(?i)Performed by:\s*(.+?)[\n\r]",
  r"(?i)Singer:\s*(.+?)[\n\r]",
  r"(?i)Music by:\s*(.+?)[\n\r]",
];

/// Channel names ending like this belong to labels and aggregators.
const LABEL_CHANNEL_PATTERN: &str =
  r"(?i)(records?|music|official|label|entertainment|media|tv|network|channel)$";

pub const MUSIC_KEYWORDS: [&str; 14] = [
  "official music video",
  "official video",
  "music video",
  "official audio",
  "full song",
  "lyrics video",
  "acoustic",
  "live performance",
  "cover",
  "remix",
  "single",
  "album",
  "ep",
  "soundtrack",
];

const ARTIST_SONG_SHAPE: &str = r"^.+?\s*[-–—:|]\s*.+$";

struct Patterns {
  title: Vec<Regex>,
  description: Vec<Regex>,
  label_channel: Regex,
  keywords: Regex,
  artist_song: Regex,
}

fn compile(pattern: &str) -> Regex {
  Regex::new(pattern).expect("built-in pattern is valid")
}

fn patterns() -> &'static Patterns {
  static PATTERNS: OnceLock<Patterns> = OnceLock::new();
  PATTERNS.get_or_init(|| {
    let keywords = MUSIC_KEYWORDS
      .iter()
      .map(|k| regex::escape(k))
      .collect::<Vec<_>>()
      .join("|");
    Patterns {
      title: TITLE_PATTERNS.iter().map(|p| compile(p)).collect(),
      description: DESCRIPTION_ARTIST_PATTERNS
        .iter()
        .map(|p| compile(p))
        .collect(),
      label_channel: compile(LABEL_CHANNEL_PATTERN),
      keywords: compile(&format!(r"(?i)\b(?:{})\b", keywords)),
      artist_song: compile(ARTIST_SONG_SHAPE),
    }
  })
}

/// Trimmed text of the first locator hit that has any.
pub fn first_text<D: PageDom + ?Sized>(dom: &D, locators: &[&str]) -> Option<String> {
  locators.iter().find_map(|locator| {
    let node = dom.query(locator)?;
    let text = dom.text_content(node).trim().to_string();
    if text.is_empty() {
      None
    } else {
      debug!("locator '{}' matched '{}'", locator, text);
      Some(text)
    }
  })
}

fn video_title<D: PageDom + ?Sized>(dom: &D) -> Option<String> {
  first_text(dom, &VIDEO_TITLE_LOCATORS)
}

fn video_description<D: PageDom + ?Sized>(dom: &D) -> String {
  dom
    .query(DESCRIPTION_LOCATOR)
    .map(|node| dom.text_content(node))
    .unwrap_or_default()
}

/// Splits a video title into `(artist, track)`. When no separator pattern
/// matches the whole title is the track.
pub fn split_title(title: &str) -> (Option<String>, String) {
  for pattern in &patterns().title {
    if let Some(captures) = pattern.captures(title) {
      let artist = captures[1].trim().to_string();
      let track = captures[2].trim().to_string();
      return (Some(artist), track);
    }
  }
  (None, title.trim().to_string())
}

pub fn artist_from_description(description: &str) -> Option<String> {
  patterns()
    .description
    .iter()
    .find_map(|pattern| pattern.captures(description))
    .map(|captures| captures[1].trim().to_string())
    .filter(|artist| !artist.is_empty())
}

pub fn looks_like_artist_channel(channel: &str) -> bool {
  let channel = channel.trim();
  !channel.is_empty() && !patterns().label_channel.is_match(channel)
}

/// Keyword or artist-song heuristics over a video's title and description.
/// Keywords match on word boundaries, so "ep" does not fire on "deep".
pub fn is_music_content(title: &str, description: &str) -> bool {
  let patterns = patterns();
  patterns.keywords.is_match(title)
    || patterns.keywords.is_match(description)
    || patterns.artist_song.is_match(title)
}

pub fn extract_identity<D: PageDom + ?Sized>(dom: &D, kind: PageKind) -> TrackIdentity {
  match kind {
    PageKind::MusicPage => {
      let artist = first_text(dom, &MUSIC_ARTIST_LOCATORS);
      let track = first_text(dom, &MUSIC_TITLE_LOCATORS);
      TrackIdentity::from_raw(artist.as_deref(), track.as_deref())
    }
    PageKind::VideoPage => {
      let Some(title) = video_title(dom) else {
        return TrackIdentity::absent();
      };
      let (artist, track) = split_title(&title);
      let artist = artist
        .or_else(|| artist_from_description(&video_description(dom)))
        .or_else(|| first_text(dom, &CHANNEL_LOCATORS).filter(|c| looks_like_artist_channel(c)));
      TrackIdentity::from_raw(artist.as_deref(), Some(&track))
    }
    PageKind::Unsupported => TrackIdentity::absent(),
  }
}

pub fn is_eligible_for_artwork<D: PageDom + ?Sized>(dom: &D, kind: PageKind) -> bool {
  match kind {
    PageKind::MusicPage => dom.query(VIDEO_VARIANT_LOCATOR).is_some(),
    PageKind::VideoPage => {
      let title = video_title(dom).unwrap_or_default();
      is_music_content(&title, &video_description(dom))
    }
    PageKind::Unsupported => false,
  }
}
