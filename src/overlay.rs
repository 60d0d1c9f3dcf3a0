//! Keeps the page showing either the native video or the album artwork.
//!
//! The presenter owns every inline style it changes on page elements and
//! remembers the value it found, so going back to the native video puts the
//! page back exactly as it was. Overlay nodes are found by fixed ids and are
//! updated in place, never duplicated.

use crate::core::identity::TrackIdentity;
use crate::core::page::PageKind;
use crate::dom::{NodeId, PageDom};
use crate::palette::{Palette, LOAD_FAILED_GRADIENT};
use log::{debug, info, warn};

pub const ALBUM_CONTAINER_ID: &str = "album-container";
pub const ALBUM_IMAGE_ID: &str = "album-image";
pub const ANIMATION_STYLE_ID: &str = "album-animation-styles";
/// The music page's own video wrapper.
pub const SONG_VIDEO_ID: &str = "song-video";
pub const MUSIC_PLAYER_ID: &str = "player";
pub const AV_TOGGLE_LOCATOR: &str = "ytmusic-av-toggle";

pub const VIDEO_LOCATORS: [&str; 5] = [
  ".html5-main-video.video-stream",
  "video.html5-main-video",
  "#movie_player video",
  ".ytp-video-container video",
  "video.video-stream",
];

pub const CONTAINER_LOCATORS: [&str; 5] = [
  "#movie_player",
  ".html5-video-container",
  ".ytp-video-container",
  "#player-container",
  ".video-container",
];

/// Player chrome that has to stay clickable above the artwork.
pub const CONTROL_LOCATORS: [&str; 5] = [
  ".ytp-chrome-bottom",
  ".ytp-chrome-controls",
  ".ytp-player-content",
  ".ytp-gradient-bottom",
  ".ytp-controls-visible",
];

const CONTAINER_STYLE: [(&str, &str); 12] = [
  ("width", "100%"),
  ("height", "100%"),
  ("position", "absolute"),
  ("top", "0"),
  ("left", "0"),
  ("z-index", "10"),
  ("display", "flex"),
  ("align-items", "center"),
  ("justify-content", "center"),
  ("background-color", "#000"),
  ("transition", "background-color 0.5s ease"),
  ("pointer-events", "none"),
];

const IMAGE_STYLE: [(&str, &str); 9] = [
  ("max-width", "50%"),
  ("max-height", "50%"),
  ("width", "auto"),
  ("height", "auto"),
  ("object-fit", "contain"),
  ("border-radius", "12px"),
  ("box-shadow", "0 12px 40px rgba(0,0,0,0.8)"),
  ("transition", "all 0.3s ease"),
  ("pointer-events", "auto"),
];

const ANIMATION_KEYFRAMES: &str = "@keyframes albumBackgroundShift { \
  0% { background-position: 0% 50%; } \
  100% { background-position: 100% 50%; } }";
const BACKGROUND_ANIMATION: &str = "albumBackgroundShift 8s ease-in-out infinite alternate";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OverlayState {
  /// Nothing applied yet.
  Empty,
  ShowingNative,
  ShowingArtwork { url: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
  Native,
  Artwork(String),
}

/// Which side of the overlay a page should be on.
pub fn decide(eligible: bool, identity: &TrackIdentity, artwork: Option<&str>) -> Target {
  if !eligible || !identity.is_complete() {
    return Target::Native;
  }
  match artwork {
    Some(url) => Target::Artwork(url.to_string()),
    None => {
      info!("no artwork for {}, keeping the video", identity);
      Target::Native
    }
  }
}

/// Presence of the overlay nodes, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayReport {
  pub container: bool,
  pub image: bool,
  pub animation_styles: bool,
}

impl OverlayReport {
  pub fn read<D: PageDom + ?Sized>(dom: &D) -> Self {
    Self {
      container: dom.element_by_id(ALBUM_CONTAINER_ID).is_some(),
      image: dom.element_by_id(ALBUM_IMAGE_ID).is_some(),
      animation_styles: dom.element_by_id(ANIMATION_STYLE_ID).is_some(),
    }
  }

  pub fn is_clean(&self) -> bool {
    !self.container && !self.image && !self.animation_styles
  }
}

#[derive(Debug)]
struct SavedStyle {
  node: NodeId,
  property: &'static str,
  original: Option<String>,
}

#[derive(Debug)]
struct DetachedVideo {
  node: NodeId,
  parent: NodeId,
}

#[derive(Debug)]
pub struct OverlayPresenter {
  state: OverlayState,
  saved_styles: Vec<SavedStyle>,
  detached_video: Option<DetachedVideo>,
}

impl Default for OverlayPresenter {
  fn default() -> Self {
    Self::new()
  }
}

fn first_match<D: PageDom + ?Sized>(dom: &D, locators: &[&str]) -> Option<NodeId> {
  locators.iter().find_map(|locator| dom.query(locator))
}

impl OverlayPresenter {
  pub fn new() -> Self {
    Self {
      state: OverlayState::Empty,
      saved_styles: Vec::new(),
      detached_video: None,
    }
  }

  pub fn state(&self) -> &OverlayState {
    &self.state
  }

  pub fn showing_url(&self) -> Option<&str> {
    match &self.state {
      OverlayState::ShowingArtwork { url } => Some(url),
      _ => None,
    }
  }

  pub fn apply<D: PageDom + ?Sized>(&mut self, dom: &mut D, kind: PageKind, target: &Target) {
    match target {
      Target::Native => self.show_native(dom, kind),
      Target::Artwork(url) => self.show_artwork(dom, kind, url),
    }
  }

  /// Sets an inline style, remembering the page's own value the first time
  /// this presenter touches `(node, property)`.
  fn set_owned_style<D: PageDom + ?Sized>(
    &mut self,
    dom: &mut D,
    node: NodeId,
    property: &'static str,
    value: &str,
  ) {
    let current = dom.style_property(node, property);
    if current.as_deref() == Some(value) {
      return;
    }
    let already_saved = self
      .saved_styles
      .iter()
      .any(|saved| saved.node == node && saved.property == property);
    if !already_saved {
      self.saved_styles.push(SavedStyle {
        node,
        property,
        original: current,
      });
    }
    dom.set_style_property(node, property, value);
  }

  fn restore_styles<D: PageDom + ?Sized>(&mut self, dom: &mut D) {
    for saved in self.saved_styles.drain(..).rev() {
      match &saved.original {
        Some(value) => dom.set_style_property(saved.node, saved.property, value),
        None => dom.remove_style_property(saved.node, saved.property),
      }
    }
  }

  fn hide_video<D: PageDom + ?Sized>(&mut self, dom: &mut D) {
    match first_match(dom, &VIDEO_LOCATORS) {
      Some(video) => {
        self.set_owned_style(dom, video, "opacity", "0");
        self.set_owned_style(dom, video, "z-index", "-1");
      }
      None => warn!("video element not found"),
    }
  }

  pub fn show_artwork<D: PageDom + ?Sized>(&mut self, dom: &mut D, kind: PageKind, url: &str) {
    let shown = match kind {
      PageKind::VideoPage => self.show_in_video_player(dom, url),
      PageKind::MusicPage => self.show_in_music_player(dom, url),
      PageKind::Unsupported => false,
    };

    if shown {
      if self.showing_url() != Some(url) {
        info!("showing artwork {}", url);
      }
      self.state = OverlayState::ShowingArtwork {
        url: url.to_string(),
      };
    } else {
      self.show_native(dom, kind);
    }
  }

  fn show_in_video_player<D: PageDom + ?Sized>(&mut self, dom: &mut D, url: &str) -> bool {
    let Some(player) = first_match(dom, &CONTAINER_LOCATORS) else {
      warn!("video container not found, cannot show artwork");
      return false;
    };

    self.hide_video(dom);

    let position = dom.style_property(player, "position");
    if position.is_none() || position.as_deref() == Some("static") {
      self.set_owned_style(dom, player, "position", "relative");
    }

    match dom.element_by_id(ALBUM_CONTAINER_ID) {
      Some(container) => {
        if dom.parent(container) != Some(player) {
          dom.append_child(player, container);
        }
        match dom.element_by_id(ALBUM_IMAGE_ID) {
          Some(image) => update_src(dom, image, url),
          None => {
            let image = create_image(dom, url);
            dom.append_child(container, image);
          }
        }
      }
      None => {
        // A stray image from the music-page layout would be a duplicate.
        if let Some(stray) = dom.element_by_id(ALBUM_IMAGE_ID) {
          dom.remove(stray);
        }
        let container = dom.create_element("div");
        dom.set_attribute(container, "id", ALBUM_CONTAINER_ID);
        for (property, value) in CONTAINER_STYLE {
          dom.set_style_property(container, property, value);
        }
        let image = create_image(dom, url);
        dom.append_child(container, image);
        dom.append_child(player, container);
        debug!("album container added to video container");
      }
    }

    for locator in CONTROL_LOCATORS {
      if let Some(control) = dom.query(locator) {
        self.set_owned_style(dom, control, "z-index", "200");
        self.set_owned_style(dom, control, "pointer-events", "auto");
      }
    }
    true
  }

  fn show_in_music_player<D: PageDom + ?Sized>(&mut self, dom: &mut D, url: &str) -> bool {
    let Some(player) = dom.element_by_id(MUSIC_PLAYER_ID) else {
      warn!("music player element not found, cannot show artwork");
      return false;
    };

    match dom.element_by_id(ALBUM_IMAGE_ID) {
      Some(image) => update_src(dom, image, url),
      None => {
        let image = dom.create_element("img");
        dom.set_attribute(image, "id", ALBUM_IMAGE_ID);
        dom.set_attribute(image, "alt", "Album Image");
        dom.set_attribute(image, "src", url);
        let width = dom
          .style_property(player, "width")
          .unwrap_or_else(|| "100%".to_string());
        dom.set_style_property(image, "width", &width);
        dom.set_style_property(image, "height", "auto");
        dom.append_child(player, image);
      }
    }

    self.hide_video(dom);

    if let Some(song_video) = dom.element_by_id(SONG_VIDEO_ID) {
      if let Some(parent) = dom.parent(song_video) {
        dom.remove(song_video);
        self.detached_video = Some(DetachedVideo {
          node: song_video,
          parent,
        });
        debug!("song video detached");
      }
    }
    true
  }

  /// Removes every overlay node and hands the page back its own video.
  /// Safe to call in any state.
  pub fn show_native<D: PageDom + ?Sized>(&mut self, dom: &mut D, kind: PageKind) {
    let had_overlay = !OverlayReport::read(dom).is_clean();
    for id in [ANIMATION_STYLE_ID, ALBUM_CONTAINER_ID, ALBUM_IMAGE_ID] {
      if let Some(node) = dom.element_by_id(id) {
        dom.remove(node);
      }
    }
    if had_overlay {
      info!("artwork removed, showing native video");
    }

    self.restore_styles(dom);

    if let Some(detached) = self.detached_video.take() {
      if dom.element_by_id(SONG_VIDEO_ID).is_some() {
        debug!("page already recreated its video");
      } else if dom.is_connected(detached.parent) {
        dom.append_child(detached.parent, detached.node);
        debug!("song video reattached");
      } else if kind == PageKind::MusicPage {
        // The player was rebuilt without our node; flipping the audio/video
        // switch twice makes the page render a fresh one in video mode.
        if let Some(toggle) = dom.query(AV_TOGGLE_LOCATOR) {
          dom.click(toggle);
          dom.click(toggle);
        }
      }
    }

    self.state = OverlayState::ShowingNative;
  }

  /// Paints the artwork's palette behind it. Ignored unless `url` is still
  /// the artwork on screen. `None` means the artwork could not be downloaded.
  pub fn apply_palette<D: PageDom + ?Sized>(
    &mut self,
    dom: &mut D,
    url: &str,
    palette: Option<&Palette>,
  ) -> bool {
    if self.showing_url() != Some(url) {
      debug!("palette for {} arrived after the artwork changed", url);
      return false;
    }
    let Some(container) = dom.element_by_id(ALBUM_CONTAINER_ID) else {
      return false;
    };

    let Some(palette) = palette else {
      dom.set_style_property(container, "background", LOAD_FAILED_GRADIENT);
      return true;
    };

    dom.set_style_property(container, "background", &palette.gradient_css());
    dom.set_style_property(container, "background-size", "150% 150%");
    dom.set_style_property(container, "animation", BACKGROUND_ANIMATION);

    if dom.element_by_id(ANIMATION_STYLE_ID).is_none() {
      match dom.query("head") {
        Some(head) => {
          let style = dom.create_element("style");
          dom.set_attribute(style, "id", ANIMATION_STYLE_ID);
          dom.set_text(style, ANIMATION_KEYFRAMES);
          dom.append_child(head, style);
        }
        None => debug!("no head element for animation styles"),
      }
    }
    true
  }
}

fn create_image<D: PageDom + ?Sized>(dom: &mut D, url: &str) -> NodeId {
  let image = dom.create_element("img");
  dom.set_attribute(image, "id", ALBUM_IMAGE_ID);
  dom.set_attribute(image, "alt", "Album Image");
  dom.set_attribute(image, "src", url);
  dom.set_attribute(image, "crossorigin", "anonymous");
  for (property, value) in IMAGE_STYLE {
    dom.set_style_property(image, property, value);
  }
  image
}

fn update_src<D: PageDom + ?Sized>(dom: &mut D, image: NodeId, url: &str) {
  if dom.attribute(image, "src").as_deref() != Some(url) {
    dom.set_attribute(image, "src", url);
  }
}
