//! Replaces the video on YouTube and YouTube Music watch pages with the
//! album artwork of the song that is playing, looked up on Spotify.

pub mod artwork;
pub mod auth;
pub mod background;
pub mod callback;
pub mod config;
pub mod controller;
pub mod core;
pub mod dom;
pub mod error;
pub mod extractor;
pub mod infra;
pub mod navigation;
pub mod observer;
pub mod overlay;
pub mod palette;
pub mod popup;

#[cfg(test)]
mod testing;
