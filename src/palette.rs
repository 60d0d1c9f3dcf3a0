//! Background gradient derived from the dominant colour of the artwork.

use std::collections::HashMap;

/// Used when the artwork could not be loaded at all.
pub const LOAD_FAILED_GRADIENT: &str =
  "radial-gradient(ellipse at center, #2a2a2a 0%, #1a1a1a 50%, #000000 100%)";

/// Dominant colour when every sampled pixel is too dark or too light.
pub const DEFAULT_DOMINANT: Rgb = Rgb(40, 40, 40);

/// Side of the square the artwork is scaled to before sampling.
pub const SAMPLE_SIZE: u32 = 200;
/// Every fifth RGBA pixel is sampled.
const SAMPLE_STRIDE: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
  fn scaled(self, factor: f32) -> Rgb {
    let scale = |c: u8| (f32::from(c) * factor).floor() as u8;
    Rgb(scale(self.0), scale(self.1), scale(self.2))
  }

  pub fn to_css(self) -> String {
    format!("rgb({}, {}, {})", self.0, self.1, self.2)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
  pub darkest: Rgb,
  pub dark: Rgb,
  pub medium: Rgb,
  pub original: Rgb,
}

impl Palette {
  pub fn from_dominant(color: Rgb) -> Self {
    Self {
      darkest: color.scaled(0.1),
      dark: color.scaled(0.2),
      medium: color.scaled(0.4),
      original: color,
    }
  }

  /// Neutral greys for when the bitmap cannot be read.
  pub fn fallback() -> Self {
    Self {
      darkest: Rgb(0x0a, 0x0a, 0x0a),
      dark: Rgb(0x1a, 0x1a, 0x1a),
      medium: Rgb(0x2a, 0x2a, 0x2a),
      original: Rgb(0x44, 0x44, 0x44),
    }
  }

  pub fn gradient_css(&self) -> String {
    format!(
      "radial-gradient(ellipse at center, {} 0%, {} 40%, {} 80%, #000000 100%)",
      self.medium.to_css(),
      self.dark.to_css(),
      self.darkest.to_css()
    )
  }
}

/// Most frequent colour of an RGBA buffer after quantizing each channel to
/// steps of ten. Near-black and near-white samples are ignored; ties go to
/// the colour seen first.
pub fn dominant_color_of_pixels(rgba: &[u8]) -> Rgb {
  let mut counts: HashMap<Rgb, (usize, usize)> = HashMap::new();

  for (seen, pixel) in rgba.chunks_exact(4).step_by(SAMPLE_STRIDE / 4).enumerate() {
    let quantize = |c: u8| c / 10 * 10;
    let color = Rgb(quantize(pixel[0]), quantize(pixel[1]), quantize(pixel[2]));
    let sum = u16::from(color.0) + u16::from(color.1) + u16::from(color.2);
    if sum > 50 && sum < 700 {
      counts.entry(color).or_insert((0, seen)).0 += 1;
    }
  }

  counts
    .into_iter()
    .max_by(|(_, (count_a, seen_a)), (_, (count_b, seen_b))| {
      count_a.cmp(count_b).then(seen_b.cmp(seen_a))
    })
    .map(|(color, _)| color)
    .unwrap_or(DEFAULT_DOMINANT)
}

#[cfg(feature = "palette")]
pub fn dominant_color(image: &image::DynamicImage) -> Rgb {
  let sample = image
    .resize_exact(SAMPLE_SIZE, SAMPLE_SIZE, image::imageops::FilterType::Triangle)
    .to_rgba8();
  dominant_color_of_pixels(sample.as_raw())
}

/// Downloads the artwork and derives its palette. A failed download is an
/// error; a bitmap that downloads but cannot be decoded gets
/// [`Palette::fallback`].
#[cfg(feature = "palette")]
pub async fn fetch_palette(client: &reqwest::Client, url: &str) -> anyhow::Result<Palette> {
  let bytes = client
    .get(url)
    .send()
    .await?
    .error_for_status()?
    .bytes()
    .await?;
  log::debug!("artwork downloaded: {} bytes", bytes.len());

  match image::load_from_memory(&bytes) {
    Ok(image) => Ok(Palette::from_dominant(dominant_color(&image))),
    Err(e) => {
      log::warn!("could not decode artwork from {}: {}", url, e);
      Ok(Palette::fallback())
    }
  }
}
