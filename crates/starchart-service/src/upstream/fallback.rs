//! Generated placeholder images.
//!
//! Whenever the upstream listing cannot produce real content the pipeline
//! substitutes a self-contained gradient graphic, so consumers always
//! have something to draw without another network fetch.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use rand::Rng as _;
use starchart_sources::ImageDescriptor;

/// Prefix of every URL produced by [`fallback_data_url`].
pub const FALLBACK_URL_PREFIX: &str = "data:image/svg+xml;base64,";

/// Gradient color pairs the placeholder picks from.
const COLOR_PAIRS: &[(&str, &str)] = &[
    ("#667eea", "#764ba2"),
    ("#f093fb", "#f5576c"),
    ("#4facfe", "#00f2fe"),
    ("#43e97b", "#38f9d7"),
    ("#fa709a", "#fee140"),
    ("#a8edea", "#fed6e3"),
    ("#ff9a9e", "#fecfef"),
    ("#a18cd1", "#fbc2eb"),
    ("#fad0c4", "#ffd1ff"),
    ("#ffecd2", "#fcb69f"),
    ("#ff8177", "#b12a5b"),
    ("#48c6ef", "#6f86d6"),
    ("#0ba360", "#3cba92"),
    ("#f77062", "#fe5196"),
];

/// Produces a self-contained placeholder image as a `data:` URL.
///
/// The shape is fixed; the gradient colors are chosen at random, so
/// repeated placeholders are not visually identical. Embeddable directly,
/// no network fetch involved.
pub fn fallback_data_url() -> String {
    let mut rng = rand::thread_rng();
    let (from, to) = COLOR_PAIRS[rng.gen_range(0..COLOR_PAIRS.len())];

    let svg = format!(
        r##"<svg width="800" height="600" xmlns="http://www.w3.org/2000/svg">
  <defs>
    <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
      <stop offset="0%" stop-color="{from}"/>
      <stop offset="50%" stop-color="{to}" stop-opacity="0.8"/>
      <stop offset="100%" stop-color="{from}"/>
    </linearGradient>
    <pattern id="dots" width="70" height="70" patternUnits="userSpaceOnUse">
      <circle cx="35" cy="35" r="25" fill="url(#grad)" opacity="0.3"/>
    </pattern>
  </defs>
  <rect width="100%" height="100%" fill="url(#grad)"/>
  <rect width="100%" height="100%" fill="url(#dots)"/>
  <circle cx="400" cy="300" r="200" fill="url(#grad)" opacity="0.4"/>
</svg>"##
    );

    format!("{FALLBACK_URL_PREFIX}{}", STANDARD.encode(svg))
}

/// Builds a descriptor around a fresh placeholder.
pub fn fallback_descriptor(created_at: DateTime<Utc>) -> ImageDescriptor {
    ImageDescriptor::new(fallback_data_url(), created_at)
}
