//! Content fingerprints. Two uploads count as the same image exactly when
//! their fingerprints are equal.

use crate::error::{CuratorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a value read back from the metadata store.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parses user input such as a CLI argument.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let hex = value.strip_prefix(PERCEPTUAL_PREFIX).unwrap_or(value);
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CuratorError::InvalidInput(format!(
                "malformed fingerprint {value:?}"
            )));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stem used for the remote object name; safe on every backing store.
    pub fn object_stem(&self) -> String {
        self.0.replace(':', "-")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const PERCEPTUAL_PREFIX: &str = "ahash:";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// Byte-exact blake3 digest.
    #[default]
    Blake3,
    /// 64-bit average hash; near-identical re-encodes collapse together.
    Perceptual,
}

#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    mode: FingerprintMode,
}

impl Fingerprinter {
    pub fn new(mode: FingerprintMode) -> Result<Self> {
        if mode == FingerprintMode::Perceptual && !cfg!(feature = "perceptual") {
            return Err(CuratorError::Config(
                "perceptual fingerprints need the `perceptual` feature".into(),
            ));
        }
        Ok(Self { mode })
    }

    pub fn mode(&self) -> FingerprintMode {
        self.mode
    }

    pub fn fingerprint(&self, bytes: &[u8]) -> Result<Fingerprint> {
        match self.mode {
            FingerprintMode::Blake3 => Ok(content_digest(bytes)),
            FingerprintMode::Perceptual => perceptual(bytes),
        }
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self {
            mode: FingerprintMode::Blake3,
        }
    }
}

pub fn content_digest(bytes: &[u8]) -> Fingerprint {
    Fingerprint(blake3::hash(bytes).to_hex().to_string())
}

#[cfg(feature = "perceptual")]
fn perceptual(bytes: &[u8]) -> Result<Fingerprint> {
    use image::imageops::FilterType;

    let img = image::load_from_memory(bytes)
        .map_err(|e| CuratorError::InvalidInput(format!("undecodable image: {e}")))?;
    // Greyscale first, then an antialiased downscale, compared to a float mean.
    let gray = img.to_luma8();
    let small = image::imageops::resize(&gray, 8, 8, FilterType::Lanczos3);
    let pixels: Vec<f32> = small.pixels().map(|p| f32::from(p.0[0])).collect();
    let mean = pixels.iter().sum::<f32>() / pixels.len().max(1) as f32;
    let bits = pixels
        .iter()
        .fold(0u64, |acc, &p| (acc << 1) | u64::from(p > mean));
    Ok(Fingerprint(format!("{PERCEPTUAL_PREFIX}{bits:016x}")))
}

#[cfg(not(feature = "perceptual"))]
fn perceptual(_bytes: &[u8]) -> Result<Fingerprint> {
    Err(CuratorError::Config(
        "perceptual fingerprints need the `perceptual` feature".into(),
    ))
}
