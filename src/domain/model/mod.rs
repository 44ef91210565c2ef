// Domain models - Catalog entries, transcoded variants and quality tiers

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Default port of the control connection
pub const DEFAULT_CONTROL_PORT: u16 = 8888;

/// Default port of the streaming data plane
pub const DEFAULT_STREAMING_PORT: u16 = 8889;

/// Container used for stored transcoded variants
pub const VARIANT_CONTAINER: &str = "mp4";

/// Container used on the live streaming data plane
pub const STREAMING_CONTAINER: &str = "mpegts";

const DEFAULT_VIDEO_CODEC: &str = "libx264";
const DEFAULT_AUDIO_CODEC: &str = "aac";

/// Source container extensions accepted by the catalog
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mkv", "mov", "webm"];

/// A quality tier: resolution, bitrate, codecs, container and streaming port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u64,
    pub video_codec: String,
    pub audio_codec: String,
    pub container_format: String,
    pub port: u16,
}

impl StreamProfile {
    /// Create a profile, filling unspecified codecs, container and port with defaults
    pub fn new(
        width: u32,
        height: u32,
        bitrate_bps: u64,
        video_codec: Option<&str>,
        audio_codec: Option<&str>,
        container_format: Option<&str>,
        port: Option<u16>,
    ) -> Self {
        Self {
            width,
            height,
            bitrate_bps,
            video_codec: video_codec.unwrap_or(DEFAULT_VIDEO_CODEC).to_string(),
            audio_codec: audio_codec.unwrap_or(DEFAULT_AUDIO_CODEC).to_string(),
            container_format: container_format.unwrap_or(STREAMING_CONTAINER).to_string(),
            port: port.unwrap_or(DEFAULT_STREAMING_PORT),
        }
    }

    fn tier(width: u32, height: u32, bitrate_bps: u64) -> Self {
        Self::new(
            width,
            height,
            bitrate_bps,
            Some(DEFAULT_VIDEO_CODEC),
            Some(DEFAULT_AUDIO_CODEC),
            Some(VARIANT_CONTAINER),
            None,
        )
    }

    pub fn hd_1080p() -> Self {
        Self::tier(1920, 1080, 5_000_000)
    }

    pub fn hd_720p() -> Self {
        Self::tier(1280, 720, 2_500_000)
    }

    pub fn sd_480p() -> Self {
        Self::tier(854, 480, 1_000_000)
    }

    pub fn sd_360p() -> Self {
        Self::tier(640, 360, 500_000)
    }

    pub fn low_240p() -> Self {
        Self::tier(426, 240, 250_000)
    }

    /// The five fixed tiers, richest first (strictly descending bitrate)
    pub fn ladder() -> [StreamProfile; 5] {
        [
            Self::hd_1080p(),
            Self::hd_720p(),
            Self::sd_480p(),
            Self::sd_360p(),
            Self::low_240p(),
        ]
    }

    /// Find the fixed tier with the given vertical resolution
    pub fn tier_for_height(height: u32) -> Option<StreamProfile> {
        Self::ladder().into_iter().find(|tier| tier.height == height)
    }

    /// Derive a copy that streams on another port
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// Derive a copy that uses another container format
    pub fn with_format(&self, container_format: impl Into<String>) -> Self {
        Self {
            container_format: container_format.into(),
            ..self.clone()
        }
    }

    /// Resolution formatted as `WxH`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn bitrate_mbps(&self) -> f64 {
        self.bitrate_bps as f64 / 1_000_000.0
    }

    /// Encoder parameters that produce this tier
    pub fn encoder_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:v".to_string(),
            self.bitrate_bps.to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", self.width, self.height),
            "-f".to_string(),
            self.container_format.clone(),
        ]
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.2} Mbps, {})",
            self.resolution(),
            self.bitrate_mbps(),
            self.container_format
        )
    }
}

/// A transcoded output file of one source video at one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodedVariant {
    pub path: PathBuf,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u64,
}

impl TranscodedVariant {
    /// Variant produced for `tier`, stored at `path`
    pub fn for_tier(path: impl Into<PathBuf>, tier: &StreamProfile) -> Self {
        Self {
            path: path.into(),
            format: tier.container_format.clone(),
            width: tier.width,
            height: tier.height,
            bitrate_bps: tier.bitrate_bps,
        }
    }

    pub fn bitrate_mbps(&self) -> f64 {
        self.bitrate_bps as f64 / 1_000_000.0
    }
}

impl fmt::Display for TranscodedVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}x{}, {:.2} Mbps)",
            self.format,
            self.path.display(),
            self.width,
            self.height,
            self.bitrate_mbps()
        )
    }
}

/// A source video known to the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub file_name: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub extension: String,
    variants: Vec<TranscodedVariant>,
}

impl VideoEntry {
    /// Create an entry for a source file with no variants yet
    pub fn new(file_path: impl Into<PathBuf>, file_size: u64) -> Result<Self, DomainError> {
        let file_path = file_path.into();
        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                DomainError::BadArgs(format!("Path has no file name: {}", file_path.display()))
            })?;
        let extension = extension_of(&file_name).unwrap_or_default();

        Ok(Self {
            file_name,
            file_path,
            file_size,
            extension,
            variants: Vec::new(),
        })
    }

    /// File name without its extension; names the derived directory
    pub fn stem(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(idx) if idx > 0 => &self.file_name[..idx],
            _ => &self.file_name,
        }
    }

    pub fn variants(&self) -> &[TranscodedVariant] {
        &self.variants
    }

    pub fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    /// Append a variant. A second variant for the same tier is ignored.
    pub fn add_variant(&mut self, variant: TranscodedVariant) -> bool {
        if self.has_variant_for_height(variant.height) {
            return false;
        }
        self.variants.push(variant);
        true
    }

    pub fn has_variant_for_height(&self, height: u32) -> bool {
        self.variants.iter().any(|v| v.height == height)
    }

    /// Derived directory holding this entry's variants
    pub fn variant_dir(&self, transcoded_root: &Path) -> PathBuf {
        transcoded_root.join(self.stem())
    }

    /// Deterministic output path of this entry at `tier`
    pub fn variant_path(&self, transcoded_root: &Path, tier: &StreamProfile) -> PathBuf {
        self.variant_dir(transcoded_root).join(variant_file_name(self.stem(), tier))
    }
}

impl fmt::Display for VideoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name)
    }
}

/// `<stem>_<height>p.<format>`
pub fn variant_file_name(stem: &str, tier: &StreamProfile) -> String {
    format!("{}_{}p.{}", stem, tier.height, tier.container_format)
}

/// Lower-cased extension after the last dot, if any
pub fn extension_of(file_name: &str) -> Option<String> {
    match file_name.rfind('.') {
        Some(idx) if idx + 1 < file_name.len() => Some(file_name[idx + 1..].to_lowercase()),
        _ => None,
    }
}

/// Whether the file name carries one of the accepted container extensions
pub fn is_supported_video(file_name: &str) -> bool {
    extension_of(file_name)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}
