// Domain rules - Adaptive bitrate selection policy

use crate::domain::model::*;

/// Fraction of the measured link speed that a stream may consume
pub const SAFETY_FACTOR: f64 = 0.7;

/// Business rules for choosing a quality tier and a stored variant
pub struct BitrateSelector;

impl BitrateSelector {
    /// Pick the richest fixed tier that fits under the safety-adjusted speed.
    ///
    /// The returned profile streams on the default port. Speeds that are zero,
    /// negative or not a number select the lowest tier.
    pub fn select_profile(speed_mbps: f64) -> StreamProfile {
        let safe_bps = Self::safe_bps(speed_mbps);

        StreamProfile::ladder()
            .into_iter()
            .find(|tier| tier.bitrate_bps as f64 <= safe_bps)
            .unwrap_or_else(StreamProfile::low_240p)
            .with_port(DEFAULT_STREAMING_PORT)
    }

    /// Pick the variant with the highest bitrate not above `speed_mbps`.
    ///
    /// Falls back to the lowest-bitrate variant when every variant exceeds the
    /// target, so `None` is only returned for an entry without variants.
    pub fn select_variant(entry: &VideoEntry, speed_mbps: f64) -> Option<&TranscodedVariant> {
        let variants = entry.variants();

        let best = variants
            .iter()
            .filter(|v| v.bitrate_mbps() <= speed_mbps)
            .max_by_key(|v| v.bitrate_bps);

        best.or_else(|| variants.iter().min_by_key(|v| v.bitrate_bps))
    }

    fn safe_bps(speed_mbps: f64) -> f64 {
        if !speed_mbps.is_finite() || speed_mbps <= 0.0 {
            return 0.0;
        }
        speed_mbps * 1_000_000.0 * SAFETY_FACTOR
    }
}

#[cfg(test)]
mod tests;
