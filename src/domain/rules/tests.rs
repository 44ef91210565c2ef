// Unit tests for bitrate selection rules

use super::*;

fn entry_with(tiers: &[StreamProfile]) -> VideoEntry {
    let mut entry = VideoEntry::new("/videos/movie.mp4", 1_000).unwrap();
    for tier in tiers {
        let path = entry.variant_path(std::path::Path::new("/transcoded"), tier);
        entry.add_variant(TranscodedVariant::for_tier(path, tier));
    }
    entry
}

#[test]
fn test_select_profile_non_positive_speed_is_lowest_tier() {
    for speed in [0.0, -1.0, -1000.0, f64::NAN, f64::NEG_INFINITY] {
        let profile = BitrateSelector::select_profile(speed);
        assert_eq!(profile.height, 240, "speed {}", speed);
        assert_eq!(profile.bitrate_bps, 250_000);
    }
}

#[test]
fn test_select_profile_huge_speed_is_1080p() {
    for speed in [1_000.0, 1e9, f64::MAX / 1e7] {
        assert_eq!(BitrateSelector::select_profile(speed).height, 1080);
    }
}

#[test]
fn test_select_profile_applies_safety_factor() {
    // 3.5 Mbps * 0.7 = 2.45 Mbps, just short of 720p's 2.5 Mbps
    let profile = BitrateSelector::select_profile(3.5);
    assert_eq!(profile.height, 480);
    assert_eq!(profile.bitrate_bps, 1_000_000);
}

#[test]
fn test_select_profile_boundaries() {
    // Exactly 5 Mbps after the safety factor
    assert_eq!(BitrateSelector::select_profile(5.0 / 0.7 + 1e-9).height, 1080);
    assert_eq!(BitrateSelector::select_profile(7.0).height, 720);
    assert_eq!(BitrateSelector::select_profile(1.0).height, 360);
    assert_eq!(BitrateSelector::select_profile(0.5).height, 240);
}

#[test]
fn test_select_profile_uses_default_port() {
    assert_eq!(BitrateSelector::select_profile(10.0).port, DEFAULT_STREAMING_PORT);
}

#[test]
fn test_select_variant_empty_entry() {
    let entry = entry_with(&[]);
    assert!(BitrateSelector::select_variant(&entry, 10.0).is_none());
}

#[test]
fn test_select_variant_highest_fitting() {
    let entry = entry_with(&StreamProfile::ladder());
    let chosen = BitrateSelector::select_variant(&entry, 2.6).unwrap();
    assert_eq!(chosen.height, 720);

    let chosen = BitrateSelector::select_variant(&entry, 5.0).unwrap();
    assert_eq!(chosen.height, 1080);
}

#[test]
fn test_select_variant_falls_back_to_lowest() {
    let entry = entry_with(&[StreamProfile::hd_1080p(), StreamProfile::sd_480p()]);
    let chosen = BitrateSelector::select_variant(&entry, 0.1).unwrap();
    assert_eq!(chosen.height, 480);
}

#[test]
fn test_two_stage_selection_for_fast_link() {
    let entry = entry_with(&StreamProfile::ladder());
    let profile = BitrateSelector::select_profile(10.0);
    let variant = BitrateSelector::select_variant(&entry, profile.bitrate_mbps()).unwrap();

    assert_eq!(profile.bitrate_bps, 5_000_000);
    assert_eq!(variant.bitrate_bps, 5_000_000);
    assert_eq!(variant.height, 1080);
}
