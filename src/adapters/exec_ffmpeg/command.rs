// Argument lists for the encoder invocations

use std::path::Path;

use crate::domain::model::StreamProfile;

/// `-y -i <source> <encoder args> <output>`
pub fn transcode_args(source: &Path, tier: &StreamProfile, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
    ];
    args.extend(tier.encoder_args());
    args.push(output.to_string_lossy().to_string());
    args
}

/// `-re -i <source> <encoder args> udp://<host>:<port>`, paced at native frame rate
pub fn stream_out_args(source: &Path, profile: &StreamProfile, host: &str) -> Vec<String> {
    let mut args = vec![
        "-re".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
    ];
    args.extend(profile.encoder_args());
    args.push(udp_url(host, profile.port));
    args
}

/// Receive the UDP stream and render it without re-encoding
pub fn playback_args(server_address: &str, port: u16) -> Vec<String> {
    vec![
        "-i".to_string(),
        udp_url(server_address, port),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "sdl".to_string(),
        "-".to_string(),
    ]
}

pub fn version_args() -> Vec<String> {
    vec!["-version".to_string()]
}

fn udp_url(host: &str, port: u16) -> String {
    format!("udp://{}:{}", host, port)
}
