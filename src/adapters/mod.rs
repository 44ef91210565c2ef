// Adapters - External system implementations

pub mod exec_ffmpeg;
pub mod speed_probe;
pub mod toml_config;

// Re-export adapters
pub use exec_ffmpeg::FfmpegAdapter;
pub use speed_probe::HttpSpeedProbe;
pub use toml_config::TomlConfigAdapter;
