//! Common utilities and helpers

pub mod logging;

/// Format a byte count for display: `512bytes`, `1.50 KB`, `3.20 MB`, `1.00 GB`
pub fn format_file_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes = size as f64;
    if bytes < KB {
        format!("{}bytes", size)
    } else if bytes < MB {
        format!("{:.2} KB", bytes / KB)
    } else if bytes < GB {
        format!("{:.2} MB", bytes / MB)
    } else {
        format!("{:.2} GB", bytes / GB)
    }
}
