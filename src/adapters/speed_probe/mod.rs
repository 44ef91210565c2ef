// HTTP download speed probe

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::errors::*;
use crate::ports::*;

/// Public test downloads tried in order until one succeeds
pub const DEFAULT_PROBE_URLS: [&str; 3] = [
    "https://speed.cloudflare.com/__down?bytes=1048576",
    "https://www.google.com/images/branding/googlelogo/1x/googlelogo_color_272x92dp.png",
    "https://proof.ovh.net/files/1Mb.dat",
];

/// Time spent on a single download before the partial measurement is used
pub const DEFAULT_SAMPLE_DURATION: Duration = Duration::from_secs(5);

/// Measures downlink bandwidth by timing an HTTP download.
///
/// Only one measurement runs at a time; a concurrent call fails fast with
/// [`DomainError::ResourceUnavailable`].
pub struct HttpSpeedProbe {
    client: reqwest::Client,
    urls: Vec<String>,
    sample_duration: Duration,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl HttpSpeedProbe {
    pub fn new(urls: Vec<String>, sample_duration: Duration) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .connect_timeout(sample_duration)
            .user_agent(concat!("vidstream/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| DomainError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            urls,
            sample_duration,
            in_flight: AtomicBool::new(false),
        })
    }

    /// Probe using the built-in public test files
    pub fn with_default_urls() -> Result<Self, DomainError> {
        Self::new(
            DEFAULT_PROBE_URLS.iter().map(|url| url.to_string()).collect(),
            DEFAULT_SAMPLE_DURATION,
        )
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    async fn sample(&self, url: &str) -> Result<f64, DomainError> {
        let started = Instant::now();
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| DomainError::ResourceUnavailable(e.to_string()))?;

        let mut received: u64 = 0;
        loop {
            let remaining = self.sample_duration.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                debug!(url, "Sample time is up, using the partial download");
                break;
            }
            match tokio::time::timeout(remaining, response.chunk()).await {
                Ok(Ok(Some(chunk))) => received += chunk.len() as u64,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(DomainError::ResourceUnavailable(e.to_string())),
                Err(_) => break,
            }
        }

        downlink_mbps(received, started.elapsed()).ok_or_else(|| {
            DomainError::ResourceUnavailable(format!("Nothing was downloaded from {}", url))
        })
    }
}

#[async_trait]
impl SpeedProbePort for HttpSpeedProbe {
    async fn measure_downlink_mbps(&self) -> Result<f64, DomainError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(DomainError::ResourceUnavailable(
                "A speed measurement is already running".to_string(),
            ));
        }
        let _guard = InFlightGuard(&self.in_flight);

        info!("Initiate speed test");
        for url in &self.urls {
            info!(url = %url, "Trying speed test");
            match self.sample(url).await {
                Ok(mbps) => {
                    info!("Speed test completed: {:.2} Mbps", mbps);
                    return Ok(mbps);
                }
                Err(e) => warn!(url = %url, "Error during measuring speed: {}", e),
            }
        }

        Err(DomainError::ResourceUnavailable(
            "All speed test URLs failed".to_string(),
        ))
    }
}

/// Megabits per second for `bytes` received in `elapsed`
pub fn downlink_mbps(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return None;
    }
    Some(bytes as f64 * 8.0 / secs / 1_000_000.0)
}
