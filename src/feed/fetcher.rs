use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Sample;

/// Where the sync cycle gets fresh samples from.
#[allow(async_fn_in_trait)]
pub trait SampleSource {
    /// Newest sample of a feed, or `None` when the feed has not reported yet.
    async fn latest_sample(&self, feed_id: &str) -> Result<Option<Sample>>;
}

#[derive(Debug, Deserialize)]
struct SensableResponse {
    #[serde(default)]
    samples: Vec<Sample>,
}

pub struct SampleFetcher {
    client: Client,
    base_url: Url,
}

impl SampleFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("sensable-sync/0.1")
            .build()?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid api_base_url {base_url}: {e}")))?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn sample_url(&self, feed_id: &str) -> Result<Url> {
        self.base_url
            .join(&format!("sensable/{}", urlencoding::encode(feed_id)))
            .map_err(|e| AppError::SensableApi(format!("bad feed id {feed_id}: {e}")))
    }
}

impl SampleSource for SampleFetcher {
    async fn latest_sample(&self, feed_id: &str) -> Result<Option<Sample>> {
        let url = self.sample_url(feed_id)?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to fetch sensable {}: HTTP {}",
                feed_id,
                response.status()
            )
            .into());
        }

        let body: SensableResponse = response.json().await?;
        Ok(newest(body.samples))
    }
}

fn newest(samples: Vec<Sample>) -> Option<Sample> {
    samples.into_iter().max_by_key(|sample| sample.timestamp)
}
