use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// `true` only when the url answers with a 200. Never fails.
    async fn probe(&self, url: &str) -> bool;
}

pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(client: Client) -> Self {
        Self::with_timeout(client, LIVENESS_TIMEOUT)
    }

    pub fn with_timeout(client: Client, timeout: Duration) -> Self {
        HttpProber { client, timeout }
    }
}

#[async_trait]
impl LivenessProbe for HttpProber {
    async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(res) => {
                let status = res.status();
                if status != StatusCode::OK {
                    debug!("{} answered {}, marking inactive", url, status);
                }
                status == StatusCode::OK
            }
            Err(e) => {
                debug!("{} is unreachable: {}", url, e);
                false
            }
        }
    }
}
