use super::{FetchRequest, FetchResponse, TaskAdaptor};
use crate::core::{LedgerError, Result};
use crate::task::TaskPlatform;
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Music generation platform: `POST {base_url}/suno/fetch`.
#[derive(Clone)]
pub struct SunoAdaptor {
    client: reqwest::Client,
}

impl SunoAdaptor {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    fn fetch_url(base_url: &str) -> String {
        format!("{}/suno/fetch", base_url.trim_end_matches('/'))
    }
}

impl Default for SunoAdaptor {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

#[async_trait]
impl TaskAdaptor for SunoAdaptor {
    fn platform(&self) -> TaskPlatform {
        TaskPlatform::suno()
    }

    async fn fetch_tasks(
        &self,
        base_url: &str,
        key: &str,
        request: &FetchRequest,
    ) -> Result<FetchResponse> {
        let response = self
            .client
            .post(Self::fetch_url(base_url))
            .bearer_auth(key)
            .json(request)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("suno fetch request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| LedgerError::Transport(format!("failed reading suno fetch body: {e}")))?;

        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_url_ignores_trailing_slash() {
        assert_eq!(
            SunoAdaptor::fetch_url("http://upstream:9000/"),
            "http://upstream:9000/suno/fetch"
        );
        assert_eq!(
            SunoAdaptor::fetch_url("http://upstream:9000"),
            "http://upstream:9000/suno/fetch"
        );
    }
}
