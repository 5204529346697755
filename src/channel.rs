use crate::core::{ChannelId, Result};
use crate::task::TaskPlatform;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A credentialed account on an external platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub platform: TaskPlatform,
    pub name: String,
    pub base_url: String,
    pub key: String,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        platform: TaskPlatform,
        base_url: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            id,
            platform,
            name: format!("channel-{}", id),
            base_url: base_url.into(),
            key: key.into(),
        }
    }
}

/// Resolves channel credentials for the reconciler.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Fails with `NotFound` when the channel is unknown.
    async fn channel(&self, channel_id: ChannelId) -> Result<Channel>;
}
