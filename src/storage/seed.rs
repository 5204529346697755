//! Startup fixtures loaded from a JSON file.

use super::memory::MemoryDatabase;
use crate::channel::Channel;
use crate::core::{ChannelId, LedgerError, Result, UserBalance, UserId};
use crate::ledger::{LedgerStore, PlanRequest};
use crate::task::{NewTask, TaskPlatform, TaskStatus, TaskStore};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTask {
    #[serde(default)]
    pub external_id: String,
    pub platform: TaskPlatform,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub quota: i64,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub submit_time: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SeedTask {
    fn into_new_task(self) -> NewTask {
        let mut task = NewTask::new(self.platform, self.user_id, self.channel_id)
            .external_id(self.external_id)
            .quota(self.quota)
            .action(self.action)
            .submit_time(self.submit_time)
            .data(self.data);
        if let Some(status) = self.status {
            task = task.status(status);
        }
        if let Some(progress) = self.progress {
            task = task.progress(progress);
        }
        task
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<UserBalance>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub plans: Vec<PlanRequest>,
    #[serde(default)]
    pub tasks: Vec<SeedTask>,
}

impl Seed {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        serde_json::from_slice(&raw).map_err(|e| {
            LedgerError::Validation(format!(
                "invalid seed file {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Inserts every fixture; plans go through the usual validation.
    pub async fn apply(self, db: &MemoryDatabase) -> Result<()> {
        for user in self.users {
            db.insert_user(user).await;
        }
        for channel in self.channels {
            db.insert_channel(channel).await;
        }
        for plan in self.plans {
            db.create_plan(&plan.validated()?).await?;
        }
        for task in self.tasks {
            db.insert(task.into_new_task()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn seed_populates_every_table() {
        let seed: Seed = serde_json::from_value(json!({
            "users": [{ "user_id": 1, "quota": 1000, "subscription_quota": 0 }],
            "channels": [{
                "id": 2, "platform": "suno", "name": "main",
                "base_url": "http://127.0.0.1:9", "key": "sk"
            }],
            "plans": [{ "name": "  Starter ", "price": 200, "total_quota": 500 }],
            "tasks": [{ "external_id": "ext", "platform": "suno", "user_id": 1, "channel_id": 2 }]
        }))
        .unwrap();

        let db = MemoryDatabase::new();
        seed.apply(&db).await.unwrap();

        let tables = db.tables().await;
        assert_eq!(tables.users.len(), 1);
        assert_eq!(tables.channels.len(), 1);
        assert_eq!(tables.plans[&1].name, "Starter");
        assert_eq!(tables.tasks[&1].status, TaskStatus::Submitted);
    }

    #[tokio::test]
    async fn invalid_plan_in_seed_is_rejected() {
        let seed: Seed = serde_json::from_value(json!({
            "plans": [{ "name": "", "price": 1, "total_quota": 1 }]
        }))
        .unwrap();
        let result = seed.apply(&MemoryDatabase::new()).await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}
