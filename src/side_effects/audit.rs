use crate::core::{Result, UserId, unix_now};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    /// Balance bought by the user.
    Topup,
    /// Balance changed by the system: refunds, clawbacks, compensation.
    System,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditKind::Topup => write!(f, "topup"),
            AuditKind::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: UserId,
    pub kind: AuditKind,
    pub message: String,
    pub created_at: i64,
}

/// Append-only record of balance-affecting events.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, user_id: UserId, kind: AuditKind, message: String) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn entries_for(&self, user_id: UserId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, user_id: UserId, kind: AuditKind, message: String) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.push(AuditEntry {
            user_id,
            kind,
            message,
            created_at: unix_now(),
        });
        Ok(())
    }
}
