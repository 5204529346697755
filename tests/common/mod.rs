#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use taskledger::adaptor::{FetchRequest, FetchResponse, TaskAdaptor};
use taskledger::channel::Channel;
use taskledger::core::{LedgerError, Result, UserBalance};
use taskledger::ledger::{LedgerStore, PlanRequest, SubscriptionPlan};
use taskledger::task::TaskPlatform;
use taskledger::{AdaptorRegistry, MemoryDatabase, ReconcilerConfig, ServiceConfig, Services};

/// What a scripted channel answers.
#[derive(Clone)]
pub enum Scripted {
    Envelope(Value),
    Status(u16),
    TransportError,
}

/// Adaptor answering per base URL from a script, counting calls.
pub struct ScriptedAdaptor {
    platform: TaskPlatform,
    script: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<(String, String, Vec<String>)>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedAdaptor {
    pub fn new(platform: TaskPlatform) -> Self {
        Self {
            platform,
            script: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn answer(&self, base_url: &str, reply: Scripted) {
        self.script
            .lock()
            .unwrap()
            .insert(base_url.to_string(), reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (base_url, key, ids) of every call, in call order.
    pub fn requests(&self) -> Vec<(String, String, Vec<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskAdaptor for ScriptedAdaptor {
    fn platform(&self) -> TaskPlatform {
        self.platform.clone()
    }

    async fn fetch_tasks(
        &self,
        base_url: &str,
        key: &str,
        request: &FetchRequest,
    ) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((
            base_url.to_string(),
            key.to_string(),
            request.ids.clone(),
        ));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self.script.lock().unwrap().get(base_url).cloned();
        match reply {
            Some(Scripted::Envelope(body)) => Ok(FetchResponse {
                status: 200,
                body: serde_json::to_vec(&body).unwrap(),
            }),
            Some(Scripted::Status(status)) => Ok(FetchResponse {
                status,
                body: b"upstream unavailable".to_vec(),
            }),
            Some(Scripted::TransportError) | None => Err(LedgerError::Transport(format!(
                "connection refused: {}",
                base_url
            ))),
        }
    }
}

pub fn suno_channel(id: i64, base_url: &str) -> Channel {
    Channel::new(id, TaskPlatform::suno(), base_url, format!("sk-{}", id))
}

pub fn fast_config() -> ServiceConfig {
    ServiceConfig {
        reconciler: ReconcilerConfig::default()
            .poll_interval(Duration::from_millis(20))
            .fetch_timeout(Duration::from_millis(200)),
        ..ServiceConfig::default()
    }
}

pub fn start(db: &MemoryDatabase, adaptors: AdaptorRegistry) -> Services {
    Services::start(db.clone(), adaptors, fast_config())
}

pub async fn user(db: &MemoryDatabase, user_id: i64, quota: i64, subscription_quota: i64) {
    db.insert_user(UserBalance::new(user_id, quota, subscription_quota))
        .await;
}

pub async fn plan(db: &MemoryDatabase, request: PlanRequest) -> SubscriptionPlan {
    db.create_plan(&request.validated().unwrap()).await.unwrap()
}

pub async fn balance(db: &MemoryDatabase, user_id: i64) -> UserBalance {
    db.user_balance(user_id).await.unwrap().unwrap()
}
