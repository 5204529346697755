use crate::core::QuotaDisplay;
use crate::core::quota::DEFAULT_QUOTA_PER_UNIT;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Component Configuration
// ============================================================================

/// Settings of the background job reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Sleep between two sweeps.
    pub poll_interval: Duration,

    /// Maximum number of unfinished jobs loaded per sweep.
    pub batch_size: usize,

    /// Upper bound for one adaptor call.
    pub fetch_timeout: Duration,

    /// Channels polled concurrently within one sweep.
    pub channel_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            batch_size: 500,
            fetch_timeout: Duration::from_secs(15),
            channel_concurrency: 4,
        }
    }
}

impl ReconcilerConfig {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn channel_concurrency(mut self, concurrency: usize) -> Self {
        self.channel_concurrency = concurrency;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than zero".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be greater than zero".to_string());
        }
        if self.fetch_timeout.is_zero() {
            return Err("fetch_timeout must be greater than zero".to_string());
        }
        if self.channel_concurrency == 0 {
            return Err("channel_concurrency must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Settings of the quota ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// Maximum purchase/delete operations running at once.
    pub max_inflight: usize,

    /// How long a caller waits for an operation slot.
    pub admission_timeout: Duration,

    /// Fallback page size for order listings.
    pub items_per_page: usize,

    pub display: QuotaDisplay,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_inflight: 64,
            admission_timeout: Duration::from_secs(5),
            items_per_page: 10,
            display: QuotaDisplay::default(),
        }
    }
}

impl LedgerConfig {
    pub fn max_inflight(mut self, max: usize) -> Self {
        self.max_inflight = max;
        self
    }

    pub fn admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = timeout;
        self
    }

    pub fn items_per_page(mut self, items: usize) -> Self {
        self.items_per_page = items;
        self
    }

    pub fn display(mut self, display: QuotaDisplay) -> Self {
        self.display = display;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_inflight == 0 {
            return Err("max_inflight must be greater than zero".to_string());
        }
        if self.items_per_page == 0 {
            return Err("items_per_page must be greater than zero".to_string());
        }
        if self.display.display_in_currency && self.display.quota_per_unit <= 0.0 {
            return Err("quota_per_unit must be positive when displaying currency".to_string());
        }
        Ok(())
    }
}

/// Settings of the post-commit side effect queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectConfig {
    pub queue_capacity: usize,

    /// Effects applied concurrently.
    pub workers: usize,
}

impl Default for SideEffectConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 8,
        }
    }
}

impl SideEffectConfig {
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than zero".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than zero".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Application Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Runs the reconciler loop when set.
    pub update_task: bool,
    pub reconciler: ReconcilerConfig,
    pub ledger: LedgerConfig,
    pub side_effects: SideEffectConfig,
    pub lock_timeout: Duration,
    pub balance_cache_capacity: usize,
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(&lookup, "APP_PORT", 3000u16)?;
        let update_task = parse_flag(&lookup, "UPDATE_TASK", true)?;

        let reconciler = ReconcilerConfig::default()
            .poll_interval(Duration::from_secs(parse_or(
                &lookup,
                "TASK_POLL_INTERVAL_SECS",
                15u64,
            )?))
            .batch_size(parse_or(&lookup, "TASK_BATCH_SIZE", 500usize)?)
            .fetch_timeout(Duration::from_secs(parse_or(
                &lookup,
                "TASK_FETCH_TIMEOUT_SECS",
                15u64,
            )?))
            .channel_concurrency(parse_or(&lookup, "TASK_CHANNEL_CONCURRENCY", 4usize)?);

        let lock_timeout =
            Duration::from_millis(parse_or(&lookup, "LEDGER_LOCK_TIMEOUT_MS", 5_000u64)?);

        let display = QuotaDisplay {
            quota_per_unit: parse_or(&lookup, "QUOTA_PER_UNIT", DEFAULT_QUOTA_PER_UNIT)?,
            display_in_currency: parse_flag(&lookup, "DISPLAY_IN_CURRENCY", true)?,
        };
        let ledger = LedgerConfig::default()
            .max_inflight(parse_or(&lookup, "LEDGER_MAX_INFLIGHT", 64usize)?)
            .admission_timeout(lock_timeout)
            .items_per_page(parse_or(&lookup, "ITEMS_PER_PAGE", 10usize)?)
            .display(display);

        let side_effects = SideEffectConfig::default()
            .queue_capacity(parse_or(&lookup, "SIDE_EFFECT_QUEUE_CAPACITY", 1024usize)?)
            .workers(parse_or(&lookup, "SIDE_EFFECT_WORKERS", 8usize)?);

        let balance_cache_capacity = parse_or(&lookup, "BALANCE_CACHE_CAPACITY", 10_000usize)?;
        let data_dir = lookup("DATA_DIR")
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let config = Self {
            host,
            port,
            update_task,
            reconciler,
            ledger,
            side_effects,
            lock_timeout,
            balance_cache_capacity,
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.reconciler
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid reconciler configuration")?;
        self.ledger
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid ledger configuration")?;
        self.side_effects
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid side effect configuration")?;
        if self.lock_timeout.is_zero() {
            anyhow::bail!("LEDGER_LOCK_TIMEOUT_MS must be greater than zero");
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, name: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow::anyhow!("{} must be a boolean, got {:?}", name, raw)),
        },
        None => Ok(default),
    }
}
