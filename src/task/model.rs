use crate::core::{ChannelId, TaskRowId, UserId};
use serde::{Deserialize, Serialize};

/// Progress value of a job that needs no further polling.
pub const PROGRESS_COMPLETE: &str = "100%";

/// Lifecycle status of an externally executed job.
///
/// Serialized with the platform spelling (`IN_PROGRESS`, `FAILURE`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NotStart,
    Submitted,
    Queued,
    InProgress,
    Failure,
    Success,
    #[default]
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStart => "NOT_START",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }

    /// Parses a status reported by a platform.
    ///
    /// An empty string means "not reported" and yields `None`; any other
    /// unrecognised spelling maps to `Unknown`.
    pub fn parse(raw: &str) -> Option<Self> {
        let status = match raw.trim() {
            "" => return None,
            "NOT_START" => TaskStatus::NotStart,
            "SUBMITTED" => TaskStatus::Submitted,
            "QUEUED" => TaskStatus::Queued,
            "IN_PROGRESS" => TaskStatus::InProgress,
            "FAILURE" => TaskStatus::Failure,
            "SUCCESS" => TaskStatus::Success,
            _ => TaskStatus::Unknown,
        };
        Some(status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Failure | TaskStatus::Success)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of an external generation platform (`suno`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPlatform(String);

impl TaskPlatform {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_ascii_lowercase())
    }

    pub fn suno() -> Self {
        Self::new("suno")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Internal record of one externally executed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskRowId,
    pub created_at: i64,
    pub updated_at: i64,
    /// Id assigned by the platform; empty until the platform acknowledged the job.
    pub external_id: String,
    pub platform: TaskPlatform,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    /// Quota reserved at submission time.
    pub quota: i64,
    pub action: String,
    pub status: TaskStatus,
    pub fail_reason: String,
    pub submit_time: i64,
    pub start_time: i64,
    pub finish_time: i64,
    pub progress: String,
    /// Opaque platform payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Task {
    pub fn is_finished(&self) -> bool {
        self.progress == PROGRESS_COMPLETE
    }

    pub fn is_orphaned(&self) -> bool {
        self.external_id.trim().is_empty()
    }
}

/// Fields provided by the submission path when a job is first recorded.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub external_id: String,
    pub platform: Option<TaskPlatform>,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub quota: i64,
    pub action: String,
    pub status: TaskStatus,
    pub progress: String,
    pub submit_time: i64,
    pub data: serde_json::Value,
}

impl NewTask {
    pub fn new(platform: TaskPlatform, user_id: UserId, channel_id: ChannelId) -> Self {
        Self {
            platform: Some(platform),
            user_id,
            channel_id,
            status: TaskStatus::Submitted,
            progress: "0%".to_string(),
            ..Self::default()
        }
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into();
        self
    }

    pub fn quota(mut self, quota: i64) -> Self {
        self.quota = quota;
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn progress(mut self, progress: impl Into<String>) -> Self {
        self.progress = progress.into();
        self
    }

    pub fn submit_time(mut self, submit_time: i64) -> Self {
        self.submit_time = submit_time;
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Column subset written by bulk updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<String>,
    pub fail_reason: Option<String>,
}

impl TaskPatch {
    /// Marks jobs as failed and complete, optionally recording why.
    pub fn failed(reason: Option<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failure),
            progress: Some(PROGRESS_COMPLETE.to_string()),
            fail_reason: reason,
        }
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(progress) = &self.progress {
            task.progress = progress.clone();
        }
        if let Some(reason) = &self.fail_reason {
            task.fail_reason = reason.clone();
        }
    }
}

/// Listing filters for the job views.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, alias = "task_id")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub end_timestamp: Option<i64>,
}

impl TaskQuery {
    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        fn wanted(filter: &Option<String>) -> Option<&str> {
            filter.as_deref().map(str::trim).filter(|value| !value.is_empty())
        }

        if let Some(user_id) = self.user_id {
            if task.user_id != user_id {
                return false;
            }
        }
        if let Some(platform) = wanted(&self.platform) {
            if TaskPlatform::new(platform) != task.platform {
                return false;
            }
        }
        if let Some(external_id) = wanted(&self.external_id) {
            if task.external_id != external_id {
                return false;
            }
        }
        if let Some(status) = wanted(&self.status) {
            if task.status.as_str() != status {
                return false;
            }
        }
        if let Some(action) = wanted(&self.action) {
            if task.action != action {
                return false;
            }
        }
        if let Some(start) = self.start_timestamp.filter(|ts| *ts > 0) {
            if task.submit_time < start {
                return false;
            }
        }
        if let Some(end) = self.end_timestamp.filter(|ts| *ts > 0) {
            if task.submit_time > end {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        Task {
            id: 1,
            created_at: 0,
            updated_at: 0,
            external_id: "ext-1".into(),
            platform: TaskPlatform::suno(),
            user_id: 7,
            channel_id: 3,
            quota: 10,
            action: "MUSIC".into(),
            status: TaskStatus::InProgress,
            fail_reason: String::new(),
            submit_time: 1_000,
            start_time: 0,
            finish_time: 0,
            progress: "20%".into(),
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn status_parse_distinguishes_empty_and_unknown() {
        assert_eq!(TaskStatus::parse(""), None);
        assert_eq!(TaskStatus::parse("FAILURE"), Some(TaskStatus::Failure));
        assert_eq!(TaskStatus::parse("STREAMING"), Some(TaskStatus::Unknown));
    }

    #[test]
    fn status_serializes_with_platform_spelling() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }

    #[test]
    fn failed_patch_completes_progress() {
        let mut task = sample();
        TaskPatch::failed(Some("channel gone".into())).apply(&mut task);
        assert_eq!(task.status, TaskStatus::Failure);
        assert_eq!(task.progress, PROGRESS_COMPLETE);
        assert_eq!(task.fail_reason, "channel gone");
    }

    #[test]
    fn query_filters_by_user_status_and_window() {
        let task = sample();
        assert!(TaskQuery::default().matches(&task));
        assert!(TaskQuery::default().for_user(7).matches(&task));
        assert!(!TaskQuery::default().for_user(8).matches(&task));

        let by_status = TaskQuery {
            status: Some("IN_PROGRESS".into()),
            platform: Some("SUNO".into()),
            ..TaskQuery::default()
        };
        assert!(by_status.matches(&task));

        let window = TaskQuery {
            start_timestamp: Some(1_001),
            ..TaskQuery::default()
        };
        assert!(!window.matches(&task));
    }
}
