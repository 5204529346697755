//! Change detection and merge of remote job snapshots.
//!
//! Remote fields that are empty, zero or null carry no information: they
//! never count as a difference and never overwrite local state. Applying the
//! same snapshot twice therefore writes once.

use crate::adaptor::RemoteTask;
use crate::task::{PROGRESS_COMPLETE, Task, TaskStatus};

/// Whether `remote` carries anything the local record does not have yet.
pub fn needs_update(local: &Task, remote: &RemoteTask) -> bool {
    if differs(local.submit_time, remote.submit_time)
        || differs(local.start_time, remote.start_time)
        || differs(local.finish_time, remote.finish_time)
    {
        return true;
    }
    if let Some(status) = TaskStatus::parse(&remote.status) {
        if status != local.status {
            return true;
        }
    }
    if !remote.fail_reason.is_empty() && remote.fail_reason != local.fail_reason {
        return true;
    }
    if local.status.is_terminal() && local.progress != PROGRESS_COMPLETE {
        return true;
    }
    !remote.data.is_null() && payload_fingerprint(&local.data) != payload_fingerprint(&remote.data)
}

fn differs(local: i64, remote: i64) -> bool {
    remote != 0 && remote != local
}

/// Result of merging one remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub previous_status: TaskStatus,
    pub status: TaskStatus,
}

impl MergeOutcome {
    /// The job moved into failure with this merge.
    pub fn failed_now(&self) -> bool {
        self.previous_status != TaskStatus::Failure && self.status == TaskStatus::Failure
    }
}

/// Copies the informative remote fields into `local`.
pub fn merge(local: &mut Task, remote: &RemoteTask) -> MergeOutcome {
    let previous_status = local.status;

    if let Some(status) = TaskStatus::parse(&remote.status) {
        local.status = status;
    }
    if !remote.fail_reason.is_empty() {
        local.fail_reason = remote.fail_reason.clone();
    }
    if remote.submit_time != 0 {
        local.submit_time = remote.submit_time;
    }
    if remote.start_time != 0 {
        local.start_time = remote.start_time;
    }
    if remote.finish_time != 0 {
        local.finish_time = remote.finish_time;
    }
    if !remote.data.is_null() {
        local.data = remote.data.clone();
    }

    if local.status.is_terminal() || !remote.fail_reason.is_empty() {
        local.progress = PROGRESS_COMPLETE.to_string();
    }

    MergeOutcome {
        previous_status,
        status: local.status,
    }
}

/// Order-independent fingerprint of a payload: its JSON bytes, sorted.
pub fn payload_fingerprint(value: &serde_json::Value) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(value).unwrap_or_default();
    bytes.sort_unstable();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskPlatform;
    use serde_json::json;

    fn local() -> Task {
        Task {
            id: 1,
            created_at: 0,
            updated_at: 0,
            external_id: "ext-1".into(),
            platform: TaskPlatform::suno(),
            user_id: 7,
            channel_id: 3,
            quota: 100,
            action: "MUSIC".into(),
            status: TaskStatus::Submitted,
            fail_reason: String::new(),
            submit_time: 10,
            start_time: 0,
            finish_time: 0,
            progress: "0%".into(),
            data: serde_json::Value::Null,
        }
    }

    fn remote() -> RemoteTask {
        RemoteTask {
            external_id: "ext-1".into(),
            status: "IN_PROGRESS".into(),
            start_time: 20,
            data: json!({ "clips": ["a", "b"] }),
            ..RemoteTask::default()
        }
    }

    #[test]
    fn same_snapshot_applies_once() {
        let mut task = local();
        let snapshot = remote();

        assert!(needs_update(&task, &snapshot));
        let outcome = merge(&mut task, &snapshot);
        assert_eq!(outcome.status, TaskStatus::InProgress);
        assert!(!outcome.failed_now());

        assert!(!needs_update(&task, &snapshot));
    }

    #[test]
    fn empty_remote_fields_are_not_differences() {
        let mut task = local();
        task.fail_reason = "previous".into();
        task.data = json!({ "kept": true });

        let silent = RemoteTask {
            external_id: "ext-1".into(),
            ..RemoteTask::default()
        };
        assert!(!needs_update(&task, &silent));

        merge(&mut task, &silent);
        assert_eq!(task.submit_time, 10);
        assert_eq!(task.fail_reason, "previous");
        assert_eq!(task.data, json!({ "kept": true }));
    }

    #[test]
    fn terminal_without_complete_progress_is_repaired() {
        let mut task = local();
        task.status = TaskStatus::Success;
        task.progress = "90%".into();

        let snapshot = RemoteTask {
            status: "SUCCESS".into(),
            ..RemoteTask::default()
        };
        assert!(needs_update(&task, &snapshot));
        merge(&mut task, &snapshot);
        assert_eq!(task.progress, PROGRESS_COMPLETE);
    }

    #[test]
    fn failure_transition_completes_progress() {
        let mut task = local();
        let snapshot = RemoteTask {
            status: "FAILURE".into(),
            fail_reason: "content policy".into(),
            ..RemoteTask::default()
        };

        let outcome = merge(&mut task, &snapshot);
        assert!(outcome.failed_now());
        assert_eq!(task.progress, PROGRESS_COMPLETE);
        assert_eq!(task.fail_reason, "content policy");

        let again = merge(&mut task, &snapshot);
        assert!(!again.failed_now());
    }

    #[test]
    fn fail_reason_alone_finishes_the_job() {
        let mut task = local();
        let snapshot = RemoteTask {
            status: "IN_PROGRESS".into(),
            fail_reason: "upstream timeout".into(),
            ..RemoteTask::default()
        };
        merge(&mut task, &snapshot);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.progress, PROGRESS_COMPLETE);
    }

    #[test]
    fn payload_fingerprint_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":[1,2]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b":[2,1],"a":1}"#).unwrap();
        assert_eq!(payload_fingerprint(&a), payload_fingerprint(&b));
        assert_ne!(payload_fingerprint(&a), payload_fingerprint(&json!({"a": 2})));
    }
}
