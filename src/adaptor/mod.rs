//! Platform adaptors: fetch the remote state of submitted jobs.

pub mod registry;
pub mod suno;

pub use registry::AdaptorRegistry;
pub use suno::SunoAdaptor;

use crate::core::{LedgerError, Result};
use crate::task::TaskPlatform;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

/// Envelope code of a logically successful fetch.
pub const SUCCESS_CODE: &str = "success";

/// Body of a fetch call: every external id polled on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRequest {
    pub ids: Vec<String>,
}

impl FetchRequest {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }
}

/// Raw transport response, before envelope decoding.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Fetch response body. Platforms signal success either with
/// `"code": "success"` or with `"success": true`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<RemoteTask>,
}

impl TaskEnvelope {
    /// A 200 response can still carry a logical failure.
    pub fn is_success(&self) -> bool {
        match self.success {
            Some(flag) => flag,
            None => self.code == SUCCESS_CODE,
        }
    }
}

/// One job as reported by the platform. Empty or zero fields carry no
/// information.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteTask {
    #[serde(
        rename = "task_id",
        alias = "external_id",
        alias = "externalId",
        default,
        deserialize_with = "null_as_default"
    )]
    pub external_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(alias = "failReason", default, deserialize_with = "null_as_default")]
    pub fail_reason: String,
    #[serde(alias = "submitTime", default, deserialize_with = "null_as_default")]
    pub submit_time: i64,
    #[serde(alias = "startTime", default, deserialize_with = "null_as_default")]
    pub start_time: i64,
    #[serde(alias = "finishTime", default, deserialize_with = "null_as_default")]
    pub finish_time: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Remote status capability of one external platform.
#[async_trait]
pub trait TaskAdaptor: Send + Sync {
    fn platform(&self) -> TaskPlatform;

    /// Sends one fetch call. Only transport failures are errors; any HTTP
    /// status comes back in the response.
    async fn fetch_tasks(
        &self,
        base_url: &str,
        key: &str,
        request: &FetchRequest,
    ) -> Result<FetchResponse>;

    fn parse_tasks(&self, body: &[u8]) -> Result<TaskEnvelope> {
        serde_json::from_slice(body).map_err(|e| {
            LedgerError::Decode(format!(
                "invalid {} fetch response: {}",
                self.platform(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_tolerates_nulls_and_missing_fields() {
        let envelope: TaskEnvelope = serde_json::from_value(json!({
            "code": "success",
            "data": [
                { "task_id": "a", "status": null, "submit_time": 10, "data": { "k": 1 } },
                { "task_id": "b" }
            ]
        }))
        .unwrap();

        assert!(envelope.is_success());
        assert_eq!(envelope.data.len(), 2);
        assert_eq!(envelope.data[0].status, "");
        assert_eq!(envelope.data[0].submit_time, 10);
        assert!(envelope.data[1].data.is_null());
    }

    #[test]
    fn envelope_with_error_code_is_not_success() {
        let envelope: TaskEnvelope = serde_json::from_value(json!({
            "code": "error",
            "message": "bad key",
            "data": null
        }))
        .unwrap();
        assert!(!envelope.is_success());
        assert!(envelope.data.is_empty());
    }

    #[test]
    fn envelope_accepts_boolean_success_flag() {
        let envelope: TaskEnvelope = serde_json::from_slice(
            br#"{"success":true,"data":[{"externalId":"x","status":"FAILURE","failReason":"quota","finishTime":7}]}"#,
        )
        .unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.data[0].external_id, "x");
        assert_eq!(envelope.data[0].fail_reason, "quota");
        assert_eq!(envelope.data[0].finish_time, 7);

        let refused: TaskEnvelope =
            serde_json::from_value(json!({ "success": false, "data": [] })).unwrap();
        assert!(!refused.is_success());
    }
}
