//! Client for the external render service.
//!
//! Two endpoints: `createTask` accepts a model id plus an input object
//! and returns an opaque task id; `recordInfo` reports task status.
//! Success responses carry the asset URL in one of several shapes, so
//! extraction walks an ordered fallback chain.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::types::{GenerationParams, ModelTier, Orientation, PromptKind, Quality};

#[derive(Debug, Clone, Serialize)]
pub struct CreateTaskRequest {
    pub model: String,
    pub input: RenderInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderInput {
    pub prompt: String,
    pub n_frames: String,
    pub remove_watermark: bool,
    pub aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_urls: Option<Vec<String>>,
    /// "standard" | "high"; only sent for the Pro tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl CreateTaskRequest {
    /// Map normalized generation parameters onto the provider request.
    pub fn from_params(params: &GenerationParams, remove_watermark: bool) -> Self {
        let model = match (params.kind, params.tier) {
            (PromptKind::Text, ModelTier::Standard) => "sora-2-text-to-video",
            (PromptKind::Image, ModelTier::Standard) => "sora-2-image-to-video",
            (PromptKind::Text, ModelTier::Pro) => "sora-2-pro-text-to-video",
            (PromptKind::Image, ModelTier::Pro) => "sora-2-pro-image-to-video",
        };

        let size = match params.tier {
            ModelTier::Pro => Some(
                match params.quality {
                    Some(Quality::High) => "high",
                    _ => "standard",
                }
                .to_string(),
            ),
            ModelTier::Standard => None,
        };

        Self {
            model: model.to_string(),
            input: RenderInput {
                prompt: params.prompt.clone(),
                n_frames: params.duration.seconds().to_string(),
                remove_watermark,
                aspect_ratio: match params.orientation {
                    Orientation::Portrait => "portrait",
                    Orientation::Landscape => "landscape",
                }
                .to_string(),
                image_urls: params.image_url.clone().map(|u| vec![u]),
                size,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    data: Option<CreateTaskData>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskData {
    #[serde(rename = "taskId", alias = "task_id")]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordInfoResponse {
    code: Option<i64>,
    data: Option<TaskRecord>,
}

/// Raw status record for one task, as reported by `recordInfo`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(rename = "successFlag", default)]
    pub success_flag: Option<i64>,
    #[serde(default)]
    pub response: Option<TaskResponse>,
    /// Secondary structured payload; may arrive as a JSON string
    #[serde(rename = "resultJson", default)]
    pub result_json: Option<Value>,
    #[serde(rename = "failMsg", default)]
    pub fail_msg: Option<String>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskResponse {
    #[serde(rename = "videoUrl", default)]
    pub video_url: Option<String>,
    #[serde(rename = "resultUrls", default)]
    pub result_urls: Option<Vec<String>>,
}

/// Classified poll result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    InProgress,
    /// Provider claims completion; the asset URL may still be missing
    Succeeded { asset_url: Option<String> },
    Failed { reason: Option<String> },
}

/// Classify a raw record into the poller's three-way status.
pub fn classify(record: &TaskRecord) -> TaskStatus {
    let state = record
        .state
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if state == "success" || record.success_flag == Some(1) {
        return TaskStatus::Succeeded {
            asset_url: extract_asset_url(record),
        };
    }

    if matches!(state.as_str(), "" | "wait" | "queueing" | "generating")
        || record.success_flag == Some(0)
    {
        return TaskStatus::InProgress;
    }

    TaskStatus::Failed {
        reason: record
            .fail_msg
            .clone()
            .or_else(|| record.error_message.clone()),
    }
}

/// Ordered fallback search for the delivered asset URL:
/// `response.videoUrl`, then `response.resultUrls[0]`, then the
/// `resultJson` blob's `result` / `resultUrls[0]`.
pub fn extract_asset_url(record: &TaskRecord) -> Option<String> {
    if let Some(resp) = &record.response {
        if let Some(url) = &resp.video_url {
            if !url.is_empty() {
                return Some(url.clone());
            }
        }
        if let Some(urls) = &resp.result_urls {
            if let Some(first) = urls.first() {
                if !first.is_empty() {
                    return Some(first.clone());
                }
            }
        }
    }

    let blob = record.result_json.as_ref()?;
    let blob: Value = match blob {
        Value::String(s) => serde_json::from_str(s).ok()?,
        other => other.clone(),
    };

    if let Some(url) = blob.get("result").and_then(Value::as_str) {
        if !url.is_empty() {
            return Some(url.to_string());
        }
    }
    blob.get("resultUrls")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}

/// External render service. Allows injecting scripted implementations
/// for tests.
#[async_trait]
pub trait RenderClient: Send + Sync {
    /// Submit one task; returns the provider-assigned task id.
    /// Any error here is a hard submission failure for the caller.
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<String>;

    /// Fetch the current status record for a task. Errors are
    /// transient from the poller's point of view.
    async fn record_info(&self, task_id: &str) -> Result<TaskRecord>;
}

/// Production client for the KIE jobs API.
pub struct KieClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl KieClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("building render HTTP client")?;
        Ok(Self {
            http,
            base_url: config.render_api_base.trim_end_matches('/').to_string(),
            api_key: config.render_api_key.clone(),
        })
    }
}

#[async_trait]
impl RenderClient for KieClient {
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<String> {
        let url = format!("{}/api/v1/jobs/createTask", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .context("createTask request failed")?;

        let status = resp.status();
        let body: CreateTaskResponse = resp
            .json()
            .await
            .context("createTask returned malformed body")?;

        if !status.is_success() || body.code != Some(200) {
            return Err(anyhow!(
                "createTask rejected: http={}, code={:?}, msg={:?}",
                status,
                body.code,
                body.msg
            ));
        }

        body.data
            .and_then(|d| d.task_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("createTask response missing taskId"))
    }

    async fn record_info(&self, task_id: &str) -> Result<TaskRecord> {
        let url = format!("{}/api/v1/jobs/recordInfo", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("taskId", task_id)])
            .send()
            .await
            .context("recordInfo request failed")?;

        let status = resp.status();
        let body: RecordInfoResponse = resp
            .json()
            .await
            .context("recordInfo returned malformed body")?;

        if !status.is_success() || body.code != Some(200) {
            return Err(anyhow!(
                "recordInfo rejected: http={}, code={:?}",
                status,
                body.code
            ));
        }

        debug!(task_id, "recordInfo ok");
        Ok(body.data.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Duration as VidDuration;

    fn params() -> GenerationParams {
        GenerationParams {
            prompt: "a cat surfing".into(),
            kind: PromptKind::Text,
            tier: ModelTier::Standard,
            quality: None,
            duration: VidDuration::Sec10,
            orientation: Orientation::Portrait,
            image_url: None,
        }
    }

    #[test]
    fn request_mapping_standard_text() {
        let req = CreateTaskRequest::from_params(&params(), true);
        assert_eq!(req.model, "sora-2-text-to-video");
        assert_eq!(req.input.n_frames, "10");
        assert_eq!(req.input.aspect_ratio, "portrait");
        assert!(req.input.remove_watermark);
        assert!(req.input.size.is_none());
        assert!(req.input.image_urls.is_none());
    }

    #[test]
    fn request_mapping_pro_image_hd() {
        let mut p = params();
        p.kind = PromptKind::Image;
        p.tier = ModelTier::Pro;
        p.quality = Some(Quality::High);
        p.duration = VidDuration::Sec15;
        p.orientation = Orientation::Landscape;
        p.image_url = Some("https://files/img.jpg".into());

        let req = CreateTaskRequest::from_params(&p, true);
        assert_eq!(req.model, "sora-2-pro-image-to-video");
        assert_eq!(req.input.n_frames, "15");
        assert_eq!(req.input.aspect_ratio, "landscape");
        assert_eq!(req.input.size.as_deref(), Some("high"));
        assert_eq!(
            req.input.image_urls.as_deref(),
            Some(&["https://files/img.jpg".to_string()][..])
        );
    }

    #[test]
    fn pro_without_quality_sends_standard_size() {
        let mut p = params();
        p.tier = ModelTier::Pro;
        let req = CreateTaskRequest::from_params(&p, false);
        assert_eq!(req.input.size.as_deref(), Some("standard"));
        assert!(!req.input.remove_watermark);
    }

    fn record(json: serde_json::Value) -> TaskRecord {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn classify_in_progress_states() {
        for state in ["", "wait", "queueing", "generating"] {
            let r = record(serde_json::json!({ "state": state }));
            assert_eq!(classify(&r), TaskStatus::InProgress, "state={state:?}");
        }
        let r = record(serde_json::json!({ "successFlag": 0 }));
        assert_eq!(classify(&r), TaskStatus::InProgress);
        // Empty record: nothing terminal reported yet.
        assert_eq!(classify(&TaskRecord::default()), TaskStatus::InProgress);
    }

    #[test]
    fn classify_success_direct_url() {
        let r = record(serde_json::json!({
            "state": "success",
            "response": { "videoUrl": "https://x/video.mp4" }
        }));
        assert_eq!(
            classify(&r),
            TaskStatus::Succeeded {
                asset_url: Some("https://x/video.mp4".into())
            }
        );
    }

    #[test]
    fn classify_success_by_flag_with_result_urls() {
        let r = record(serde_json::json!({
            "successFlag": 1,
            "response": { "resultUrls": ["https://x/a.mp4", "https://x/b.mp4"] }
        }));
        assert_eq!(
            classify(&r),
            TaskStatus::Succeeded {
                asset_url: Some("https://x/a.mp4".into())
            }
        );
    }

    #[test]
    fn extract_falls_back_to_result_json_object() {
        let r = record(serde_json::json!({
            "state": "success",
            "resultJson": { "result": "https://x/c.mp4" }
        }));
        assert_eq!(extract_asset_url(&r), Some("https://x/c.mp4".into()));
    }

    #[test]
    fn extract_falls_back_to_result_json_string() {
        let r = record(serde_json::json!({
            "state": "success",
            "resultJson": "{\"resultUrls\": [\"https://x/d.mp4\"]}"
        }));
        assert_eq!(extract_asset_url(&r), Some("https://x/d.mp4".into()));
    }

    #[test]
    fn success_without_any_url_stays_success() {
        let r = record(serde_json::json!({ "state": "success" }));
        assert_eq!(classify(&r), TaskStatus::Succeeded { asset_url: None });
    }

    #[test]
    fn classify_failure_prefers_fail_msg() {
        let r = record(serde_json::json!({
            "state": "fail",
            "failMsg": "content policy",
            "errorMessage": "secondary"
        }));
        assert_eq!(
            classify(&r),
            TaskStatus::Failed {
                reason: Some("content policy".into())
            }
        );

        let r = record(serde_json::json!({
            "state": "fail",
            "errorMessage": "gpu quota"
        }));
        assert_eq!(
            classify(&r),
            TaskStatus::Failed {
                reason: Some("gpu quota".into())
            }
        );
    }
}
