//! Run folders, configs and remote output lines for pipeline tests

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tagger_batch::config::{ApiSettings, MonitorSettings, PipelineConfig};
use tagger_batch::services::BatchApi;
use tagger_batch::Pipeline;

use super::ScriptedBatchApi;

/// Three songs, all valid
pub const THREE_SONGS: &str = "id,title,artist,year\n\
1,Midnight City,M83,2011\n\
2,Dreams,Fleetwood Mac,1977\n\
3,Get Lucky,Daft Punk,2013\n";

pub fn write_csv(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Config with millisecond polling so monitor tests finish immediately
pub fn test_config(run_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        run_dir: run_dir.to_path_buf(),
        api: ApiSettings {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key: Some("test-key".to_string()),
            model: "gpt-4o-mini".to_string(),
            endpoint: "/v1/chat/completions".to_string(),
            completion_window: "24h".to_string(),
        },
        monitor: MonitorSettings {
            poll_interval: Duration::from_millis(1),
            max_retries: 3,
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            max_polls: None,
        },
        taxonomy_file: None,
    }
}

pub fn open_pipeline(config: PipelineConfig, api: &Arc<ScriptedBatchApi>) -> Pipeline {
    let api: Arc<dyn BatchApi> = api.clone();
    Pipeline::open(config, Some(api)).unwrap()
}

/// Successful output line whose message content is `content`
pub fn output_line(custom_id: &str, content: Value) -> String {
    json!({
        "id": format!("batch_req_{}", custom_id),
        "custom_id": custom_id,
        "response": {
            "status_code": 200,
            "request_id": "req_1",
            "body": {
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": content.to_string() },
                    "finish_reason": "stop"
                }]
            }
        },
        "error": null
    })
    .to_string()
}

/// Output line carrying a valid classification
pub fn classified_line(custom_id: &str, subgenre: &str) -> String {
    output_line(
        custom_id,
        json!({
            "status": "SUCCESS",
            "subgenre": subgenre,
            "secondary_subgenres": [],
            "energy": "Medium",
            "accessibility": "Timeless",
            "reasoning": "Test classification."
        }),
    )
}

/// Error-file line for a request the service rejected
pub fn rejected_request_line(custom_id: &str) -> String {
    json!({
        "id": format!("batch_req_{}", custom_id),
        "custom_id": custom_id,
        "response": {
            "status_code": 400,
            "body": { "error": { "message": "Invalid 'messages' parameter", "type": "invalid_request_error" } }
        },
        "error": null
    })
    .to_string()
}
