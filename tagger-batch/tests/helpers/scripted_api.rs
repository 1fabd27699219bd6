//! In-memory `BatchApi` driven by a script of poll responses

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tagger_batch::models::{BatchJob, JobStatus, RequestCounts};
use tagger_batch::services::{ApiClientError, BatchApi};

pub const OUTPUT_FILE_ID: &str = "file-output";
pub const ERROR_FILE_ID: &str = "file-errors";

/// One scripted answer to `retrieve_batch`
enum Poll {
    Job {
        status: JobStatus,
        counts: RequestCounts,
        output_file_id: Option<String>,
        error_file_id: Option<String>,
    },
    Failure(ApiClientError),
}

#[derive(Default)]
struct State {
    polls: VecDeque<Poll>,
    /// Repeated once the script runs out
    last_job: Option<BatchJob>,
    files: HashMap<String, Vec<u8>>,
    /// Returned by the next upload/create calls before any succeeds
    upload_failures: VecDeque<ApiClientError>,
    create_failures: VecDeque<ApiClientError>,
    uploaded: Vec<Vec<u8>>,
    creates: usize,
    retrieves: usize,
    downloads: usize,
}

/// Scripted remote batch service.
///
/// Each `retrieve_batch` consumes the next scripted poll; after the script
/// is exhausted the last job observed is returned again.
#[derive(Default)]
pub struct ScriptedBatchApi {
    state: Mutex<State>,
}

impl ScriptedBatchApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: &str, counts: RequestCounts) -> &Self {
        self.state.lock().unwrap().polls.push_back(Poll::Job {
            status: JobStatus::parse(status),
            counts,
            output_file_id: None,
            error_file_id: None,
        });
        self
    }

    /// Completed poll exposing the output file (and the error file if set)
    pub fn push_completed(&self, counts: RequestCounts) -> &Self {
        let mut state = self.state.lock().unwrap();
        let error_file_id = state
            .files
            .contains_key(ERROR_FILE_ID)
            .then(|| ERROR_FILE_ID.to_string());
        state.polls.push_back(Poll::Job {
            status: JobStatus::Completed,
            counts,
            output_file_id: Some(OUTPUT_FILE_ID.to_string()),
            error_file_id,
        });
        self
    }

    pub fn push_failure(&self, error: ApiClientError) -> &Self {
        self.state.lock().unwrap().polls.push_back(Poll::Failure(error));
        self
    }

    pub fn fail_next_upload(&self, error: ApiClientError) -> &Self {
        self.state.lock().unwrap().upload_failures.push_back(error);
        self
    }

    pub fn fail_next_create(&self, error: ApiClientError) -> &Self {
        self.state.lock().unwrap().create_failures.push_back(error);
        self
    }

    pub fn set_output(&self, lines: &[String]) -> &Self {
        self.set_file(OUTPUT_FILE_ID, lines)
    }

    pub fn set_errors(&self, lines: &[String]) -> &Self {
        self.set_file(ERROR_FILE_ID, lines)
    }

    fn set_file(&self, file_id: &str, lines: &[String]) -> &Self {
        let mut content = lines.join("\n");
        content.push('\n');
        self.state
            .lock()
            .unwrap()
            .files
            .insert(file_id.to_string(), content.into_bytes());
        self
    }

    pub fn uploads(&self) -> usize {
        self.state.lock().unwrap().uploaded.len()
    }

    /// Request file bytes of the most recent upload
    pub fn last_upload(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().uploaded.last().cloned()
    }

    /// Successfully created jobs
    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn retrieves(&self) -> usize {
        self.state.lock().unwrap().retrieves
    }

    pub fn downloads(&self) -> usize {
        self.state.lock().unwrap().downloads
    }
}

fn job(id: &str, status: JobStatus, counts: RequestCounts) -> BatchJob {
    BatchJob {
        id: id.to_string(),
        status,
        input_file_id: "file-input-1".to_string(),
        output_file_id: None,
        error_file_id: None,
        request_counts: counts,
    }
}

#[async_trait]
impl BatchApi for ScriptedBatchApi {
    async fn upload_batch_file(
        &self,
        _file_name: &str,
        contents: Vec<u8>,
    ) -> Result<String, ApiClientError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.upload_failures.pop_front() {
            return Err(error);
        }
        state.uploaded.push(contents);
        Ok(format!("file-input-{}", state.uploaded.len()))
    }

    async fn create_batch(
        &self,
        input_file_id: &str,
        _endpoint: &str,
        _completion_window: &str,
    ) -> Result<BatchJob, ApiClientError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }
        state.creates += 1;

        let mut created = job(
            &format!("batch_{}", state.creates),
            JobStatus::Validating,
            RequestCounts::default(),
        );
        created.input_file_id = input_file_id.to_string();
        state.last_job = Some(created.clone());
        Ok(created)
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, ApiClientError> {
        let mut state = self.state.lock().unwrap();
        state.retrieves += 1;

        match state.polls.pop_front() {
            Some(Poll::Job {
                status,
                counts,
                output_file_id,
                error_file_id,
            }) => {
                let mut polled = job(batch_id, status, counts);
                polled.output_file_id = output_file_id;
                polled.error_file_id = error_file_id;
                state.last_job = Some(polled.clone());
                Ok(polled)
            }
            Some(Poll::Failure(error)) => Err(error),
            None => state.last_job.clone().ok_or_else(|| ApiClientError::Http {
                status: 404,
                body: format!("No batch found with id '{}'", batch_id),
            }),
        }
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiClientError> {
        let mut state = self.state.lock().unwrap();
        state.downloads += 1;
        state.files.get(file_id).cloned().ok_or_else(|| ApiClientError::Http {
            status: 404,
            body: format!("No such File object: {}", file_id),
        })
    }
}
