#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use cavatica_tools::domain::{
    ApiError, BillingGroup, FileObject, ImportDestination, ImportJob, ImportRequest, ImportRow,
    ImportSource, ImportState, NewProject, Project, Volume,
};
use cavatica_tools::error::SyncError;
use cavatica_tools::orchestrator::ImportOptions;
use cavatica_tools::platform::{BulkResult, FileEdit, PlatformClient, RateLimit};
use cavatica_tools::resolver::{FileRecord, FileStore, GenomicFileMatch};

/// What the mock platform does with an import, keyed by source location.
#[derive(Debug, Clone)]
pub enum Outcome {
    Complete,
    Fail(ApiError),
    Abort,
    /// Submit succeeds, every later read of the job answers with an error item.
    Unreadable(ApiError),
    /// Submit answers with an error item.
    Rejected(ApiError),
    /// Stays RUNNING forever.
    Stuck,
}

pub struct JobSlot {
    pub job: ImportJob,
    pub polls_left: usize,
    pub outcome: Outcome,
}

pub struct MockPlatform {
    pub volumes: Vec<Volume>,
    pub billing_groups: Vec<BillingGroup>,
    pub projects: Mutex<Vec<Project>>,
    pub created: Mutex<Vec<NewProject>>,
    pub outcomes: HashMap<String, Outcome>,
    pub polls_to_finish: usize,
    pub failing_polls: Mutex<usize>,
    pub rate_limit: Mutex<Option<RateLimit>>,
    pub submitted: Mutex<Vec<Vec<ImportRequest>>>,
    pub submitted_at: Mutex<Vec<Instant>>,
    pub polled: Mutex<Vec<Vec<String>>>,
    pub edits: Mutex<Vec<Vec<FileEdit>>>,
    pub jobs: Mutex<HashMap<String, JobSlot>>,
    pub next_id: Mutex<usize>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            volumes: vec![Volume {
                id: "kids-first/source-volume".to_string(),
                name: "source-volume".to_string(),
            }],
            billing_groups: vec![BillingGroup {
                id: "bg-1".to_string(),
                name: "CBTN".to_string(),
            }],
            projects: Mutex::new(vec![Project {
                id: "kids-first/delivery".to_string(),
                name: "delivery".to_string(),
                description: None,
            }]),
            created: Mutex::new(Vec::new()),
            outcomes: HashMap::new(),
            polls_to_finish: 1,
            failing_polls: Mutex::new(0),
            rate_limit: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            submitted_at: Mutex::new(Vec::new()),
            polled: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }
}

impl MockPlatform {
    pub fn with_outcome(mut self, location: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(location.to_string(), outcome);
        self
    }

    pub fn with_rate_limit(self, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        *self.rate_limit.lock().unwrap() = Some(RateLimit {
            remaining,
            reset_at,
        });
        self
    }

    pub fn submitted_sizes(&self) -> Vec<usize> {
        self.submitted.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn edited_file_ids(&self) -> Vec<String> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|edit| edit.file_id.clone())
            .collect()
    }

    fn finish(slot: &mut JobSlot) {
        match &slot.outcome {
            Outcome::Complete => {
                slot.job.state = ImportState::Completed;
                slot.job.result = Some(FileObject {
                    id: format!("file-{}", slot.job.id),
                    name: slot.job.destination.name.clone().unwrap_or_default(),
                    href: None,
                    project: Some(slot.job.destination.project.clone()),
                    modified_on: Some("2024-01-01T00:00:00Z".to_string()),
                    kind: Some("file".to_string()),
                });
                slot.job.finished_on = Some("2024-01-01T00:00:00Z".to_string());
            }
            Outcome::Fail(error) => {
                slot.job.state = ImportState::Failed;
                slot.job.error = Some(error.clone());
            }
            Outcome::Abort => slot.job.state = ImportState::Aborted,
            Outcome::Stuck | Outcome::Unreadable(_) | Outcome::Rejected(_) => {
                slot.job.state = ImportState::Running
            }
        }
    }
}

impl PlatformClient for MockPlatform {
    fn volumes(&self) -> Result<Vec<Volume>, SyncError> {
        Ok(self.volumes.clone())
    }

    fn billing_groups(&self) -> Result<Vec<BillingGroup>, SyncError> {
        Ok(self.billing_groups.clone())
    }

    fn projects(&self) -> Result<Vec<Project>, SyncError> {
        Ok(self.projects.lock().unwrap().clone())
    }

    fn create_project(&self, project: &NewProject) -> Result<Project, SyncError> {
        self.created.lock().unwrap().push(project.clone());
        let created = Project {
            id: format!("kids-first/{}", project.name),
            name: project.name.clone(),
            description: Some(project.description.clone()),
        };
        self.projects.lock().unwrap().push(created.clone());
        Ok(created)
    }

    fn project_file_count(&self, _project_id: &str) -> Result<u64, SyncError> {
        Ok(0)
    }

    fn bulk_submit_imports(
        &self,
        requests: &[ImportRequest],
    ) -> Result<Vec<BulkResult<ImportJob>>, SyncError> {
        self.submitted.lock().unwrap().push(requests.to_vec());
        self.submitted_at.lock().unwrap().push(Instant::now());
        let mut jobs = self.jobs.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let results = requests
            .iter()
            .map(|request| {
                let outcome = self
                    .outcomes
                    .get(&request.location)
                    .cloned()
                    .unwrap_or(Outcome::Complete);
                if let Outcome::Rejected(error) = &outcome {
                    return Err(error.clone());
                }
                *next_id += 1;
                let job = ImportJob {
                    id: format!("import-{}", *next_id),
                    href: None,
                    state: ImportState::Pending,
                    source: ImportSource {
                        volume: request.volume.clone(),
                        location: request.location.clone(),
                    },
                    destination: ImportDestination {
                        project: request.project.clone(),
                        name: Some(request.name.clone()),
                    },
                    started_on: Some("2024-01-01T00:00:00Z".to_string()),
                    finished_on: None,
                    result: None,
                    error: None,
                };
                jobs.insert(
                    job.id.clone(),
                    JobSlot {
                        job: job.clone(),
                        polls_left: self.polls_to_finish,
                        outcome,
                    },
                );
                Ok(job)
            })
            .collect();
        Ok(results)
    }

    fn bulk_get_imports(&self, ids: &[String]) -> Result<Vec<BulkResult<ImportJob>>, SyncError> {
        self.polled.lock().unwrap().push(ids.to_vec());
        {
            let mut failing = self.failing_polls.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(SyncError::PlatformHttp("connection reset".to_string()));
            }
        }
        let mut jobs = self.jobs.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                let slot = jobs.get_mut(id).expect("polled unknown job");
                if let Outcome::Unreadable(error) = &slot.outcome {
                    return Err(error.clone());
                }
                if slot.polls_left > 0 {
                    slot.polls_left -= 1;
                    slot.job.state = ImportState::Running;
                }
                if slot.polls_left == 0 {
                    Self::finish(slot);
                }
                Ok(slot.job.clone())
            })
            .collect())
    }

    fn bulk_edit_files(&self, edits: &[FileEdit]) -> Result<Vec<BulkResult<FileObject>>, SyncError> {
        self.edits.lock().unwrap().push(edits.to_vec());
        Ok(edits
            .iter()
            .map(|edit| {
                Ok(FileObject {
                    id: edit.file_id.clone(),
                    name: String::new(),
                    href: None,
                    project: None,
                    modified_on: None,
                    kind: Some("file".to_string()),
                })
            })
            .collect())
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        *self.rate_limit.lock().unwrap()
    }
}

#[derive(Default)]
pub struct MockStore {
    pub records: Vec<FileRecord>,
    pub by_name: HashMap<String, GenomicFileMatch>,
    pub lookups: usize,
    pub name_queries: Vec<String>,
}

impl FileStore for MockStore {
    fn lookup(&mut self, genomic_file_ids: &[String]) -> Result<Vec<FileRecord>, SyncError> {
        self.lookups += 1;
        Ok(self
            .records
            .iter()
            .filter(|record| genomic_file_ids.contains(&record.genomic_file_id))
            .cloned()
            .collect())
    }

    fn find_by_file_name(
        &mut self,
        file_name: &str,
    ) -> Result<Option<GenomicFileMatch>, SyncError> {
        self.name_queries.push(file_name.to_string());
        Ok(self.by_name.get(file_name).cloned())
    }
}

pub fn fast_options(chunk_size: usize) -> ImportOptions {
    ImportOptions {
        chunk_size,
        poll_interval: Duration::ZERO,
        poll_timeout: None,
        max_poll_failures: 3,
    }
}

pub fn location(index: usize) -> String {
    format!("harmonized/cram/sample-{index:04}.cram")
}

pub fn rows(count: usize) -> Vec<ImportRow> {
    (0..count)
        .map(|index| {
            ImportRow::new(
                format!("PT_{index:08}"),
                format!("BS_{index:08}"),
                format!("GF_{index:08}"),
                format!("s3://kf-study-bucket/{}", location(index)),
            )
        })
        .collect()
}

pub fn volume() -> Volume {
    Volume {
        id: "kids-first/source-volume".to_string(),
        name: "source-volume".to_string(),
    }
}

pub fn project() -> Project {
    Project {
        id: "kids-first/delivery".to_string(),
        name: "delivery".to_string(),
        description: None,
    }
}

pub fn api_error(code: &str, message: &str) -> ApiError {
    ApiError {
        code: Some(code.to_string()),
        status: Some(400),
        message: Some(message.to_string()),
        more_info: Some("https://docs.sevenbridges.com/reference/errors".to_string()),
    }
}
