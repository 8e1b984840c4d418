use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{ApiError, ImportState, TrackedImport};
use crate::error::SyncError;
use crate::platform::{BULK_LIMIT, FileEdit, PlatformClient};

pub const JOB_REPORT_FILE: &str = "job_report.json";
pub const ERROR_REPORT_FILE: &str = "job_report_errors.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportResult {
    pub href: Option<String>,
    pub id: String,
    pub is_folder: bool,
    pub modified_on: Option<String>,
    pub name: String,
}

/// One line of the job report. Field order is the serialized order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: Option<String>,
    pub state: Option<ImportState>,
    pub genomic_file_id: String,
    pub participant_id: String,
    pub biospecimen_id: String,
    pub source_volume: String,
    pub source_location: String,
    pub destination_project: String,
    pub destination_name: String,
    pub href: Option<String>,
    pub started_on: Option<String>,
    pub finished_on: Option<String>,
    pub result: Option<ReportResult>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub jobs: Vec<JobSummary>,
    pub failures: Vec<JobSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetadataSummary {
    pub updated: usize,
    pub failed: usize,
}

/// Writes each completed file's row metadata back to the platform. Files are
/// sent in bulk calls of at most [`BULK_LIMIT`]; jobs in any other state are
/// never part of an edit.
pub fn attach_metadata(client: &dyn PlatformClient, tracked: &[TrackedImport]) -> MetadataSummary {
    let edits = tracked
        .iter()
        .filter_map(|import| {
            import.completed_file().map(|file| FileEdit {
                file_id: file.id.clone(),
                metadata: import.row.metadata.clone(),
            })
        })
        .collect::<Vec<_>>();

    let mut summary = MetadataSummary::default();
    for chunk in edits.chunks(BULK_LIMIT) {
        match client.bulk_edit_files(chunk) {
            Ok(results) => {
                for (edit, result) in chunk.iter().zip(results.iter()) {
                    match result {
                        Ok(_) => summary.updated += 1,
                        Err(error) => {
                            tracing::warn!("metadata update for file {} failed: {error}", edit.file_id);
                            summary.failed += 1;
                        }
                    }
                }
                if results.len() < chunk.len() {
                    tracing::warn!(
                        "bulk edit answered {} of {} files",
                        results.len(),
                        chunk.len()
                    );
                    summary.failed += chunk.len() - results.len();
                }
            }
            Err(err) => {
                tracing::error!("bulk metadata edit failed: {err}");
                summary.failed += chunk.len();
            }
        }
    }
    summary
}

pub fn reconcile(tracked: &[TrackedImport]) -> JobReport {
    let mut jobs = Vec::with_capacity(tracked.len());
    let mut failures = Vec::new();

    for import in tracked {
        let summary = summarize(import);
        match (import.state(), &import.response_error) {
            (Some(ImportState::Completed), None) => {
                tracing::debug!("job {} completed", summary.id.as_deref().unwrap_or("-"));
            }
            (Some(ImportState::Failed), None) => {
                let error = summary.error.clone().unwrap_or_else(|| {
                    ApiError::local("Unknown", "job failed without an error object")
                });
                tracing::error!(
                    "job {} for {} failed: {error}",
                    summary.id.as_deref().unwrap_or("-"),
                    import.request.location
                );
                failures.push(summary.clone());
            }
            (state, response_error) => {
                tracing::error!(
                    "job {} for {} ended in an unexpected state: state={} response_error={}",
                    summary.id.as_deref().unwrap_or("-"),
                    import.request.location,
                    state.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
                    response_error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                );
                failures.push(summary.clone());
            }
        }
        jobs.push(summary);
    }

    JobReport { jobs, failures }
}

fn summarize(import: &TrackedImport) -> JobSummary {
    let job = import.job.as_ref();
    let result = import.completed_file().map(|file| ReportResult {
        href: file.href.clone(),
        id: file.id.clone(),
        is_folder: file.is_folder(),
        modified_on: file.modified_on.clone(),
        name: file.name.clone(),
    });
    let error = import
        .response_error
        .clone()
        .or_else(|| job.and_then(|job| job.error.clone()));

    JobSummary {
        id: job.map(|job| job.id.clone()),
        state: job.map(|job| job.state),
        genomic_file_id: import.row.genomic_file_id.clone(),
        participant_id: import.row.participant_id.clone(),
        biospecimen_id: import.row.biospecimen_id.clone(),
        source_volume: job
            .map(|job| job.source.volume.clone())
            .unwrap_or_else(|| import.request.volume.clone()),
        source_location: job
            .map(|job| job.source.location.clone())
            .unwrap_or_else(|| import.request.location.clone()),
        destination_project: job
            .map(|job| job.destination.project.clone())
            .unwrap_or_else(|| import.request.project.clone()),
        destination_name: job
            .and_then(|job| job.destination.name.clone())
            .unwrap_or_else(|| import.request.name.clone()),
        href: job.and_then(|job| job.href.clone()),
        started_on: job.and_then(|job| job.started_on.clone()),
        finished_on: job.and_then(|job| job.finished_on.clone()),
        result,
        error,
    }
}

/// Writes `job_report.json` and `job_report_errors.json` into `dir`, replacing
/// earlier reports. Both files are always written.
pub fn write_reports(report: &JobReport, dir: &Utf8Path) -> Result<(Utf8PathBuf, Utf8PathBuf), SyncError> {
    fs::create_dir_all(dir.as_std_path()).map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let jobs_path = dir.join(JOB_REPORT_FILE);
    let errors_path = dir.join(ERROR_REPORT_FILE);
    write_json_atomic(&jobs_path, &report.jobs)?;
    write_json_atomic(&errors_path, &report.failures)?;
    Ok((jobs_path, errors_path))
}

pub fn render<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SyncError> {
    let mut content =
        serde_json::to_vec_pretty(value).map_err(|err| SyncError::Report(err.to_string()))?;
    content.push(b'\n');
    Ok(content)
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<(), SyncError> {
    let content = render(value)?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".job-report")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    temp.write_all(&content)
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    Ok(())
}
