//! Bulk import orchestration.
//!
//! Rows are cut into contiguous batches, each batch is submitted in one bulk
//! call and then polled until no job in it is left pending. Batches run one
//! after another, so at most one batch is in flight on the platform.

use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::domain::{ApiError, ImportJob, ImportRequest, ImportRow, Project, TrackedImport, Volume};
use crate::error::SyncError;
use crate::platform::{BULK_LIMIT, BulkResult, PlatformClient};

pub const DEFAULT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_POLL_FAILURES: usize = 5;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub chunk_size: usize,
    pub poll_interval: Duration,
    /// `None` waits as long as the platform takes.
    pub poll_timeout: Option<Duration>,
    /// Consecutive failed poll requests tolerated before a batch is given up.
    pub max_poll_failures: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: None,
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
        }
    }
}

impl ImportOptions {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.chunk_size == 0 {
            return Err(SyncError::InvalidOption(
                "chunk size must be at least 1".to_string(),
            ));
        }
        if self.chunk_size > BULK_LIMIT {
            return Err(SyncError::InvalidOption(format!(
                "chunk size {} exceeds the bulk limit of {BULK_LIMIT}",
                self.chunk_size
            )));
        }
        if self.max_poll_failures == 0 {
            return Err(SyncError::InvalidOption(
                "max poll failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn build_requests(batch: &[ImportRow], volume: &Volume, project: &Project) -> Vec<ImportRequest> {
    batch
        .iter()
        .map(|row| ImportRequest::from_row(row, &volume.id, &project.id))
        .collect()
}

/// Imports every row and returns one tracked import per row, in row order.
pub fn submit_and_wait(
    client: &dyn PlatformClient,
    rows: &[ImportRow],
    volume: &Volume,
    project: &Project,
    options: &ImportOptions,
) -> Result<Vec<TrackedImport>, SyncError> {
    options.validate()?;

    let mut tracked = Vec::with_capacity(rows.len());
    for (index, batch) in rows.chunks(options.chunk_size).enumerate() {
        let start = index * options.chunk_size;
        if index > 0 {
            respect_rate_limit(client, options.chunk_size);
        }
        tracing::info!("importing files: {}:{}", start, start + batch.len());

        let mut imports = submit_batch(client, batch, volume, project);
        wait_for_batch(client, &mut imports, options);
        tracked.extend(imports);
    }
    Ok(tracked)
}

fn submit_batch(
    client: &dyn PlatformClient,
    batch: &[ImportRow],
    volume: &Volume,
    project: &Project,
) -> Vec<TrackedImport> {
    let requests = build_requests(batch, volume, project);
    let results = match client.bulk_submit_imports(&requests) {
        Ok(results) => results,
        Err(err) => {
            tracing::error!("bulk import submission failed: {err}");
            let error = ApiError::local("SubmitFailed", err.to_string());
            return batch
                .iter()
                .zip(requests)
                .map(|(row, request)| TrackedImport {
                    row: row.clone(),
                    request,
                    job: None,
                    response_error: Some(error.clone()),
                })
                .collect();
        }
    };

    if results.len() != requests.len() {
        tracing::error!(
            "bulk import returned {} results for {} requests",
            results.len(),
            requests.len()
        );
    }
    let mut results = results.into_iter();
    batch
        .iter()
        .zip(requests)
        .map(|(row, request)| {
            let (job, response_error) = match results.next() {
                Some(Ok(job)) => (Some(job), None),
                Some(Err(error)) => {
                    tracing::error!("import of {} rejected: {error}", request.location);
                    (None, Some(error))
                }
                None => (
                    None,
                    Some(ApiError::local(
                        "InvalidResponse",
                        "no bulk result for this request",
                    )),
                ),
            };
            TrackedImport {
                row: row.clone(),
                request,
                job,
                response_error,
            }
        })
        .collect()
}

/// Polls until no import in `batch` is pending. An import stops being pending
/// when its job reaches a terminal state or when a response error is recorded
/// for it, so an unreadable job can never hold the loop.
fn wait_for_batch(client: &dyn PlatformClient, batch: &mut [TrackedImport], options: &ImportOptions) {
    let started = Instant::now();
    let mut failures = 0usize;
    loop {
        let pending = batch
            .iter()
            .enumerate()
            .filter(|(_, import)| import.is_pending())
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        if pending.is_empty() {
            return;
        }

        if let Some(timeout) = options.poll_timeout {
            if started.elapsed() >= timeout {
                tracing::error!(
                    "{} jobs still running after {}s, giving up on them",
                    pending.len(),
                    timeout.as_secs()
                );
                let error = ApiError::local("PollTimeout", "job did not finish before the poll timeout");
                mark_pending(batch, &pending, &error);
                return;
            }
        }

        tracing::debug!(
            "waiting {} seconds for {} jobs to complete",
            options.poll_interval.as_secs(),
            pending.len()
        );
        thread::sleep(options.poll_interval);

        let ids = pending
            .iter()
            .filter_map(|&index| batch[index].job.as_ref().map(|job| job.id.clone()))
            .collect::<Vec<_>>();
        let outcome = client.bulk_get_imports(&ids).and_then(|results| {
            if results.len() == ids.len() {
                Ok(results)
            } else {
                Err(SyncError::PlatformResponse(format!(
                    "bulk get returned {} results for {} jobs",
                    results.len(),
                    ids.len()
                )))
            }
        });

        match outcome {
            Ok(results) => {
                failures = 0;
                for (&index, result) in pending.iter().zip(results) {
                    refresh(&mut batch[index], result);
                }
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(
                    "polling import jobs failed ({failures}/{}): {err}",
                    options.max_poll_failures
                );
                if failures >= options.max_poll_failures {
                    let error = ApiError::local("PollFailed", err.to_string());
                    mark_pending(batch, &pending, &error);
                    return;
                }
            }
        }
    }
}

fn refresh(import: &mut TrackedImport, result: BulkResult<ImportJob>) {
    let Some(current) = import.job.as_ref() else {
        return;
    };
    match result {
        Ok(job) if job.id == current.id => {
            if current.state != job.state {
                tracing::debug!("job {} is now {}", job.id, job.state);
            }
            import.job = Some(job);
        }
        Ok(job) => {
            tracing::error!("asked for job {} but got {}", current.id, job.id);
            import.response_error = Some(ApiError::local(
                "InvalidResponse",
                format!("expected job {} but received {}", current.id, job.id),
            ));
        }
        Err(error) => {
            tracing::error!("import job {} error: {error}", current.id);
            import.response_error = Some(error);
        }
    }
}

fn mark_pending(batch: &mut [TrackedImport], pending: &[usize], error: &ApiError) {
    for &index in pending {
        batch[index].response_error = Some(error.clone());
    }
}

fn respect_rate_limit(client: &dyn PlatformClient, batch_size: usize) {
    let Some(limit) = client.rate_limit() else {
        return;
    };
    if limit.remaining >= 2 * batch_size as u64 {
        return;
    }
    let Ok(wait) = (limit.reset_at - Utc::now()).to_std() else {
        return;
    };
    if wait.is_zero() {
        return;
    }
    tracing::info!(
        "rate limit will be reached soon, waiting {} seconds until {}",
        wait.as_secs(),
        limit.reset_at
    );
    thread::sleep(wait);
}
