use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Credentials;
use crate::domain::{
    ApiError, BillingGroup, FileObject, ImportJob, ImportRequest, NewProject, Project, Volume,
};
use crate::error::SyncError;

/// Largest number of items the bulk endpoints accept per call.
pub const BULK_LIMIT: usize = 100;

const PAGE_SIZE: usize = 100;
const AUTH_HEADER: &str = "X-SBG-Auth-Token";
const RATE_REMAINING_HEADER: &str = "X-RateLimit-Remaining";
const RATE_RESET_HEADER: &str = "X-RateLimit-Reset";
const TOTAL_HEADER: &str = "X-Total-Matching-Query";

/// One item of a bulk response: either the resource or the reason it is missing.
pub type BulkResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileEdit {
    pub file_id: String,
    pub metadata: BTreeMap<String, String>,
}

/// The slice of the platform API the import workflow needs.
pub trait PlatformClient: Send + Sync {
    fn volumes(&self) -> Result<Vec<Volume>, SyncError>;
    fn billing_groups(&self) -> Result<Vec<BillingGroup>, SyncError>;
    fn projects(&self) -> Result<Vec<Project>, SyncError>;
    fn create_project(&self, project: &NewProject) -> Result<Project, SyncError>;
    fn project_file_count(&self, project_id: &str) -> Result<u64, SyncError>;
    fn bulk_submit_imports(
        &self,
        requests: &[ImportRequest],
    ) -> Result<Vec<BulkResult<ImportJob>>, SyncError>;
    fn bulk_get_imports(&self, ids: &[String]) -> Result<Vec<BulkResult<ImportJob>>, SyncError>;
    fn bulk_edit_files(&self, edits: &[FileEdit]) -> Result<Vec<BulkResult<FileObject>>, SyncError>;
    /// Rate limit reported by the most recent response, if any.
    fn rate_limit(&self) -> Option<RateLimit> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(default)]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse<T> {
    items: Vec<BulkItem<T>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem<T> {
    #[serde(default = "Option::default")]
    resource: Option<T>,
    #[serde(default)]
    error: Option<ApiError>,
}

impl<T> BulkItem<T> {
    fn into_result(self) -> BulkResult<T> {
        match (self.resource, self.error) {
            (_, Some(error)) => Err(error),
            (Some(resource), None) => Ok(resource),
            (None, None) => Err(ApiError::local(
                "InvalidResponse",
                "bulk item carries neither resource nor error",
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct ImportItem<'a> {
    source: ImportItemSource<'a>,
    destination: ImportItemDestination<'a>,
    overwrite: bool,
}

#[derive(Debug, Serialize)]
struct ImportItemSource<'a> {
    volume: &'a str,
    location: &'a str,
}

#[derive(Debug, Serialize)]
struct ImportItemDestination<'a> {
    project: &'a str,
    name: &'a str,
}

pub struct SbgHttpClient {
    client: Client,
    base_url: String,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl SbgHttpClient {
    pub fn new(credentials: &Credentials) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cavatica-tools/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::PlatformHttp(err.to_string()))?,
        );
        let mut token = HeaderValue::from_str(&credentials.auth_token)
            .map_err(|_| SyncError::PlatformHttp("auth token is not a valid header".to_string()))?;
        token.set_sensitive(true);
        headers.insert(AUTH_HEADER, token);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::PlatformHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: credentials.api_endpoint.trim_end_matches('/').to_string(),
            rate_limit: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn handle_status(response: Response) -> Result<Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "platform request failed".to_string());
        Err(SyncError::PlatformStatus { status, message })
    }

    fn record_rate_limit(&self, response: &Response) {
        let remaining = header_u64(response.headers(), RATE_REMAINING_HEADER);
        let reset = header_u64(response.headers(), RATE_RESET_HEADER)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));
        if let (Some(remaining), Some(reset_at)) = (remaining, reset) {
            if let Ok(mut guard) = self.rate_limit.lock() {
                *guard = Some(RateLimit {
                    remaining,
                    reset_at,
                });
            }
        }
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, SyncError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const MAX_THROTTLE_WAITS: usize = 10;
        const BASE_DELAY_MS: u64 = 200;
        const MAINTENANCE_DELAY: Duration = Duration::from_secs(60);
        let mut attempt = 0usize;
        let mut throttled = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    self.record_rate_limit(&resp);
                    let status = resp.status().as_u16();
                    if status == 429 && throttled < MAX_THROTTLE_WAITS {
                        let wait = throttle_wait(resp.headers(), Utc::now());
                        tracing::warn!(
                            "rate limit reached, waiting {} seconds",
                            wait.as_secs()
                        );
                        thread::sleep(wait);
                        throttled += 1;
                        continue;
                    }
                    if status == 503 && throttled < MAX_THROTTLE_WAITS {
                        tracing::warn!("platform under maintenance, retrying in 60 seconds");
                        thread::sleep(MAINTENANCE_DELAY);
                        throttled += 1;
                        continue;
                    }
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::PlatformHttp(err.to_string()));
                }
            }
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(T, HeaderMap), SyncError> {
        let url = self.url(path);
        let response = self.send_with_retries(|| self.client.get(&url).query(query))?;
        let response = Self::handle_status(response)?;
        let headers = response.headers().clone();
        let body = response
            .json()
            .map_err(|err| SyncError::PlatformResponse(err.to_string()))?;
        Ok((body, headers))
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, SyncError> {
        let url = self.url(path);
        let response = self.send_with_retries(|| self.client.post(&url).json(body))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| SyncError::PlatformResponse(err.to_string()))
    }

    fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, SyncError> {
        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let query = [
                ("limit", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ];
            let (page, _) = self.get_json::<Page<T>>(path, &query)?;
            let count = page.items.len();
            let has_next = page
                .links
                .iter()
                .any(|link| link.rel.as_deref() == Some("next"));
            all.extend(page.items);
            if count == 0 || !has_next {
                break;
            }
            offset += count;
        }
        Ok(all)
    }

    fn post_bulk<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<BulkResult<T>>, SyncError> {
        let response: BulkResponse<T> = self.post_json(path, body)?;
        Ok(response
            .items
            .into_iter()
            .map(BulkItem::into_result)
            .collect())
    }
}

impl PlatformClient for SbgHttpClient {
    fn volumes(&self) -> Result<Vec<Volume>, SyncError> {
        self.get_all("volumes")
    }

    fn billing_groups(&self) -> Result<Vec<BillingGroup>, SyncError> {
        self.get_all("billing/groups")
    }

    fn projects(&self) -> Result<Vec<Project>, SyncError> {
        self.get_all("projects")
    }

    fn create_project(&self, project: &NewProject) -> Result<Project, SyncError> {
        let body = serde_json::to_value(project)
            .map_err(|err| SyncError::PlatformResponse(err.to_string()))?;
        self.post_json("projects", &body)
    }

    fn project_file_count(&self, project_id: &str) -> Result<u64, SyncError> {
        let query = [("project", project_id.to_string()), ("limit", "1".to_string())];
        let (page, headers) = self.get_json::<Page<serde_json::Value>>("files", &query)?;
        Ok(header_u64(&headers, TOTAL_HEADER).unwrap_or(page.items.len() as u64))
    }

    fn bulk_submit_imports(
        &self,
        requests: &[ImportRequest],
    ) -> Result<Vec<BulkResult<ImportJob>>, SyncError> {
        let items = requests
            .iter()
            .map(|request| ImportItem {
                source: ImportItemSource {
                    volume: &request.volume,
                    location: &request.location,
                },
                destination: ImportItemDestination {
                    project: &request.project,
                    name: &request.name,
                },
                overwrite: request.overwrite,
            })
            .collect::<Vec<_>>();
        self.post_bulk("bulk/storage/imports/create", &json!({ "items": items }))
    }

    fn bulk_get_imports(&self, ids: &[String]) -> Result<Vec<BulkResult<ImportJob>>, SyncError> {
        self.post_bulk("bulk/storage/imports/get", &json!({ "import_ids": ids }))
    }

    fn bulk_edit_files(&self, edits: &[FileEdit]) -> Result<Vec<BulkResult<FileObject>>, SyncError> {
        let items = edits
            .iter()
            .map(|edit| json!({ "id": edit.file_id, "metadata": edit.metadata }))
            .collect::<Vec<_>>();
        self.post_bulk("bulk/files/edit", &json!({ "items": items }))
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit.lock().ok().and_then(|guard| *guard)
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// How long to back off after a 429: until the advertised reset, or a minute when absent.
fn throttle_wait(headers: &HeaderMap, now: DateTime<Utc>) -> Duration {
    header_u64(headers, RATE_RESET_HEADER)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        .map(|reset_at| (reset_at - now).to_std().unwrap_or(Duration::ZERO))
        .unwrap_or(Duration::from_secs(60))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
