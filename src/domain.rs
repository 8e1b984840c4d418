use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

pub const PARTICIPANT_KEY: &str = "Kids First Participant ID";
pub const BIOSPECIMEN_KEY: &str = "Kids First Biospecimen ID";

static KF_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}_[A-Z0-9]{8}$").expect("kf id pattern"));

static BUCKET_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9+.-]*://[^/]*/").expect("bucket prefix pattern"));

/// Returns true when `value` is shaped like a Kids First identifier, e.g. `GF_0A1B2C3D`.
pub fn is_kf_id(value: &str) -> bool {
    KF_ID.is_match(value)
}

/// Object key inside the volume's bucket: `s3://bucket/a/b.cram` becomes `a/b.cram`.
/// Locations without a scheme are already keys and come back verbatim.
pub fn source_key(location: &str) -> &str {
    match BUCKET_PREFIX.find(location) {
        Some(prefix) => &location[prefix.end()..],
        None => location,
    }
}

/// Final path segment of a location.
pub fn file_name(location: &str) -> &str {
    location.rsplit('/').next().unwrap_or(location)
}

/// One genomic file to import, as resolved from the dataservice database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImportRow {
    pub participant_id: String,
    pub biospecimen_id: String,
    pub genomic_file_id: String,
    pub source_location: String,
    pub metadata: BTreeMap<String, String>,
}

impl ImportRow {
    pub fn new(
        participant_id: impl Into<String>,
        biospecimen_id: impl Into<String>,
        genomic_file_id: impl Into<String>,
        source_location: impl Into<String>,
    ) -> Self {
        let participant_id = participant_id.into();
        let biospecimen_id = biospecimen_id.into();
        let mut metadata = BTreeMap::new();
        metadata.insert(PARTICIPANT_KEY.to_string(), participant_id.clone());
        metadata.insert(BIOSPECIMEN_KEY.to_string(), biospecimen_id.clone());
        Self {
            participant_id,
            biospecimen_id,
            genomic_file_id: genomic_file_id.into(),
            source_location: source_location.into(),
            metadata,
        }
    }
}

/// Submission descriptor for a single file import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRequest {
    pub volume: String,
    pub location: String,
    pub project: String,
    pub name: String,
    pub overwrite: bool,
    pub metadata: BTreeMap<String, String>,
}

impl ImportRequest {
    pub fn from_row(row: &ImportRow, volume_id: &str, project_id: &str) -> Self {
        Self {
            volume: volume_id.to_string(),
            location: source_key(&row.source_location).to_string(),
            project: project_id.to_string(),
            name: file_name(&row.source_location).to_string(),
            overwrite: true,
            metadata: row.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImportState {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl ImportState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportState::Completed | ImportState::Failed | ImportState::Aborted
        )
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportState::Pending => write!(f, "PENDING"),
            ImportState::Running => write!(f, "RUNNING"),
            ImportState::Completed => write!(f, "COMPLETED"),
            ImportState::Failed => write!(f, "FAILED"),
            ImportState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSource {
    pub volume: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDestination {
    pub project: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Error object attached to a failed job or to a rejected bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, deserialize_with = "string_or_number")]
    pub code: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub more_info: Option<String>,
}

impl ApiError {
    pub fn local(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.to_string()),
            status: None,
            message: Some(message.into()),
            more_info: None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code={} status={} message={} more_info={}",
            self.code.as_deref().unwrap_or("-"),
            self.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            self.message.as_deref().unwrap_or("-"),
            self.more_info.as_deref().unwrap_or("-"),
        )
    }
}

/// File handle produced by a completed import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub modified_on: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl FileObject {
    pub fn is_folder(&self) -> bool {
        self.kind.as_deref() == Some("folder")
    }
}

/// Local copy of a remote import job, refreshed while polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    #[serde(default)]
    pub href: Option<String>,
    pub state: ImportState,
    pub source: ImportSource,
    pub destination: ImportDestination,
    #[serde(default)]
    pub started_on: Option<String>,
    #[serde(default)]
    pub finished_on: Option<String>,
    #[serde(default)]
    pub result: Option<FileObject>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// A row paired with what the platform made of it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedImport {
    pub row: ImportRow,
    pub request: ImportRequest,
    /// Absent when the platform rejected the submission outright.
    pub job: Option<ImportJob>,
    pub response_error: Option<ApiError>,
}

impl TrackedImport {
    pub fn state(&self) -> Option<ImportState> {
        self.job.as_ref().map(|job| job.state)
    }

    /// Still worth polling: a job exists, it is not terminal and nothing went wrong reading it.
    pub fn is_pending(&self) -> bool {
        self.response_error.is_none()
            && self
                .job
                .as_ref()
                .map(|job| !job.state.is_terminal())
                .unwrap_or(false)
    }

    pub fn completed_file(&self) -> Option<&FileObject> {
        match &self.job {
            Some(job) if job.state == ImportState::Completed => job.result.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingGroup {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProject {
    pub name: String,
    pub billing_group: String,
    pub description: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Code>::deserialize(deserializer)?.map(|code| match code {
        Code::Text(text) => text,
        Code::Number(number) => number.to_string(),
    }))
}
