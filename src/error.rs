use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("volume {0} does not exist, check name / mounting")]
    #[diagnostic(help("list the volumes attached to your account on the platform"))]
    VolumeNotFound(String),

    #[error("billing group {0} does not exist, check name / mounting")]
    BillingGroupNotFound(String),

    #[error("credentials profile {profile} not found in {path}")]
    MissingProfile { profile: String, path: PathBuf },

    #[error("credentials profile {0} has no auth_token")]
    MissingAuthToken(String),

    #[error("failed to read credentials file at {path}: {message}")]
    CredentialsRead { path: PathBuf, message: String },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("platform request failed: {0}")]
    PlatformHttp(String),

    #[error("platform returned status {status}: {message}")]
    PlatformStatus { status: u16, message: String },

    #[error("unexpected platform response: {0}")]
    PlatformResponse(String),

    #[error("database connection failed: {0}")]
    DatabaseConnect(String),

    #[error("database query failed: {0}")]
    DatabaseQuery(String),

    #[error("failed to read file list {path}: {message}")]
    FileList { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to serialize report: {0}")]
    Report(String),
}
