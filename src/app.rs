use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::{NewProject, Project, Volume};
use crate::error::SyncError;
use crate::orchestrator::{ImportOptions, submit_and_wait};
use crate::platform::PlatformClient;
use crate::reconcile::{MetadataSummary, attach_metadata, reconcile, write_reports};
use crate::resolver::{FileStore, read_identifiers, resolve};

pub const DEFAULT_BILLING_GROUP: &str = "CBTN";
pub const DEFAULT_PROJECT_DESCRIPTION: &str = "Delivery project automatically created for you.";

#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub volume: String,
    pub project: String,
    pub billing_group: String,
    pub project_description: String,
    pub file_list: PathBuf,
    pub report_dir: Utf8PathBuf,
    pub options: ImportOptions,
}

/// Where files come from and where they go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub volume: Volume,
    pub project: Project,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub volume: String,
    pub project: String,
    pub requested: usize,
    pub resolved: usize,
    pub completed: usize,
    pub failed: usize,
    pub metadata: MetadataSummary,
    pub job_report: String,
    pub error_report: String,
}

pub struct App<P: PlatformClient> {
    platform: P,
}

impl<P: PlatformClient> App<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Finds the source volume and the destination project, creating the
    /// project under `billing_group` when it does not exist yet.
    pub fn prepare_workspace(
        &self,
        volume_name: &str,
        project_name: &str,
        billing_group: &str,
        description: &str,
    ) -> Result<Workspace, SyncError> {
        let volume = self
            .platform
            .volumes()?
            .into_iter()
            .find(|volume| volume.name == volume_name)
            .ok_or_else(|| SyncError::VolumeNotFound(volume_name.to_string()))?;
        tracing::info!("volume {} found", volume.name);

        let group = self
            .platform
            .billing_groups()?
            .into_iter()
            .find(|group| group.name == billing_group)
            .ok_or_else(|| SyncError::BillingGroupNotFound(billing_group.to_string()))?;

        let existing = self
            .platform
            .projects()?
            .into_iter()
            .find(|project| project.name == project_name);
        let project = match existing {
            Some(project) => {
                tracing::info!("project {} already exists, skipping creation", project.name);
                project
            }
            None => {
                let project = self.platform.create_project(&NewProject {
                    name: project_name.to_string(),
                    billing_group: group.id.clone(),
                    description: description.to_string(),
                })?;
                tracing::info!("your new project {} has been created", project.name);
                if let Some(description) = &project.description {
                    tracing::info!("project description: {description}");
                }
                project
            }
        };

        if self.platform.project_file_count(&project.id)? == 0 {
            tracing::debug!("no files in the project");
        }

        Ok(Workspace { volume, project })
    }

    /// Full import run. The store is opened only for the resolve step and
    /// dropped before the first import is submitted.
    pub fn import<S, F>(&self, settings: &ImportSettings, open_store: F) -> Result<ImportSummary, SyncError>
    where
        S: FileStore,
        F: FnOnce() -> Result<S, SyncError>,
    {
        settings.options.validate()?;
        let workspace = self.prepare_workspace(
            &settings.volume,
            &settings.project,
            &settings.billing_group,
            &settings.project_description,
        )?;

        let ids = read_identifiers(&settings.file_list)?;
        let rows = {
            let mut store = open_store()?;
            resolve(&mut store, &ids)?
        };
        tracing::info!("about to import {} files", rows.len());

        let tracked = submit_and_wait(
            &self.platform,
            &rows,
            &workspace.volume,
            &workspace.project,
            &settings.options,
        )?;
        let metadata = attach_metadata(&self.platform, &tracked);

        tracing::info!("building job reports");
        let report = reconcile(&tracked);
        let (job_report, error_report) = write_reports(&report, &settings.report_dir)?;

        if !report.failures.is_empty() {
            tracing::error!("there were {} failed jobs", report.failures.len());
        }
        if metadata.failed > 0 {
            tracing::warn!("metadata could not be set on {} files", metadata.failed);
        }

        Ok(ImportSummary {
            volume: workspace.volume.name,
            project: workspace.project.name,
            requested: ids.len(),
            resolved: rows.len(),
            completed: report.jobs.len() - report.failures.len(),
            failed: report.failures.len(),
            metadata,
            job_report: job_report.to_string(),
            error_report: error_report.to_string(),
        })
    }
}
