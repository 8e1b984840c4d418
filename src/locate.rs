//! Maps a platform CLI file listing back to dataservice genomic files.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::resolver::FileStore;

#[derive(Debug, Clone, Deserialize)]
struct ListedFile {
    cavatica_id: String,
    file_name: String,
    cavatica_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatedFile {
    pub cavatica_id: String,
    pub file_name: String,
    pub cavatica_location: String,
    pub kf_id: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocateSummary {
    pub listed: usize,
    pub matched: usize,
}

/// Reads the tab separated listing (`id`, `name`, `location`, no header).
pub fn read_listing(path: &Path) -> Result<Vec<(String, String, String)>, SyncError> {
    let file_err = |message: String| SyncError::FileList {
        path: path.to_path_buf(),
        message,
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| file_err(err.to_string()))?;
    reader
        .deserialize::<ListedFile>()
        .map(|entry| -> Result<(String, String, String), SyncError> {
            let entry = entry.map_err(|err| file_err(err.to_string()))?;
            Ok((
                entry.cavatica_id,
                entry.file_name.replace('\'', ""),
                entry.cavatica_location,
            ))
        })
        .collect()
}

pub fn locate_files(
    store: &mut dyn FileStore,
    listing: Vec<(String, String, String)>,
) -> Result<Vec<LocatedFile>, SyncError> {
    let mut located = Vec::with_capacity(listing.len());
    for (cavatica_id, file_name, cavatica_location) in listing {
        // An empty suffix would match every genomic file.
        let found = if file_name.is_empty() {
            tracing::warn!("listing entry {cavatica_id} has no file name");
            None
        } else {
            let found = store.find_by_file_name(&file_name)?;
            if found.is_none() {
                tracing::warn!("no genomic file ends with {file_name}");
            }
            found
        };
        located.push(LocatedFile {
            cavatica_id,
            file_name,
            cavatica_location,
            kf_id: found.as_ref().map(|m| m.kf_id.clone()),
            external_id: found.map(|m| m.external_id),
        });
    }
    Ok(located)
}

pub fn write_located(path: &Path, located: &[LocatedFile]) -> Result<(), SyncError> {
    let mut writer =
        csv::Writer::from_path(path).map_err(|err| SyncError::Filesystem(err.to_string()))?;
    for entry in located {
        writer
            .serialize(entry)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| SyncError::Filesystem(err.to_string()))
}

pub fn locate(
    store: &mut dyn FileStore,
    input: &Path,
    output: &Path,
) -> Result<LocateSummary, SyncError> {
    let listing = read_listing(input)?;
    let listed = listing.len();
    tracing::info!("looking up {listed} files");
    let located = locate_files(store, listing)?;
    write_located(output, &located)?;
    Ok(LocateSummary {
        listed,
        matched: located.iter().filter(|entry| entry.kf_id.is_some()).count(),
    })
}
