use std::collections::HashSet;
use std::path::Path;

use postgres::{Client, NoTls};

use crate::domain::{ImportRow, is_kf_id};
use crate::error::SyncError;

const FILE_QUERY: &str = r#"
    SELECT bs.participant_id,
           bsgf.biospecimen_id,
           bsgf.genomic_file_id,
           idx_scrape.url
    FROM participant p
    JOIN biospecimen bs ON p.kf_id = bs.participant_id
    JOIN biospecimen_genomic_file bsgf ON bs.kf_id = bsgf.biospecimen_id
    JOIN genomic_file gf ON gf.kf_id = bsgf.genomic_file_id
    LEFT JOIN file_metadata.indexd_scrape idx_scrape ON gf.latest_did = idx_scrape.did
    WHERE gf.kf_id = ANY($1)
    ORDER BY bsgf.genomic_file_id, bs.participant_id, bsgf.biospecimen_id
"#;

const NAME_QUERY: &str = r#"
    SELECT kf_id, external_id
    FROM genomic_file
    WHERE external_id LIKE '%' || $1 ESCAPE '\'
    ORDER BY kf_id
    LIMIT 1
"#;

/// A genomic file joined to its participant and biospecimen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub participant_id: String,
    pub biospecimen_id: String,
    pub genomic_file_id: String,
    pub url: Option<String>,
}

/// Genomic file matched by the tail of its external id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomicFileMatch {
    pub kf_id: String,
    pub external_id: String,
}

pub trait FileStore {
    fn lookup(&mut self, genomic_file_ids: &[String]) -> Result<Vec<FileRecord>, SyncError>;
    fn find_by_file_name(
        &mut self,
        file_name: &str,
    ) -> Result<Option<GenomicFileMatch>, SyncError>;
}

pub struct PgFileStore {
    client: Client,
}

impl PgFileStore {
    pub fn connect(url: &str) -> Result<Self, SyncError> {
        let client =
            Client::connect(url, NoTls).map_err(|err| SyncError::DatabaseConnect(err.to_string()))?;
        Ok(Self { client })
    }
}

impl FileStore for PgFileStore {
    fn lookup(&mut self, genomic_file_ids: &[String]) -> Result<Vec<FileRecord>, SyncError> {
        let rows = self
            .client
            .query(FILE_QUERY, &[&genomic_file_ids])
            .map_err(|err| SyncError::DatabaseQuery(err.to_string()))?;
        rows.iter()
            .map(|row| -> Result<FileRecord, SyncError> {
                Ok(FileRecord {
                    participant_id: row.try_get(0).map_err(query_err)?,
                    biospecimen_id: row.try_get(1).map_err(query_err)?,
                    genomic_file_id: row.try_get(2).map_err(query_err)?,
                    url: row.try_get(3).map_err(query_err)?,
                })
            })
            .collect()
    }

    fn find_by_file_name(
        &mut self,
        file_name: &str,
    ) -> Result<Option<GenomicFileMatch>, SyncError> {
        let pattern = escape_like(file_name);
        let row = self
            .client
            .query_opt(NAME_QUERY, &[&pattern])
            .map_err(|err| SyncError::DatabaseQuery(err.to_string()))?;
        row.map(|row| -> Result<GenomicFileMatch, SyncError> {
            Ok(GenomicFileMatch {
                kf_id: row.try_get(0).map_err(query_err)?,
                external_id: row.try_get(1).map_err(query_err)?,
            })
        })
        .transpose()
    }
}

fn query_err(err: postgres::Error) -> SyncError {
    SyncError::DatabaseQuery(err.to_string())
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Reads a single-column list of genomic file ids. Blank lines are skipped and
/// repeated ids keep their first position.
pub fn read_identifiers(path: &Path) -> Result<Vec<String>, SyncError> {
    let file_err = |message: String| SyncError::FileList {
        path: path.to_path_buf(),
        message,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| file_err(err.to_string()))?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| file_err(err.to_string()))?;
        let Some(id) = record.get(0).filter(|value| !value.is_empty()) else {
            continue;
        };
        if !is_kf_id(id) {
            tracing::warn!("{id} does not look like a genomic file id, querying anyway");
        }
        if seen.insert(id.to_string()) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

/// Joins the requested ids against the store. Ids with no match are silently
/// absent from the result; matches without a storage URL are skipped.
pub fn resolve(
    store: &mut dyn FileStore,
    genomic_file_ids: &[String],
) -> Result<Vec<ImportRow>, SyncError> {
    if genomic_file_ids.is_empty() {
        return Ok(Vec::new());
    }

    let records = store.lookup(genomic_file_ids)?;
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    let mut matched = HashSet::new();
    for record in records {
        matched.insert(record.genomic_file_id.clone());
        let Some(url) = record.url.filter(|url| !url.trim().is_empty()) else {
            tracing::warn!(
                "genomic file {} has no storage location, skipping",
                record.genomic_file_id
            );
            continue;
        };
        let row = ImportRow::new(
            record.participant_id,
            record.biospecimen_id,
            record.genomic_file_id,
            url.trim(),
        );
        if seen.insert(row.clone()) {
            rows.push(row);
        }
    }

    let unmatched = genomic_file_ids
        .iter()
        .filter(|id| !matched.contains(*id))
        .count();
    if unmatched > 0 {
        tracing::info!("{unmatched} genomic file ids matched no database rows");
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("a_b%c\\d"), "a\\_b\\%c\\\\d");
        assert_eq!(escape_like("plain.cram"), "plain.cram");
    }
}
