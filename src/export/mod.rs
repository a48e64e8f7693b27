pub mod documents;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::features::Feature;
use crate::models::Record;
use crate::standardize::{StandardizationParameters, StandardizeError};
pub use documents::{CatalogEntry, FeatureMap, ParameterDocument};

/// Parameter document file name.
pub const PARAMS_FILE: &str = "scaler_params.json";
/// Catalog document file name.
pub const CATALOG_FILE: &str = "spotify_data.json";

/// Tolerance used when re-checking written artifacts.
pub const CONSISTENCY_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("standardizer has not been fit; refusing to export")]
    NotFitted,
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid parameter document {path}: {source}")]
    InvalidParameters {
        path: PathBuf,
        #[source]
        source: StandardizeError,
    },
    #[error("catalog has {catalog} entries but {records} raw records were given")]
    LengthMismatch { catalog: usize, records: usize },
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Both documents, built together from one set of parameters.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub parameters: ParameterDocument,
    pub catalog: Vec<CatalogEntry>,
}

impl ArtifactSet {
    /// Standardize every record with `params`. `None` means the standardizer
    /// was never fit, which is an error rather than an all-zero export.
    pub fn build(params: Option<&StandardizationParameters>, records: &[Record]) -> Result<Self> {
        let params = params.ok_or(ExportError::NotFitted)?;
        let catalog = records
            .iter()
            .map(|r| CatalogEntry::standardized(r, params))
            .collect();
        Ok(Self {
            parameters: ParameterDocument::from(params),
            catalog,
        })
    }

    /// Serialize both documents and parse them back in memory, yielding
    /// exactly what a reader of the written files would load.
    pub fn reparse(&self) -> Result<(StandardizationParameters, Vec<CatalogEntry>)> {
        let json_err = |name: &str| {
            let path = PathBuf::from(name);
            move |source: serde_json::Error| ExportError::Json { path, source }
        };

        let bytes = serde_json::to_vec(&self.parameters).map_err(json_err(PARAMS_FILE))?;
        let doc: ParameterDocument =
            serde_json::from_slice(&bytes).map_err(json_err(PARAMS_FILE))?;
        let params = StandardizationParameters::try_from(doc).map_err(|source| {
            ExportError::InvalidParameters {
                path: PathBuf::from(PARAMS_FILE),
                source,
            }
        })?;

        let bytes = serde_json::to_vec(&self.catalog).map_err(json_err(CATALOG_FILE))?;
        let catalog = serde_json::from_slice(&bytes).map_err(json_err(CATALOG_FILE))?;
        Ok((params, catalog))
    }
}

pub struct ExportSummary {
    pub params_path: PathBuf,
    pub catalog_path: PathBuf,
    pub entries: usize,
}

/// Write both artifacts into `out_dir`, creating it if needed.
pub fn export_artifacts(
    out_dir: &Path,
    params: Option<&StandardizationParameters>,
    records: &[Record],
) -> Result<ExportSummary> {
    let artifacts = ArtifactSet::build(params, records)?;
    write_artifacts(out_dir, &artifacts)
}

pub fn write_artifacts(out_dir: &Path, artifacts: &ArtifactSet) -> Result<ExportSummary> {
    fs::create_dir_all(out_dir).map_err(|source| ExportError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let params_path = out_dir.join(PARAMS_FILE);
    let catalog_path = out_dir.join(CATALOG_FILE);

    write_json_atomic(&params_path, &artifacts.parameters)?;
    write_json_atomic(&catalog_path, &artifacts.catalog)?;

    log::info!(
        "Exported {} catalog entries to {}",
        artifacts.catalog.len(),
        out_dir.display()
    );

    Ok(ExportSummary {
        params_path,
        catalog_path,
        entries: artifacts.catalog.len(),
    })
}

/// Serialize into a temp file next to `path`, then rename over it, so a
/// reader sees either the old document or the complete new one.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    #[cfg(unix)]
    set_document_mode(tmp.as_file(), path).map_err(io_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, value).map_err(|source| ExportError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    log::debug!("Wrote {}", path.display());
    Ok(())
}

/// Temp files are created 0600; published documents keep the mode of the file
/// they replace, or 0644 when new.
#[cfg(unix)]
fn set_document_mode(file: &File, target: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = match fs::metadata(target) {
        Ok(meta) => meta.permissions(),
        Err(_) => fs::Permissions::from_mode(0o644),
    };
    file.set_permissions(permissions)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ExportError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Reload persisted parameters, read-only.
pub fn load_parameters(path: &Path) -> Result<StandardizationParameters> {
    let doc: ParameterDocument = read_json(path)?;
    StandardizationParameters::try_from(doc).map_err(|source| ExportError::InvalidParameters {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    read_json(path)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMismatch {
    pub row: usize,
    pub feature: Feature,
    pub expected: f64,
    pub stored: f64,
}

#[derive(Debug, Default)]
pub struct ConsistencyReport {
    pub checked: usize,
    pub max_abs_error: f64,
    pub feature_mismatches: Vec<FeatureMismatch>,
    /// Rows whose stored metadata doesn't match the raw record at that position.
    pub metadata_mismatches: Vec<usize>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.feature_mismatches.is_empty() && self.metadata_mismatches.is_empty()
    }
}

/// Check an in-memory artifact set against the raw records before anything
/// is written, going through the same JSON encoding the files use.
pub fn verify_artifacts(
    artifacts: &ArtifactSet,
    records: &[Record],
    tolerance: f64,
) -> Result<ConsistencyReport> {
    let (params, catalog) = artifacts.reparse()?;
    verify_consistency(&params, records, &catalog, tolerance)
}

/// Re-standardize raw records with `params` and compare against the stored
/// catalog values, position by position.
pub fn verify_consistency(
    params: &StandardizationParameters,
    records: &[Record],
    catalog: &[CatalogEntry],
    tolerance: f64,
) -> Result<ConsistencyReport> {
    if records.len() != catalog.len() {
        return Err(ExportError::LengthMismatch {
            catalog: catalog.len(),
            records: records.len(),
        });
    }

    let mut report = ConsistencyReport::default();
    for (row, (record, entry)) in records.iter().zip(catalog).enumerate() {
        report.checked += 1;
        if !entry.same_track(&record.meta) {
            report.metadata_mismatches.push(row);
        }

        let expected = params.transform(&record.features);
        for f in Feature::ALL {
            let (e, s) = (expected[f.index()], entry.vector()[f.index()]);
            let err = (e - s).abs();
            // NaN comparisons are false, so test the negation
            if !(err <= tolerance) {
                report.feature_mismatches.push(FeatureMismatch {
                    row,
                    feature: f,
                    expected: e,
                    stored: s,
                });
            }
            if err > report.max_abs_error {
                report.max_abs_error = err;
            }
        }
    }

    if !report.is_consistent() {
        log::warn!(
            "Consistency check: {} feature and {} metadata mismatches over {} rows",
            report.feature_mismatches.len(),
            report.metadata_mismatches.len(),
            report.checked
        );
    }
    Ok(report)
}
