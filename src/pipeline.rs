//! Batch pipeline: load → fit → (train) → verify in memory → export → re-verify.
//!
//! Strictly sequential. The fitted parameters are created once and passed by
//! reference to every later stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::classifier::softmax::SoftmaxRegression;
use crate::classifier::{self, Evaluation};
use crate::config::TrainingConfig;
use crate::dataset::{self, DroppedRow, LoadResult};
use crate::export::{self, ArtifactSet, CONSISTENCY_TOLERANCE, ConsistencyReport, ExportSummary};
use crate::models::Record;
use crate::popularity::{self, Thresholds};
use crate::standardize::{StandardizationParameters, StandardizeError};

pub struct PipelineOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub thresholds: Thresholds,
    /// `None` skips classifier training.
    pub training: Option<TrainingConfig>,
    pub show_progress: bool,
}

pub struct PipelineReport {
    pub total_rows: usize,
    pub loaded: usize,
    pub dropped: Vec<DroppedRow>,
    pub distribution: [usize; 3],
    pub params: StandardizationParameters,
    pub evaluation: Option<Evaluation>,
    pub export: ExportSummary,
    pub consistency: ConsistencyReport,
}

pub fn run(options: &PipelineOptions) -> Result<PipelineReport> {
    let loaded = dataset::load_records(&options.input)
        .with_context(|| format!("Failed to load {}", options.input.display()))?;
    let records = loaded.records;

    let params = StandardizationParameters::fit_records(&records)
        .context("Failed to fit standardizer")?;
    let distribution = popularity::class_distribution(&records, &options.thresholds);

    // Training is independent of the artifacts; a failure is reported, not fatal
    let evaluation = match &options.training {
        Some(config) => {
            let trainer = SoftmaxRegression {
                show_progress: options.show_progress,
                ..SoftmaxRegression::from(config)
            };
            match classifier::train_and_evaluate(
                &trainer,
                &records,
                &params,
                &options.thresholds,
                config,
            ) {
                Ok((_, evaluation)) => Some(evaluation),
                Err(e) => {
                    log::warn!("Classifier training failed: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    let artifacts =
        ArtifactSet::build(Some(&params), &records).context("Failed to build artifacts")?;
    let (summary, consistency) = export_verified(&options.output_dir, &artifacts, &records)?;

    Ok(PipelineReport {
        total_rows: loaded.total_rows,
        loaded: records.len(),
        dropped: loaded.dropped,
        distribution,
        params,
        evaluation,
        export: summary,
        consistency,
    })
}

/// Check the artifacts in memory, write them only if they pass, then read
/// the files back and check again.
fn export_verified(
    out_dir: &Path,
    artifacts: &ArtifactSet,
    records: &[Record],
) -> Result<(ExportSummary, ConsistencyReport)> {
    let staged = export::verify_artifacts(artifacts, records, CONSISTENCY_TOLERANCE)?;
    ensure_consistent(&staged, "Refusing to export inconsistent artifacts")?;

    let summary =
        export::write_artifacts(out_dir, artifacts).context("Failed to export artifacts")?;

    let reloaded = export::load_parameters(&summary.params_path)?;
    let catalog = export::load_catalog(&summary.catalog_path)?;
    let consistency =
        export::verify_consistency(&reloaded, records, &catalog, CONSISTENCY_TOLERANCE)?;
    ensure_consistent(&consistency, "Exported artifacts are inconsistent")?;

    Ok((summary, consistency))
}

fn ensure_consistent(report: &ConsistencyReport, what: &str) -> Result<()> {
    if !report.is_consistent() {
        bail!(
            "{}: {} feature and {} metadata mismatches",
            what,
            report.feature_mismatches.len(),
            report.metadata_mismatches.len()
        );
    }
    Ok(())
}

/// What `stats` reports about a loaded table.
pub struct DatasetStats {
    pub total_rows: usize,
    pub clean: usize,
    /// Dropped-row counts keyed by [`crate::dataset::DropReason::kind`].
    pub drop_reasons: BTreeMap<&'static str, usize>,
    pub distribution: [usize; 3],
    /// Fails when nothing survived cleaning.
    pub params: std::result::Result<StandardizationParameters, StandardizeError>,
}

pub fn dataset_stats(loaded: &LoadResult, thresholds: &Thresholds) -> DatasetStats {
    let mut drop_reasons = BTreeMap::new();
    for d in &loaded.dropped {
        *drop_reasons.entry(d.reason.kind()).or_insert(0) += 1;
    }

    let params = StandardizationParameters::fit_records(&loaded.records);
    if let Err(e) = &params {
        log::warn!("Feature statistics unavailable: {}", e);
    }

    DatasetStats {
        total_rows: loaded.total_rows,
        clean: loaded.records.len(),
        drop_reasons,
        distribution: popularity::class_distribution(&loaded.records, thresholds),
        params,
    }
}
