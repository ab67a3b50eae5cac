//! `calib run`: independent batch files calibrated in parallel.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cal_core::{EventBatch, Met};
use cal_corrections::{CalibrationPipeline, CalibrationReport, Cutflow, PipelineConfig};
use cal_table::TableStore;

#[derive(Debug, Serialize)]
struct BatchOutput {
    file: String,
    dataset: String,
    n_events: usize,
    met: Vec<Met>,
    jet_pt: Vec<Vec<f64>>,
    /// `nominal` plus every `<weight>Up` / `<weight>Down`
    weights: BTreeMap<String, Vec<f64>>,
    sum_of_weights: f64,
    cutflow: Cutflow,
    report: CalibrationReport,
}

pub(crate) fn cmd_run(
    events: &[PathBuf],
    config: &Path,
    tables: &Path,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    let cfg = PipelineConfig::from_path(config).with_context(|| format!("invalid config {}", config.display()))?;
    let store = TableStore::new(tables);
    let pipeline = CalibrationPipeline::new(&store, cfg.clone())
        .with_context(|| format!("building pipeline from tables in {}", tables.display()))?;
    tracing::info!(year = %cfg.year, files = events.len(), "pipeline ready");

    let batches: Vec<BatchOutput> =
        events.par_iter().map(|path| process_file(&pipeline, path)).collect::<Result<_>>()?;

    let mut cutflow: Option<Cutflow> = None;
    for b in &batches {
        match cutflow.as_mut() {
            None => cutflow = Some(b.cutflow.clone()),
            Some(c) => c.merge(&b.cutflow)?,
        }
    }
    let n_events: usize = batches.iter().map(|b| b.n_events).sum();
    let sum_of_weights: f64 = batches.iter().map(|b| b.sum_of_weights).sum();

    crate::write_json(
        output,
        serde_json::json!({
            "year": cfg.year.as_str(),
            "sample": cfg.sample,
            "shift": cfg.shift.to_string(),
            "n_events": n_events,
            "sum_of_weights": sum_of_weights,
            "cutflow": cutflow,
            "batches": batches,
        }),
    )
}

fn process_file(pipeline: &CalibrationPipeline, path: &Path) -> Result<BatchOutput> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut batch: EventBatch =
        serde_json::from_str(&text).with_context(|| format!("parsing events from {}", path.display()))?;
    let out = pipeline.process(&mut batch).with_context(|| format!("calibrating {}", path.display()))?;

    let nominal = out.ledger.weight(None)?;
    let mut weights = BTreeMap::new();
    for v in out.ledger.variations() {
        let w = out.ledger.weight(Some(&v))?;
        weights.insert(v, w);
    }
    let cutflow = Cutflow::compute(&out.selection, &nominal)?;
    let sum_of_weights = nominal.iter().sum();
    weights.insert("nominal".to_string(), nominal);

    tracing::info!(path = %path.display(), n_events = batch.n_events(), sum_of_weights, "batch done");

    Ok(BatchOutput {
        file: path.display().to_string(),
        dataset: batch.dataset.clone(),
        n_events: batch.n_events(),
        met: batch.met.clone(),
        jet_pt: batch.jets.map(|j| j.pt).to_nested(),
        weights,
        sum_of_weights,
        cutflow,
        report: out.report,
    })
}
