//! End-to-end calibration of one event batch.
//!
//! The stage order is fixed:
//!
//! ```text
//! JEC → Type-1 MET → JEC uncertainty → JER → JER MET → (jet-veto MET)
//!     → tau energy scale → muon momentum scale → MET φ
//!     → genweight → prefiring → pileup → pileup jet id
//!     → electron → muon → tau weights → b-tag
//! ```
//!
//! Kinematic stages rewrite the batch in place; weight stages only add to
//! the ledger. Every table is resolved in [`CalibrationPipeline::new`], so a
//! bad configuration fails before the first event is touched.

use serde::Serialize;

use cal_core::{Error, EventBatch, Result};
use cal_table::TableStore;

use crate::btag::BTagReweighter;
use crate::config::PipelineConfig;
use crate::cutflow::Selection;
use crate::electron::ElectronCorrector;
use crate::event_weights::{PileupReweighter, add_genweight, add_prefiring_weight};
use crate::jet::{JetCalibration, JetCalibrator};
use crate::jet_veto::JetVetoMap;
use crate::ledger::WeightLedger;
use crate::met::{MetPhiCorrector, jet_veto_adjustment};
use crate::muon::MuonCorrector;
use crate::muon_scale::MuonScaleCorrector;
use crate::pujetid::PileupJetId;
use crate::tau::TauCorrector;
use crate::tau_energy::TauEnergyScale;

/// State of the batch after one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    /// Stage name
    pub stage: String,
    /// Objects the stage touched
    pub objects: usize,
    /// Mean MET after the stage
    pub mean_met: f64,
}

/// What a pipeline run did, for logs and output files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub year: String,
    pub is_mc: bool,
    pub shift: String,
    pub n_events: usize,
    pub stages: Vec<StageSummary>,
    /// Registered weights in ledger order
    pub weights: Vec<String>,
    pub variations: Vec<String>,
    pub sum_of_weights: f64,
    /// Jets entering the Type-1 MET correction
    pub n_type1_jets: usize,
    /// Jets whose smearing hit the energy floor
    pub n_jer_clamped: usize,
}

/// Result of [`CalibrationPipeline::process`]; the batch itself is
/// corrected in place.
#[derive(Debug, Clone)]
pub struct CalibrationOutput {
    pub ledger: WeightLedger,
    pub jets: JetCalibration,
    /// Per-jet veto flag, true when the jet survives (when the map ran)
    pub jet_veto_keep: Option<Vec<bool>>,
    /// Event-quality cuts produced on the way (currently the jet veto)
    pub selection: Selection,
    pub report: CalibrationReport,
}

/// Every corrector a configuration asks for, built once and shared by all
/// batches of a run.
#[derive(Debug, Clone)]
pub struct CalibrationPipeline {
    config: PipelineConfig,
    jets: JetCalibrator,
    jet_veto: Option<JetVetoMap>,
    tau_energy: Option<TauEnergyScale>,
    muon_scale: Option<MuonScaleCorrector>,
    met_phi: Option<MetPhiCorrector>,
    pileup: Option<PileupReweighter>,
    pileup_jet_id: Option<PileupJetId>,
    btag: Option<BTagReweighter>,
    electron: Option<ElectronCorrector>,
    muon: Option<MuonCorrector>,
    tau: Option<TauCorrector>,
}

fn build<T>(enabled: bool, f: impl FnOnce() -> Result<T>) -> Result<Option<T>> {
    if enabled { f().map(Some) } else { Ok(None) }
}

impl CalibrationPipeline {
    /// Validate `config` and resolve every table it needs.
    pub fn new(store: &TableStore, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let year = config.year;
        let mc = config.is_mc();
        let stages = config.stages;

        let jets = JetCalibrator::new(store, year, &config.jerc, mc, config.era.as_deref())?;
        let jet_veto = build(stages.jet_veto_map, || JetVetoMap::new(store, year, &config.jet_veto_map_type))?;
        let tau_energy = build(mc && stages.tau_energy_scale, || TauEnergyScale::new(store, year, config.shift))?;
        let muon_scale = build(stages.rochester, || MuonScaleCorrector::new(store, year, mc, config.shift))?;
        let met_phi = build(stages.met_phi, || MetPhiCorrector::new(store, year, mc))?;
        let pileup = build(mc, || PileupReweighter::new(store, year))?;
        let pileup_jet_id = build(mc && stages.pileup_jet_id, || PileupJetId::new(store, year, config.pileup_jet_id))?;
        let btag = build(mc && stages.btag, || BTagReweighter::new(store, year, config.btag))?;
        let electron = build(mc && stages.electron_weights, || ElectronCorrector::new(store, year, &config.electron))?;
        let muon = build(mc && stages.muon_weights, || MuonCorrector::new(store, year, &config.muon))?;
        let tau = build(mc && stages.tau_weights, || TauCorrector::new(store, year, &config.tau))?;

        tracing::info!(year = %year, is_mc = mc, shift = %config.shift, "calibration pipeline ready");
        Ok(Self {
            config,
            jets,
            jet_veto,
            tau_energy,
            muon_scale,
            met_phi,
            pileup,
            pileup_jet_id,
            btag,
            electron,
            muon,
            tau,
        })
    }

    /// Configuration the pipeline was built from.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage on `batch`.
    pub fn process(&self, batch: &mut EventBatch) -> Result<CalibrationOutput> {
        batch.normalize()?;
        let mc = self.config.is_mc();
        if batch.is_mc() != mc {
            return Err(Error::Validation(format!(
                "pipeline configured for {} but the batch {} generator weights",
                if mc { "simulation" } else { "data" },
                if batch.is_mc() { "carries" } else { "has no" }
            )));
        }
        let n_events = batch.n_events();
        let with_variations = self.config.with_variations();
        let mut stages = Vec::new();
        let mut record = |stage: &str, objects: usize, batch: &EventBatch| {
            let mean_met = if n_events == 0 {
                0.0
            } else {
                batch.met.iter().map(|m| m.pt).sum::<f64>() / n_events as f64
            };
            tracing::debug!(stage, objects, mean_met, "stage done");
            stages.push(StageSummary { stage: stage.to_string(), objects, mean_met });
        };

        let jets = self.jets.calibrate(batch)?;
        record("jets", batch.jets.len(), batch);

        let mut selection = Selection::new(n_events);
        let mut jet_veto_keep = None;
        if let Some(ref veto) = self.jet_veto {
            let keep = veto.keep_mask(&batch.jets)?;
            batch.met = jet_veto_adjustment(&batch.met, &batch.jets, &keep)?;
            let vetoed = keep.iter().filter(|&&k| !k).count();
            let clean =
                batch.jets.with_flat(keep.clone())?.iter_events().map(|ev| ev.iter().all(|&k| k)).collect();
            selection.add("jet_veto", clean)?;
            record("jet_veto", vetoed, batch);
            jet_veto_keep = Some(keep);
        }
        if let Some(ref tes) = self.tau_energy {
            tes.apply(batch)?;
            record("tau_energy_scale", batch.taus.len(), batch);
        }
        if let Some(ref scale) = self.muon_scale {
            scale.apply(batch)?;
            record("muon_momentum_scale", batch.muons.len(), batch);
        }
        if let Some(ref phi) = self.met_phi {
            batch.met = phi.correct(batch)?;
            record("met_phi", n_events, batch);
        }

        let mut ledger = WeightLedger::new(n_events);
        if mc {
            self.add_weights(batch, &mut ledger, with_variations)?;
        }

        let report = CalibrationReport {
            year: self.config.year.to_string(),
            is_mc: mc,
            shift: self.config.shift.to_string(),
            n_events,
            stages,
            weights: ledger.names().into_iter().map(String::from).collect(),
            variations: ledger.variations(),
            sum_of_weights: ledger.sum_of_weights(),
            n_type1_jets: jets.n_type1,
            n_jer_clamped: jets.n_clamped,
        };
        tracing::info!(events = n_events, weights = report.weights.len(), "batch calibrated");
        Ok(CalibrationOutput { ledger, jets, jet_veto_keep, selection, report })
    }

    fn add_weights(&self, batch: &EventBatch, ledger: &mut WeightLedger, with_variations: bool) -> Result<()> {
        add_genweight(batch, ledger)?;
        add_prefiring_weight(batch, self.config.year, ledger, with_variations)?;
        if let Some(ref pu) = self.pileup {
            pu.add_weight(batch, ledger, with_variations)?;
        }
        if let Some(ref puid) = self.pileup_jet_id {
            puid.add_weight(&batch.jets, ledger, with_variations)?;
        }
        if let Some(ref e) = self.electron {
            e.add_weights(batch, ledger, with_variations)?;
        }
        if let Some(ref m) = self.muon {
            m.add_weights(batch, ledger, with_variations)?;
        }
        if let Some(ref t) = self.tau {
            t.add_weights(batch, ledger, with_variations)?;
        }
        if let Some(ref btag) = self.btag {
            btag.add_weights(&batch.jets, ledger, with_variations)?;
        }
        Ok(())
    }
}
