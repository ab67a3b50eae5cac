//! Electron identification, reconstruction and trigger weights.

use serde::{Deserialize, Serialize};

use cal_core::{Electron, EventBatch, Result, Year};
use cal_table::{ScaleFactorTable, TableGroup, TableStore};

use crate::ledger::WeightLedger;
use crate::masked::{MaskedEvaluator, ObjectFactors, SystLabels};
use crate::trigger::{self, TriggerPath};
use crate::working_points::ElectronId;

const SF_TABLE: &str = "UL-Electron-ID-SF";
const TRIGGER_TABLE: &str = "trigger_eff";
/// Upper pt edge of the published scale factors.
pub const ELECTRON_MAX_PT: f64 = 499.999;

/// Electron weight settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectronConfig {
    pub id: ElectronId,
    /// Paths whose trigger efficiency is applied; empty disables it.
    pub hlt_paths: Vec<TriggerPath>,
}

impl Default for ElectronConfig {
    fn default() -> Self {
        Self { id: ElectronId::Wp80Iso, hlt_paths: Vec::new() }
    }
}

/// Electron scale factors for one year.
#[derive(Debug, Clone)]
pub struct ElectronCorrector {
    year: Year,
    config: ElectronConfig,
    sf: ScaleFactorTable,
    trigger: Option<ScaleFactorTable>,
}

impl ElectronCorrector {
    pub fn new(store: &TableStore, year: Year, config: &ElectronConfig) -> Result<Self> {
        let sf = store.syst_table(TableGroup::Electron, year, SF_TABLE, "ValType")?;
        let trigger = if config.hlt_paths.is_empty() {
            None
        } else {
            Some(store.table(TableGroup::ElectronTrigger, year, TRIGGER_TABLE)?)
        };
        tracing::debug!(year = %year, id = %config.id, trigger = trigger.is_some(), "electron corrector ready");
        Ok(Self { year, config: config.clone(), sf, trigger })
    }

    fn sf_factors(
        &self,
        eval: MaskedEvaluator<'_, Electron>,
        working_point: &str,
        placeholder_pt: f64,
        with_variations: bool,
    ) -> Result<ObjectFactors> {
        let eval = eval
            .real("eta", |e| e.eta, 0.0)
            .real("pt", |e| e.pt, placeholder_pt)
            .tag("year", self.year.as_str())
            .tag("WorkingPoint", working_point);
        ObjectFactors::evaluate(&eval, &self.sf, SystLabels::EGAMMA, with_variations)
    }

    /// Identification factors for electrons passing the id working point.
    pub fn id(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let id = self.config.id;
        let eval = MaskedEvaluator::new(&batch.electrons, |e: &Electron| {
            e.pt > 10.0 && e.pt < ELECTRON_MAX_PT && id.passes(e)
        });
        self.sf_factors(eval, id.table_key(), 10.0, with_variations)
    }

    /// Reconstruction factors above 20 GeV.
    pub fn reco_above_20(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let eval = MaskedEvaluator::new(&batch.electrons, |e: &Electron| e.pt > 20.1 && e.pt < ELECTRON_MAX_PT);
        self.sf_factors(eval, "RecoAbove20", 20.1, with_variations)
    }

    /// Reconstruction factors between 10 and 20 GeV.
    pub fn reco_below_20(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let eval = MaskedEvaluator::new(&batch.electrons, |e: &Electron| e.pt > 10.0 && e.pt < 20.0);
        self.sf_factors(eval, "RecoBelow20", 15.0, with_variations)
    }

    /// Trigger efficiency ratio for fired events and matched electrons.
    /// Nominal only; `None` when no paths are configured.
    pub fn trigger(&self, batch: &EventBatch) -> Result<Option<ObjectFactors>> {
        let Some(ref table) = self.trigger else {
            return Ok(None);
        };
        let fired = trigger::fired(batch, &self.config.hlt_paths);
        let matched = trigger::matched(&batch.electrons, &batch.trig_objs, &self.config.hlt_paths)?;
        let eval = MaskedEvaluator::new(&batch.electrons, |e: &Electron| {
            e.pt > 10.0 && e.pt < ELECTRON_MAX_PT && e.eta.abs() < 2.4
        })
        .and_event_mask(&fired)?
        .and_mask(&matched)?
        .real("pt", |e| e.pt, 10.0)
        .real("eta", |e| e.eta, 0.0);
        let nominal = eval.evaluate_plain(table)?;
        Ok(Some(ObjectFactors { nominal, up: None, down: None }))
    }

    /// Register every electron weight.
    pub fn add_weights(&self, batch: &EventBatch, ledger: &mut WeightLedger, with_variations: bool) -> Result<()> {
        self.id(batch, with_variations)?.add_to(ledger, "electron_id")?;
        self.reco_above_20(batch, with_variations)?.add_to(ledger, "electron_reco")?;
        self.reco_below_20(batch, with_variations)?.add_to(ledger, "electron_reco_below20")?;
        if let Some(f) = self.trigger(batch)? {
            f.add_to(ledger, "electron_trigger")?;
        }
        Ok(())
    }
}
