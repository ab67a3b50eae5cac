//! Hadronic tau identification and di-tau trigger weights.
//!
//! DeepTau scale factors depend on what the reconstructed tau really is,
//! so each discriminant only reweights taus with the matching generator
//! flavour: electrons faking taus for vs-e, muons for vs-mu, genuine taus
//! for vs-jet.

use serde::{Deserialize, Serialize};

use cal_core::{EventBatch, Result, Tau, Year};
use cal_table::{ScaleFactorTable, TableGroup, TableStore};

use crate::ledger::WeightLedger;
use crate::masked::{MaskedEvaluator, ObjectFactors, SystLabels};
use crate::trigger::{self, TriggerPath};
use crate::working_points::{TauIdSelection, TauVsMuWp, TauWp};

/// Decay modes with DeepTau vs-jet scale factors.
pub const VS_JET_DECAY_MODES: [i32; 5] = [0, 1, 2, 10, 11];
/// Decay modes with di-tau trigger scale factors.
pub const TRIGGER_DECAY_MODES: [i32; 4] = [-1, 0, 1, 10];

/// Tau weight settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TauConfig {
    pub selection: TauIdSelection,
    /// Di-tau paths whose trigger scale factor is applied; empty disables it.
    pub hlt_paths: Vec<TriggerPath>,
}

impl Default for TauConfig {
    fn default() -> Self {
        Self {
            selection: TauIdSelection { vs_jet: TauWp::Medium, vs_e: TauWp::VVLoose, vs_mu: TauVsMuWp::Tight },
            hlt_paths: Vec::new(),
        }
    }
}

/// Tau scale factors for one year.
#[derive(Debug, Clone)]
pub struct TauCorrector {
    config: TauConfig,
    vs_e: ScaleFactorTable,
    vs_mu: ScaleFactorTable,
    vs_jet: ScaleFactorTable,
    trigger: Option<ScaleFactorTable>,
}

impl TauCorrector {
    pub fn new(store: &TableStore, year: Year, config: &TauConfig) -> Result<Self> {
        let table = |name: &str| store.syst_table(TableGroup::Tau, year, name, "syst");
        let vs_e = table("DeepTau2017v2p1VSe")?;
        let vs_mu = table("DeepTau2017v2p1VSmu")?;
        let vs_jet = table("DeepTau2017v2p1VSjet")?;
        let trigger = if config.hlt_paths.is_empty() { None } else { Some(table("tau_trigger")?) };
        tracing::debug!(
            year = %year,
            vs_jet = %config.selection.vs_jet,
            vs_e = %config.selection.vs_e,
            vs_mu = %config.selection.vs_mu,
            "tau corrector ready"
        );
        Ok(Self { config: config.clone(), vs_e, vs_mu, vs_jet, trigger })
    }

    /// Electron-to-tau fake-rate factors.
    pub fn vs_e(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let wp = self.config.selection.vs_e;
        let eval = MaskedEvaluator::new(&batch.taus, |t: &Tau| {
            matches!(t.gen_part_flav, 1 | 3) && t.id_vs_e > wp.threshold()
        })
        .real("eta", |t| t.eta, 0.0)
        .int("genmatch", |t| i64::from(t.gen_part_flav), 1)
        .tag("wp", wp.table_key());
        ObjectFactors::evaluate(&eval, &self.vs_e, SystLabels::NOM_UP_DOWN, with_variations)
    }

    /// Muon-to-tau fake-rate factors.
    pub fn vs_mu(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let wp = self.config.selection.vs_mu;
        let eval = MaskedEvaluator::new(&batch.taus, |t: &Tau| {
            matches!(t.gen_part_flav, 2 | 4) && t.id_vs_mu > wp.threshold()
        })
        .real("eta", |t| t.eta, 0.0)
        .int("genmatch", |t| i64::from(t.gen_part_flav), 2)
        .tag("wp", wp.table_key());
        ObjectFactors::evaluate(&eval, &self.vs_mu, SystLabels::NOM_UP_DOWN, with_variations)
    }

    /// Genuine-tau identification factors, pt-binned.
    pub fn vs_jet(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let sel = self.config.selection;
        let eval = MaskedEvaluator::new(&batch.taus, |t: &Tau| {
            VS_JET_DECAY_MODES.contains(&t.decay_mode) && t.gen_part_flav == 5 && t.id_vs_jet > sel.vs_jet.threshold()
        })
        .real("pt", |t| t.pt, 30.0)
        .int("dm", |t| i64::from(t.decay_mode), 0)
        .int("genmatch", |t| i64::from(t.gen_part_flav), 5)
        .tag("wp", sel.vs_jet.table_key())
        .tag("wp_VSe", sel.vs_e.table_key())
        .tag("flag", "pt");
        ObjectFactors::evaluate(&eval, &self.vs_jet, SystLabels::DEFAULT_UP_DOWN, with_variations)
    }

    /// Di-tau trigger factors for taus matched to a trigger object in fired
    /// events. `None` when no paths are configured.
    pub fn trigger(&self, batch: &EventBatch, with_variations: bool) -> Result<Option<ObjectFactors>> {
        let Some(ref table) = self.trigger else {
            return Ok(None);
        };
        let vs_jet = self.config.selection.vs_jet;
        let fired = trigger::fired(batch, &self.config.hlt_paths);
        let matched = trigger::matched(&batch.taus, &batch.trig_objs, &self.config.hlt_paths)?;
        let eval = MaskedEvaluator::new(&batch.taus, |t: &Tau| {
            t.pt >= 40.0 && TRIGGER_DECAY_MODES.contains(&t.decay_mode) && t.id_vs_jet > vs_jet.threshold()
        })
        .and_event_mask(&fired)?
        .and_mask(&matched)?
        .real("pt", |t| t.pt, 40.0)
        .int("dm", |t| i64::from(t.decay_mode), -1)
        .tag("trigtype", "ditau")
        .tag("wp", vs_jet.table_key())
        .tag("corrtype", "sf");
        ObjectFactors::evaluate(&eval, table, SystLabels::NOM_UP_DOWN, with_variations).map(Some)
    }

    /// Register every tau weight.
    pub fn add_weights(&self, batch: &EventBatch, ledger: &mut WeightLedger, with_variations: bool) -> Result<()> {
        self.vs_e(batch, with_variations)?.add_to(ledger, "tau_id_vs_e")?;
        self.vs_mu(batch, with_variations)?.add_to(ledger, "tau_id_vs_mu")?;
        self.vs_jet(batch, with_variations)?.add_to(ledger, "tau_id_vs_jet")?;
        if let Some(f) = self.trigger(batch, with_variations)? {
            f.add_to(ledger, "tau_trigger")?;
        }
        Ok(())
    }
}
