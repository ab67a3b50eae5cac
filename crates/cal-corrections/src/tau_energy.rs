//! Tau energy scale for simulated hadronic taus.

use cal_core::{EventBatch, Result, Tau, Year};
use cal_table::{ScaleFactorTable, TableGroup, TableStore};

use crate::masked::MaskedEvaluator;
use crate::met::propagate_pt_change;
use crate::working_points::Shift;

/// Generator flavours the scale applies to: prompt e, prompt mu, genuine
/// tau and unmatched.
pub const TES_GENMATCH: [i32; 4] = [1, 2, 5, 6];
/// Decay modes with a measured scale.
pub const TES_DECAY_MODES: [i32; 5] = [0, 1, 2, 10, 11];

/// Scales tau pt and mass and propagates the change to MET.
#[derive(Debug, Clone)]
pub struct TauEnergyScale {
    table: ScaleFactorTable,
    shift: Shift,
}

impl TauEnergyScale {
    pub fn new(store: &TableStore, year: Year, shift: Shift) -> Result<Self> {
        let table = store.syst_table(TableGroup::Tau, year, "tau_energy_scale", "syst")?;
        Ok(Self { table, shift })
    }

    /// Per-tau factor, 1 for taus outside the measured categories.
    pub fn factors(&self, batch: &EventBatch) -> Result<Vec<f64>> {
        let eval = MaskedEvaluator::new(&batch.taus, |t: &Tau| {
            TES_GENMATCH.contains(&t.gen_part_flav) && TES_DECAY_MODES.contains(&t.decay_mode)
        })
        .real("pt", |t| t.pt, 30.0)
        .real("eta", |t| t.eta, 0.0)
        .int("dm", |t| i64::from(t.decay_mode), 0)
        .int("genmatch", |t| i64::from(t.gen_part_flav), 2)
        .tag("id", "DeepTau2017v2p1");
        Ok(eval.evaluate(&self.table, self.shift.tau_label())?.into_flat())
    }

    /// Rewrite tau pt and mass, then MET. Returns the pt before scaling.
    pub fn apply(&self, batch: &mut EventBatch) -> Result<Vec<f64>> {
        let factors = self.factors(batch)?;
        let pt_raw: Vec<f64> = batch.taus.flat().iter().map(|t| t.pt).collect();
        for (t, f) in batch.taus.flat_mut().iter_mut().zip(&factors) {
            t.pt *= f;
            t.mass *= f;
        }
        batch.met = propagate_pt_change(&batch.met, &batch.taus, &pt_raw)?;
        let scaled = factors.iter().filter(|&&f| f != 1.0).count();
        tracing::debug!(taus = pt_raw.len(), scaled, shift = self.shift.tau_label(), "tau energy scale applied");
        Ok(pt_raw)
    }
}
