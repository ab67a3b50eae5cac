//! Muon momentum scale and resolution (Rochester-style) corrections.
//!
//! Recorded data get a scale correction. Simulated muons get a spread
//! correction when a generator muon is matched, otherwise a smearing
//! correction driven by a reproducible uniform draw. The shifted variants
//! move the scale by its error: `pt·k ± pt·err`.

use cal_core::prng::{seed_from, uniform};
use cal_core::{EventBatch, Jagged, Muon, Result, Year};
use cal_table::{ScaleFactorTable, TableGroup, TableStore};

use crate::masked::MaskedEvaluator;
use crate::met::propagate_pt_change;
use crate::working_points::Shift;

/// |eta| covered by the scale tables.
pub const SCALE_MAX_ABS_ETA: f64 = 2.4;

#[derive(Debug, Clone)]
struct ScalePair {
    value: ScaleFactorTable,
    error: Option<ScaleFactorTable>,
}

impl ScalePair {
    fn load(store: &TableStore, year: Year, name: &str, with_error: bool) -> Result<Self> {
        let value = store.table(TableGroup::MuonScale, year, name)?;
        let error = if with_error {
            Some(store.table(TableGroup::MuonScale, year, &format!("{name}_error"))?)
        } else {
            None
        };
        Ok(Self { value, error })
    }
}

/// Summary of one momentum-scale pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MuonScaleResult {
    /// Muon pt before the correction
    pub pt_raw: Vec<f64>,
    /// Applied factor per muon, including the shift
    pub factor: Vec<f64>,
    /// Muons that took the smearing branch
    pub n_smeared: usize,
}

/// Momentum-scale corrector for one year and sample kind.
#[derive(Debug, Clone)]
pub struct MuonScaleCorrector {
    is_mc: bool,
    shift: Shift,
    data: Option<ScalePair>,
    spread: Option<ScalePair>,
    smear: Option<ScalePair>,
}

impl MuonScaleCorrector {
    /// Load the tables the sample kind needs. Error tables are read only
    /// when `shift` is a Rochester variation.
    pub fn new(store: &TableStore, year: Year, is_mc: bool, shift: Shift) -> Result<Self> {
        let with_error = matches!(shift, Shift::RochesterUp | Shift::RochesterDown);
        let (data, spread, smear) = if is_mc {
            (
                None,
                Some(ScalePair::load(store, year, "kSpreadMC", with_error)?),
                Some(ScalePair::load(store, year, "kSmearMC", with_error)?),
            )
        } else {
            (Some(ScalePair::load(store, year, "kScaleDT", with_error)?), None, None)
        };
        tracing::debug!(year = %year, is_mc, shift = %shift, "muon momentum scale ready");
        Ok(Self { is_mc, shift, data, spread, smear })
    }

    fn in_domain(m: &Muon) -> bool {
        m.pt > 0.0 && m.eta.abs() < SCALE_MAX_ABS_ETA
    }

    fn sign(&self) -> f64 {
        match self.shift {
            Shift::RochesterUp => 1.0,
            Shift::RochesterDown => -1.0,
            _ => 0.0,
        }
    }

    /// Per-muon factors, `k + sign·err`, where masked-out muons get 1.
    pub fn factors(&self, batch: &EventBatch) -> Result<(Vec<f64>, usize)> {
        let muons = &batch.muons;
        let sign = self.sign();

        if !self.is_mc {
            let Some(ref data) = self.data else {
                return Ok((vec![1.0; muons.len()], 0));
            };
            let eval = scale_inputs(MaskedEvaluator::new(muons, Self::in_domain));
            let k = eval.evaluate_plain(&data.value)?;
            let err = shifted_error(&eval, data, sign)?;
            return Ok((combine(&k, err.as_ref()), 0));
        }

        let (Some(spread), Some(smear)) = (&self.spread, &self.smear) else {
            return Ok((vec![1.0; muons.len()], 0));
        };
        let events = muons.broadcast(&batch.event)?;
        let draws: Vec<f64> = muons
            .flat()
            .iter()
            .zip(&events)
            .map(|(m, &ev)| uniform(seed_from(&[m.pt, m.eta, m.phi], ev)))
            .collect();

        let spread_eval = scale_inputs(MaskedEvaluator::new(muons, Self::in_domain).and_where(|m| m.gen_pt.is_some()))
            .real("gen_pt", |m| m.gen_pt.unwrap_or(40.0), 40.0);
        let smear_eval = scale_inputs(MaskedEvaluator::new(muons, Self::in_domain).and_where(|m| m.gen_pt.is_none()))
            .int("n_tracker_layers", |m| i64::from(m.n_tracker_layers), 10)
            .real_column("u", draws, 0.5)?;

        let k_spread = spread_eval.evaluate_plain(&spread.value)?;
        let k_smear = smear_eval.evaluate_plain(&smear.value)?;
        let err_spread = shifted_error(&spread_eval, spread, sign)?;
        let err_smear = shifted_error(&smear_eval, smear, sign)?;

        let n_smeared = smear_eval.mask().iter().filter(|&&m| m).count();
        let f_spread = combine(&k_spread, err_spread.as_ref());
        let f_smear = combine(&k_smear, err_smear.as_ref());
        // The two masks are disjoint, so one of the factors is always 1.
        let factors = f_spread.iter().zip(&f_smear).map(|(a, b)| a * b).collect();
        Ok((factors, n_smeared))
    }

    /// Rewrite muon pt and propagate the change to MET.
    pub fn apply(&self, batch: &mut EventBatch) -> Result<MuonScaleResult> {
        let (factor, n_smeared) = self.factors(batch)?;
        let pt_raw: Vec<f64> = batch.muons.flat().iter().map(|m| m.pt).collect();
        for (m, f) in batch.muons.flat_mut().iter_mut().zip(&factor) {
            m.pt *= f;
        }
        batch.met = propagate_pt_change(&batch.met, &batch.muons, &pt_raw)?;
        tracing::debug!(muons = pt_raw.len(), smeared = n_smeared, shift = %self.shift, "muon momentum scale applied");
        Ok(MuonScaleResult { pt_raw, factor, n_smeared })
    }
}

fn scale_inputs(eval: MaskedEvaluator<'_, Muon>) -> MaskedEvaluator<'_, Muon> {
    eval.int("charge", |m| i64::from(m.charge), 1)
        .real("eta", |m| m.eta, 0.0)
        .real("phi", |m| m.phi, 0.0)
        .real("pt", |m| m.pt, 40.0)
}

/// `sign·err` where the evaluator's mask holds, 0 elsewhere.
fn shifted_error(eval: &MaskedEvaluator<'_, Muon>, pair: &ScalePair, sign: f64) -> Result<Option<Jagged<f64>>> {
    match pair.error {
        Some(ref table) if sign != 0.0 => {
            let err = eval.evaluate_with(0.0, |args| table.evaluate_args(args))?;
            Ok(Some(err.map(|e| sign * e)))
        }
        _ => Ok(None),
    }
}

fn combine(k: &Jagged<f64>, err: Option<&Jagged<f64>>) -> Vec<f64> {
    match err {
        Some(e) => k.flat().iter().zip(e.flat()).map(|(k, e)| k + e).collect(),
        None => k.flat().to_vec(),
    }
}
