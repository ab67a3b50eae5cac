//! Missing transverse energy propagation.
//!
//! MET is the negative vector sum of everything reconstructed, so any change
//! to an object's transverse momentum shifts the MET by the opposite of the
//! object's change. All functions here return a fresh MET per event from the
//! current MET and the current collections; nothing is accumulated between
//! calls.

use cal_core::prng::{seed_from, uniform_in};
use cal_core::{Error, EventBatch, Jagged, Jet, Kinematics, Met, Muon, Result, Year};
use cal_core::kinematics::isolated_from;
use cal_table::{Arg, ScaleFactorTable, TableGroup, TableStore};

/// Minimum L1L2L3-corrected pt of a jet entering the Type-1 correction.
pub const TYPE1_MIN_PT: f64 = 15.0;
/// Maximum electromagnetic energy fraction of a Type-1 jet.
pub const TYPE1_MAX_EM_FRACTION: f64 = 0.9;
/// Minimum ΔR between a Type-1 jet and any muon.
pub const TYPE1_MUON_DR: f64 = 0.4;

fn check_events(what: &str, got: usize, met: &[Met]) -> Result<()> {
    if got != met.len() {
        return Err(Error::Validation(format!(
            "{what} covers {got} events, MET has {}",
            met.len()
        )));
    }
    Ok(())
}

fn check_objects(what: &str, got: usize, n_objects: usize) -> Result<()> {
    if got != n_objects {
        return Err(Error::Validation(format!(
            "{what} has {got} entries, collection holds {n_objects} objects"
        )));
    }
    Ok(())
}

/// MET after the objects' pt changed from `pt_old` to their current pt at
/// fixed azimuth: `met_xy + Σ (pt_new - pt_old) (cos φ, sin φ)`.
pub fn propagate_pt_change<T: Kinematics>(
    met: &[Met],
    objects: &Jagged<T>,
    pt_old: &[f64],
) -> Result<Vec<Met>> {
    check_events("collection", objects.n_events(), met)?;
    check_objects("old pt", pt_old.len(), objects.len())?;
    let offsets = objects.offsets();
    let flat = objects.flat();
    let out = met
        .iter()
        .enumerate()
        .map(|(ev, m)| {
            let (mut x, mut y) = (m.x(), m.y());
            for i in offsets[ev]..offsets[ev + 1] {
                let o = &flat[i];
                let dpt = o.pt() - pt_old[i];
                x += dpt * o.phi().cos();
                y += dpt * o.phi().sin();
            }
            Met::from_xy(x, y)
        })
        .collect();
    Ok(out)
}

/// Jets entering the Type-1 correction: L1L2L3 pt above threshold, small
/// electromagnetic fraction, and no muon within ΔR 0.4.
pub fn type1_eligible(jets: &Jagged<Jet>, pt_l123: &[f64], muons: &Jagged<Muon>) -> Result<Vec<bool>> {
    check_objects("L1L2L3 pt", pt_l123.len(), jets.len())?;
    let clean = isolated_from(jets, muons, TYPE1_MUON_DR)?;
    Ok(jets
        .flat()
        .iter()
        .zip(pt_l123)
        .zip(clean)
        .map(|((j, &pt), clean)| {
            pt > TYPE1_MIN_PT && j.ne_em_ef + j.ch_em_ef < TYPE1_MAX_EM_FRACTION && clean
        })
        .collect())
}

/// Type-1 MET: subtract the event sum of `(p_L123 - p_L1)` over eligible jets.
pub fn type1_correction(
    met: &[Met],
    jets: &Jagged<Jet>,
    pt_l1: &[f64],
    pt_l123: &[f64],
    eligible: &[bool],
) -> Result<Vec<Met>> {
    check_events("jets", jets.n_events(), met)?;
    check_objects("L1 pt", pt_l1.len(), jets.len())?;
    check_objects("L1L2L3 pt", pt_l123.len(), jets.len())?;
    check_objects("Type-1 mask", eligible.len(), jets.len())?;
    let offsets = jets.offsets();
    let flat = jets.flat();
    let out = met
        .iter()
        .enumerate()
        .map(|(ev, m)| {
            let (mut x, mut y) = (m.x(), m.y());
            for i in offsets[ev]..offsets[ev + 1] {
                if !eligible[i] {
                    continue;
                }
                let d = pt_l123[i] - pt_l1[i];
                x -= d * flat[i].phi.cos();
                y -= d * flat[i].phi.sin();
            }
            Met::from_xy(x, y)
        })
        .collect();
    Ok(out)
}

/// MET after removing vetoed jets: `met_xy - (Σ all jets - Σ kept jets)`.
pub fn jet_veto_adjustment(met: &[Met], jets: &Jagged<Jet>, keep: &[bool]) -> Result<Vec<Met>> {
    check_events("jets", jets.n_events(), met)?;
    check_objects("veto mask", keep.len(), jets.len())?;
    let offsets = jets.offsets();
    let flat = jets.flat();
    let out = met
        .iter()
        .enumerate()
        .map(|(ev, m)| {
            let (mut dx, mut dy) = (0.0, 0.0);
            for i in offsets[ev]..offsets[ev + 1] {
                if !keep[i] {
                    dx += flat[i].px();
                    dy += flat[i].py();
                }
            }
            Met::from_xy(m.x() - dx, m.y() - dy)
        })
        .collect();
    Ok(out)
}

/// Largest raw MET accepted by the φ-modulation tables.
const METPHI_MAX_PT: f64 = 6499.0;
/// Azimuth range accepted by the φ-modulation tables.
const METPHI_MAX_PHI: f64 = 3.5;

/// MET φ-modulation correction for one year.
#[derive(Debug, Clone)]
pub struct MetPhiCorrector {
    year: Year,
    is_mc: bool,
    pt: ScaleFactorTable,
    phi: ScaleFactorTable,
}

impl MetPhiCorrector {
    /// Load the `{pt,phi}_metphicorr_pfmet_{mc,data}` pair.
    pub fn new(store: &TableStore, year: Year, is_mc: bool) -> Result<Self> {
        let kind = if is_mc { "mc" } else { "data" };
        let pt = store.table(TableGroup::Met, year, &format!("pt_metphicorr_pfmet_{kind}"))?;
        let phi = store.table(TableGroup::Met, year, &format!("phi_metphicorr_pfmet_{kind}"))?;
        tracing::debug!(year = %year, kind, "MET phi corrector ready");
        Ok(Self { year, is_mc, pt, phi })
    }

    /// Run numbers fed to the tables. Simulation draws one per event from the
    /// year's run range, seeded by the event so reprocessing is stable.
    pub fn runs(&self, batch: &EventBatch) -> Vec<i64> {
        if !self.is_mc {
            return batch.run.iter().map(|&r| r as i64).collect();
        }
        let (lo, hi) = self.year.run_range();
        batch
            .met
            .iter()
            .zip(&batch.event)
            .map(|(m, &ev)| uniform_in(seed_from(&[m.pt, m.phi], ev), lo, hi) as i64)
            .collect()
    }

    /// Corrected MET per event.
    pub fn correct(&self, batch: &EventBatch) -> Result<Vec<Met>> {
        let pt: Vec<f64> = batch.met.iter().map(|m| m.pt.clamp(0.0, METPHI_MAX_PT)).collect();
        let phi: Vec<f64> = batch.met.iter().map(|m| m.phi.clamp(-METPHI_MAX_PHI, METPHI_MAX_PHI)).collect();
        let runs = self.runs(batch);
        if pt.is_empty() {
            return Ok(Vec::new());
        }
        let args = [
            Arg::real("pt", &pt),
            Arg::real("phi", &phi),
            Arg::real("npvGood", &batch.npvs_good),
            Arg::int("run", &runs),
        ];
        let new_pt = self.pt.evaluate_args(&args)?;
        let new_phi = self.phi.evaluate_args(&args)?;
        Ok(new_pt.into_iter().zip(new_phi).map(|(pt, phi)| Met { pt, phi }).collect())
    }
}
