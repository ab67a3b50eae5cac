//! Jet energy scale and resolution corrections.
//!
//! The calibration runs in a fixed order on one batch:
//!
//! 1. undo the stored correction to get raw pt and mass,
//! 2. apply the JEC compound chain (L1 → L2 → L3 → residual) and rewrite
//!    pt/mass, keeping the L1-only and L1L2L3 pt for Type-1 MET,
//! 3. recompute MET with the Type-1 prescription,
//! 4. attach JEC uncertainty bands (simulation only, on request),
//! 5. smear simulated jets to the measured resolution and propagate the
//!    change to MET.
//!
//! Every step rewrites the jet collection in place and never changes the
//! number of jets per event.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use cal_core::kinematics::energy;
use cal_core::prng::{seed_from, standard_normal};
use cal_core::{Error, EventBatch, Result, Year};
use cal_table::{Arg, ScaleFactorTable, TableGroup, TableStore};

use crate::met::{propagate_pt_change, type1_correction, type1_eligible};

/// Smallest energy and mass a smeared jet may carry.
pub const JER_FLOOR: f64 = 0.01;
/// A generator jet matches when `|pt - pt_gen| < JER_MATCH_SIGMAS * pt * resolution`.
pub const JER_MATCH_SIGMAS: f64 = 3.0;

/// One level of the JEC chain, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JecLevel {
    /// Pileup offset
    L1FastJet,
    /// Relative (eta) response
    L2Relative,
    /// Absolute response
    L3Absolute,
    /// Data/simulation residual
    L2L3Residual,
}

impl JecLevel {
    /// Levels in the order they are applied.
    pub const ORDER: [JecLevel; 4] =
        [JecLevel::L1FastJet, JecLevel::L2Relative, JecLevel::L3Absolute, JecLevel::L2L3Residual];

    /// Level tag used in table names.
    pub fn as_str(&self) -> &'static str {
        match self {
            JecLevel::L1FastJet => "L1FastJet",
            JecLevel::L2Relative => "L2Relative",
            JecLevel::L3Absolute => "L3Absolute",
            JecLevel::L2L3Residual => "L2L3Residual",
        }
    }
}

impl fmt::Display for JecLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table name `{version}_{tag}_{algorithm}`.
pub fn jerc_key(version: &str, tag: &str, algorithm: &str) -> String {
    format!("{version}_{tag}_{algorithm}")
}

/// Switches and table naming for the jet calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JetCalibrationConfig {
    pub apply_jec: bool,
    pub apply_jer: bool,
    pub apply_jec_syst: bool,
    pub apply_jer_syst: bool,
    /// JEC version per era; simulation uses the `MC` entry.
    pub jec_version: BTreeMap<String, String>,
    /// JER version, e.g. `Summer19UL18_JRV2_MC`.
    pub jer_version: String,
    /// Jet algorithm tag, e.g. `AK4PFchs`.
    pub algorithm: String,
    /// JEC uncertainty source, e.g. `Total`.
    pub uncertainty_source: String,
}

impl Default for JetCalibrationConfig {
    fn default() -> Self {
        Self {
            apply_jec: true,
            apply_jer: true,
            apply_jec_syst: false,
            apply_jer_syst: false,
            jec_version: BTreeMap::new(),
            jer_version: String::new(),
            algorithm: "AK4PFchs".to_string(),
            uncertainty_source: "Total".to_string(),
        }
    }
}

/// Smearing factor for one jet.
///
/// With a generator match inside three resolutions the scaling is
/// deterministic, `1 + (sf - 1)(pt - pt_gen)/pt`; otherwise a Gaussian draw
/// seeded by `seed` widens the jet by `sqrt(max(sf² - 1, 0)) · resolution`.
pub fn jer_smear_factor(pt: f64, pt_gen: Option<f64>, resolution: f64, sf: f64, seed: u64) -> f64 {
    if let Some(gen_pt) = pt_gen
        && pt > 0.0
        && (pt - gen_pt).abs() < JER_MATCH_SIGMAS * pt * resolution
    {
        return 1.0 + (sf - 1.0) * (pt - gen_pt) / pt;
    }
    let width = (sf * sf - 1.0).max(0.0).sqrt() * resolution;
    1.0 + standard_normal(seed) * width
}

/// Keep the smeared energy and mass above [`JER_FLOOR`].
///
/// Massless jets stay massless, and a jet without positive energy keeps the
/// plain smearing factor. Returns the pt factor, the new mass and whether
/// anything was clamped.
pub fn clamp_smear(smear: f64, energy: f64, mass: f64) -> (f64, f64, bool) {
    let mut clamped = false;
    let pt_factor = if energy > 0.0 && smear * energy < JER_FLOOR {
        clamped = true;
        JER_FLOOR / energy
    } else {
        smear
    };
    let new_mass = if mass > 0.0 && smear * mass < JER_FLOOR {
        clamped = true;
        JER_FLOOR
    } else {
        smear * mass
    };
    (pt_factor, new_mass, clamped)
}

/// Per-jet intermediate results of one calibration.
///
/// Every vector is aligned with the flat jet collection.
#[derive(Debug, Clone, Default)]
pub struct JetCalibration {
    pub pt_raw: Vec<f64>,
    pub mass_raw: Vec<f64>,
    /// pt after L1 only (present when JEC ran)
    pub pt_l1: Option<Vec<f64>>,
    /// pt after L1L2L3 (present when JEC ran)
    pub pt_l123: Option<Vec<f64>>,
    pub pt_jec: Vec<f64>,
    pub mass_jec: Vec<f64>,
    pub pt_jec_up: Option<Vec<f64>>,
    pub pt_jec_down: Option<Vec<f64>>,
    pub pt_jer: Option<Vec<f64>>,
    pub mass_jer: Option<Vec<f64>>,
    pub pt_jer_up: Option<Vec<f64>>,
    pub pt_jer_down: Option<Vec<f64>>,
    /// Jets entering the Type-1 MET correction
    pub n_type1: usize,
    /// Jets whose smearing hit the energy/mass floor
    pub n_clamped: usize,
}

/// Jet energy corrections for one year and sample kind.
#[derive(Debug, Clone)]
pub struct JetCalibrator {
    is_mc: bool,
    config: JetCalibrationConfig,
    jec: Option<ScaleFactorTable>,
    jec_unc: Option<ScaleFactorTable>,
    jer_res: Option<ScaleFactorTable>,
    jer_sf: Option<ScaleFactorTable>,
}

impl JetCalibrator {
    /// Resolve every table the configuration asks for.
    ///
    /// `era` selects the JEC version for recorded data; simulation uses the
    /// `MC` entry. Missing versions or tables are configuration errors.
    pub fn new(
        store: &TableStore,
        year: Year,
        config: &JetCalibrationConfig,
        is_mc: bool,
        era: Option<&str>,
    ) -> Result<Self> {
        let needs_jec_version = config.apply_jec || (is_mc && config.apply_jec_syst);
        let jec_version = if needs_jec_version {
            let key = if is_mc { "MC" } else { era.unwrap_or("") };
            Some(config.jec_version.get(key).ok_or_else(|| {
                Error::Config(format!("no JEC version configured for era '{key}' in {year}"))
            })?)
        } else {
            None
        };

        let mut jec = None;
        if config.apply_jec
            && let Some(v) = jec_version
        {
            let name = jerc_key(v, "L1L2L3Res", &config.algorithm);
            let table = store.table(TableGroup::Jerc, year, &name)?;
            match table.n_stages() {
                Some(n) if n >= 3 => {}
                _ => {
                    return Err(Error::Config(format!(
                        "JEC table '{name}' must be a compound of at least L1, L2 and L3"
                    )));
                }
            }
            jec = Some(table);
        }

        let mut jec_unc = None;
        if is_mc
            && config.apply_jec_syst
            && let Some(v) = jec_version
        {
            let name = jerc_key(v, &config.uncertainty_source, &config.algorithm);
            jec_unc = Some(store.table(TableGroup::Jerc, year, &name)?);
        }

        let (mut jer_res, mut jer_sf) = (None, None);
        if is_mc && config.apply_jer {
            if config.jer_version.is_empty() {
                return Err(Error::Config(format!("no JER version configured for {year}")));
            }
            let res = jerc_key(&config.jer_version, "PtResolution", &config.algorithm);
            let sf = jerc_key(&config.jer_version, "ScaleFactor", &config.algorithm);
            jer_res = Some(store.table(TableGroup::Jerc, year, &res)?);
            jer_sf = Some(store.syst_table(TableGroup::Jerc, year, &sf, "systematic")?);
        }

        tracing::debug!(
            year = %year,
            is_mc,
            jec = jec.is_some(),
            jec_unc = jec_unc.is_some(),
            jer = jer_res.is_some(),
            "jet calibrator ready"
        );
        Ok(Self { is_mc, config: config.clone(), jec, jec_unc, jer_res, jer_sf })
    }

    /// Run every configured step on `batch`, rewriting jets and MET.
    pub fn calibrate(&self, batch: &mut EventBatch) -> Result<JetCalibration> {
        let mut cal = JetCalibration::default();
        let jets = batch.jets.flat();
        cal.pt_raw = jets.iter().map(|j| j.pt * (1.0 - j.raw_factor)).collect();
        cal.mass_raw = jets.iter().map(|j| j.mass * (1.0 - j.raw_factor)).collect();
        let rho = batch.rho_per_jet()?;

        if let Some(ref jec) = self.jec {
            self.apply_jec(jec, batch, &rho, &mut cal)?;
        } else {
            cal.pt_jec = batch.jets.flat().iter().map(|j| j.pt).collect();
            cal.mass_jec = batch.jets.flat().iter().map(|j| j.mass).collect();
        }

        if let Some(ref unc) = self.jec_unc {
            let eta: Vec<f64> = batch.jets.flat().iter().map(|j| j.eta).collect();
            let delta = if eta.is_empty() {
                Vec::new()
            } else {
                unc.evaluate_args(&[Arg::real("JetEta", &eta), Arg::real("JetPt", &cal.pt_jec)])?
            };
            cal.pt_jec_up = Some(cal.pt_jec.iter().zip(&delta).map(|(p, d)| p * (1.0 + d)).collect());
            cal.pt_jec_down = Some(cal.pt_jec.iter().zip(&delta).map(|(p, d)| p * (1.0 - d)).collect());
        }

        match (&self.jer_res, &self.jer_sf) {
            (Some(res), Some(sf)) => self.apply_jer(res, sf, batch, &rho, &mut cal)?,
            _ if !self.is_mc && self.config.apply_jer => {
                tracing::debug!("JER smearing skipped for recorded data");
            }
            _ => {}
        }
        Ok(cal)
    }

    fn apply_jec(
        &self,
        jec: &ScaleFactorTable,
        batch: &mut EventBatch,
        rho: &[f64],
        cal: &mut JetCalibration,
    ) -> Result<()> {
        let n = batch.jets.len();
        let (area, eta): (Vec<f64>, Vec<f64>) = batch.jets.flat().iter().map(|j| (j.area, j.eta)).unzip();
        let (compound, stages) = if n == 0 {
            (Vec::new(), Vec::new())
        } else {
            jec.evaluate_stages(&[
                Arg::real("JetA", &area),
                Arg::real("JetEta", &eta),
                Arg::real("JetPt", &cal.pt_raw),
                Arg::real("Rho", rho),
            ])?
        };

        let mut pt_l1 = Vec::with_capacity(n);
        let mut pt_l123 = Vec::with_capacity(n);
        for i in 0..n {
            let l1 = stages[0][i];
            let l123 = l1 * stages[1][i] * stages[2][i];
            pt_l1.push(cal.pt_raw[i] * l1);
            pt_l123.push(cal.pt_raw[i] * l123);
        }

        cal.pt_jec = cal.pt_raw.iter().zip(&compound).map(|(p, c)| p * c).collect();
        cal.mass_jec = cal.mass_raw.iter().zip(&compound).map(|(m, c)| m * c).collect();
        for ((j, &pt), &mass) in batch.jets.flat_mut().iter_mut().zip(&cal.pt_jec).zip(&cal.mass_jec) {
            j.pt = pt;
            j.mass = mass;
        }

        let eligible = type1_eligible(&batch.jets, &pt_l123, &batch.muons)?;
        cal.n_type1 = eligible.iter().filter(|&&e| e).count();
        batch.met = type1_correction(&batch.met, &batch.jets, &pt_l1, &pt_l123, &eligible)?;
        tracing::debug!(jets = n, type1_jets = cal.n_type1, "JEC applied");

        cal.pt_l1 = Some(pt_l1);
        cal.pt_l123 = Some(pt_l123);
        Ok(())
    }

    fn apply_jer(
        &self,
        res_table: &ScaleFactorTable,
        sf_table: &ScaleFactorTable,
        batch: &mut EventBatch,
        rho: &[f64],
        cal: &mut JetCalibration,
    ) -> Result<()> {
        let n = batch.jets.len();
        let eta: Vec<f64> = batch.jets.flat().iter().map(|j| j.eta).collect();
        let (resolution, sf_nom) = if n == 0 {
            (Vec::new(), Vec::new())
        } else {
            let res = res_table.evaluate_args(&[
                Arg::real("JetEta", &eta),
                Arg::real("JetPt", &cal.pt_jec),
                Arg::real("Rho", rho),
            ])?;
            let sf = sf_table.evaluate(&[Arg::real("JetEta", &eta)], "nom")?;
            (res, sf)
        };
        let events = batch.jets.broadcast(&batch.event)?;

        let smear_all = |sf: &[f64]| -> (Vec<f64>, Vec<f64>, usize) {
            let mut pts = Vec::with_capacity(n);
            let mut masses = Vec::with_capacity(n);
            let mut clamped = 0;
            for (i, j) in batch.jets.flat().iter().enumerate() {
                let pt = cal.pt_jec[i];
                let gen_pt = j.gen_pt.filter(|_| j.gen_jet_idx >= 0);
                let seed = seed_from(&[pt, j.eta, rho[i]], events[i]);
                let smear = jer_smear_factor(pt, gen_pt, resolution[i], sf[i], seed);
                let e = energy(pt, j.eta, cal.mass_jec[i]);
                let (f, mass, hit) = clamp_smear(smear, e, cal.mass_jec[i]);
                clamped += usize::from(hit);
                pts.push(pt * f);
                masses.push(mass);
            }
            (pts, masses, clamped)
        };

        let (pt_jer, mass_jer, clamped) = smear_all(&sf_nom);
        if self.config.apply_jer_syst && n > 0 {
            let sf_up = sf_table.evaluate(&[Arg::real("JetEta", &eta)], "up")?;
            let sf_down = sf_table.evaluate(&[Arg::real("JetEta", &eta)], "down")?;
            cal.pt_jer_up = Some(smear_all(&sf_up).0);
            cal.pt_jer_down = Some(smear_all(&sf_down).0);
        } else if self.config.apply_jer_syst {
            cal.pt_jer_up = Some(Vec::new());
            cal.pt_jer_down = Some(Vec::new());
        }

        for ((j, &pt), &mass) in batch.jets.flat_mut().iter_mut().zip(&pt_jer).zip(&mass_jer) {
            j.pt = pt;
            j.mass = mass;
        }
        batch.met = propagate_pt_change(&batch.met, &batch.jets, &cal.pt_jec)?;
        if clamped > 0 {
            tracing::warn!(clamped, jets = n, "JER smearing clamped to the energy floor");
        }
        tracing::debug!(jets = n, "JER applied");

        cal.n_clamped = clamped;
        cal.pt_jer = Some(pt_jer);
        cal.mass_jer = Some(mass_jer);
        Ok(())
    }
}
