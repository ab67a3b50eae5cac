//! Event batches and physics-object records.
//!
//! A batch is column-oriented at the event level (one `Vec` entry per event)
//! and ragged at the object level (one [`Jagged`] per collection). The JSON
//! layout mirrors the struct: object collections are nested lists, one inner
//! list per event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::jagged::Jagged;
use crate::kinematics::Kinematics;

fn no_gen_jet() -> i32 {
    -1
}

/// Reconstructed jet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Jet {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub mass: f64,
    /// `1 - raw_pt / pt` as stored by the reconstruction.
    #[serde(default)]
    pub raw_factor: f64,
    /// Catchment area.
    #[serde(default)]
    pub area: f64,
    /// Neutral electromagnetic energy fraction.
    #[serde(default)]
    pub ne_em_ef: f64,
    /// Charged electromagnetic energy fraction.
    #[serde(default)]
    pub ch_em_ef: f64,
    /// DeepJet b-tag discriminant.
    #[serde(default)]
    pub btag_deepjet: f64,
    /// Generator hadron flavour: 5 (b), 4 (c) or 0 (light).
    #[serde(default)]
    pub hadron_flavour: i32,
    /// Pileup jet id bit pattern.
    #[serde(default)]
    pub pu_id: i32,
    /// Index of the matched generator jet, -1 when unmatched.
    #[serde(default = "no_gen_jet")]
    pub gen_jet_idx: i32,
    /// pt of the matched generator jet.
    #[serde(default)]
    pub gen_pt: Option<f64>,
}

/// Reconstructed muon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Muon {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub mass: f64,
    #[serde(default)]
    pub charge: i32,
    #[serde(default)]
    pub loose_id: bool,
    #[serde(default)]
    pub medium_id: bool,
    #[serde(default)]
    pub tight_id: bool,
    /// 0 = fail, 1 = tracker high-pt, 2 = global high-pt.
    #[serde(default)]
    pub high_pt_id: i32,
    /// Relative PF isolation in a 0.4 cone.
    #[serde(default)]
    pub pf_rel_iso04_all: f64,
    /// Relative tracker isolation.
    #[serde(default)]
    pub tk_rel_iso: f64,
    #[serde(default)]
    pub n_tracker_layers: i32,
    /// pt of the matched generator muon.
    #[serde(default)]
    pub gen_pt: Option<f64>,
}

/// Reconstructed electron.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Electron {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub mass: f64,
    #[serde(default)]
    pub charge: i32,
    /// Cut-based id: 0 fail, 1 veto, 2 loose, 3 medium, 4 tight.
    #[serde(default)]
    pub cut_based: i32,
    #[serde(default)]
    pub mva_iso_wp80: bool,
    #[serde(default)]
    pub mva_iso_wp90: bool,
    #[serde(default)]
    pub mva_noiso_wp80: bool,
    #[serde(default)]
    pub mva_noiso_wp90: bool,
    #[serde(default)]
    pub pf_rel_iso03_all: f64,
}

/// Reconstructed hadronic tau.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tau {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub mass: f64,
    #[serde(default)]
    pub charge: i32,
    #[serde(default)]
    pub decay_mode: i32,
    /// Generator match: 1 prompt e, 2 prompt mu, 3 tau->e, 4 tau->mu, 5 genuine tau, 0/6 fake.
    #[serde(default)]
    pub gen_part_flav: i32,
    /// DeepTau vs-jet working-point bit mask.
    #[serde(default)]
    pub id_vs_jet: i32,
    /// DeepTau vs-electron working-point bit mask.
    #[serde(default)]
    pub id_vs_e: i32,
    /// DeepTau vs-muon working-point bit mask.
    #[serde(default)]
    pub id_vs_mu: i32,
}

/// Trigger object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrigObj {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    /// PDG id of the reconstructed object type.
    pub id: i32,
    #[serde(default)]
    pub filter_bits: i32,
}

/// Missing transverse energy of one event, in polar form.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Met {
    pub pt: f64,
    pub phi: f64,
}

impl Met {
    /// From Cartesian components.
    pub fn from_xy(x: f64, y: f64) -> Self {
        Self { pt: x.hypot(y), phi: y.atan2(x) }
    }

    /// x component.
    pub fn x(&self) -> f64 {
        self.pt * self.phi.cos()
    }

    /// y component.
    pub fn y(&self) -> f64 {
        self.pt * self.phi.sin()
    }
}

/// L1 prefiring probability weights of one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrefireWeight {
    pub nom: f64,
    pub up: f64,
    pub dn: f64,
}

macro_rules! impl_kinematics {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Kinematics for $ty {
                fn pt(&self) -> f64 {
                    self.pt
                }
                fn eta(&self) -> f64 {
                    self.eta
                }
                fn phi(&self) -> f64 {
                    self.phi
                }
                fn mass(&self) -> f64 {
                    self.mass
                }
            }
        )*
    };
}

impl_kinematics!(Jet, Muon, Electron, Tau);

impl Kinematics for TrigObj {
    fn pt(&self) -> f64 {
        self.pt
    }
    fn eta(&self) -> f64 {
        self.eta
    }
    fn phi(&self) -> f64 {
        self.phi
    }
    fn mass(&self) -> f64 {
        0.0
    }
}

/// A chunk of events with all collections used by the calibration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBatch {
    /// Dataset label, carried through to reports.
    #[serde(default)]
    pub dataset: String,
    pub run: Vec<u32>,
    #[serde(default)]
    pub luminosity_block: Vec<u32>,
    pub event: Vec<u64>,
    /// Generator weight; present only for simulation.
    #[serde(default)]
    pub gen_weight: Option<Vec<f64>>,
    /// True number of pileup interactions (simulation only).
    #[serde(default)]
    pub n_true_int: Option<Vec<f64>>,
    /// Median energy density, used by pileup offset corrections.
    #[serde(default)]
    pub rho: Vec<f64>,
    /// Number of good primary vertices.
    #[serde(default)]
    pub npvs_good: Vec<f64>,
    #[serde(default)]
    pub l1_prefiring: Option<Vec<PrefireWeight>>,
    /// HLT decisions keyed by path name without the `HLT_` prefix.
    #[serde(default)]
    pub hlt: BTreeMap<String, Vec<bool>>,
    #[serde(default)]
    pub jets: Jagged<Jet>,
    #[serde(default)]
    pub muons: Jagged<Muon>,
    #[serde(default)]
    pub electrons: Jagged<Electron>,
    #[serde(default)]
    pub taus: Jagged<Tau>,
    #[serde(default)]
    pub trig_objs: Jagged<TrigObj>,
    pub met: Vec<Met>,
}

impl EventBatch {
    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.event.len()
    }

    /// Simulation carries generator weights; data does not.
    pub fn is_mc(&self) -> bool {
        self.gen_weight.is_some()
    }

    /// Fill defaulted fields and check that every per-event array agrees.
    ///
    /// Collections absent from the input are widened to "no objects" for
    /// every event; optional per-event arrays default to zeros.
    pub fn normalize(&mut self) -> Result<()> {
        let n = self.n_events();
        if self.luminosity_block.is_empty() {
            self.luminosity_block = vec![0; n];
        }
        if self.rho.is_empty() {
            self.rho = vec![0.0; n];
        }
        if self.npvs_good.is_empty() {
            self.npvs_good = vec![0.0; n];
        }
        widen(&mut self.jets, n);
        widen(&mut self.muons, n);
        widen(&mut self.electrons, n);
        widen(&mut self.taus, n);
        widen(&mut self.trig_objs, n);
        self.validate()
    }

    /// Check every per-event array against the event count.
    pub fn validate(&self) -> Result<()> {
        let n = self.n_events();
        check_len("run", self.run.len(), n)?;
        check_len("luminosity_block", self.luminosity_block.len(), n)?;
        check_len("rho", self.rho.len(), n)?;
        check_len("npvs_good", self.npvs_good.len(), n)?;
        check_len("met", self.met.len(), n)?;
        if let Some(ref w) = self.gen_weight {
            check_len("gen_weight", w.len(), n)?;
        }
        if let Some(ref w) = self.n_true_int {
            check_len("n_true_int", w.len(), n)?;
        }
        if let Some(ref w) = self.l1_prefiring {
            check_len("l1_prefiring", w.len(), n)?;
        }
        for (path, fired) in &self.hlt {
            check_len(&format!("hlt.{path}"), fired.len(), n)?;
        }
        check_len("jets", self.jets.n_events(), n)?;
        check_len("muons", self.muons.n_events(), n)?;
        check_len("electrons", self.electrons.n_events(), n)?;
        check_len("taus", self.taus.n_events(), n)?;
        check_len("trig_objs", self.trig_objs.n_events(), n)?;
        Ok(())
    }

    /// Per-event rho broadcast onto every jet.
    pub fn rho_per_jet(&self) -> Result<Vec<f64>> {
        self.jets.broadcast(&self.rho)
    }
}

fn widen<T>(col: &mut Jagged<T>, n: usize) {
    if col.n_events() == 0 && n > 0 {
        *col = Jagged::empty(n);
    }
}

fn check_len(what: &str, got: usize, n: usize) -> Result<()> {
    if got != n {
        return Err(Error::Validation(format!("{what} has {got} entries, batch has {n} events")));
    }
    Ok(())
}
