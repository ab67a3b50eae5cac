//! Muon reconstruction, identification, isolation and trigger weights.
//!
//! Two measurement schemes exist: the Z-resonance scheme for muons up to
//! about 200 GeV and the high-pt scheme above 50 GeV. Both read the same
//! table layout (`abseta`, `pt`, `scale_factors`) from different files.

use serde::{Deserialize, Serialize};

use cal_core::{Error, EventBatch, Muon, Result, Year};
use cal_table::{ScaleFactorTable, TableGroup, TableStore};

use crate::ledger::WeightLedger;
use crate::masked::{MaskedEvaluator, ObjectFactors, SystLabels};
use crate::trigger::{self, TriggerPath};
use crate::working_points::{MuonId, MuonIso};

/// Which muon measurement the scale factors come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuonScheme {
    /// Z-resonance tag and probe
    #[default]
    Z,
    /// High-pt muons
    HighPt,
}

/// Muon weight settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuonConfig {
    pub scheme: MuonScheme,
    pub id: MuonId,
    pub iso: MuonIso,
    /// Paths whose trigger scale factor is applied; empty disables it.
    pub hlt_paths: Vec<TriggerPath>,
}

impl Default for MuonConfig {
    fn default() -> Self {
        Self { scheme: MuonScheme::Z, id: MuonId::Tight, iso: MuonIso::Tight, hlt_paths: Vec::new() }
    }
}

/// Kinematic window and placeholder of one weight.
#[derive(Debug, Clone, Copy)]
struct Window {
    min_pt: f64,
    min_inclusive: bool,
    max_pt: f64,
    max_abs_eta: f64,
    placeholder_pt: f64,
}

impl Window {
    fn contains(&self, m: &Muon) -> bool {
        let above = if self.min_inclusive { m.pt >= self.min_pt } else { m.pt > self.min_pt };
        above && m.pt < self.max_pt && m.eta.abs() < self.max_abs_eta
    }
}

fn reco_name(scheme: MuonScheme) -> &'static str {
    match scheme {
        MuonScheme::Z => "NUM_TrackerMuons_DEN_genTracks",
        MuonScheme::HighPt => "NUM_GlobalMuons_DEN_TrackerMuonProbes",
    }
}

fn id_name(scheme: MuonScheme, id: MuonId) -> Result<&'static str> {
    match (scheme, id) {
        (MuonScheme::Z, MuonId::Loose) => Ok("NUM_LooseID_DEN_TrackerMuons"),
        (MuonScheme::Z, MuonId::Medium) => Ok("NUM_MediumID_DEN_TrackerMuons"),
        (MuonScheme::Z, MuonId::Tight) => Ok("NUM_TightID_DEN_TrackerMuons"),
        (MuonScheme::HighPt, MuonId::HighPt) => Ok("NUM_HighPtID_DEN_GlobalMuonProbes"),
        (scheme, id) => Err(Error::Config(format!(
            "no muon id scale factors for working point '{id}' in the {scheme:?} scheme"
        ))),
    }
}

fn iso_name(scheme: MuonScheme, id: MuonId, iso: MuonIso) -> Result<&'static str> {
    let name = match (scheme, id, iso) {
        (MuonScheme::Z, MuonId::Loose, MuonIso::Loose) => Some("NUM_LooseRelIso_DEN_LooseID"),
        (MuonScheme::Z, MuonId::Medium, MuonIso::Loose) => Some("NUM_LooseRelIso_DEN_MediumID"),
        (MuonScheme::Z, MuonId::Medium, MuonIso::Tight) => Some("NUM_TightRelIso_DEN_MediumID"),
        (MuonScheme::Z, MuonId::Tight, MuonIso::Loose) => Some("NUM_LooseRelIso_DEN_TightIDandIPCut"),
        (MuonScheme::Z, MuonId::Tight, MuonIso::Tight) => Some("NUM_TightRelIso_DEN_TightIDandIPCut"),
        (MuonScheme::HighPt, MuonId::HighPt, MuonIso::Loose) => Some("NUM_probe_LooseRelTkIso_DEN_HighPtProbes"),
        (MuonScheme::HighPt, MuonId::HighPt, MuonIso::Tight) => Some("NUM_probe_TightRelTkIso_DEN_HighPtProbes"),
        _ => None,
    };
    name.ok_or_else(|| {
        Error::Config(format!("no muon isolation scale factors for '{iso}' isolation with '{id}' id"))
    })
}

fn trigger_name(scheme: MuonScheme, year: Year) -> &'static str {
    match (scheme, year) {
        (MuonScheme::HighPt, _) => "NUM_HLT_DEN_HighPtTightRelIsoProbes",
        (MuonScheme::Z, Year::Y2016PreVfp | Year::Y2016PostVfp) => {
            "NUM_IsoMu24_or_IsoTkMu24_DEN_CutBasedIdTight_and_PFIsoTight"
        }
        (MuonScheme::Z, Year::Y2017) => "NUM_IsoMu27_DEN_CutBasedIdTight_and_PFIsoTight",
        (MuonScheme::Z, Year::Y2018) => "NUM_IsoMu24_DEN_CutBasedIdTight_and_PFIsoTight",
    }
}

/// Muon scale factors for one year.
#[derive(Debug, Clone)]
pub struct MuonCorrector {
    config: MuonConfig,
    high_pt: bool,
    reco: ScaleFactorTable,
    id: ScaleFactorTable,
    iso: ScaleFactorTable,
    trigger: Option<ScaleFactorTable>,
}

impl MuonCorrector {
    /// Resolve the tables for the configured scheme and working points.
    ///
    /// Unsupported (id, iso) pairings and a trigger request for anything but
    /// tight id with tight isolation are configuration errors.
    pub fn new(store: &TableStore, year: Year, config: &MuonConfig) -> Result<Self> {
        let group = match config.scheme {
            MuonScheme::Z => TableGroup::Muon,
            MuonScheme::HighPt => TableGroup::MuonHighPt,
        };
        let table = |name: &str| store.syst_table(group, year, name, "scale_factors");
        let reco = table(reco_name(config.scheme))?;
        let id = table(id_name(config.scheme, config.id)?)?;
        let iso = table(iso_name(config.scheme, config.id, config.iso)?)?;
        let trigger = if config.hlt_paths.is_empty() {
            None
        } else {
            let tight = match config.scheme {
                MuonScheme::Z => config.id == MuonId::Tight && config.iso == MuonIso::Tight,
                MuonScheme::HighPt => config.iso == MuonIso::Tight,
            };
            if !tight {
                return Err(Error::Config(
                    "muon trigger scale factors exist only for tight id and tight isolation".into(),
                ));
            }
            Some(table(trigger_name(config.scheme, year))?)
        };
        tracing::debug!(year = %year, scheme = ?config.scheme, id = %config.id, iso = %config.iso, "muon corrector ready");
        Ok(Self { config: config.clone(), high_pt: config.scheme == MuonScheme::HighPt, reco, id, iso, trigger })
    }

    fn reco_window(&self) -> Window {
        if self.high_pt {
            Window { min_pt: 50.0, min_inclusive: true, max_pt: f64::INFINITY, max_abs_eta: 2.4, placeholder_pt: 50.0 }
        } else {
            Window { min_pt: 40.0, min_inclusive: true, max_pt: f64::INFINITY, max_abs_eta: 2.4, placeholder_pt: 40.0 }
        }
    }

    fn id_window(&self) -> Window {
        if self.high_pt {
            Window { min_pt: 50.0, min_inclusive: false, max_pt: f64::INFINITY, max_abs_eta: 2.39, placeholder_pt: 50.0 }
        } else {
            Window { min_pt: 15.0, min_inclusive: false, max_pt: 199.999, max_abs_eta: 2.39, placeholder_pt: 15.0 }
        }
    }

    fn iso_window(&self) -> Window {
        if self.high_pt {
            Window { min_pt: 50.0, min_inclusive: false, max_pt: f64::INFINITY, max_abs_eta: 2.39, placeholder_pt: 50.0 }
        } else {
            Window { min_pt: 29.0, min_inclusive: false, max_pt: f64::INFINITY, max_abs_eta: 2.39, placeholder_pt: 29.0 }
        }
    }

    fn trigger_window(&self) -> Window {
        if self.high_pt {
            Window { min_pt: 50.0, min_inclusive: false, max_pt: f64::INFINITY, max_abs_eta: 2.399, placeholder_pt: 50.0 }
        } else {
            Window { min_pt: 29.0, min_inclusive: false, max_pt: 199.999, max_abs_eta: 2.399, placeholder_pt: 29.0 }
        }
    }

    fn factors(
        &self,
        eval: MaskedEvaluator<'_, Muon>,
        table: &ScaleFactorTable,
        placeholder_pt: f64,
        with_variations: bool,
    ) -> Result<ObjectFactors> {
        let eval = eval.real("abseta", |m| m.eta.abs(), 0.0).real("pt", |m| m.pt, placeholder_pt);
        ObjectFactors::evaluate(&eval, table, SystLabels::MUON, with_variations)
    }

    /// Reconstruction efficiency factors.
    pub fn reco(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let w = self.reco_window();
        let eval = MaskedEvaluator::new(&batch.muons, |m: &Muon| w.contains(m));
        self.factors(eval, &self.reco, w.placeholder_pt, with_variations)
    }

    /// Identification factors for muons passing the id working point.
    pub fn id(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let w = self.id_window();
        let id = self.config.id;
        let high_pt = self.high_pt;
        let eval = MaskedEvaluator::new(&batch.muons, |m: &Muon| w.contains(m)).and_where(|m| {
            if high_pt { m.high_pt_id == 2 } else { id.passes(m) }
        });
        self.factors(eval, &self.id, w.placeholder_pt, with_variations)
    }

    /// Isolation factors for muons passing id and isolation.
    pub fn iso(&self, batch: &EventBatch, with_variations: bool) -> Result<ObjectFactors> {
        let w = self.iso_window();
        let eval = MaskedEvaluator::new(&batch.muons, |m: &Muon| w.contains(m)).and_where(|m| self.passes(m));
        self.factors(eval, &self.iso, w.placeholder_pt, with_variations)
    }

    /// Trigger factors for selected muons in fired events that match a
    /// trigger object. `None` when no paths are configured.
    pub fn trigger(&self, batch: &EventBatch, with_variations: bool) -> Result<Option<ObjectFactors>> {
        let Some(ref table) = self.trigger else {
            return Ok(None);
        };
        let w = self.trigger_window();
        let fired = trigger::fired(batch, &self.config.hlt_paths);
        let matched = trigger::matched(&batch.muons, &batch.trig_objs, &self.config.hlt_paths)?;
        let eval = MaskedEvaluator::new(&batch.muons, |m: &Muon| w.contains(m))
            .and_where(|m| self.passes(m))
            .and_event_mask(&fired)?
            .and_mask(&matched)?;
        self.factors(eval, table, w.placeholder_pt, with_variations).map(Some)
    }

    fn passes(&self, m: &Muon) -> bool {
        let id = if self.high_pt { m.high_pt_id == 2 } else { self.config.id.passes(m) };
        id && self.config.iso.passes(m, self.high_pt)
    }

    /// Register every muon weight.
    pub fn add_weights(&self, batch: &EventBatch, ledger: &mut WeightLedger, with_variations: bool) -> Result<()> {
        self.reco(batch, with_variations)?.add_to(ledger, "muon_reco")?;
        let id_name = if self.high_pt { "muon_highptid" } else { "muon_id" };
        self.id(batch, with_variations)?.add_to(ledger, id_name)?;
        self.iso(batch, with_variations)?.add_to(ledger, "muon_iso")?;
        if let Some(f) = self.trigger(batch, with_variations)? {
            let name = if self.high_pt { "muon_highpt_triggeriso" } else { "muon_triggeriso" };
            f.add_to(ledger, name)?;
        }
        Ok(())
    }
}
