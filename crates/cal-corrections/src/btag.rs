//! b-tagging event weights from fixed working-point scale factors.
//!
//! For each flavour group the event weight is
//!
//! ```text
//! w = Π_tagged SF · Π_untagged (1 - SF·eff) / (1 - eff)
//! ```
//!
//! with efficiencies measured in simulation. Heavy-flavour (b and c) and
//! light jets are reweighted independently and registered as separate
//! ledger entries so their systematics can be varied independently.

use std::fmt;

use serde::{Deserialize, Serialize};

use cal_core::{Error, Jagged, Jet, Result, Year};
use cal_table::{ScaleFactorTable, TableGroup, TableStore};

use crate::ledger::WeightLedger;
use crate::masked::{MaskedEvaluator, SystLabels};
use crate::working_points::LooseMediumTight;

/// |eta| covered by the scale-factor tables.
pub const BTAG_MAX_ABS_ETA: f64 = 2.499;
/// Efficiencies at or above `1 - EFF_EPSILON` give an untagged jet factor 1.
pub const EFF_EPSILON: f64 = 1e-6;

/// Flavour group reweighted as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlavourGroup {
    /// b and c jets
    HeavyFlavour,
    /// udsg jets
    Light,
}

impl FlavourGroup {
    /// Both groups, in registration order.
    pub const ALL: [FlavourGroup; 2] = [FlavourGroup::HeavyFlavour, FlavourGroup::Light];

    /// Label used in ledger names.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlavourGroup::HeavyFlavour => "bc",
            FlavourGroup::Light => "light",
        }
    }

    /// Whether `jet` belongs to the group.
    pub fn contains(&self, jet: &Jet) -> bool {
        match self {
            FlavourGroup::HeavyFlavour => jet.hadron_flavour > 0,
            FlavourGroup::Light => jet.hadron_flavour == 0,
        }
    }

    fn placeholder_flavour(&self) -> i64 {
        match self {
            FlavourGroup::HeavyFlavour => 5,
            FlavourGroup::Light => 0,
        }
    }

    /// Ledger entry name.
    pub fn ledger_name(&self) -> String {
        format!("btag_{}", self.as_str())
    }
}

impl fmt::Display for FlavourGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scale-factor measurement used for heavy-flavour jets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SfType {
    /// QCD and ttbar enriched regions
    #[default]
    Comb,
    /// QCD enriched regions only
    Mujets,
}

impl SfType {
    fn as_str(&self) -> &'static str {
        match self {
            SfType::Comb => "comb",
            SfType::Mujets => "mujets",
        }
    }
}

/// b-tag reweighting settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BTagConfig {
    pub sf_type: SfType,
    pub working_point: LooseMediumTight,
    /// Use year-correlated variations for a full Run II analysis.
    pub full_run: bool,
}

impl Default for BTagConfig {
    fn default() -> Self {
        Self { sf_type: SfType::Comb, working_point: LooseMediumTight::Medium, full_run: false }
    }
}

/// Factor of one jet in the tag/no-tag product.
///
/// Tagged jets contribute their scale factor. Untagged jets contribute
/// `(1 - sf·eff)/(1 - eff)`, with `eff` clamped to `[0, 1]` and a factor of
/// 1 when the efficiency is indistinguishable from 1.
pub fn jet_factor(sf: f64, eff: f64, tagged: bool) -> f64 {
    if tagged {
        return sf;
    }
    let eff = eff.clamp(0.0, 1.0);
    if eff >= 1.0 - EFF_EPSILON {
        return 1.0;
    }
    (1.0 - sf * eff) / (1.0 - eff)
}

/// Per-event weight: product of [`jet_factor`] over jets in `in_group`.
/// Events with no jet in the group get 1.
pub fn event_weights(
    sf: &Jagged<f64>,
    eff: &Jagged<f64>,
    tagged: &[bool],
    in_group: &[bool],
) -> Result<Vec<f64>> {
    if !sf.same_shape(eff) || tagged.len() != sf.len() || in_group.len() != sf.len() {
        return Err(Error::Validation(
            "b-tag scale factors, efficiencies and masks disagree in shape".into(),
        ));
    }
    let factors: Vec<f64> = sf
        .flat()
        .iter()
        .zip(eff.flat())
        .zip(tagged.iter().zip(in_group))
        .map(|((&s, &e), (&t, &g))| if g { jet_factor(s, e, t) } else { 1.0 })
        .collect();
    Ok(sf.with_flat(factors)?.prod_per_event())
}

/// Per-event weights of one flavour group.
#[derive(Debug, Clone)]
pub struct GroupWeights {
    pub group: FlavourGroup,
    pub nominal: Vec<f64>,
    pub up: Option<Vec<f64>>,
    pub down: Option<Vec<f64>>,
}

/// b-tag reweighting for one year and working point.
#[derive(Debug, Clone)]
pub struct BTagReweighter {
    year: Year,
    config: BTagConfig,
    heavy: ScaleFactorTable,
    light: ScaleFactorTable,
    efficiency: ScaleFactorTable,
}

impl BTagReweighter {
    /// Load scale factors and the measured efficiency map. A missing map
    /// for the working point and year is a configuration error.
    pub fn new(store: &TableStore, year: Year, config: BTagConfig) -> Result<Self> {
        let heavy = store.syst_table(
            TableGroup::BTag,
            year,
            &format!("deepJet_{}", config.sf_type.as_str()),
            "systematic",
        )?;
        let light = store.syst_table(TableGroup::BTag, year, "deepJet_incl", "systematic")?;
        let efficiency = store
            .table(TableGroup::BTagEfficiency, year, &efficiency_map_name(config.working_point))
            .map_err(|e| {
                Error::Config(format!(
                    "no b-tag efficiency map for working point '{}' in {year}: {e}",
                    config.working_point
                ))
            })?;
        tracing::debug!(
            year = %year,
            wp = %config.working_point,
            sf_type = config.sf_type.as_str(),
            "b-tag reweighter ready"
        );
        Ok(Self { year, config, heavy, light, efficiency })
    }

    fn labels(&self) -> SystLabels {
        if self.config.full_run {
            SystLabels { nominal: "central", up: "up_correlated", down: "down_correlated" }
        } else {
            SystLabels::CENTRAL_UP_DOWN
        }
    }

    fn scale_factors(&self, jets: &Jagged<Jet>, group: FlavourGroup, syst: &str) -> Result<Jagged<f64>> {
        let table = match group {
            FlavourGroup::HeavyFlavour => &self.heavy,
            FlavourGroup::Light => &self.light,
        };
        MaskedEvaluator::new(jets, |j: &Jet| j.eta.abs() < BTAG_MAX_ABS_ETA)
            .and_where(|j| group.contains(j))
            .real("pt", |j| j.pt, 30.0)
            .real("abseta", |j| j.eta.abs(), 0.0)
            .int("flavor", |j| j.hadron_flavour as i64, group.placeholder_flavour())
            .tag("working_point", self.config.working_point.letter())
            .evaluate(table, syst)
    }

    /// Measured tagging efficiency of every jet.
    pub fn efficiencies(&self, jets: &Jagged<Jet>) -> Result<Jagged<f64>> {
        MaskedEvaluator::new(jets, |_: &Jet| true)
            .real("pt", |j| j.pt, 30.0)
            .real("abseta", |j| j.eta.abs(), 0.0)
            .int("flavor", |j| j.hadron_flavour as i64, 0)
            .evaluate_plain(&self.efficiency)
    }

    /// Weights of one group; variations only when `with_variations`.
    pub fn group_weights(
        &self,
        jets: &Jagged<Jet>,
        group: FlavourGroup,
        with_variations: bool,
    ) -> Result<GroupWeights> {
        let eff = self.efficiencies(jets)?;
        let tagged: Vec<bool> = jets
            .flat()
            .iter()
            .map(|j| self.config.working_point.btagged(j, self.year))
            .collect();
        let in_group: Vec<bool> = jets.flat().iter().map(|j| group.contains(j)).collect();
        let labels = self.labels();
        let weights = |syst: &str| -> Result<Vec<f64>> {
            let sf = self.scale_factors(jets, group, syst)?;
            event_weights(&sf, &eff, &tagged, &in_group)
        };
        let nominal = weights(labels.nominal)?;
        let (up, down) = if with_variations {
            (Some(weights(labels.up)?), Some(weights(labels.down)?))
        } else {
            (None, None)
        };
        Ok(GroupWeights { group, nominal, up, down })
    }

    /// Register `btag_bc` and `btag_light`.
    pub fn add_weights(&self, jets: &Jagged<Jet>, ledger: &mut WeightLedger, with_variations: bool) -> Result<()> {
        for group in FlavourGroup::ALL {
            let w = self.group_weights(jets, group, with_variations)?;
            ledger.add(&group.ledger_name(), w.nominal, w.up, w.down)?;
        }
        Ok(())
    }
}

/// Efficiency map name for a working point, e.g. `deepJet_medium`.
pub fn efficiency_map_name(wp: LooseMediumTight) -> String {
    format!("deepJet_{}", wp.as_str())
}
