//! Detector jet veto maps.

use cal_core::{Jagged, Jet, Result, Year};
use cal_table::{Arg, ScaleFactorTable, TableGroup, TableStore};

use crate::masked::MaskedEvaluator;

/// |eta| covered by the maps.
pub const VETO_MAX_ABS_ETA: f64 = 5.19;
/// |phi| covered by the maps.
pub const VETO_MAX_ABS_PHI: f64 = 3.14;

/// Map name for `year`.
pub fn veto_map_name(year: Year) -> &'static str {
    match year {
        Year::Y2016PreVfp | Year::Y2016PostVfp => "Summer19UL16_V1",
        Year::Y2017 => "Summer19UL17_V1",
        Year::Y2018 => "Summer19UL18_V1",
    }
}

/// Jet veto map of one year.
#[derive(Debug, Clone)]
pub struct JetVetoMap {
    table: ScaleFactorTable,
    map_type: String,
}

impl JetVetoMap {
    /// Load the year's map; `map_type` selects the layer (`jetvetomap`).
    pub fn new(store: &TableStore, year: Year, map_type: &str) -> Result<Self> {
        let table = store.table(TableGroup::JetVetoMaps, year, veto_map_name(year))?;
        Ok(Self { table, map_type: map_type.to_string() })
    }

    /// Per-jet flag, true when the jet survives the veto. A non-zero map
    /// value vetoes; jets outside the map's coverage are kept.
    pub fn keep_mask(&self, jets: &Jagged<Jet>) -> Result<Vec<bool>> {
        let values = MaskedEvaluator::new(jets, |j: &Jet| {
            j.eta.abs() < VETO_MAX_ABS_ETA && j.phi.abs() < VETO_MAX_ABS_PHI
        })
        .real("eta", |j| j.eta, 0.0)
        .real("phi", |j| j.phi, 0.0)
        .tag("type", self.map_type.as_str())
        .evaluate_with(0.0, |args| self.table.evaluate_args(args))?;
        Ok(values.flat().iter().map(|&v| v == 0.0).collect())
    }

    /// Per-event flag, true when no jet of the event is vetoed.
    pub fn event_mask(&self, jets: &Jagged<Jet>) -> Result<Vec<bool>> {
        let keep = self.keep_mask(jets)?;
        Ok(jets.with_flat(keep)?.iter_events().map(|ev| ev.iter().all(|&k| k)).collect())
    }
}
