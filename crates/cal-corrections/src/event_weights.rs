//! Event-level weights: generator weight, pileup profile and L1 prefiring.

use cal_core::{Error, EventBatch, Result, Year};
use cal_table::{Arg, ScaleFactorTable, TableGroup, TableStore};

use crate::ledger::WeightLedger;
use crate::masked::SystLabels;

/// Register the generator weight as `genweight`.
pub fn add_genweight(batch: &EventBatch, ledger: &mut WeightLedger) -> Result<()> {
    let w = batch
        .gen_weight
        .clone()
        .ok_or_else(|| Error::Validation("simulated batch has no generator weights".into()))?;
    ledger.add_nominal("genweight", w)
}

/// Whether L1 prefiring weights exist for `year`.
pub fn prefiring_applies(year: Year) -> bool {
    matches!(year, Year::Y2016PreVfp | Year::Y2016PostVfp | Year::Y2017)
}

/// Register `l1prefiring` from the batch's stored weights. Returns false
/// when the year has no prefiring issue.
pub fn add_prefiring_weight(
    batch: &EventBatch,
    year: Year,
    ledger: &mut WeightLedger,
    with_variations: bool,
) -> Result<bool> {
    if !prefiring_applies(year) {
        return Ok(false);
    }
    let stored = batch.l1_prefiring.as_ref().ok_or_else(|| {
        Error::Validation(format!("batch has no L1 prefiring weights, required for {year}"))
    })?;
    let nominal = stored.iter().map(|w| w.nom).collect();
    if with_variations {
        let up = stored.iter().map(|w| w.up).collect();
        let down = stored.iter().map(|w| w.dn).collect();
        ledger.add("l1prefiring", nominal, Some(up), Some(down))?;
    } else {
        ledger.add_nominal("l1prefiring", nominal)?;
    }
    Ok(true)
}

/// Pileup correction name for `year`.
pub fn pileup_table_name(year: Year) -> &'static str {
    match year {
        Year::Y2016PreVfp | Year::Y2016PostVfp => "Collisions16_UltraLegacy_goldenJSON",
        Year::Y2017 => "Collisions17_UltraLegacy_goldenJSON",
        Year::Y2018 => "Collisions18_UltraLegacy_goldenJSON",
    }
}

/// Reweights the simulated pileup profile to the measured one.
#[derive(Debug, Clone)]
pub struct PileupReweighter {
    table: ScaleFactorTable,
}

impl PileupReweighter {
    pub fn new(store: &TableStore, year: Year) -> Result<Self> {
        let table = store.syst_table(TableGroup::Pileup, year, pileup_table_name(year), "weights")?;
        Ok(Self { table })
    }

    /// Register `pileup` from the number of true interactions.
    pub fn add_weight(&self, batch: &EventBatch, ledger: &mut WeightLedger, with_variations: bool) -> Result<()> {
        let n_true = batch
            .n_true_int
            .as_deref()
            .ok_or_else(|| Error::Validation("simulated batch has no true pileup counts".into()))?;
        let labels = SystLabels::NOMINAL_UP_DOWN;
        let eval = |syst: &str| -> Result<Vec<f64>> {
            if n_true.is_empty() {
                return Ok(Vec::new());
            }
            self.table.evaluate(&[Arg::real("NumTrueInteractions", n_true)], syst)
        };
        let nominal = eval(labels.nominal)?;
        if with_variations {
            ledger.add("pileup", nominal, Some(eval(labels.up)?), Some(eval(labels.down)?))
        } else {
            ledger.add_nominal("pileup", nominal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cal_core::PrefireWeight;
    use cal_table::CorrectionLibrary;

    fn batch() -> EventBatch {
        EventBatch {
            event: vec![1, 2],
            gen_weight: Some(vec![1.5, -0.5]),
            n_true_int: Some(vec![10.0, 40.0]),
            l1_prefiring: Some(vec![
                PrefireWeight { nom: 0.98, up: 0.99, dn: 0.97 },
                PrefireWeight { nom: 1.0, up: 1.0, dn: 1.0 },
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn prefiring_only_for_affected_years() {
        let mut ledger = WeightLedger::new(2);
        assert!(!add_prefiring_weight(&batch(), Year::Y2018, &mut ledger, true).unwrap());
        assert!(ledger.names().is_empty());
        assert!(add_prefiring_weight(&batch(), Year::Y2017, &mut ledger, true).unwrap());
        assert_eq!(ledger.variations(), vec!["l1prefiringUp", "l1prefiringDown"]);
        assert_eq!(ledger.weight(Some("l1prefiringDown")).unwrap(), vec![0.97, 1.0]);
    }

    #[test]
    fn missing_prefiring_fields_are_rejected() {
        let mut b = batch();
        b.l1_prefiring = None;
        let mut ledger = WeightLedger::new(2);
        assert!(add_prefiring_weight(&b, Year::Y2016PreVfp, &mut ledger, false).is_err());
    }

    #[test]
    fn genweight_and_pileup() {
        let lib = CorrectionLibrary::from_json(
            r#"{"schema_version": 2, "corrections": [{"name": "Collisions18_UltraLegacy_goldenJSON", "version": 2,
                "inputs": [{"name": "NumTrueInteractions", "type": "real"}, {"name": "weights", "type": "string"}],
                "output": {"name": "weight", "type": "real"},
                "data": {"nodetype": "category", "input": "weights", "content": [
                  {"key": "nominal", "value": {"nodetype": "binning", "input": "NumTrueInteractions",
                    "edges": [0, 20, 99], "content": [1.1, 0.9], "flow": "clamp"}},
                  {"key": "up", "value": 1.2}, {"key": "down", "value": 0.8}]}}]}"#,
        )
        .unwrap();
        let store = TableStore::in_memory().with_library(TableGroup::Pileup, Year::Y2018, lib);
        let pu = PileupReweighter::new(&store, Year::Y2018).unwrap();
        let mut ledger = WeightLedger::new(2);
        add_genweight(&batch(), &mut ledger).unwrap();
        pu.add_weight(&batch(), &mut ledger, false).unwrap();
        assert_eq!(ledger.names(), vec!["genweight", "pileup"]);
        let w = ledger.weight(None).unwrap();
        approx::assert_relative_eq!(w[0], 1.5 * 1.1, epsilon = 1e-12);
        approx::assert_relative_eq!(w[1], -0.5 * 0.9, epsilon = 1e-12);
        assert!(PileupReweighter::new(&store, Year::Y2017).is_err());
    }
}
