//! Pileup jet identification efficiency scale factors.

use cal_core::{Jagged, Jet, Result, Year};
use cal_table::{ScaleFactorTable, TableGroup, TableStore};

use crate::ledger::WeightLedger;
use crate::masked::{MaskedEvaluator, ObjectFactors, SystLabels};
use crate::working_points::LooseMediumTight;

/// Scale factors for generator-matched low-pt jets passing the pileup id.
#[derive(Debug, Clone)]
pub struct PileupJetId {
    year: Year,
    working_point: LooseMediumTight,
    table: ScaleFactorTable,
}

impl PileupJetId {
    pub fn new(store: &TableStore, year: Year, working_point: LooseMediumTight) -> Result<Self> {
        let table = store.syst_table(TableGroup::PuJetId, year, "PUJetID_eff", "systematic")?;
        Ok(Self { year, working_point, table })
    }

    /// Per-jet factors; only jets with 20 < pt < 50 carry the id.
    pub fn factors(&self, jets: &Jagged<Jet>, with_variations: bool) -> Result<ObjectFactors> {
        let code = self.working_point.pileup_id_code(self.year);
        let eval = MaskedEvaluator::new(jets, |j: &Jet| {
            j.pt > 20.0 && j.pt < 50.0 && j.eta.abs() < 5.0 && j.pu_id == code && j.gen_jet_idx >= 0
        })
        .real("eta", |j| j.eta, 0.0)
        .real("pt", |j| j.pt, 20.0)
        .tag("workingpoint", self.working_point.letter());
        ObjectFactors::evaluate(&eval, &self.table, SystLabels::NOM_UP_DOWN, with_variations)
    }

    /// Register `pujetid`.
    pub fn add_weight(&self, jets: &Jagged<Jet>, ledger: &mut WeightLedger, with_variations: bool) -> Result<()> {
        self.factors(jets, with_variations)?.add_to(ledger, "pujetid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cal_table::CorrectionLibrary;

    fn jet(pt: f64, pu_id: i32, gen_jet_idx: i32) -> Jet {
        Jet {
            pt,
            eta: -1.5,
            phi: 0.2,
            mass: 4.0,
            raw_factor: 0.0,
            area: 0.5,
            ne_em_ef: 0.1,
            ch_em_ef: 0.1,
            btag_deepjet: 0.0,
            hadron_flavour: 0,
            pu_id,
            gen_jet_idx,
            gen_pt: None,
        }
    }

    #[test]
    fn only_matched_low_pt_jets_with_the_id_code() {
        let lib = CorrectionLibrary::from_json(
            r#"{"schema_version": 2, "corrections": [{"name": "PUJetID_eff", "version": 1,
                "inputs": [{"name": "eta", "type": "real"}, {"name": "pt", "type": "real"},
                           {"name": "systematic", "type": "string"}, {"name": "workingpoint", "type": "string"}],
                "output": {"name": "sf", "type": "real"},
                "data": {"nodetype": "category", "input": "systematic", "content": [
                  {"key": "nom", "value": 0.97}, {"key": "up", "value": 0.99}, {"key": "down", "value": 0.95}]}}]}"#,
        )
        .unwrap();
        let store = TableStore::in_memory().with_library(TableGroup::PuJetId, Year::Y2018, lib);
        let pu = PileupJetId::new(&store, Year::Y2018, LooseMediumTight::Medium).unwrap();
        let jets = Jagged::from_nested(vec![vec![jet(30.0, 6, 0), jet(30.0, 4, 0), jet(30.0, 6, -1), jet(60.0, 6, 1)]]);
        let f = pu.factors(&jets, true).unwrap();
        assert_eq!(f.nominal.flat(), &[0.97, 1.0, 1.0, 1.0]);
        let mut ledger = WeightLedger::new(1);
        pu.add_weight(&jets, &mut ledger, true).unwrap();
        assert_eq!(ledger.weight(Some("pujetidUp")).unwrap(), vec![0.99]);
    }
}
