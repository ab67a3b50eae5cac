use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use cal_core::{Jagged, Muon};
use cal_corrections::{MaskedEvaluator, ObjectFactors, SystLabels, WeightLedger};
use cal_table::{CorrectionLibrary, ScaleFactorTable};

fn muon_table() -> ScaleFactorTable {
    let lib = CorrectionLibrary::from_json(
        r#"{"schema_version": 2, "corrections": [{
            "name": "NUM_TightID_DEN_TrackerMuons", "version": 1,
            "inputs": [{"name": "abseta", "type": "real"}, {"name": "pt", "type": "real"},
                       {"name": "scale_factors", "type": "string"}],
            "output": {"name": "weight", "type": "real"},
            "data": {"nodetype": "category", "input": "scale_factors", "content": [
                {"key": "nominal", "value": {"nodetype": "multibinning", "inputs": ["abseta", "pt"],
                    "edges": [[0, 0.9, 1.2, 2.1, 2.4], [15, 20, 25, 30, 40, 50, 60, 120, 200]],
                    "content": [0.99, 0.99, 0.98, 0.98, 0.97, 0.97, 0.96, 0.96,
                                0.99, 0.99, 0.98, 0.98, 0.97, 0.97, 0.96, 0.96,
                                0.99, 0.99, 0.98, 0.98, 0.97, 0.97, 0.96, 0.96,
                                0.99, 0.99, 0.98, 0.98, 0.97, 0.97, 0.96, 0.96],
                    "flow": "error"}},
                {"key": "systup", "value": 1.01},
                {"key": "systdown", "value": 0.97}
            ]}
        }]}"#,
    )
    .unwrap();
    ScaleFactorTable::single("muon/2018/id", lib.correction("NUM_TightID_DEN_TrackerMuons").unwrap())
        .with_syst_input("scale_factors")
        .unwrap()
}

// Deterministic spread over and beyond the table's domain.
fn make_muons(n_events: usize) -> Jagged<Muon> {
    let nested = (0..n_events)
        .map(|ev| {
            (0..ev % 4)
                .map(|k| {
                    let x = (ev * 7 + k * 13) as f64;
                    Muon {
                        pt: 5.0 + (x * 3.7) % 300.0,
                        eta: -2.6 + (x * 0.37) % 5.2,
                        phi: -3.0 + (x * 0.11) % 6.0,
                        mass: 0.105,
                        charge: if k % 2 == 0 { 1 } else { -1 },
                        loose_id: true,
                        medium_id: true,
                        tight_id: k % 3 != 0,
                        high_pt_id: 0,
                        pf_rel_iso04_all: 0.05,
                        tk_rel_iso: 0.02,
                        n_tracker_layers: 10,
                        gen_pt: None,
                    }
                })
                .collect()
        })
        .collect();
    Jagged::from_nested(nested)
}

fn bench_masked_eval(c: &mut Criterion) {
    let table = muon_table();
    let mut group = c.benchmark_group("masked_evaluator");

    for n in [1_000usize, 10_000, 100_000] {
        let muons = make_muons(n);
        group.bench_with_input(BenchmarkId::new("muon_id_with_variations", n), &n, |b, &nn| {
            b.iter(|| {
                let eval = MaskedEvaluator::new(&muons, |m: &Muon| m.pt > 15.0 && m.pt < 199.999 && m.eta.abs() < 2.39)
                    .and_where(|m| m.tight_id)
                    .real("abseta", |m| m.eta.abs(), 0.0)
                    .real("pt", |m| m.pt, 15.0);
                let factors = ObjectFactors::evaluate(&eval, &table, SystLabels::MUON, true).unwrap();
                let mut ledger = WeightLedger::new(nn);
                factors.add_to(&mut ledger, "muon_id").unwrap();
                black_box(ledger.weight(Some("muon_idUp")).unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_masked_eval);
criterion_main!(benches);
