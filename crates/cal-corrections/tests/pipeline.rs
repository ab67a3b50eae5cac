mod common;

use approx::assert_relative_eq;
use cal_core::{Error, EventBatch, Jagged, Met};
use cal_corrections::met::jet_veto_adjustment;
use cal_corrections::{
    CalibrationPipeline, JetCalibrator, JetVetoMap, MuonScaleCorrector, PipelineConfig, Shift,
};
use cal_table::{TableGroup, TableStore};

use common::*;

const NO_SMEAR: (f64, f64, f64) = (1.0, 1.1, 0.9);

const MC_CONFIG: &str = r#"
year: "2018"
sample: mc
jerc:
  jec_version: {MC: Summer19UL18_V5_MC}
  jer_version: Summer19UL18_JRV2_MC
"#;

fn pipeline(yaml: &str, jer_sf: (f64, f64, f64)) -> CalibrationPipeline {
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    CalibrationPipeline::new(&full_store(jer_sf), config).unwrap()
}

#[test]
fn jec_compound_multiplies_levels_and_feeds_type1() {
    let store = full_store(NO_SMEAR);
    let calibrator = JetCalibrator::new(&store, YEAR, &jerc_config(true, false), true, None).unwrap();
    let mut j = jet(100.0 / 0.9, 0.3, 0.0);
    j.raw_factor = 0.1;
    j.mass = 10.0 / 0.9;
    let mut batch = EventBatch {
        run: vec![1],
        event: vec![7],
        rho: vec![10.0],
        jets: Jagged::from_nested(vec![vec![j]]),
        met: vec![Met { pt: 30.0, phi: 0.0 }],
        ..Default::default()
    };
    batch.normalize().unwrap();
    let cal = calibrator.calibrate(&mut batch).unwrap();

    assert_relative_eq!(cal.pt_raw[0], 100.0, epsilon = 1e-9);
    let compound = 1.02 * 0.98 * 1.01;
    assert_relative_eq!(batch.jets.flat()[0].pt, 100.0 * compound, epsilon = 1e-9);
    assert_relative_eq!(batch.jets.flat()[0].mass, 10.0 * compound, epsilon = 1e-9);
    let pt_l1 = cal.pt_l1.as_ref().unwrap()[0];
    let pt_l123 = cal.pt_l123.as_ref().unwrap()[0];
    assert_relative_eq!(pt_l1, 102.0, epsilon = 1e-9);
    assert_relative_eq!(pt_l123, 100.0 * compound, epsilon = 1e-9);
    assert_eq!(cal.n_type1, 1);

    // The jet points along +x, so Type-1 moves only the x component.
    assert_relative_eq!(batch.met[0].x(), 30.0 - (pt_l123 - pt_l1), epsilon = 1e-9);
    assert_relative_eq!(batch.met[0].y(), 0.0, epsilon = 1e-9);
}

#[test]
fn jec_takes_the_compound_output_operation() {
    let store = TableStore::in_memory()
        .with_library(TableGroup::Jerc, YEAR, jerc_library_with_output_op(1.02, 0.98, 1.01, NO_SMEAR, "last"));
    let calibrator = JetCalibrator::new(&store, YEAR, &jerc_config(true, false), true, None).unwrap();
    let mut batch = EventBatch {
        run: vec![1],
        event: vec![7],
        rho: vec![10.0],
        jets: Jagged::from_nested(vec![vec![jet(100.0, 0.3, 0.0)]]),
        met: vec![Met { pt: 30.0, phi: 0.0 }],
        ..Default::default()
    };
    batch.normalize().unwrap();
    let cal = calibrator.calibrate(&mut batch).unwrap();

    // `last` keeps only the final stage, not the product of all three.
    assert_relative_eq!(cal.pt_jec[0], 101.0, epsilon = 1e-9);
    assert_relative_eq!(batch.jets.flat()[0].pt, 101.0, epsilon = 1e-9);
    assert_relative_eq!(batch.jets.flat()[0].mass, 8.0 * 1.01, epsilon = 1e-9);
    assert_relative_eq!(cal.pt_l123.as_ref().unwrap()[0], 100.0 * 1.02 * 0.98 * 1.01, epsilon = 1e-9);
}

#[test]
fn stochastic_jer_is_reproducible_across_runs_and_chunking() {
    let store = full_store((1.2, 1.3, 1.1));
    let calibrator = JetCalibrator::new(&store, YEAR, &jerc_config(false, true), true, None).unwrap();
    let unmatched = jet(60.0, 1.3, 0.4);
    let mut single = EventBatch {
        run: vec![1],
        event: vec![42],
        rho: vec![12.0],
        gen_weight: Some(vec![1.0]),
        jets: Jagged::from_nested(vec![vec![unmatched]]),
        met: vec![Met { pt: 10.0, phi: 0.0 }],
        ..Default::default()
    };
    single.normalize().unwrap();

    let mut first = single.clone();
    calibrator.calibrate(&mut first).unwrap();
    let mut second = single.clone();
    calibrator.calibrate(&mut second).unwrap();
    let smeared = first.jets.flat()[0].pt;
    assert_ne!(smeared, 60.0);
    assert_eq!(smeared.to_bits(), second.jets.flat()[0].pt.to_bits());
    assert_eq!(first.met[0].pt.to_bits(), second.met[0].pt.to_bits());

    // The same jet in a different batch layout draws the same number.
    let mut chunked = EventBatch {
        run: vec![1, 1],
        event: vec![7, 42],
        rho: vec![5.0, 12.0],
        gen_weight: Some(vec![1.0, 1.0]),
        jets: Jagged::from_nested(vec![vec![jet(80.0, -0.5, 2.0), jet(35.0, 0.1, -2.0)], vec![unmatched]]),
        met: vec![Met { pt: 20.0, phi: 1.0 }, Met { pt: 10.0, phi: 0.0 }],
        ..Default::default()
    };
    chunked.normalize().unwrap();
    calibrator.calibrate(&mut chunked).unwrap();
    assert_eq!(chunked.jets.flat()[2].pt.to_bits(), smeared.to_bits());
}

#[test]
fn muon_scale_on_data_moves_met_by_each_muon() {
    let store = full_store(NO_SMEAR);
    let scale = MuonScaleCorrector::new(&store, YEAR, false, Shift::Nominal).unwrap();
    let mut batch = EventBatch {
        run: vec![315_000],
        event: vec![1],
        muons: Jagged::from_nested(vec![vec![
            muon(50.0, -1.0, 0.0),
            muon(30.0, 1.0, std::f64::consts::FRAC_PI_2),
        ]]),
        met: vec![Met { pt: 40.0, phi: 0.0 }],
        ..Default::default()
    };
    batch.normalize().unwrap();
    let out = scale.apply(&mut batch).unwrap();

    assert_eq!(out.factor, vec![1.01, 0.99]);
    assert_eq!(out.pt_raw, vec![50.0, 30.0]);
    assert_relative_eq!(batch.muons.flat()[0].pt, 50.5, epsilon = 1e-12);
    assert_relative_eq!(batch.muons.flat()[1].pt, 29.7, epsilon = 1e-12);
    assert_relative_eq!(batch.met[0].x(), 40.5, epsilon = 1e-9);
    assert_relative_eq!(batch.met[0].y(), -0.3, epsilon = 1e-9);
}

#[test]
fn type1_and_muon_scale_commute() {
    let store = full_store(NO_SMEAR);
    let jets = JetCalibrator::new(&store, YEAR, &jerc_config(true, false), true, None).unwrap();
    let scale = MuonScaleCorrector::new(&store, YEAR, true, Shift::Nominal).unwrap();

    let mut base = mc_batch();
    // A second muon close to a jet keeps that jet out of Type-1 either way.
    let mut near = muon(25.0, -0.45, -1.05);
    near.gen_pt = Some(24.0);
    base.muons = Jagged::from_nested(vec![vec![base.muons.flat()[0], near], vec![]]);
    base.normalize().unwrap();

    let mut jets_first = base.clone();
    let cal = jets.calibrate(&mut jets_first).unwrap();
    scale.apply(&mut jets_first).unwrap();

    let mut muons_first = base.clone();
    scale.apply(&mut muons_first).unwrap();
    let cal_after = jets.calibrate(&mut muons_first).unwrap();

    assert_eq!(cal.n_type1, 2);
    assert_eq!(cal.n_type1, cal_after.n_type1);
    for (a, b) in jets_first.met.iter().zip(&muons_first.met) {
        assert_relative_eq!(a.x(), b.x(), epsilon = 1e-9);
        assert_relative_eq!(a.y(), b.y(), epsilon = 1e-9);
    }
}

#[test]
fn jet_veto_after_smearing_differs_from_before() {
    let store = full_store((1.2, 1.3, 1.1));
    let veto = JetVetoMap::new(&store, YEAR, "jetvetomap").unwrap();
    let mut hot = jet(100.0, 0.5, 0.5);
    hot.gen_jet_idx = 0;
    hot.gen_pt = Some(90.0);
    let mut base = EventBatch {
        run: vec![1],
        event: vec![5],
        rho: vec![10.0],
        jets: Jagged::from_nested(vec![vec![hot]]),
        met: vec![Met { pt: 20.0, phi: 0.0 }],
        gen_weight: Some(vec![1.0]),
        ..Default::default()
    };
    base.normalize().unwrap();

    // Reference: Type-1 MET only.
    let mut type1 = base.clone();
    let cal = JetCalibrator::new(&store, YEAR, &jerc_config(true, false), true, None)
        .unwrap()
        .calibrate(&mut type1)
        .unwrap();
    let pt_jec = cal.pt_jec[0];
    let pt_jer = pt_jec + 0.2 * (pt_jec - 90.0);

    let mut after = base.clone();
    JetCalibrator::new(&store, YEAR, &jerc_config(true, true), true, None)
        .unwrap()
        .calibrate(&mut after)
        .unwrap();
    assert_relative_eq!(after.jets.flat()[0].pt, pt_jer, epsilon = 1e-9);
    let keep = veto.keep_mask(&after.jets).unwrap();
    assert_eq!(keep, vec![false]);
    after.met = jet_veto_adjustment(&after.met, &after.jets, &keep).unwrap();

    let mut before = type1.clone();
    let keep = veto.keep_mask(&before.jets).unwrap();
    before.met = jet_veto_adjustment(&before.met, &before.jets, &keep).unwrap();
    JetCalibrator::new(&store, YEAR, &jerc_config(false, true), true, None)
        .unwrap()
        .calibrate(&mut before)
        .unwrap();

    // Vetoing after smearing removes the jet entirely.
    let (c, s) = (0.5f64.cos(), 0.5f64.sin());
    assert_relative_eq!(after.met[0].x(), type1.met[0].x() - pt_jec * c, epsilon = 1e-9);
    assert_relative_eq!(after.met[0].y(), type1.met[0].y() - pt_jec * s, epsilon = 1e-9);
    // Vetoing first leaves the smearing shift of the vetoed jet in MET.
    assert_relative_eq!(before.met[0].x() - after.met[0].x(), (pt_jer - pt_jec) * c, epsilon = 1e-9);
    assert!((before.met[0].pt - after.met[0].pt).abs() > 1.0);
}

#[test]
fn full_pipeline_registers_weights_in_stage_order() {
    let p = pipeline(MC_CONFIG, NO_SMEAR);
    let mut batch = mc_batch();
    let out = p.process(&mut batch).unwrap();

    assert_eq!(
        out.ledger.names(),
        vec![
            "genweight",
            "pileup",
            "pujetid",
            "electron_id",
            "electron_reco",
            "electron_reco_below20",
            "muon_reco",
            "muon_id",
            "muon_iso",
            "tau_id_vs_e",
            "tau_id_vs_mu",
            "tau_id_vs_jet",
            "btag_bc",
            "btag_light",
        ]
    );
    assert!(out.ledger.entry("genweight").unwrap().up.is_none());
    assert!(out.ledger.variations().contains(&"pileupUp".to_string()));

    let untagged_light = (1.0 - 0.95 * 0.6) / 0.4;
    let w = out.ledger.weight(None).unwrap();
    assert_relative_eq!(w[0], 1.1 * 0.97 * 0.95 * untagged_light * 0.99f64.powi(3), epsilon = 1e-9);
    assert_relative_eq!(w[1], 2.0 * 1.1 * untagged_light * 0.97 * 0.97 * 0.9, epsilon = 1e-9);
    let up = out.ledger.weight(Some("pileupUp")).unwrap();
    assert_relative_eq!(up[0], w[0] * 1.2 / 1.1, epsilon = 1e-9);

    assert_relative_eq!(batch.muons.flat()[0].pt, 40.0 * 1.02, epsilon = 1e-9);
    assert_relative_eq!(batch.taus.flat()[0].pt, 45.0 * 1.02, epsilon = 1e-9);

    let stages: Vec<&str> = out.report.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, vec!["jets", "tau_energy_scale", "muon_momentum_scale"]);
    assert_eq!(out.report.n_events, 2);
    assert_eq!(out.report.weights.len(), 14);
    assert_relative_eq!(out.report.sum_of_weights, w[0] + w[1], epsilon = 1e-9);
    assert!(out.jet_veto_keep.is_none());
    assert!(out.selection.names().is_empty());
}

#[test]
fn veto_map_and_met_phi_stages_when_enabled() {
    let yaml = format!("{MC_CONFIG}stages:\n  jet_veto_map: true\n  met_phi: true\n");
    let p = pipeline(&yaml, NO_SMEAR);
    let mut batch = mc_batch();
    batch.jets.flat_mut()[2].eta = 1.0;
    batch.jets.flat_mut()[2].phi = 0.5;
    let out = p.process(&mut batch).unwrap();

    assert_eq!(out.jet_veto_keep, Some(vec![true, true, false]));
    assert_eq!(out.selection.names(), vec!["jet_veto"]);
    assert_eq!(out.selection.all(&[]).unwrap(), vec![true, false]);
    let stages: Vec<&str> = out.report.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, vec!["jets", "jet_veto", "tau_energy_scale", "muon_momentum_scale", "met_phi"]);
    assert_eq!(out.report.stages[1].objects, 1);
}

#[test]
fn every_stage_preserves_object_counts() {
    let yaml = format!("{MC_CONFIG}stages:\n  jet_veto_map: true\n  met_phi: true\n");
    let p = pipeline(&yaml, (1.2, 1.3, 1.1));
    let mut batch = mc_batch();
    batch.normalize().unwrap();
    // One jet inside the vetoed region, so the veto stage has work to do.
    batch.jets.flat_mut()[2].eta = 1.0;
    batch.jets.flat_mut()[2].phi = 0.5;
    let before = (
        batch.jets.counts(),
        batch.muons.counts(),
        batch.electrons.counts(),
        batch.taus.counts(),
    );
    let out = p.process(&mut batch).unwrap();

    assert_eq!(out.jet_veto_keep, Some(vec![true, true, false]));
    assert_eq!(batch.jets.counts(), before.0);
    assert_eq!(batch.muons.counts(), before.1);
    assert_eq!(batch.electrons.counts(), before.2);
    assert_eq!(batch.taus.counts(), before.3);
    assert_eq!(batch.met.len(), 2);
    let stages: Vec<&str> = out.report.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, vec!["jets", "jet_veto", "tau_energy_scale", "muon_momentum_scale", "met_phi"]);
}

#[test]
fn out_of_domain_objects_are_left_alone() {
    let p = pipeline(MC_CONFIG, NO_SMEAR);
    let mut far_muon = muon(40.0, 2.45, 0.3);
    far_muon.gen_pt = Some(40.0);
    let mut odd_tau = tau(45.0, 0.2, 1.0);
    odd_tau.decay_mode = 5;
    let mut forward = jet(80.0, 2.7, -1.0);
    forward.btag_deepjet = 0.95;
    forward.hadron_flavour = 5;
    let mut batch = EventBatch {
        run: vec![1],
        event: vec![9],
        gen_weight: Some(vec![0.5]),
        n_true_int: Some(vec![20.0]),
        rho: vec![8.0],
        jets: Jagged::from_nested(vec![vec![forward]]),
        muons: Jagged::from_nested(vec![vec![far_muon]]),
        electrons: Jagged::from_nested(vec![vec![electron(5.0, 0.1, 0.1)]]),
        taus: Jagged::from_nested(vec![vec![odd_tau]]),
        met: vec![Met { pt: 25.0, phi: -0.5 }],
        ..Default::default()
    };
    let out = p.process(&mut batch).unwrap();

    assert_eq!(batch.muons.flat()[0].pt, 40.0);
    assert_eq!(batch.taus.flat()[0].pt, 45.0);
    let rest = out.ledger.partial_weight(&[], &["genweight", "pileup"]).unwrap();
    assert_eq!(rest, vec![1.0]);
    assert_relative_eq!(out.ledger.weight(None).unwrap()[0], 0.5 * 1.1, epsilon = 1e-12);
}

#[test]
fn data_pipeline_skips_weights_and_smearing() {
    let yaml = r#"
year: "2018"
sample: data
era: A
jerc:
  apply_jec: false
"#;
    let p = pipeline(yaml, (1.2, 1.3, 1.1));
    let mut batch = mc_batch();
    batch.gen_weight = None;
    batch.n_true_int = None;
    let pt_before: Vec<f64> = batch.jets.flat().iter().map(|j| j.pt).collect();
    let out = p.process(&mut batch).unwrap();

    assert!(out.ledger.names().is_empty());
    assert_eq!(out.ledger.weight(None).unwrap(), vec![1.0, 1.0]);
    let pt_after: Vec<f64> = batch.jets.flat().iter().map(|j| j.pt).collect();
    assert_eq!(pt_before, pt_after);
    // Data muons take the eta-binned scale.
    assert_relative_eq!(batch.muons.flat()[0].pt, 40.0 * 1.01, epsilon = 1e-9);
    assert!(!out.report.is_mc);
}

#[test]
fn sample_kind_must_match_batch() {
    let p = pipeline(MC_CONFIG, NO_SMEAR);
    let mut batch = mc_batch();
    batch.gen_weight = None;
    assert!(matches!(p.process(&mut batch), Err(Error::Validation(_))));
}

#[test]
fn shifted_pass_registers_no_variations() {
    let yaml = format!("{MC_CONFIG}shift: tau_up\n");
    let p = pipeline(&yaml, NO_SMEAR);
    let mut batch = mc_batch();
    let out = p.process(&mut batch).unwrap();
    assert!(out.ledger.variations().is_empty());
    assert_relative_eq!(batch.taus.flat()[0].pt, 45.0 * 1.03, epsilon = 1e-9);
}

#[test]
fn missing_tables_fail_before_any_event() {
    let config = PipelineConfig::from_yaml(MC_CONFIG).unwrap();
    let err = CalibrationPipeline::new(&cal_table::TableStore::in_memory(), config).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
