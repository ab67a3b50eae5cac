//! In-memory correction tables and event builders shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use cal_core::{Electron, EventBatch, Jagged, Jet, Met, Muon, Tau, Year};
use cal_corrections::JetCalibrationConfig;
use cal_table::{CorrectionLibrary, TableGroup, TableStore};

pub const YEAR: Year = Year::Y2018;
pub const JEC_MC: &str = "Summer19UL18_V5_MC";
pub const JER_MC: &str = "Summer19UL18_JRV2_MC";
pub const ALGO: &str = "AK4PFchs";

fn inputs_json(inputs: &[(&str, &str)]) -> String {
    let vars: Vec<String> =
        inputs.iter().map(|(n, t)| format!(r#"{{"name": "{n}", "type": "{t}"}}"#)).collect();
    format!("[{}]", vars.join(", "))
}

/// Correction with arbitrary `data` node.
pub fn correction(name: &str, inputs: &[(&str, &str)], data: &str) -> String {
    format!(
        r#"{{"name": "{name}", "version": 1, "inputs": {}, "output": {{"name": "out", "type": "real"}}, "data": {data}}}"#,
        inputs_json(inputs)
    )
}

/// Correction returning one value everywhere.
pub fn constant(name: &str, inputs: &[(&str, &str)], value: f64) -> String {
    correction(name, inputs, &format!("{value:?}"))
}

/// Correction returning one value per systematic label. `inputs` must
/// declare `syst_input` as a string.
pub fn by_syst(name: &str, inputs: &[(&str, &str)], syst_input: &str, values: &[(&str, f64)]) -> String {
    let content: Vec<String> =
        values.iter().map(|(k, v)| format!(r#"{{"key": "{k}", "value": {v:?}}}"#)).collect();
    let data = format!(
        r#"{{"nodetype": "category", "input": "{syst_input}", "content": [{}]}}"#,
        content.join(", ")
    );
    correction(name, inputs, &data)
}

pub fn library(corrections: &[String], compounds: &[String]) -> CorrectionLibrary {
    let json = format!(
        r#"{{"schema_version": 2, "corrections": [{}], "compound_corrections": [{}]}}"#,
        corrections.join(", "),
        compounds.join(", ")
    );
    CorrectionLibrary::from_json(&json).unwrap()
}

/// JEC levels as constants, and a JER scale factor `(nom, up, down)` with
/// a flat 10% resolution.
pub fn jerc_library(l1: f64, l2: f64, l3: f64, jer_sf: (f64, f64, f64)) -> CorrectionLibrary {
    jerc_library_with_output_op(l1, l2, l3, jer_sf, "*")
}

/// As [`jerc_library`], with the compound's `output_op` chosen by the caller.
pub fn jerc_library_with_output_op(
    l1: f64,
    l2: f64,
    l3: f64,
    jer_sf: (f64, f64, f64),
    output_op: &str,
) -> CorrectionLibrary {
    let key = |tag: &str| format!("{JEC_MC}_{tag}_{ALGO}");
    let jec_inputs = [("JetA", "real"), ("JetEta", "real"), ("JetPt", "real"), ("Rho", "real")];
    let corrections = vec![
        constant(&key("L1FastJet"), &jec_inputs, l1),
        constant(&key("L2Relative"), &[("JetEta", "real"), ("JetPt", "real")], l2),
        constant(&key("L3Absolute"), &[("JetEta", "real"), ("JetPt", "real")], l3),
        constant(&key("Total"), &[("JetEta", "real"), ("JetPt", "real")], 0.03),
        constant(
            &format!("{JER_MC}_PtResolution_{ALGO}"),
            &[("JetEta", "real"), ("JetPt", "real"), ("Rho", "real")],
            0.1,
        ),
        by_syst(
            &format!("{JER_MC}_ScaleFactor_{ALGO}"),
            &[("JetEta", "real"), ("systematic", "string")],
            "systematic",
            &[("nom", jer_sf.0), ("up", jer_sf.1), ("down", jer_sf.2)],
        ),
    ];
    let compound = format!(
        r#"{{"name": "{}", "inputs": {}, "output": {{"name": "correction", "type": "real"}},
            "inputs_update": ["JetPt"], "input_op": "*", "output_op": "{}",
            "stack": ["{}", "{}", "{}"]}}"#,
        key("L1L2L3Res"),
        inputs_json(&jec_inputs),
        output_op,
        key("L1FastJet"),
        key("L2Relative"),
        key("L3Absolute")
    );
    library(&corrections, &[compound])
}

pub fn jerc_config(apply_jec: bool, apply_jer: bool) -> JetCalibrationConfig {
    let mut jec_version = BTreeMap::new();
    jec_version.insert("MC".to_string(), JEC_MC.to_string());
    JetCalibrationConfig {
        apply_jec,
        apply_jer,
        jec_version,
        jer_version: JER_MC.to_string(),
        ..Default::default()
    }
}

/// Momentum-scale tables. `kScaleDT` is binned in eta: 1.01 below 0,
/// 0.99 above.
pub fn muon_scale_library() -> CorrectionLibrary {
    let common = [("charge", "int"), ("eta", "real"), ("phi", "real"), ("pt", "real")];
    let mut spread = common.to_vec();
    spread.push(("gen_pt", "real"));
    let mut smear = common.to_vec();
    smear.push(("n_tracker_layers", "int"));
    smear.push(("u", "real"));
    let scale_dt = correction(
        "kScaleDT",
        &common,
        r#"{"nodetype": "binning", "input": "eta", "edges": [-2.4, 0.0, 2.4], "content": [1.01, 0.99], "flow": "error"}"#,
    );
    library(
        &[
            scale_dt,
            constant("kScaleDT_error", &common, 0.005),
            constant("kSpreadMC", &spread, 1.02),
            constant("kSpreadMC_error", &spread, 0.004),
            constant("kSmearMC", &smear, 0.98),
            constant("kSmearMC_error", &smear, 0.01),
        ],
        &[],
    )
}

fn weight_libraries(store: TableStore) -> TableStore {
    let pileup = library(
        &[by_syst(
            "Collisions18_UltraLegacy_goldenJSON",
            &[("NumTrueInteractions", "real"), ("weights", "string")],
            "weights",
            &[("nominal", 1.1), ("up", 1.2), ("down", 1.0)],
        )],
        &[],
    );
    let pujetid = library(
        &[by_syst(
            "PUJetID_eff",
            &[("eta", "real"), ("pt", "real"), ("systematic", "string"), ("workingpoint", "string")],
            "systematic",
            &[("nom", 0.97), ("up", 0.99), ("down", 0.95)],
        )],
        &[],
    );
    let btag_inputs = [
        ("systematic", "string"),
        ("working_point", "string"),
        ("flavor", "int"),
        ("abseta", "real"),
        ("pt", "real"),
    ];
    let btag_values = [("central", 0.95), ("up", 1.0), ("down", 0.9)];
    let btag = library(
        &[
            by_syst("deepJet_comb", &btag_inputs, "systematic", &btag_values),
            by_syst("deepJet_incl", &btag_inputs, "systematic", &btag_values),
        ],
        &[],
    );
    let btag_eff = library(
        &[constant("deepJet_medium", &[("pt", "real"), ("abseta", "real"), ("flavor", "int")], 0.6)],
        &[],
    );
    let electron = library(
        &[by_syst(
            "UL-Electron-ID-SF",
            &[
                ("year", "string"),
                ("ValType", "string"),
                ("WorkingPoint", "string"),
                ("eta", "real"),
                ("pt", "real"),
            ],
            "ValType",
            &[("sf", 0.97), ("sfup", 0.99), ("sfdown", 0.95)],
        )],
        &[],
    );
    let muon_inputs = [("abseta", "real"), ("pt", "real"), ("scale_factors", "string")];
    let muon_values = [("nominal", 0.99), ("systup", 1.0), ("systdown", 0.98)];
    let muon = library(
        &[
            by_syst("NUM_TrackerMuons_DEN_genTracks", &muon_inputs, "scale_factors", &muon_values),
            by_syst("NUM_TightID_DEN_TrackerMuons", &muon_inputs, "scale_factors", &muon_values),
            by_syst("NUM_TightRelIso_DEN_TightIDandIPCut", &muon_inputs, "scale_factors", &muon_values),
        ],
        &[],
    );
    let tau_values = [("nom", 0.9), ("default", 0.9), ("up", 1.0), ("down", 0.8)];
    let tau = library(
        &[
            by_syst(
                "DeepTau2017v2p1VSe",
                &[("eta", "real"), ("genmatch", "int"), ("wp", "string"), ("syst", "string")],
                "syst",
                &tau_values,
            ),
            by_syst(
                "DeepTau2017v2p1VSmu",
                &[("eta", "real"), ("genmatch", "int"), ("wp", "string"), ("syst", "string")],
                "syst",
                &tau_values,
            ),
            by_syst(
                "DeepTau2017v2p1VSjet",
                &[
                    ("pt", "real"),
                    ("dm", "int"),
                    ("genmatch", "int"),
                    ("wp", "string"),
                    ("wp_VSe", "string"),
                    ("syst", "string"),
                    ("flag", "string"),
                ],
                "syst",
                &tau_values,
            ),
            by_syst(
                "tau_energy_scale",
                &[
                    ("pt", "real"),
                    ("eta", "real"),
                    ("dm", "int"),
                    ("genmatch", "int"),
                    ("id", "string"),
                    ("syst", "string"),
                ],
                "syst",
                &[("nom", 1.02), ("up", 1.03), ("down", 1.01)],
            ),
        ],
        &[],
    );
    store
        .with_library(TableGroup::Pileup, YEAR, pileup)
        .with_library(TableGroup::PuJetId, YEAR, pujetid)
        .with_library(TableGroup::BTag, YEAR, btag)
        .with_library(TableGroup::BTagEfficiency, YEAR, btag_eff)
        .with_library(TableGroup::Electron, YEAR, electron)
        .with_library(TableGroup::Muon, YEAR, muon)
        .with_library(TableGroup::Tau, YEAR, tau)
}

/// Jet veto map vetoing the quadrant eta > 0, phi > 0, and identity MET φ
/// tables.
fn met_libraries(store: TableStore) -> TableStore {
    let veto = library(
        &[correction(
            "Summer19UL18_V1",
            &[("type", "string"), ("eta", "real"), ("phi", "real")],
            r#"{"nodetype": "category", "input": "type", "content": [
                 {"key": "jetvetomap", "value": {"nodetype": "multibinning", "inputs": ["eta", "phi"],
                   "edges": [[-5.191, 0.0, 5.191], [-3.1416, 0.0, 3.1416]],
                   "content": [0.0, 0.0, 0.0, 100.0], "flow": "error"}}]}"#,
        )],
        &[],
    );
    let phi_inputs = [("pt", "real"), ("phi", "real"), ("npvGood", "real"), ("run", "int")];
    let met = library(
        &[
            correction(
                "pt_metphicorr_pfmet_mc",
                &phi_inputs,
                r#"{"nodetype": "formula", "expression": "x", "parser": "TFormula", "variables": ["pt"]}"#,
            ),
            correction(
                "phi_metphicorr_pfmet_mc",
                &phi_inputs,
                r#"{"nodetype": "formula", "expression": "x", "parser": "TFormula", "variables": ["phi"]}"#,
            ),
        ],
        &[],
    );
    store.with_library(TableGroup::JetVetoMaps, YEAR, veto).with_library(TableGroup::Met, YEAR, met)
}

/// Every table a 2018 simulation pipeline can ask for.
pub fn full_store(jer_sf: (f64, f64, f64)) -> TableStore {
    let store = TableStore::in_memory()
        .with_library(TableGroup::Jerc, YEAR, jerc_library(1.02, 0.98, 1.01, jer_sf))
        .with_library(TableGroup::MuonScale, YEAR, muon_scale_library());
    met_libraries(weight_libraries(store))
}

pub fn jet(pt: f64, eta: f64, phi: f64) -> Jet {
    Jet {
        pt,
        eta,
        phi,
        mass: 8.0,
        raw_factor: 0.0,
        area: 0.5,
        ne_em_ef: 0.1,
        ch_em_ef: 0.1,
        btag_deepjet: 0.05,
        hadron_flavour: 0,
        pu_id: 7,
        gen_jet_idx: -1,
        gen_pt: None,
    }
}

pub fn muon(pt: f64, eta: f64, phi: f64) -> Muon {
    Muon {
        pt,
        eta,
        phi,
        mass: 0.105,
        charge: -1,
        loose_id: true,
        medium_id: true,
        tight_id: true,
        high_pt_id: 2,
        pf_rel_iso04_all: 0.02,
        tk_rel_iso: 0.01,
        n_tracker_layers: 11,
        gen_pt: None,
    }
}

pub fn electron(pt: f64, eta: f64, phi: f64) -> Electron {
    Electron {
        pt,
        eta,
        phi,
        mass: 0.0005,
        charge: 1,
        cut_based: 4,
        mva_iso_wp80: true,
        mva_iso_wp90: true,
        mva_noiso_wp80: true,
        mva_noiso_wp90: true,
        pf_rel_iso03_all: 0.03,
    }
}

pub fn tau(pt: f64, eta: f64, phi: f64) -> Tau {
    Tau {
        pt,
        eta,
        phi,
        mass: 1.2,
        charge: -1,
        decay_mode: 1,
        gen_part_flav: 5,
        id_vs_jet: 63,
        id_vs_e: 63,
        id_vs_mu: 15,
    }
}

/// Two simulated events with one object of every kind spread over them.
pub fn mc_batch() -> EventBatch {
    let mut b1 = jet(100.0 / 0.9, -0.5, -1.0);
    b1.raw_factor = 0.1;
    b1.hadron_flavour = 5;
    b1.btag_deepjet = 0.9;
    let mut soft = jet(30.0, -1.2, 2.0);
    soft.gen_jet_idx = 0;
    soft.gen_pt = Some(29.0);
    let mut mu = muon(40.0, -1.0, 1.0);
    mu.gen_pt = Some(39.5);
    EventBatch {
        dataset: "ttbar".into(),
        run: vec![1, 1],
        luminosity_block: vec![3, 3],
        event: vec![101, 102],
        gen_weight: Some(vec![1.0, 2.0]),
        n_true_int: Some(vec![25.0, 31.0]),
        rho: vec![12.0, 15.0],
        npvs_good: vec![20.0, 24.0],
        jets: Jagged::from_nested(vec![vec![b1, soft], vec![jet(60.0, -2.0, -2.5)]]),
        muons: Jagged::from_nested(vec![vec![mu], vec![]]),
        electrons: Jagged::from_nested(vec![vec![], vec![electron(35.0, 0.4, 0.7)]]),
        taus: Jagged::from_nested(vec![vec![], vec![tau(45.0, -0.8, -0.4)]]),
        met: vec![Met { pt: 40.0, phi: 0.0 }, Met { pt: 15.0, phi: 1.0 }],
        ..Default::default()
    }
}
