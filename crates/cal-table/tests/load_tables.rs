use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use approx::assert_relative_eq;
use cal_core::{Error, Year};
use cal_table::{Arg, TableGroup, TableStore, cached_library};
use flate2::Compression;
use flate2::write::GzEncoder;

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("cal_table_{}_{}_{}", std::process::id(), nanos, name));
    p
}

const JERC: &str = r#"{
  "schema_version": 2,
  "corrections": [
    {"name": "Summer19UL18_V5_MC_L1FastJet_AK4PFchs", "version": 1,
     "inputs": [{"name": "JetA", "type": "real"}, {"name": "JetEta", "type": "real"},
                {"name": "JetPt", "type": "real"}, {"name": "Rho", "type": "real"}],
     "output": {"name": "correction", "type": "real"},
     "data": {"nodetype": "formula", "expression": "max(0.0001, 1-y*([0]+[1]*z)/x)",
              "parser": "TFormula", "variables": ["JetPt", "JetA", "Rho"], "parameters": [0.1, 0.05]}},
    {"name": "Summer19UL18_V5_MC_L2Relative_AK4PFchs", "version": 1,
     "inputs": [{"name": "JetEta", "type": "real"}, {"name": "JetPt", "type": "real"}],
     "output": {"name": "correction", "type": "real"},
     "data": {"nodetype": "binning", "input": "JetEta", "edges": [-5.191, 0.0, 5.191],
              "content": [1.05, 1.1], "flow": "clamp"}},
    {"name": "Summer19UL18_V5_MC_L3Absolute_AK4PFchs", "version": 1,
     "inputs": [{"name": "JetEta", "type": "real"}, {"name": "JetPt", "type": "real"}],
     "output": {"name": "correction", "type": "real"}, "data": 1.0}
  ],
  "compound_corrections": [
    {"name": "Summer19UL18_V5_MC_L1L2L3Res_AK4PFchs",
     "inputs": [{"name": "JetA", "type": "real"}, {"name": "JetEta", "type": "real"},
                {"name": "JetPt", "type": "real"}, {"name": "Rho", "type": "real"}],
     "output": {"name": "correction", "type": "real"},
     "inputs_update": ["JetPt"], "input_op": "*", "output_op": "*",
     "stack": ["Summer19UL18_V5_MC_L1FastJet_AK4PFchs", "Summer19UL18_V5_MC_L2Relative_AK4PFchs",
               "Summer19UL18_V5_MC_L3Absolute_AK4PFchs"]}
  ]
}"#;

fn write_gz(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = std::fs::File::create(path).unwrap();
    let mut enc = GzEncoder::new(f, Compression::default());
    enc.write_all(body.as_bytes()).unwrap();
    enc.finish().unwrap();
}

#[test]
fn gz_tables_resolve_from_directory_layout() {
    let root = tmp_dir("jerc");
    let path = TableGroup::Jerc.path(&root, Year::Y2018);
    write_gz(&path, JERC);

    let store = TableStore::new(&root);
    let l2 = store.table(TableGroup::Jerc, Year::Y2018, "Summer19UL18_V5_MC_L2Relative_AK4PFchs").unwrap();
    let f = l2.evaluate_args(&[Arg::real("JetEta", &[-1.0, 1.0, 7.0]), Arg::real("JetPt", &[30.0; 3])]).unwrap();
    assert_eq!(f, vec![1.05, 1.1, 1.1]);

    let compound = store.table(TableGroup::Jerc, Year::Y2018, "Summer19UL18_V5_MC_L1L2L3Res_AK4PFchs").unwrap();
    let args = [
        Arg::real("JetPt", &[40.0]),
        Arg::real("JetEta", &[0.5]),
        Arg::real("JetA", &[0.5]),
        Arg::real("Rho", &[20.0]),
    ];
    let (combined, stages) = compound.evaluate_stages(&args).unwrap();
    let l1 = 1.0 - 0.5 * (0.1 + 0.05 * 20.0) / 40.0;
    assert_relative_eq!(stages[0][0], l1, epsilon = 1e-12);
    assert_relative_eq!(stages[1][0], 1.1);
    let total = compound.evaluate_args(&args).unwrap();
    assert_relative_eq!(total[0], l1 * 1.1, epsilon = 1e-12);
    assert_eq!(combined, total);

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn cache_shares_compiled_library() {
    let root = tmp_dir("cache");
    let path = TableGroup::Jerc.path(&root, Year::Y2017);
    write_gz(&path, JERC);

    let a = cached_library(&path).unwrap();
    let b = cached_library(&path).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.len(), 3);
    assert!(a.names().contains(&"Summer19UL18_V5_MC_L1L2L3Res_AK4PFchs".to_string()));

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn plain_json_fallback_and_missing_file() {
    let root = tmp_dir("plain");
    let gz = TableGroup::Met.path(&root, Year::Y2017);
    let plain = gz.with_extension("");
    std::fs::create_dir_all(plain.parent().unwrap()).unwrap();
    std::fs::write(&plain, JERC).unwrap();

    let store = TableStore::new(&root);
    assert_eq!(store.path_for(TableGroup::Met, Year::Y2017), Some(plain));
    let err = store.library(TableGroup::Tau, Year::Y2017).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("tau"));

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn malformed_file_is_config_error() {
    let root = tmp_dir("bad");
    let path = TableGroup::Tau.path(&root, Year::Y2018);
    write_gz(&path, r#"{"schema_version": 2, "corrections": [{"name": "x"}]}"#);
    let err = TableStore::new(&root).library(TableGroup::Tau, Year::Y2018).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    std::fs::remove_dir_all(&root).ok();
}
