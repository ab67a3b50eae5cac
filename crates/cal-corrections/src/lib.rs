//! # cal-corrections
//!
//! Object calibrations and event weights for ultra-legacy Run II analyses.
//!
//! Kinematic corrections (jet energy scale and resolution, muon momentum
//! scale, tau energy scale, MET φ modulation) rewrite an [`EventBatch`] in
//! place and keep the MET consistent with every object change. Scale factors
//! are evaluated with the [`MaskedEvaluator`], which keeps objects outside a
//! table's domain at a neutral factor, and land in a [`WeightLedger`] with
//! their up/down variations.
//!
//! [`CalibrationPipeline`] strings everything together in a fixed order.
//!
//! [`EventBatch`]: cal_core::EventBatch

#![warn(clippy::all)]

pub mod btag;
pub mod config;
pub mod cutflow;
pub mod electron;
pub mod event_weights;
pub mod jet;
pub mod jet_veto;
pub mod ledger;
pub mod masked;
pub mod met;
pub mod muon;
pub mod muon_scale;
pub mod pipeline;
pub mod pujetid;
pub mod tau;
pub mod tau_energy;
pub mod trigger;
pub mod working_points;

pub use btag::{BTagConfig, BTagReweighter, FlavourGroup};
pub use config::{PipelineConfig, SampleKind, StageToggles};
pub use cutflow::{Cutflow, CutflowRow, Selection};
pub use electron::{ElectronConfig, ElectronCorrector};
pub use event_weights::PileupReweighter;
pub use jet::{JetCalibration, JetCalibrationConfig, JetCalibrator};
pub use jet_veto::JetVetoMap;
pub use ledger::{WeightEntry, WeightLedger};
pub use masked::{MaskedEvaluator, ObjectFactors, SystLabels};
pub use met::MetPhiCorrector;
pub use muon::{MuonConfig, MuonCorrector, MuonScheme};
pub use muon_scale::MuonScaleCorrector;
pub use pipeline::{CalibrationOutput, CalibrationPipeline, CalibrationReport, StageSummary};
pub use pujetid::PileupJetId;
pub use tau::{TauConfig, TauCorrector};
pub use tau_energy::TauEnergyScale;
pub use trigger::TriggerPath;
pub use working_points::{
    ElectronId, LooseMediumTight, MuonId, MuonIso, Shift, TauIdSelection, TauVsMuWp, TauWp,
};
