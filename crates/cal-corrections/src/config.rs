//! Pipeline configuration (YAML, or JSON as a YAML subset).
//!
//! Every working point and trigger path is a closed enum, so parsing the
//! file is enough to reject an unsupported selection. [`PipelineConfig::validate`]
//! adds the cross-field checks serde cannot express.

use std::path::Path;

use serde::{Deserialize, Serialize};

use cal_core::{Error, Result, Year};

use crate::btag::BTagConfig;
use crate::electron::ElectronConfig;
use crate::jet::JetCalibrationConfig;
use crate::muon::{MuonConfig, MuonScheme};
use crate::tau::TauConfig;
use crate::trigger::TriggerPath;
use crate::working_points::{LooseMediumTight, MuonId, Shift};

/// Simulation or recorded collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Mc,
    Data,
}

/// On/off switches for the optional pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageToggles {
    pub rochester: bool,
    pub tau_energy_scale: bool,
    pub met_phi: bool,
    pub jet_veto_map: bool,
    pub muon_weights: bool,
    pub electron_weights: bool,
    pub tau_weights: bool,
    pub btag: bool,
    pub pileup_jet_id: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            rochester: true,
            tau_energy_scale: true,
            met_phi: false,
            jet_veto_map: false,
            muon_weights: true,
            electron_weights: true,
            tau_weights: true,
            btag: true,
            pileup_jet_id: true,
        }
    }
}

/// Everything needed to build a [`crate::CalibrationPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub year: Year,
    /// Data-taking era (`A`, `B`, ...) selecting the JEC version for data.
    #[serde(default)]
    pub era: Option<String>,
    pub sample: SampleKind,
    /// `nominal` registers weight variations; object shifts do not.
    #[serde(default)]
    pub shift: Shift,
    #[serde(default)]
    pub stages: StageToggles,
    #[serde(default)]
    pub muon: MuonConfig,
    #[serde(default)]
    pub electron: ElectronConfig,
    #[serde(default)]
    pub tau: TauConfig,
    #[serde(default)]
    pub btag: BTagConfig,
    #[serde(default = "default_pileup_jet_id")]
    pub pileup_jet_id: LooseMediumTight,
    #[serde(default)]
    pub jerc: JetCalibrationConfig,
    /// Layer of the jet veto map.
    #[serde(default = "default_veto_map_type")]
    pub jet_veto_map_type: String,
}

fn default_pileup_jet_id() -> LooseMediumTight {
    LooseMediumTight::Tight
}

fn default_veto_map_type() -> String {
    "jetvetomap".to_string()
}

impl PipelineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml_ng::from_str(text).map_err(|e| Error::Config(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// True for simulated samples.
    pub fn is_mc(&self) -> bool {
        self.sample == SampleKind::Mc
    }

    /// Whether weight variations are registered in this pass.
    pub fn with_variations(&self) -> bool {
        self.shift.registers_variations()
    }

    /// Cross-field checks.
    pub fn validate(&self) -> Result<()> {
        check_paths("muon", &self.muon.hlt_paths, |p| !p.is_electron() && !p.is_tau())?;
        check_paths("electron", &self.electron.hlt_paths, TriggerPath::is_electron)?;
        check_paths("tau", &self.tau.hlt_paths, TriggerPath::is_tau)?;

        let high_pt_id = self.muon.id == MuonId::HighPt;
        match self.muon.scheme {
            MuonScheme::HighPt if !high_pt_id => {
                return Err(Error::Config(format!(
                    "the high-pt muon scheme needs the 'highpt' id, got '{}'",
                    self.muon.id
                )));
            }
            MuonScheme::Z if high_pt_id => {
                return Err(Error::Config("the 'highpt' muon id needs the high-pt scheme".into()));
            }
            _ => {}
        }

        if !self.is_mc() && self.jerc.apply_jec && self.era.is_none() {
            return Err(Error::Config("recorded data needs an 'era' to pick the JEC version".into()));
        }
        if !self.is_mc() && matches!(self.shift, Shift::TauUp | Shift::TauDown) {
            return Err(Error::Config(format!("shift '{}' only applies to simulation", self.shift)));
        }
        Ok(())
    }
}

fn check_paths(lepton: &str, paths: &[TriggerPath], accepts: impl Fn(&TriggerPath) -> bool) -> Result<()> {
    match paths.iter().find(|p| !accepts(*p)) {
        Some(p) => Err(Error::Config(format!("trigger path '{p}' cannot serve the {lepton} trigger weight"))),
        None => Ok(()),
    }
}
