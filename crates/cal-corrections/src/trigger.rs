//! HLT decisions and trigger-object matching.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cal_core::{Error, EventBatch, Jagged, Kinematics, Result, TrigObj, delta_r};

/// Maximum ΔR between an offline lepton and its trigger object.
pub const MATCH_DR: f64 = 0.1;

/// Single-lepton HLT paths with known trigger-object requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TriggerPath {
    /// `HLT_IsoMu24`
    IsoMu24,
    /// `HLT_IsoTkMu24`
    IsoTkMu24,
    /// `HLT_IsoMu27`
    IsoMu27,
    /// `HLT_Mu50`
    Mu50,
    /// `HLT_OldMu100`
    OldMu100,
    /// `HLT_TkMu100`
    TkMu100,
    /// `HLT_Ele35_WPTight_Gsf`
    Ele35WpTightGsf,
    /// `HLT_DoubleTightChargedIsoPFTau35_Trk1_TightID_eta2p1_Reg`
    DoubleTightTau35,
    /// `HLT_DoubleMediumChargedIsoPFTauHPS35_Trk1_eta2p1_Reg`
    DoubleMediumTauHps35,
}

/// Requirements on a trigger object for a given path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrigObjCut {
    /// Minimum trigger-object pt
    pub min_pt: f64,
    /// Filter bit that must be set
    pub filter_bit: i32,
    /// |PDG id| of the object
    pub abs_id: i32,
}

impl TriggerPath {
    /// Every known path.
    pub const ALL: [TriggerPath; 9] = [
        TriggerPath::IsoMu24,
        TriggerPath::IsoTkMu24,
        TriggerPath::IsoMu27,
        TriggerPath::Mu50,
        TriggerPath::OldMu100,
        TriggerPath::TkMu100,
        TriggerPath::Ele35WpTightGsf,
        TriggerPath::DoubleTightTau35,
        TriggerPath::DoubleMediumTauHps35,
    ];

    /// Path name without the `HLT_` prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPath::IsoMu24 => "IsoMu24",
            TriggerPath::IsoTkMu24 => "IsoTkMu24",
            TriggerPath::IsoMu27 => "IsoMu27",
            TriggerPath::Mu50 => "Mu50",
            TriggerPath::OldMu100 => "OldMu100",
            TriggerPath::TkMu100 => "TkMu100",
            TriggerPath::Ele35WpTightGsf => "Ele35_WPTight_Gsf",
            TriggerPath::DoubleTightTau35 => "DoubleTightChargedIsoPFTau35_Trk1_TightID_eta2p1_Reg",
            TriggerPath::DoubleMediumTauHps35 => "DoubleMediumChargedIsoPFTauHPS35_Trk1_eta2p1_Reg",
        }
    }

    /// Trigger-object requirements.
    pub fn object_cut(&self) -> TrigObjCut {
        match self {
            TriggerPath::IsoMu24 | TriggerPath::IsoTkMu24 => {
                TrigObjCut { min_pt: 22.0, filter_bit: 8, abs_id: 13 }
            }
            TriggerPath::IsoMu27 => TrigObjCut { min_pt: 25.0, filter_bit: 8, abs_id: 13 },
            TriggerPath::Mu50 => TrigObjCut { min_pt: 45.0, filter_bit: 1024, abs_id: 13 },
            TriggerPath::OldMu100 | TriggerPath::TkMu100 => {
                TrigObjCut { min_pt: 95.0, filter_bit: 2048, abs_id: 13 }
            }
            TriggerPath::Ele35WpTightGsf => TrigObjCut { min_pt: 33.0, filter_bit: 2, abs_id: 11 },
            TriggerPath::DoubleTightTau35 | TriggerPath::DoubleMediumTauHps35 => {
                TrigObjCut { min_pt: 32.0, filter_bit: 64, abs_id: 15 }
            }
        }
    }

    /// True for electron paths.
    pub fn is_electron(&self) -> bool {
        self.object_cut().abs_id == 11
    }

    /// True for di-tau paths.
    pub fn is_tau(&self) -> bool {
        self.object_cut().abs_id == 15
    }
}

impl fmt::Display for TriggerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bare = s.strip_prefix("HLT_").unwrap_or(s);
        TriggerPath::ALL
            .into_iter()
            .find(|p| p.as_str() == bare)
            .ok_or_else(|| Error::Config(format!("unsupported trigger path '{s}'")))
    }
}

impl TryFrom<String> for TriggerPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TriggerPath> for String {
    fn from(p: TriggerPath) -> Self {
        p.as_str().to_string()
    }
}

impl TrigObjCut {
    fn accepts(&self, t: &TrigObj) -> bool {
        t.pt > self.min_pt && (t.filter_bits & self.filter_bit) != 0 && t.id.abs() == self.abs_id
    }
}

/// Per-event OR of the listed HLT decisions. Paths absent from the batch
/// count as not fired.
pub fn fired(batch: &EventBatch, paths: &[TriggerPath]) -> Vec<bool> {
    let mut out = vec![false; batch.n_events()];
    for p in paths {
        if let Some(decisions) = batch.hlt.get(p.as_str()) {
            for (o, &d) in out.iter_mut().zip(decisions) {
                *o |= d;
            }
        }
    }
    out
}

/// Per-object flag: matched within [`MATCH_DR`] to a trigger object
/// accepted by any of `paths`.
pub fn matched<T: Kinematics>(
    objects: &Jagged<T>,
    trig_objs: &Jagged<TrigObj>,
    paths: &[TriggerPath],
) -> Result<Vec<bool>> {
    if objects.n_events() != trig_objs.n_events() {
        return Err(Error::Validation(format!(
            "objects cover {} events, trigger objects {}",
            objects.n_events(),
            trig_objs.n_events()
        )));
    }
    let cuts: Vec<TrigObjCut> = paths.iter().map(TriggerPath::object_cut).collect();
    let mut out = Vec::with_capacity(objects.len());
    for (objs, tobjs) in objects.iter_events().zip(trig_objs.iter_events()) {
        for o in objs {
            let hit = tobjs.iter().any(|t| {
                cuts.iter().any(|c| c.accepts(t))
                    && delta_r(o.eta(), o.phi(), t.eta, t.phi) < MATCH_DR
            });
            out.push(hit);
        }
    }
    Ok(out)
}
