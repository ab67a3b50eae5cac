//! Closed sets of working points and systematic shifts.
//!
//! Every selection string that reaches a table is one of these enums, so an
//! unsupported working point fails when the configuration is parsed rather
//! than on the first event.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cal_core::{Electron, Error, Jet, Muon, Result, Tau, Year};

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $(
                #[allow(missing_docs)]
                $variant,
            )+
        }

        impl $name {
            /// Every accepted value.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Configuration spelling.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Config(format!(
                        "unsupported {} '{other}' (expected one of: {})",
                        $what,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> Self {
                v.as_str().to_string()
            }
        }
    };
}

closed_enum! {
    /// Muon identification working point.
    MuonId, "muon id working point" {
        Loose => "loose",
        Medium => "medium",
        Tight => "tight",
        HighPt => "highpt",
    }
}

impl MuonId {
    /// Object-level id decision.
    pub fn passes(&self, m: &Muon) -> bool {
        match self {
            MuonId::Loose => m.loose_id,
            MuonId::Medium => m.medium_id,
            MuonId::Tight => m.tight_id,
            MuonId::HighPt => m.high_pt_id == 2,
        }
    }
}

closed_enum! {
    /// Muon isolation working point.
    MuonIso, "muon isolation working point" {
        Loose => "loose",
        Medium => "medium",
        Tight => "tight",
    }
}

impl MuonIso {
    /// Upper bound on the relative isolation.
    pub fn max_rel_iso(&self) -> f64 {
        match self {
            MuonIso::Loose => 0.25,
            MuonIso::Medium => 0.20,
            MuonIso::Tight => 0.15,
        }
    }

    /// PF isolation for the standard scheme, tracker isolation for high-pt.
    pub fn passes(&self, m: &Muon, high_pt: bool) -> bool {
        if high_pt {
            let cut = if *self == MuonIso::Tight { 0.05 } else { 0.10 };
            m.tk_rel_iso < cut
        } else {
            m.pf_rel_iso04_all < self.max_rel_iso()
        }
    }
}

closed_enum! {
    /// Electron identification working point.
    ElectronId, "electron id working point" {
        Wp80Iso => "wp80iso",
        Wp90Iso => "wp90iso",
        Wp80NoIso => "wp80noiso",
        Wp90NoIso => "wp90noiso",
        Loose => "loose",
        Medium => "medium",
        Tight => "tight",
    }
}

impl ElectronId {
    /// Key used by the electron id table.
    pub fn table_key(&self) -> &'static str {
        match self {
            ElectronId::Wp80Iso => "wp80iso",
            ElectronId::Wp90Iso => "wp90iso",
            ElectronId::Wp80NoIso => "wp80noiso",
            ElectronId::Wp90NoIso => "wp90noiso",
            ElectronId::Loose => "Loose",
            ElectronId::Medium => "Medium",
            ElectronId::Tight => "Tight",
        }
    }

    /// Object-level id decision.
    pub fn passes(&self, e: &Electron) -> bool {
        match self {
            ElectronId::Wp80Iso => e.mva_iso_wp80,
            ElectronId::Wp90Iso => e.mva_iso_wp90,
            ElectronId::Wp80NoIso => e.mva_noiso_wp80,
            ElectronId::Wp90NoIso => e.mva_noiso_wp90,
            ElectronId::Loose => e.cut_based == 2,
            ElectronId::Medium => e.cut_based == 3,
            ElectronId::Tight => e.cut_based == 4,
        }
    }
}

closed_enum! {
    /// DeepTau working point against jets and electrons.
    TauWp, "tau working point" {
        VVVLoose => "vvvloose",
        VVLoose => "vvloose",
        VLoose => "vloose",
        Loose => "loose",
        Medium => "medium",
        Tight => "tight",
        VTight => "vtight",
        VVTight => "vvtight",
    }
}

impl TauWp {
    /// Bit-mask threshold on the DeepTau id word.
    pub fn threshold(&self) -> i32 {
        match self {
            TauWp::VVVLoose => 1,
            TauWp::VVLoose => 2,
            TauWp::VLoose => 4,
            TauWp::Loose => 8,
            TauWp::Medium => 16,
            TauWp::Tight => 32,
            TauWp::VTight => 64,
            TauWp::VVTight => 128,
        }
    }

    /// Key used by the tau id tables.
    pub fn table_key(&self) -> &'static str {
        match self {
            TauWp::VVVLoose => "VVVLoose",
            TauWp::VVLoose => "VVLoose",
            TauWp::VLoose => "VLoose",
            TauWp::Loose => "Loose",
            TauWp::Medium => "Medium",
            TauWp::Tight => "Tight",
            TauWp::VTight => "VTight",
            TauWp::VVTight => "VVTight",
        }
    }
}

closed_enum! {
    /// DeepTau working point against muons.
    TauVsMuWp, "tau vs-muon working point" {
        VLoose => "vloose",
        Loose => "loose",
        Medium => "medium",
        Tight => "tight",
    }
}

impl TauVsMuWp {
    /// Bit-mask threshold on the DeepTau id word.
    pub fn threshold(&self) -> i32 {
        match self {
            TauVsMuWp::VLoose => 1,
            TauVsMuWp::Loose => 2,
            TauVsMuWp::Medium => 4,
            TauVsMuWp::Tight => 8,
        }
    }

    /// Key used by the tau id tables.
    pub fn table_key(&self) -> &'static str {
        match self {
            TauVsMuWp::VLoose => "VLoose",
            TauVsMuWp::Loose => "Loose",
            TauVsMuWp::Medium => "Medium",
            TauVsMuWp::Tight => "Tight",
        }
    }
}

/// Full DeepTau selection: one working point per discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TauIdSelection {
    /// Against jets
    pub vs_jet: TauWp,
    /// Against electrons
    pub vs_e: TauWp,
    /// Against muons
    pub vs_mu: TauVsMuWp,
}

impl TauIdSelection {
    /// Object-level decision on all three discriminants.
    pub fn passes(&self, t: &Tau) -> bool {
        t.id_vs_jet > self.vs_jet.threshold()
            && t.id_vs_e > self.vs_e.threshold()
            && t.id_vs_mu > self.vs_mu.threshold()
    }
}

closed_enum! {
    /// Generic loose/medium/tight working point (b-tagging, pileup jet id).
    LooseMediumTight, "working point" {
        Loose => "loose",
        Medium => "medium",
        Tight => "tight",
    }
}

impl LooseMediumTight {
    /// Single-letter table key.
    pub fn letter(&self) -> &'static str {
        match self {
            LooseMediumTight::Loose => "L",
            LooseMediumTight::Medium => "M",
            LooseMediumTight::Tight => "T",
        }
    }

    /// DeepJet discriminant threshold for `year`.
    pub fn deepjet_threshold(&self, year: Year) -> f64 {
        let (l, m, t) = match year {
            Year::Y2016PreVfp => (0.0508, 0.2598, 0.6502),
            Year::Y2016PostVfp => (0.0480, 0.2489, 0.6377),
            Year::Y2017 => (0.0532, 0.3040, 0.7476),
            Year::Y2018 => (0.0490, 0.2783, 0.7100),
        };
        match self {
            LooseMediumTight::Loose => l,
            LooseMediumTight::Medium => m,
            LooseMediumTight::Tight => t,
        }
    }

    /// Whether a jet passes the DeepJet threshold.
    pub fn btagged(&self, jet: &Jet, year: Year) -> bool {
        jet.btag_deepjet > self.deepjet_threshold(year)
    }

    /// Pileup jet id code a jet must carry at this working point.
    pub fn pileup_id_code(&self, year: Year) -> i32 {
        match (year.calendar(), self) {
            (2016, LooseMediumTight::Loose) => 1,
            (2016, LooseMediumTight::Medium) => 3,
            (_, LooseMediumTight::Loose) => 4,
            (_, LooseMediumTight::Medium) => 6,
            (_, LooseMediumTight::Tight) => 7,
        }
    }
}

closed_enum! {
    /// Object-level shift applied before any weight is computed.
    Shift, "shift" {
        Nominal => "nominal",
        RochesterUp => "rochester_up",
        RochesterDown => "rochester_down",
        TauUp => "tau_up",
        TauDown => "tau_down",
    }
}

impl Default for Shift {
    fn default() -> Self {
        Shift::Nominal
    }
}

impl Shift {
    /// Weight variations are only registered in the nominal pass.
    pub fn registers_variations(&self) -> bool {
        *self == Shift::Nominal
    }

    /// Label passed to the tau energy-scale table.
    pub fn tau_label(&self) -> &'static str {
        match self {
            Shift::TauUp => "up",
            Shift::TauDown => "down",
            _ => "nom",
        }
    }
}
