//! Data-taking periods.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ultra-legacy Run II data-taking period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Year {
    /// 2016 before the VFP settings change.
    Y2016PreVfp,
    /// 2016 after the VFP settings change.
    Y2016PostVfp,
    /// 2017
    Y2017,
    /// 2018
    Y2018,
}

impl Year {
    /// All supported periods in chronological order.
    pub const ALL: [Year; 4] = [Year::Y2016PreVfp, Year::Y2016PostVfp, Year::Y2017, Year::Y2018];

    /// Short label, e.g. `2016preVFP`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Year::Y2016PreVfp => "2016preVFP",
            Year::Y2016PostVfp => "2016postVFP",
            Year::Y2017 => "2017",
            Year::Y2018 => "2018",
        }
    }

    /// Directory tag used by the published correction tables, e.g. `2017_UL`.
    pub fn pog_tag(&self) -> String {
        format!("{}_UL", self.as_str())
    }

    /// Calendar year shared by both 2016 eras.
    pub fn calendar(&self) -> u16 {
        match self {
            Year::Y2016PreVfp | Year::Y2016PostVfp => 2016,
            Year::Y2017 => 2017,
            Year::Y2018 => 2018,
        }
    }

    /// Inclusive run-number range of the period.
    pub fn run_range(&self) -> (u32, u32) {
        match self {
            Year::Y2016PreVfp => (272007, 278771),
            Year::Y2016PostVfp => (278769, 284045),
            Year::Y2017 => (297020, 306463),
            Year::Y2018 => (315252, 325274),
        }
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Year {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_end_matches("_UL") {
            "2016preVFP" | "2016APV" => Ok(Year::Y2016PreVfp),
            "2016postVFP" | "2016" => Ok(Year::Y2016PostVfp),
            "2017" => Ok(Year::Y2017),
            "2018" => Ok(Year::Y2018),
            other => Err(Error::Config(format!(
                "unknown year '{other}' (expected one of 2016preVFP, 2016postVFP, 2017, 2018)"
            ))),
        }
    }
}

impl TryFrom<String> for Year {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Year> for String {
    fn from(y: Year) -> Self {
        y.as_str().to_string()
    }
}
