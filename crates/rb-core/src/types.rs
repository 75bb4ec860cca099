//! Common value types shared across the Rebinner crates.

use serde::{Deserialize, Serialize};

/// Data-taking era. Systematic sources split per era use the label as a
/// name suffix when decorrelating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Year {
    /// 2016 pre-VFP ("APV") era.
    #[serde(rename = "16APV")]
    Run16Apv,
    /// 2016 post-VFP era.
    #[serde(rename = "16")]
    Run16,
    /// 2017.
    #[serde(rename = "17")]
    Run17,
    /// 2018.
    #[serde(rename = "18")]
    Run18,
}

impl Year {
    /// Short label used in histogram names and file names.
    pub fn label(&self) -> &'static str {
        match self {
            Year::Run16Apv => "16APV",
            Year::Run16 => "16",
            Year::Run17 => "17",
            Year::Run18 => "18",
        }
    }

    /// Parse a year label as it appears on the command line.
    pub fn from_label(s: &str) -> Option<Year> {
        match s {
            "16APV" => Some(Year::Run16Apv),
            "16" => Some(Year::Run16),
            "17" => Some(Year::Run17),
            "18" => Some(Year::Run18),
            _ => None,
        }
    }
}

impl std::fmt::Display for Year {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Analysis region whose categories a unit of work covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    /// Signal region.
    Sr,
    /// Validation region.
    Vr,
    /// Baseline selection (used for multiplicity variables).
    Baseline,
}

impl Region {
    /// Directory/file prefix for templates of this region.
    pub fn prefix(&self) -> &'static str {
        match self {
            Region::Sr => "templates_SR",
            Region::Vr => "templates_VR",
            Region::Baseline => "baseline",
        }
    }
}
