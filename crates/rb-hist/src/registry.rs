//! Samples registry: process → group membership, loaded per data-taking era.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::Category;

/// The designated ABCDNN control-region tuple, one allowed value set per
/// tag/jet-count axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlRegionBins {
    /// Allowed HOT-tag cut values.
    pub n_hot: Vec<String>,
    /// Allowed top-tag cut values.
    pub n_t: Vec<String>,
    /// Allowed W-tag cut values.
    pub n_w: Vec<String>,
    /// Allowed b-tag cut values.
    pub n_b: Vec<String>,
    /// Allowed jet-count cut values.
    pub n_j: Vec<String>,
}

impl Default for ControlRegionBins {
    fn default() -> Self {
        ControlRegionBins {
            n_hot: vec!["1p".into()],
            n_t: vec!["0p".into()],
            n_w: vec!["0p".into()],
            n_b: vec!["3p".into()],
            n_j: vec!["7p".into()],
        }
    }
}

/// Process → group membership mapping consumed by the key parser and the
/// binning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleRegistry {
    /// Raw data sample names.
    pub data: Vec<String>,
    /// Signal processes (each is its own combine group).
    pub signals: Vec<String>,
    /// Combine supergroup → raw background process names.
    pub backgrounds: BTreeMap<String, Vec<String>>,
    /// Minor background groups kept alongside the ABCDNN estimate in its
    /// control region.
    pub abcdnn_minor: Vec<String>,
    /// Systematic sources that apply to the ABCDNN estimate.
    pub abcdnn_systematics: Vec<String>,
    /// Control-region tuple for ABCDNN membership.
    pub control_region: ControlRegionBins,
}

impl Default for SampleRegistry {
    fn default() -> Self {
        let mut backgrounds = BTreeMap::new();
        backgrounds.insert(
            "TTNOBB".to_string(),
            vec!["TTToSemiLeptonHT500", "TTToSemiLeptonic", "TTTo2L2Nu", "TTToHadronic"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        backgrounds.insert(
            "TTBB".to_string(),
            vec!["TTToSemiLeptonicTTBB", "TTTo2L2NuTTBB", "TTToHadronicTTBB"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        backgrounds.insert(
            "TOP".to_string(),
            vec!["T", "TBar", "TTWl", "TTZ"].into_iter().map(String::from).collect(),
        );
        backgrounds.insert(
            "TTH".to_string(),
            vec!["TTHB", "TTHnoB"].into_iter().map(String::from).collect(),
        );
        backgrounds.insert(
            "EWK".to_string(),
            vec!["WJetsHT200", "WJetsHT400", "DYMHT200", "WW", "WZ", "ZZ"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        backgrounds.insert(
            "QCD".to_string(),
            vec!["QCDHT300", "QCDHT500", "QCDHT700", "QCDHT1000"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        SampleRegistry {
            data: vec!["DataE".into(), "DataM".into()],
            signals: vec!["TTTW".into(), "TTTJ".into()],
            backgrounds,
            abcdnn_minor: vec!["TTH".into(), "TOP".into(), "EWK".into()],
            abcdnn_systematics: vec![
                "ABCDNNCLOSURE".into(),
                "EXTABCDSYST".into(),
                "EXTABCDSTAT".into(),
                "EXTABCDCLOSURE".into(),
            ],
            control_region: ControlRegionBins::default(),
        }
    }
}

impl SampleRegistry {
    /// Whether a key fragment names observed data.
    pub fn is_data(&self, part: &str) -> bool {
        part == "DAT"
            || part == "data"
            || part == "obs"
            || self.data.iter().any(|p| p == part)
    }

    /// Whether a key fragment names a signal process.
    pub fn is_signal(&self, part: &str) -> bool {
        part == "SIG" || self.signals.iter().any(|p| p == part)
    }

    /// Whether a key fragment names a background combine group directly.
    pub fn is_background_group(&self, part: &str) -> bool {
        part == "ABCDNN" || self.backgrounds.contains_key(part)
    }

    /// The combine supergroup a raw background process belongs to, if any.
    pub fn background_group_of(&self, part: &str) -> Option<&str> {
        self.backgrounds
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == part))
            .map(|(group, _)| group.as_str())
    }

    /// Whether a category's tag-count tuple matches the designated ABCDNN
    /// control region.
    pub fn in_control_region(&self, category: &Category) -> bool {
        let cr = &self.control_region;
        cr.n_hot.iter().any(|v| *v == category.n_hot.to_string())
            && cr.n_t.iter().any(|v| *v == category.n_t.to_string())
            && cr.n_w.iter().any(|v| *v == category.n_w.to_string())
            && cr.n_b.iter().any(|v| *v == category.n_b.to_string())
            && cr.n_j.iter().any(|v| *v == category.n_j.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_default_members() {
        let reg = SampleRegistry::default();
        assert!(reg.is_data("DataE"));
        assert!(reg.is_signal("TTTJ"));
        assert!(reg.is_background_group("QCD"));
        assert!(reg.is_background_group("ABCDNN"));
        assert_eq!(reg.background_group_of("TTTo2L2Nu"), Some("TTNOBB"));
        assert_eq!(reg.background_group_of("TTTW"), None);
        // every minor-background group named for the ABCDNN control region
        // must itself be classifiable
        assert_eq!(reg.background_group_of("TTHB"), Some("TTH"));
        for group in &reg.abcdnn_minor {
            assert!(reg.is_background_group(group), "unclassifiable minor group {group}");
        }
    }

    #[test]
    fn registry_is_serde_loadable() {
        let reg = SampleRegistry::default();
        let json = serde_json::to_string(&reg).unwrap();
        let back: SampleRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.signals, reg.signals);
        assert_eq!(back.backgrounds.len(), reg.backgrounds.len());
    }
}
