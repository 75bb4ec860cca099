//! On-disk template collection: one JSON file per (variable, year) unit.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rb_core::{Error, Result, Year};
use serde::{Deserialize, Serialize};

use crate::histogram::Histogram;

/// A named collection of histograms for one kinematic variable and year.
///
/// `BTreeMap` keeps key order deterministic across load/save cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSet {
    /// Kinematic variable the histograms are binned in.
    pub variable: String,
    /// Data-taking year.
    pub year: Year,
    /// Histograms keyed by structured name.
    pub histograms: BTreeMap<String, Histogram>,
}

impl TemplateSet {
    /// Create an empty collection.
    pub fn new(variable: impl Into<String>, year: Year) -> TemplateSet {
        TemplateSet { variable: variable.into(), year, histograms: BTreeMap::new() }
    }

    /// Load a collection from a JSON file, validating every histogram.
    pub fn load(path: &Path) -> Result<TemplateSet> {
        tracing::info!(path = %path.display(), "loading template collection");
        let bytes = fs::read(path)?;
        let set: TemplateSet = serde_json::from_slice(&bytes)?;
        for (name, hist) in &set.histograms {
            if hist.contents.len() != hist.errors.len()
                || hist.contents.len() + 1 != hist.edges.len()
            {
                return Err(Error::Validation(format!(
                    "histogram {name}: {} edges, {} contents, {} errors",
                    hist.edges.len(),
                    hist.contents.len(),
                    hist.errors.len()
                )));
            }
        }
        tracing::info!(histograms = set.histograms.len(), "template collection loaded");
        Ok(set)
    }

    /// Write the collection atomically: serialize to a sibling temp file,
    /// then rename over the target. No partial output is ever visible.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(self)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        tracing::info!(
            path = %path.display(),
            histograms = self.histograms.len(),
            "template collection written"
        );
        Ok(())
    }

    /// Insert a histogram under its key.
    pub fn insert(&mut self, name: impl Into<String>, hist: Histogram) {
        self.histograms.insert(name.into(), hist);
    }

    /// Fetch a histogram by key.
    pub fn get(&self, name: &str) -> Option<&Histogram> {
        self.histograms.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> TemplateSet {
        let mut set = TemplateSet::new("HT", Year::Run17);
        set.insert(
            "TTBB_isEnHOT0pnT0pnW0pnB2nJ5",
            Histogram::with_bins(vec![0.0, 1.0, 2.0], vec![3.0, 4.0], vec![0.5, 0.5]).unwrap(),
        );
        set
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template_combine_HT_UL17.json");
        let set = sample_set();
        set.save(&path).unwrap();
        let back = TemplateSet::load(&path).unwrap();
        assert_eq!(back.variable, "HT");
        assert_eq!(back.year, Year::Run17);
        let h = back.get("TTBB_isEnHOT0pnT0pnW0pnB2nJ5").unwrap();
        assert_eq!(h.contents, vec![3.0, 4.0]);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        sample_set().save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn load_rejects_inconsistent_bins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        let json = r#"{
            "variable": "HT", "year": "17",
            "histograms": { "TTBB_isEnHOT0pnT0pnW0pnB2nJ5": {
                "edges": [0.0, 1.0], "contents": [1.0, 2.0], "errors": [0.1, 0.1]
            } }
        }"#;
        std::fs::write(&path, json).unwrap();
        assert!(TemplateSet::load(&path).is_err());
    }
}
