//! Typed configuration surface for the binning-modification engine.
//!
//! The original analysis kept these in nested string-keyed dictionaries;
//! here every subsystem gets an explicit struct validated at load time.

use std::collections::BTreeMap;

use rb_core::{Error, Region, Result, Year};
use serde::{Deserialize, Serialize};

/// Smoothing strategy applied to systematic-shape ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingAlgo {
    /// Locally-weighted scatterplot smoothing.
    Lowess,
    /// Kernel regression with a normal kernel.
    Kern,
    /// Super-smoother with fixed spans.
    Super,
}

impl SmoothingAlgo {
    /// Uppercase tag appended to smoothed histogram names.
    pub fn tag(&self) -> &'static str {
        match self {
            SmoothingAlgo::Lowess => "LOWESS",
            SmoothingAlgo::Kern => "KERN",
            SmoothingAlgo::Super => "SUPER",
        }
    }
}

/// Numeric parameters of the rebinning walk and shape construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningParams {
    /// Target bin error/yield ratio. Values > 1.0 switch the Step-B walk
    /// into fixed-merge-count mode.
    pub stat_threshold: f64,
    /// Minimum number of consecutive bins merged per step.
    pub min_merge: usize,
    /// Total-background significance floor beneath which per-bin statistical
    /// shapes are skipped.
    pub threshold_bb: f64,
    /// Smoothing strategy.
    pub smoothing_algo: SmoothingAlgo,
    /// Neighbor fraction for lowess smoothing.
    pub lowess_fraction: f64,
    /// Epsilon substituted for non-positive bin contents.
    pub zero: f64,
    /// Number of PDF replica variations.
    pub pdf_replicas: u32,
}

impl Default for BinningParams {
    fn default() -> Self {
        BinningParams {
            stat_threshold: 0.3,
            min_merge: 1,
            threshold_bb: 0.05,
            smoothing_algo: SmoothingAlgo::Lowess,
            lowess_fraction: 0.30,
            zero: 1e-12,
            pdf_replicas: 100,
        }
    }
}

impl BinningParams {
    /// Validate ranges that would otherwise silently disable steps.
    pub fn validate(&self) -> Result<()> {
        if self.min_merge < 1 {
            return Err(Error::Validation("min_merge must be >= 1".into()));
        }
        if self.stat_threshold <= 0.0 {
            return Err(Error::Validation("stat_threshold must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.lowess_fraction) {
            return Err(Error::Validation("lowess_fraction must be in (0, 1]".into()));
        }
        if self.zero <= 0.0 {
            return Err(Error::Validation("zero epsilon must be positive".into()));
        }
        Ok(())
    }
}

/// Boolean toggles selecting which systematic-shape layers run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Add per-bin statistical shape systematics.
    pub shape_stat: bool,
    /// Symmetrize the top-pT systematic.
    pub symm_top_pt: bool,
    /// Symmetrize the HOT-closure systematic.
    pub symm_hotclosure: bool,
    /// Symmetrize the ISR/FSR/μR/μF theory shifts.
    pub symm_theory: bool,
    /// Build the μR/μF shape envelope.
    pub murf_shapes: bool,
    /// Build the parton-shower weight envelope.
    pub ps_weights: bool,
    /// Build the PDF replica envelope.
    pub pdf: bool,
    /// Rescale ABCDNN systematic variants to the nominal integral.
    pub norm_abcdnn: bool,
    /// Renormalize signal theory envelopes (μR/μF, PS, PDF).
    pub norm_theory_sig: bool,
    /// Renormalize background theory envelopes to the nominal yield.
    pub norm_theory_bkg: bool,
    /// Collapse UP/DOWN ratios into a symmetric envelope before smoothing.
    pub symm_smoothing: bool,
    /// Smooth the flagged systematic shapes.
    pub smooth: bool,
    /// Append the year to systematic tags (per-year decorrelation).
    pub uncorrelate_years: bool,
    /// Split trigger-efficiency shapes by lepton flavor.
    pub trigger_efficiency: bool,
    /// Unit uses the ABCDNN data-driven background estimate.
    pub abcdnn: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            shape_stat: true,
            symm_top_pt: true,
            symm_hotclosure: true,
            symm_theory: true,
            murf_shapes: true,
            ps_weights: true,
            pdf: true,
            norm_abcdnn: true,
            norm_theory_sig: true,
            norm_theory_bkg: false,
            symm_smoothing: true,
            smooth: true,
            uncorrelate_years: true,
            trigger_efficiency: false,
            abcdnn: false,
        }
    }
}

/// Declared behavior of one systematic source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystSource {
    /// Whether the upstream template producer writes variants for this
    /// source at all. Not consulted by the rebinning engine, which keys off
    /// the variants actually present; carried so one registry file serves
    /// both stages.
    pub enabled: bool,
    /// Whether UP/DOWN collapse into a symmetric envelope before smoothing.
    pub symmetrize: bool,
    /// Whether the shape is smoothed.
    pub smooth: bool,
}

impl SystSource {
    const fn new(enabled: bool, symmetrize: bool, smooth: bool) -> SystSource {
        SystSource { enabled, symmetrize, smooth }
    }
}

/// Per-year up/down scale-factor pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScalePair {
    /// Upward scale factor.
    pub up: f64,
    /// Downward scale factor.
    pub dn: f64,
}

/// Registry of systematic sources and the theory scale-factor tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystematicsRegistry {
    /// Source name (uppercase, as it appears in histogram tags) → behavior.
    pub sources: BTreeMap<String, SystSource>,
    /// Acceptance/migration scale factors for the signal μR/μF envelope.
    pub mu_sf: BTreeMap<Year, ScalePair>,
    /// Scale factors for the signal PDF envelope.
    pub pdf_sf: BTreeMap<Year, ScalePair>,
}

impl Default for SystematicsRegistry {
    fn default() -> Self {
        let sources: BTreeMap<String, SystSource> = [
            ("PILEUP", SystSource::new(true, false, false)),
            ("PREFIRE", SystSource::new(true, false, false)),
            ("PILEUPJETID", SystSource::new(true, false, false)),
            ("TRIGEFF", SystSource::new(false, false, false)),
            ("MURFCORRD", SystSource::new(true, false, true)),
            ("MUR", SystSource::new(true, false, true)),
            ("MUF", SystSource::new(true, false, true)),
            ("ISR", SystSource::new(true, false, true)),
            ("FSR", SystSource::new(true, false, true)),
            ("HOTSTAT", SystSource::new(true, false, false)),
            ("HOTCSPUR", SystSource::new(true, false, false)),
            ("HOTCLOSURE", SystSource::new(true, false, false)),
            ("LF", SystSource::new(true, false, false)),
            ("LFSTATS1", SystSource::new(true, false, false)),
            ("LFSTATS2", SystSource::new(true, false, false)),
            ("HF", SystSource::new(true, false, false)),
            ("HFSTATS1", SystSource::new(true, false, false)),
            ("HFSTATS2", SystSource::new(true, false, false)),
            ("CFERR1", SystSource::new(true, false, false)),
            ("CFERR2", SystSource::new(true, false, false)),
            ("TOPPT", SystSource::new(false, false, false)),
            ("ABCDNNSAMPLE", SystSource::new(false, false, false)),
            ("ABCDNNMODEL", SystSource::new(false, false, false)),
            ("ABCDNNCLOSURE", SystSource::new(true, false, false)),
            ("JER", SystSource::new(true, false, true)),
            ("JEC", SystSource::new(true, false, true)),
            ("HD", SystSource::new(false, false, false)),
            ("UE", SystSource::new(false, false, false)),
            // derived envelopes, smoothed like their constituents
            ("MURF", SystSource::new(true, false, true)),
            ("PSWGT", SystSource::new(true, false, true)),
            ("PDF", SystSource::new(true, false, true)),
        ]
        .into_iter()
        .map(|(name, src)| (name.to_string(), src))
        .collect();

        let mu_sf = [
            (Year::Run16Apv, ScalePair { up: 1.2888, dn: 0.7524 }),
            (Year::Run16, ScalePair { up: 1.2888, dn: 0.7524 }),
            (Year::Run17, ScalePair { up: 1.2890, dn: 0.7527 }),
            (Year::Run18, ScalePair { up: 1.2889, dn: 0.7523 }),
        ]
        .into_iter()
        .collect();
        let pdf_sf = [
            (Year::Run16Apv, ScalePair { up: 1.0015, dn: 0.9976 }),
            (Year::Run16, ScalePair { up: 1.0015, dn: 0.9976 }),
            (Year::Run17, ScalePair { up: 1.0015, dn: 0.9977 }),
            (Year::Run18, ScalePair { up: 1.0016, dn: 0.9976 }),
        ]
        .into_iter()
        .collect();

        SystematicsRegistry { sources, mu_sf, pdf_sf }
    }
}

impl SystematicsRegistry {
    /// Look up a source by the (uppercase) tag it carries in histogram names.
    pub fn source(&self, name: &str) -> Option<&SystSource> {
        self.sources.get(&name.to_uppercase())
    }

    /// Whether a source's shape is smoothed. Correlation-group aliases of a
    /// smoothable envelope (`MURFTTBAR`, `PDFSIG`, `ISRSIG`, ...) inherit
    /// the flag from their base source.
    pub fn is_smoothed(&self, name: &str) -> bool {
        if let Some(source) = self.source(name) {
            return source.smooth;
        }
        let upper = name.to_uppercase();
        self.sources.iter().any(|(base, source)| source.smooth && upper.starts_with(base.as_str()))
    }

    /// Whether a source collapses to a symmetric envelope before smoothing.
    pub fn is_symmetrized(&self, name: &str) -> bool {
        self.source(name).map(|s| s.symmetrize).unwrap_or(false)
    }
}

/// One kinematic variable: plotting range plus the integer-count flag that
/// selects the simpler Step-B boundary rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Variable name as it appears in file and histogram names.
    pub name: String,
    /// Lower edge of the global plotting range.
    pub x_min: f64,
    /// Upper edge of the global plotting range.
    pub x_max: f64,
    /// Jet/tag-multiplicity style integer-count variable.
    pub integer: bool,
}

/// One unit of work: a (variable, year, region) triple processed end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Kinematic variable.
    pub variable: VariableSpec,
    /// Data-taking year.
    pub year: Year,
    /// Analysis region.
    pub region: Region,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_validate() {
        BinningParams::default().validate().unwrap();
    }

    #[test]
    fn bad_params_are_rejected() {
        let mut p = BinningParams::default();
        p.min_merge = 0;
        assert!(p.validate().is_err());
        let mut p = BinningParams::default();
        p.zero = 0.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let reg = SystematicsRegistry::default();
        assert!(reg.is_smoothed("jec"));
        assert!(reg.is_smoothed("JEC"));
        assert!(!reg.is_smoothed("PILEUP"));
        assert!(!reg.is_smoothed("NOT_A_SOURCE"));
    }

    #[test]
    fn envelope_aliases_inherit_smoothing() {
        let reg = SystematicsRegistry::default();
        assert!(reg.is_smoothed("MURF"));
        assert!(reg.is_smoothed("MURFTTBAR"));
        assert!(reg.is_smoothed("PDFSIG"));
        assert!(reg.is_smoothed("ISRSIG"));
        assert!(!reg.is_smoothed("HOTCLOSURE"));
        assert!(!reg.is_smoothed("ELTRIGGEFF"));
    }

    #[test]
    fn smoothing_algo_tags() {
        assert_eq!(SmoothingAlgo::Lowess.tag(), "LOWESS");
        let algo: SmoothingAlgo = serde_json::from_str("\"super\"").unwrap();
        assert_eq!(algo, SmoothingAlgo::Super);
    }
}
