//! Structured histogram key codec.
//!
//! Histogram names follow `<process>_<category>[_<systTag><UP|DN>]` or
//! `<process>_<category>_PDF<index>`. Decoding is a pure, total function:
//! a key either classifies into DAT/BKG/SIG or is rejected, never silently
//! dropped into a wrong group.

use rb_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::registry::SampleRegistry;

/// Analysis group a process rolls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    /// Observed data.
    Dat,
    /// Background simulation (or data-driven estimate).
    Bkg,
    /// Signal simulation.
    Sig,
}

/// Direction of a systematic shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shift {
    /// +1σ variation.
    Up,
    /// −1σ variation.
    Dn,
}

impl Shift {
    /// Name suffix for this direction.
    pub fn suffix(&self) -> &'static str {
        match self {
            Shift::Up => "UP",
            Shift::Dn => "DN",
        }
    }
}

/// Lepton flavor flag of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lepton {
    /// Electron channel.
    E,
    /// Muon channel.
    M,
    /// Merged electron+muon channel.
    L,
}

impl Lepton {
    fn from_char(c: char) -> Option<Lepton> {
        match c {
            'E' => Some(Lepton::E),
            'M' => Some(Lepton::M),
            'L' => Some(Lepton::L),
            _ => None,
        }
    }

    fn as_char(&self) -> char {
        match self {
            Lepton::E => 'E',
            Lepton::M => 'M',
            Lepton::L => 'L',
        }
    }
}

/// One ordinal cut level: an exact count ("2") or an inclusive floor ("2p").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisCut {
    /// Required object count.
    pub count: u32,
    /// Whether the cut is `>= count` rather than `== count`.
    pub inclusive: bool,
}

impl std::fmt::Display for AxisCut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.inclusive {
            write!(f, "{}p", self.count)
        } else {
            write!(f, "{}", self.count)
        }
    }
}

/// One analysis category: lepton flavor plus five ordinal tag/jet-count axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Category {
    /// Lepton flavor (E/M, or merged L).
    pub lepton: Lepton,
    /// HOT-tag (resolved top) count cut.
    pub n_hot: AxisCut,
    /// Top-tag count cut.
    pub n_t: AxisCut,
    /// W-tag count cut.
    pub n_w: AxisCut,
    /// b-tag count cut.
    pub n_b: AxisCut,
    /// Jet count cut.
    pub n_j: AxisCut,
}

impl Category {
    /// Parse a category string such as `isEnHOT1pnT0pnW0pnB3pnJ7p`.
    pub fn parse(s: &str) -> Result<Category> {
        let bad = || Error::Key(format!("malformed category: {s}"));
        let rest = s.strip_prefix("is").ok_or_else(bad)?;
        let lepton = rest.chars().next().and_then(Lepton::from_char).ok_or_else(bad)?;
        let mut rest = &rest[1..];
        let mut cuts = [AxisCut { count: 0, inclusive: false }; 5];
        for (marker, cut) in ["nHOT", "nT", "nW", "nB", "nJ"].iter().zip(cuts.iter_mut()) {
            rest = rest.strip_prefix(marker).ok_or_else(bad)?;
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                return Err(bad());
            }
            rest = &rest[digits.len()..];
            let inclusive = rest.starts_with('p');
            if inclusive {
                rest = &rest[1..];
            }
            *cut = AxisCut { count: digits.parse().map_err(|_| bad())?, inclusive };
        }
        if !rest.is_empty() {
            return Err(bad());
        }
        Ok(Category { lepton, n_hot: cuts[0], n_t: cuts[1], n_w: cuts[2], n_b: cuts[3], n_j: cuts[4] })
    }

    /// Encode back to the `is…` string form.
    pub fn name(&self) -> String {
        format!(
            "is{}nHOT{}nT{}nW{}nB{}nJ{}",
            self.lepton.as_char(),
            self.n_hot,
            self.n_t,
            self.n_w,
            self.n_b,
            self.n_j
        )
    }

    /// Channel key: the category with the lepton flavor stripped. The unit
    /// at which bin edges are shared between lepton flavors.
    pub fn channel(&self) -> String {
        format!("nHOT{}nT{}nW{}nB{}nJ{}", self.n_hot, self.n_t, self.n_w, self.n_b, self.n_j)
    }

    /// Same category under a different lepton flavor.
    pub fn with_lepton(&self, lepton: Lepton) -> Category {
        Category { lepton, ..*self }
    }
}

/// Systematic tag carried by a histogram key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SystTag {
    /// Named source with a shift direction, e.g. `JECUP`.
    Shifted {
        /// Source name (without the direction suffix).
        name: String,
        /// Shift direction.
        shift: Shift,
    },
    /// One of the PDF replica variations, e.g. `PDF42`.
    PdfReplica(u32),
}

impl SystTag {
    /// Systematic source name (`PDF` for replicas).
    pub fn syst(&self) -> &str {
        match self {
            SystTag::Shifted { name, .. } => name,
            SystTag::PdfReplica(_) => "PDF",
        }
    }

    /// Shift direction, if this is a directional tag.
    pub fn shift(&self) -> Option<Shift> {
        match self {
            SystTag::Shifted { shift, .. } => Some(*shift),
            SystTag::PdfReplica(_) => None,
        }
    }

    /// Encode to the name suffix form.
    pub fn encode(&self) -> String {
        match self {
            SystTag::Shifted { name, shift } => format!("{name}{}", shift.suffix()),
            SystTag::PdfReplica(i) => format!("PDF{i}"),
        }
    }
}

/// Decoded histogram key.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedKey {
    /// Raw process (sample) name, or `data_obs`.
    pub process: String,
    /// Analysis group.
    pub group: Group,
    /// Combine group the process rolls into (e.g. `TTBB`, `TOP`, `data_obs`).
    pub combine: String,
    /// Systematic tag, when the key names a shifted shape.
    pub syst: Option<SystTag>,
    /// Analysis category.
    pub category: Category,
    /// Whether the category lies in the designated ABCDNN control region.
    pub abcdnn: bool,
}

impl ParsedKey {
    /// Whether the key names a systematic-shift histogram.
    pub fn is_syst(&self) -> bool {
        self.syst.is_some()
    }

    /// Category string form.
    pub fn category_name(&self) -> String {
        self.category.name()
    }

    /// Channel key (lepton-stripped category).
    pub fn channel(&self) -> String {
        self.category.channel()
    }
}

/// Join name fragments with underscores, the inverse of [`parse_key`].
pub fn hist_tag(parts: &[&str]) -> String {
    parts.join("_")
}

/// Nominal histogram key for a combine group in a category.
pub fn nominal_key(combine: &str, category: &str) -> String {
    format!("{combine}_{category}")
}

/// Shifted histogram key for a combine group in a category.
pub fn shift_key(combine: &str, category: &str, tag: &str) -> String {
    format!("{combine}_{category}_{tag}")
}

/// Decode a histogram key against the samples registry.
///
/// Deterministic: identical key yields an identical record on every call.
/// Keys matching none of the group-membership rules are rejected with
/// [`Error::Key`], never classified into a wrong group.
pub fn parse_key(name: &str, registry: &SampleRegistry) -> Result<ParsedKey> {
    let mut process = String::new();
    let mut group: Option<Group> = None;
    let mut combine = String::new();
    let mut syst: Option<SystTag> = None;
    let mut category: Option<Category> = None;

    for part in name.split('_') {
        if registry.is_data(part) {
            process = part.to_string();
            group = Some(Group::Dat);
            combine = "data_obs".to_string();
        } else if registry.is_signal(part) {
            process = part.to_string();
            group = Some(Group::Sig);
            combine = part.to_string();
        } else if registry.is_background_group(part) {
            group = Some(Group::Bkg);
            combine = part.to_string();
        } else if let Some(supergroup) = registry.background_group_of(part) {
            process = part.to_string();
            group = Some(Group::Bkg);
            combine = supergroup.to_string();
        } else if part.starts_with("is") {
            category = Some(Category::parse(part)?);
        } else if let Some(idx) = part.strip_prefix("PDF").and_then(|s| s.parse::<u32>().ok()) {
            syst = Some(SystTag::PdfReplica(idx));
        } else if let Some(stem) = part.strip_suffix("UP") {
            syst = Some(SystTag::Shifted { name: stem.to_string(), shift: Shift::Up });
        } else if let Some(stem) = part.strip_suffix("DN") {
            syst = Some(SystTag::Shifted { name: stem.to_string(), shift: Shift::Dn });
        } else {
            return Err(Error::Key(format!("unrecognized fragment `{part}` in key {name}")));
        }
    }

    let group = group.ok_or_else(|| Error::Key(format!("no sample group matches key {name}")))?;
    let category =
        category.ok_or_else(|| Error::Key(format!("no category found in key {name}")))?;
    let abcdnn = registry.in_control_region(&category);
    Ok(ParsedKey { process, group, combine, syst, category, abcdnn })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SampleRegistry {
        SampleRegistry::default()
    }

    #[test]
    fn category_roundtrip() {
        let s = "isEnHOT1pnT0pnW0pnB3pnJ7p";
        let c = Category::parse(s).unwrap();
        assert_eq!(c.lepton, Lepton::E);
        assert_eq!(c.n_b, AxisCut { count: 3, inclusive: true });
        assert_eq!(c.name(), s);
        assert_eq!(c.channel(), "nHOT1pnT0pnW0pnB3pnJ7p");
        assert_eq!(c.with_lepton(Lepton::L).name(), "isLnHOT1pnT0pnW0pnB3pnJ7p");
    }

    #[test]
    fn category_rejects_malformed() {
        assert!(Category::parse("isE").is_err());
        assert!(Category::parse("nHOT1pnT0pnW0pnB3pnJ7p").is_err());
        assert!(Category::parse("isXnHOT1pnT0pnW0pnB3pnJ7p").is_err());
        assert!(Category::parse("isEnHOTxnT0pnW0pnB3pnJ7p").is_err());
    }

    #[test]
    fn parses_nominal_background() {
        let k = parse_key("TTBB_isMnHOT0pnT0pnW0pnB2nJ5", &registry()).unwrap();
        assert_eq!(k.group, Group::Bkg);
        assert_eq!(k.combine, "TTBB");
        assert!(!k.is_syst());
        assert_eq!(k.category.lepton, Lepton::M);
    }

    #[test]
    fn parses_systematic_shift() {
        let k = parse_key("TOP_isEnHOT0pnT0pnW0pnB2nJ5_JECUP", &registry()).unwrap();
        assert!(k.is_syst());
        let tag = k.syst.unwrap();
        assert_eq!(tag.syst(), "JEC");
        assert_eq!(tag.shift(), Some(Shift::Up));
        assert_eq!(tag.encode(), "JECUP");
    }

    #[test]
    fn parses_pdf_replica_and_pdf_shift() {
        let k = parse_key("TTTW_isEnHOT0pnT0pnW0pnB2nJ5_PDF42", &registry()).unwrap();
        assert_eq!(k.syst, Some(SystTag::PdfReplica(42)));
        assert_eq!(k.syst.as_ref().unwrap().syst(), "PDF");

        let k = parse_key("TTTW_isEnHOT0pnT0pnW0pnB2nJ5_PDFDN", &registry()).unwrap();
        assert_eq!(
            k.syst,
            Some(SystTag::Shifted { name: "PDF".into(), shift: Shift::Dn })
        );
    }

    #[test]
    fn parses_data_obs() {
        let k = parse_key("data_obs_isEnHOT0pnT0pnW0pnB2nJ5", &registry()).unwrap();
        assert_eq!(k.group, Group::Dat);
        assert_eq!(k.combine, "data_obs");
    }

    #[test]
    fn rejects_unknown_process() {
        assert!(parse_key("WALDO_isEnHOT0pnT0pnW0pnB2nJ5", &registry()).is_err());
    }

    #[test]
    fn parse_is_deterministic() {
        let reg = registry();
        let a = parse_key("TTBB_isEnHOT1pnT0pnW0pnB3pnJ7p_JER17DN", &reg).unwrap();
        let b = parse_key("TTBB_isEnHOT1pnT0pnW0pnB3pnJ7p_JER17DN", &reg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn flags_control_region_category() {
        let reg = registry();
        let k = parse_key("TTBB_isEnHOT1pnT0pnW0pnB3pnJ7p", &reg).unwrap();
        assert!(k.abcdnn);
        let k = parse_key("TTBB_isEnHOT0pnT0pnW0pnB2nJ5", &reg).unwrap();
        assert!(!k.abcdnn);
    }
}
