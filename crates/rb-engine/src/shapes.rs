//! Systematic-shape construction layers applied after rebinning.
//!
//! Every layer is independently toggled by [`crate::config::EngineOptions`]
//! and operates on a (nominal map, systematic map) pair for one analysis
//! group. Missing variants of an enabled systematic are fatal; degenerate
//! bins are epsilon-corrected and counted.

use std::collections::{BTreeMap, BTreeSet};

use rb_core::{Error, Result, Year};
use rb_hist::key::{nominal_key, parse_key, shift_key};
use rb_hist::{Histogram, ParsedKey, SampleRegistry, Shift, SystTag};

use crate::config::{BinningParams, EngineOptions, SystematicsRegistry};
use crate::smooth::smooth_series;

/// Scale applied to the half-difference when symmetrizing theory shifts.
const THEORY_SYMM_SCALE: f64 = 0.707;

/// Theory sources collapsed by the symmetrization and μR/μF envelope steps.
const THEORY_SOURCES: [&str; 5] = ["ISR", "FSR", "MUR", "MUF", "MURFCORRD"];

/// μR/μF variant tags entering the envelope.
const MURF_VARIANTS: [&str; 6] =
    ["MURUP", "MURDN", "MUFUP", "MUFDN", "MURFCORRDUP", "MURFCORRDDN"];

/// Shared context threaded through every shape layer.
pub struct ShapeCtx<'a> {
    /// Samples registry for key decoding and group membership.
    pub registry: &'a SampleRegistry,
    /// Per-source systematic behavior.
    pub systematics: &'a SystematicsRegistry,
    /// Numeric parameters.
    pub params: &'a BinningParams,
    /// Layer toggles.
    pub options: &'a EngineOptions,
    /// Year of the unit of work.
    pub year: Year,
    /// Variable of the unit of work.
    pub variable: &'a str,
}

impl ShapeCtx<'_> {
    fn parse(&self, name: &str) -> Result<ParsedKey> {
        parse_key(name, self.registry)
    }

    fn missing(&self, name: &str, category: &str, systematic: &str) -> Error {
        Error::MissingHistogram {
            name: name.to_string(),
            variable: self.variable.to_string(),
            year: self.year.label().to_string(),
            category: category.to_string(),
            systematic: systematic.to_string(),
        }
    }

    fn fetch<'h>(
        &self,
        map: &'h BTreeMap<String, Histogram>,
        name: &str,
        category: &str,
        systematic: &str,
    ) -> Result<&'h Histogram> {
        map.get(name).ok_or_else(|| self.missing(name, category, systematic))
    }

    /// Correlation-group suffix for the theory envelope aliases.
    fn envelope_alias(&self, combine: &str) -> String {
        if combine == "TTNOBB" || combine == "TTBB" {
            "TTBAR".to_string()
        } else if self.registry.signals.iter().any(|s| s == combine) {
            "SIG".to_string()
        } else {
            combine.to_string()
        }
    }
}

fn shifted_up(parse: &ParsedKey, syst: &str) -> bool {
    matches!(&parse.syst, Some(SystTag::Shifted { name, shift: Shift::Up }) if name == syst)
}

fn shifted_dn(parse: &ParsedKey, syst: &str) -> bool {
    matches!(&parse.syst, Some(SystTag::Shifted { name, shift: Shift::Dn }) if name == syst)
}

/// Reflect the top-pT DOWN shape across the nominal: `DN = 2·nominal − UP`.
///
/// A pure function of nominal and UP, hence idempotent.
pub fn symmetrize_top_pt(
    nom: &BTreeMap<String, Histogram>,
    syst: &mut BTreeMap<String, Histogram>,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        if !shifted_dn(&parse, "TOPPT") {
            continue;
        }
        let category = parse.category_name();
        let nominal = ctx
            .fetch(nom, &nominal_key(&parse.combine, &category), &category, "TOPPT")?
            .contents
            .clone();
        let up_name = shift_key(&parse.combine, &category, "TOPPTUP");
        let up = ctx.fetch(syst, &up_name, &category, "TOPPT")?.contents.clone();
        let dn = syst.get_mut(&name).expect("iterating existing key");
        for i in 0..dn.n_bins() {
            dn.contents[i] = 2.0 * nominal[i] - up[i];
        }
        count += 1;
    }
    tracing::info!(count, "symmetrized top-pT shifts");
    Ok(count)
}

/// Symmetrize the ISR/FSR/μR/μF/μR-F-correlated shifts: both directions are
/// replaced by `nominal ± 0.707·|UP−DOWN|/2`.
pub fn symmetrize_theory(
    nom: &BTreeMap<String, Histogram>,
    syst: &mut BTreeMap<String, Histogram>,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        let Some(&source) = THEORY_SOURCES.iter().find(|&&s| shifted_up(&parse, s)) else {
            continue;
        };
        let category = parse.category_name();
        let nominal = ctx
            .fetch(nom, &nominal_key(&parse.combine, &category), &category, source)?
            .contents
            .clone();
        let up_name = shift_key(&parse.combine, &category, &format!("{source}UP"));
        let dn_name = shift_key(&parse.combine, &category, &format!("{source}DN"));
        let up = ctx.fetch(syst, &up_name, &category, source)?.contents.clone();
        let dn = ctx.fetch(syst, &dn_name, &category, source)?.contents.clone();
        for (key, sign) in [(up_name, 1.0), (dn_name, -1.0)] {
            let hist = syst.get_mut(&key).expect("fetched above");
            for i in 0..hist.n_bins() {
                let shift = THEORY_SYMM_SCALE * (up[i] - dn[i]).abs() / 2.0;
                hist.contents[i] = nominal[i] + sign * shift;
            }
        }
        count += 1;
    }
    tracing::info!(count, "symmetrized theory shifts");
    Ok(count)
}

/// Symmetrize the HOT-closure shifts to the larger per-bin deviation:
/// `UP/DN = nominal ± max(|nominal−UP|, |nominal−DOWN|)`.
pub fn symmetrize_hot_closure(
    nom: &BTreeMap<String, Histogram>,
    syst: &mut BTreeMap<String, Histogram>,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        if !shifted_up(&parse, "HOTCLOSURE") {
            continue;
        }
        let category = parse.category_name();
        let nominal = ctx
            .fetch(nom, &nominal_key(&parse.combine, &category), &category, "HOTCLOSURE")?
            .contents
            .clone();
        let up_name = shift_key(&parse.combine, &category, "HOTCLOSUREUP");
        let dn_name = shift_key(&parse.combine, &category, "HOTCLOSUREDN");
        let up = ctx.fetch(syst, &up_name, &category, "HOTCLOSURE")?.contents.clone();
        let dn = ctx.fetch(syst, &dn_name, &category, "HOTCLOSURE")?.contents.clone();
        for (key, sign) in [(up_name, 1.0), (dn_name, -1.0)] {
            let hist = syst.get_mut(&key).expect("fetched above");
            for i in 0..hist.n_bins() {
                let max_shift = (nominal[i] - up[i]).abs().max((nominal[i] - dn[i]).abs());
                hist.contents[i] = nominal[i] + sign * max_shift;
            }
        }
        count += 1;
    }
    tracing::info!(count, "symmetrized HOT-closure shifts");
    Ok(count)
}

/// Synthesize per-bin statistical ("bin-by-bin") shape systematics.
///
/// For each category bin whose total-background `error/yield` exceeds the
/// significance floor: every signal process gets a `BIN<i>` UP/DN pair, and
/// the background side gets one pair — per process when the category has a
/// single bin, otherwise only for the largest-yield background process in
/// that bin.
pub fn add_statistical_shapes(
    bkg: &mut BTreeMap<String, Histogram>,
    sig: &mut BTreeMap<String, Histogram>,
    total_bkg: &BTreeMap<String, Histogram>,
    categories: &BTreeSet<String>,
    ctx: &ShapeCtx<'_>,
) -> Result<(usize, usize)> {
    let mut n_sig = 0;
    let mut n_bkg = 0;
    for category in categories {
        let total = ctx.fetch(total_bkg, category, category, "")?;
        for bin in 0..total.n_bins() {
            let error_ratio = if total.contents[bin] == 0.0 {
                0.0
            } else {
                total.errors[bin] / total.contents[bin]
            };
            // a bin already well beneath the floor needs no shape nuisance
            if error_ratio <= ctx.params.threshold_bb {
                continue;
            }
            n_sig += write_per_process_shapes(sig, category, bin, ctx)?;
            if total.n_bins() == 1 {
                n_bkg += write_per_process_shapes(bkg, category, bin, ctx)?;
            } else {
                n_bkg += write_dominant_background_shape(bkg, category, bin, ctx)?;
            }
        }
    }
    tracing::info!(n_sig, n_bkg, "added statistical shape systematics");
    Ok((n_sig, n_bkg))
}

fn stat_shape_pair(
    map: &mut BTreeMap<String, Histogram>,
    source_name: &str,
    combine: &str,
    category: &str,
    bin: usize,
    ctx: &ShapeCtx<'_>,
) -> Result<()> {
    let source = map.get(source_name).expect("caller verified");
    let count = source.contents[bin];
    let error = source.errors[bin];
    for (shift, sign) in [("UP", 1.0), ("DN", -1.0)] {
        let name = shift_key(combine, category, &format!("BIN{}{shift}", bin + 1));
        let mut hist = map.get(source_name).expect("caller verified").clone();
        hist.contents[bin] = count + sign * error;
        if count - error < 0.0 {
            hist.negative_bin_correction(ctx.params.zero);
        } else if count - error == 0.0 {
            hist.contents[bin] = count * ctx.params.zero;
        }
        map.insert(name, hist);
    }
    Ok(())
}

fn write_per_process_shapes(
    map: &mut BTreeMap<String, Histogram>,
    category: &str,
    bin: usize,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = map.keys().cloned().collect();
    let mut added = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        if parse.is_syst() || parse.category_name() != category {
            continue;
        }
        if map[&name].contents[bin] == 0.0 {
            continue;
        }
        stat_shape_pair(map, &name, &parse.combine, category, bin, ctx)?;
        added += 1;
    }
    Ok(added)
}

fn write_dominant_background_shape(
    bkg: &mut BTreeMap<String, Histogram>,
    category: &str,
    bin: usize,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let mut dominant: Option<(String, String, f64)> = None;
    for (name, hist) in bkg.iter() {
        let parse = ctx.parse(name)?;
        if parse.is_syst() || parse.category_name() != category {
            continue;
        }
        let content = hist.contents[bin];
        if dominant.as_ref().map(|(_, _, c)| content > *c).unwrap_or(content > 0.0) {
            dominant = Some((name.clone(), parse.combine.clone(), content));
        }
    }
    let Some((name, combine, _)) = dominant else {
        tracing::warn!(category, bin, "no populated background for statistical shape");
        return Ok(0);
    };
    stat_shape_pair(bkg, &name, &combine, category, bin, ctx)?;
    Ok(1)
}

/// Per-bin max/min envelope over the six μR/μF variants, emitted as a
/// combined `MURF` pair plus its correlation-group alias.
pub fn add_murf_envelope(
    nom: &BTreeMap<String, Histogram>,
    syst: &mut BTreeMap<String, Histogram>,
    is_signal: bool,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        if !shifted_up(&parse, "MUR") || parse.combine == "ABCDNN" {
            continue;
        }
        let category = parse.category_name();
        let nominal =
            ctx.fetch(nom, &nominal_key(&parse.combine, &category), &category, "MURF")?.clone();
        let mut up = nominal.clone();
        let mut dn = nominal.clone();
        for variant in MURF_VARIANTS {
            let key = shift_key(&parse.combine, &category, variant);
            let hist = ctx.fetch(syst, &key, &category, "MURF")?;
            for i in 0..up.n_bins() {
                up.contents[i] = up.contents[i].max(hist.contents[i]);
                dn.contents[i] = dn.contents[i].min(hist.contents[i]);
            }
        }
        if is_signal && ctx.options.norm_theory_sig {
            let sf = ctx
                .systematics
                .mu_sf
                .get(&ctx.year)
                .ok_or_else(|| Error::Validation(format!("no μ scale factor for {}", ctx.year)))?;
            up.scale(1.0 / sf.up);
            dn.scale(1.0 / sf.dn);
        } else if !is_signal && ctx.options.norm_theory_bkg {
            up.scale(nominal.integral() / (up.integral() + ctx.params.zero));
            dn.scale(nominal.integral() / (dn.integral() + ctx.params.zero));
        }
        let alias = ctx.envelope_alias(&parse.combine);
        for (hist, shift) in [(up, "UP"), (dn, "DN")] {
            syst.insert(shift_key(&parse.combine, &category, &format!("MURF{shift}")), hist.clone());
            syst.insert(
                shift_key(&parse.combine, &category, &format!("MURF{alias}{shift}")),
                hist,
            );
        }
        count += 1;
    }
    tracing::info!(count, "added μR/μF envelope shapes");
    Ok(count)
}

/// Per-bin max/min envelope over the ISR/FSR variants, emitted as a combined
/// `PSWGT` pair plus re-exposed ISR/FSR copies and correlation-group aliases.
pub fn add_ps_weight_envelope(
    nom: &BTreeMap<String, Histogram>,
    syst: &mut BTreeMap<String, Histogram>,
    is_signal: bool,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        if !shifted_up(&parse, "ISR") {
            continue;
        }
        if parse.combine == "ABCDNN"
            && !ctx.registry.abcdnn_systematics.iter().any(|s| s == "ISR" || s == "FSR")
        {
            continue;
        }
        let category = parse.category_name();
        let nominal =
            ctx.fetch(nom, &nominal_key(&parse.combine, &category), &category, "PSWGT")?.clone();
        let mut shapes: BTreeMap<String, Histogram> = BTreeMap::new();
        for source in ["ISR", "FSR"] {
            for shift in ["UP", "DN"] {
                let key = shift_key(&parse.combine, &category, &format!("{source}{shift}"));
                let hist = ctx.fetch(syst, &key, &category, "PSWGT")?.clone();
                shapes.insert(format!("{source}{shift}"), hist);
            }
        }
        let mut up = nominal.clone();
        let mut dn = nominal.clone();
        for hist in shapes.values() {
            for i in 0..up.n_bins() {
                if hist.contents[i] > up.contents[i] {
                    up.contents[i] = hist.contents[i];
                    up.errors[i] = hist.errors[i];
                }
                if hist.contents[i] < dn.contents[i] {
                    dn.contents[i] = hist.contents[i];
                    dn.errors[i] = hist.errors[i];
                }
            }
        }
        shapes.insert("PSWGTUP".into(), up);
        shapes.insert("PSWGTDN".into(), dn);
        let renormalize =
            if is_signal { ctx.options.norm_theory_sig } else { ctx.options.norm_theory_bkg };
        if renormalize {
            for hist in shapes.values_mut() {
                hist.scale(nominal.integral() / (hist.integral() + ctx.params.zero));
            }
        }
        let alias = ctx.envelope_alias(&parse.combine);
        for source in ["PSWGT", "ISR", "FSR"] {
            for shift in ["UP", "DN"] {
                let hist = shapes[&format!("{source}{shift}")].clone();
                syst.insert(
                    shift_key(&parse.combine, &category, &format!("{source}{shift}")),
                    hist.clone(),
                );
                syst.insert(
                    shift_key(&parse.combine, &category, &format!("{source}{alias}{shift}")),
                    hist,
                );
            }
        }
        count += 1;
    }
    tracing::info!(count, "added parton-shower weight envelope shapes");
    Ok(count)
}

/// Bin-wise min/max envelope over the PDF replica set.
pub fn add_pdf_envelope(
    nom: &BTreeMap<String, Histogram>,
    syst: &mut BTreeMap<String, Histogram>,
    is_signal: bool,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut done: BTreeSet<String> = BTreeSet::new();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        if !matches!(parse.syst, Some(SystTag::PdfReplica(_))) {
            continue;
        }
        let category = parse.category_name();
        let base = nominal_key(&parse.combine, &category);
        if !done.insert(base.clone()) {
            continue;
        }
        let nominal = ctx.fetch(nom, &base, &category, "PDF")?.clone();
        let first = ctx.fetch(syst, &shift_key(&parse.combine, &category, "PDF0"), &category, "PDF")?;
        let mut up = first.clone();
        let mut dn = first.clone();
        for replica in 1..ctx.params.pdf_replicas {
            let key = shift_key(&parse.combine, &category, &format!("PDF{replica}"));
            let hist = ctx.fetch(syst, &key, &category, "PDF")?;
            for i in 0..up.n_bins() {
                if hist.contents[i] > up.contents[i] {
                    up.contents[i] = hist.contents[i];
                    up.errors[i] = hist.errors[i];
                }
                if hist.contents[i] < dn.contents[i] {
                    dn.contents[i] = hist.contents[i];
                    dn.errors[i] = hist.errors[i];
                }
            }
        }
        if is_signal && !ctx.options.norm_theory_sig {
            let sf = ctx
                .systematics
                .pdf_sf
                .get(&ctx.year)
                .ok_or_else(|| Error::Validation(format!("no PDF scale factor for {}", ctx.year)))?;
            up.scale(1.0 / sf.up);
            dn.scale(1.0 / sf.dn);
        } else if !is_signal && ctx.options.norm_theory_bkg {
            up.scale(nominal.integral() / (up.integral() + ctx.params.zero));
            dn.scale(nominal.integral() / (dn.integral() + ctx.params.zero));
        }
        let alias = ctx.envelope_alias(&parse.combine);
        for (hist, shift) in [(up, "UP"), (dn, "DN")] {
            syst.insert(shift_key(&parse.combine, &category, &format!("PDF{shift}")), hist.clone());
            syst.insert(shift_key(&parse.combine, &category, &format!("PDF{alias}{shift}")), hist);
        }
        count += 1;
    }
    tracing::info!(count, "added PDF envelope shapes");
    Ok(count)
}

/// Rescale the ABCDNN systematic variants so their integral matches the
/// nominal ABCDNN estimate in the same category.
pub fn normalize_abcdnn(
    nom: &BTreeMap<String, Histogram>,
    syst: &mut BTreeMap<String, Histogram>,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        let Some(tag) = &parse.syst else { continue };
        if !tag.syst().contains("ABCDNN") {
            continue;
        }
        let category = parse.category_name();
        let nominal = ctx.fetch(nom, &nominal_key("ABCDNN", &category), &category, tag.syst())?;
        let target = nominal.integral();
        let hist = syst.get_mut(&name).expect("iterating existing key");
        let integral = hist.integral();
        if integral == 0.0 {
            tracing::warn!(name, "zero-integral ABCDNN variant left unnormalized");
            continue;
        }
        hist.scale(target / integral);
        count += 1;
    }
    tracing::info!(count, "normalized ABCDNN shapes");
    Ok(count)
}

/// Smooth every registry-flagged systematic shape: the UP/DOWN-over-nominal
/// ratio series is smoothed per direction (optionally collapsed into a
/// symmetric envelope first) and rebuilt as `nominal × ratio`.
pub fn smooth_shapes(
    nom: &BTreeMap<String, Histogram>,
    syst: &mut BTreeMap<String, Histogram>,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        let Some(SystTag::Shifted { name: source, shift: Shift::Up }) = &parse.syst else {
            continue;
        };
        if !ctx.systematics.is_smoothed(source) {
            continue;
        }
        let category = parse.category_name();
        let nominal = ctx.fetch(nom, &nominal_key(&parse.combine, &category), &category, source)?;
        let up_name = shift_key(&parse.combine, &category, &format!("{source}UP"));
        let dn_name = shift_key(&parse.combine, &category, &format!("{source}DN"));
        let up = ctx.fetch(syst, &up_name, &category, source)?.clone();
        let dn = ctx.fetch(syst, &dn_name, &category, source)?.clone();

        let x: Vec<f64> = (0..nominal.n_bins()).map(|i| nominal.bin_center(i)).collect();
        let ratio = |shifted: &Histogram| -> Vec<f64> {
            (0..nominal.n_bins())
                .map(|i| {
                    if nominal.contents[i] == 0.0 {
                        1.0
                    } else {
                        shifted.contents[i] / nominal.contents[i]
                    }
                })
                .collect()
        };
        let algo = ctx.params.smoothing_algo;
        let up_ratio = smooth_series(algo, &x, &ratio(&up), ctx.params.lowess_fraction);
        let dn_ratio = smooth_series(algo, &x, &ratio(&dn), ctx.params.lowess_fraction);

        let mut up_out = up;
        let mut dn_out = dn;
        let symmetrize = ctx.options.symm_smoothing && ctx.systematics.is_symmetrized(source);
        for i in 0..nominal.n_bins() {
            if symmetrize {
                let mean_shift =
                    ((1.0 - up_ratio[i]).abs() + (1.0 - dn_ratio[i]).abs()) / 2.0;
                up_out.contents[i] = nominal.contents[i] * (1.0 + mean_shift);
                dn_out.contents[i] = nominal.contents[i] * (1.0 - mean_shift);
            } else {
                up_out.contents[i] = nominal.contents[i] * up_ratio[i];
                dn_out.contents[i] = nominal.contents[i] * dn_ratio[i];
            }
        }
        let tag = algo.tag();
        syst.insert(shift_key(&parse.combine, &category, &format!("{source}{tag}UP")), up_out);
        syst.insert(shift_key(&parse.combine, &category, &format!("{source}{tag}DN")), dn_out);
        count += 1;
    }
    tracing::info!(count, "smoothed systematic shapes");
    Ok(count)
}

/// Clone trigger-efficiency shapes under lepton-flavor-specific names so the
/// two flavors float independently downstream.
pub fn split_trigger_efficiency(
    syst: &mut BTreeMap<String, Histogram>,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        let Some(tag) = &parse.syst else { continue };
        if tag.syst() != "TRIGEFF" {
            continue;
        }
        let flavor = match parse.category.lepton {
            rb_hist::Lepton::E => "ELTRIGGEFF",
            rb_hist::Lepton::M => "MUTRIGGEFF",
            rb_hist::Lepton::L => continue,
        };
        let renamed = name.replace("TRIGEFF", flavor);
        let hist = syst[&name].clone();
        syst.insert(renamed, hist);
        count += 1;
    }
    tracing::info!(count, "split trigger-efficiency shapes by lepton flavor");
    Ok(count)
}

/// Append the year to every systematic tag so the same physical source is an
/// independent nuisance parameter per era when the years are later combined.
pub fn decorrelate_years(
    syst: &mut BTreeMap<String, Histogram>,
    ctx: &ShapeCtx<'_>,
) -> Result<usize> {
    let names: Vec<String> = syst.keys().cloned().collect();
    let mut count = 0;
    for name in names {
        let parse = ctx.parse(&name)?;
        let Some(SystTag::Shifted { name: source, shift }) = &parse.syst else {
            continue;
        };
        let renamed = shift_key(
            &parse.combine,
            &parse.category_name(),
            &format!("{source}{}{}", ctx.year.label(), shift.suffix()),
        );
        let hist = syst.remove(&name).expect("iterating existing key");
        syst.insert(renamed, hist);
        count += 1;
    }
    tracing::info!(count, "decorrelated systematic shifts by year");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAT: &str = "isEnHOT0pnT0pnW0pnB2nJ5";

    fn flat(n: usize, content: f64, error: f64) -> Histogram {
        let edges: Vec<f64> = (0..=n).map(|i| i as f64).collect();
        Histogram::with_bins(edges, vec![content; n], vec![error; n]).unwrap()
    }

    struct Fixture {
        registry: SampleRegistry,
        systematics: SystematicsRegistry,
        params: BinningParams,
        options: EngineOptions,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                registry: SampleRegistry::default(),
                systematics: SystematicsRegistry::default(),
                params: BinningParams::default(),
                options: EngineOptions::default(),
            }
        }

        fn ctx(&self) -> ShapeCtx<'_> {
            ShapeCtx {
                registry: &self.registry,
                systematics: &self.systematics,
                params: &self.params,
                options: &self.options,
                year: Year::Run17,
                variable: "HT",
            }
        }
    }

    #[test]
    fn top_pt_symmetrization_is_idempotent() {
        let fx = Fixture::new();
        let mut nom = BTreeMap::new();
        nom.insert(format!("TTBB_{CAT}"), flat(4, 100.0, 1.0));
        let mut syst = BTreeMap::new();
        syst.insert(format!("TTBB_{CAT}_TOPPTUP"), flat(4, 110.0, 1.0));
        syst.insert(format!("TTBB_{CAT}_TOPPTDN"), flat(4, 130.0, 1.0));

        symmetrize_top_pt(&nom, &mut syst, &fx.ctx()).unwrap();
        let once = syst[&format!("TTBB_{CAT}_TOPPTDN")].contents.clone();
        assert_eq!(once, vec![90.0; 4]);

        symmetrize_top_pt(&nom, &mut syst, &fx.ctx()).unwrap();
        assert_eq!(syst[&format!("TTBB_{CAT}_TOPPTDN")].contents, once);
        assert_eq!(syst[&format!("TTBB_{CAT}_TOPPTUP")].contents, vec![110.0; 4]);
    }

    #[test]
    fn hot_closure_symmetrization_is_idempotent() {
        let fx = Fixture::new();
        let mut nom = BTreeMap::new();
        nom.insert(format!("TTBB_{CAT}"), flat(4, 100.0, 1.0));
        let mut syst = BTreeMap::new();
        syst.insert(format!("TTBB_{CAT}_HOTCLOSUREUP"), flat(4, 104.0, 1.0));
        syst.insert(format!("TTBB_{CAT}_HOTCLOSUREDN"), flat(4, 92.0, 1.0));

        symmetrize_hot_closure(&nom, &mut syst, &fx.ctx()).unwrap();
        let up = syst[&format!("TTBB_{CAT}_HOTCLOSUREUP")].contents.clone();
        let dn = syst[&format!("TTBB_{CAT}_HOTCLOSUREDN")].contents.clone();
        assert_eq!(up, vec![108.0; 4]);
        assert_eq!(dn, vec![92.0; 4]);

        symmetrize_hot_closure(&nom, &mut syst, &fx.ctx()).unwrap();
        assert_eq!(syst[&format!("TTBB_{CAT}_HOTCLOSUREUP")].contents, up);
        assert_eq!(syst[&format!("TTBB_{CAT}_HOTCLOSUREDN")].contents, dn);
    }
}
