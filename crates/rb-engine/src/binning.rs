//! Step-B binning walk: derive a shared variable-width binning per channel
//! from statistical-precision targets.

use rb_core::{Error, Result};
use rb_hist::Histogram;

use crate::config::{BinningParams, VariableSpec};

/// Per-lepton pair of histograms for one tracked series.
#[derive(Debug, Clone, Copy)]
pub struct LeptonPair<'a> {
    /// Electron-channel histogram.
    pub e: &'a Histogram,
    /// Muon-channel histogram.
    pub m: &'a Histogram,
}

/// Everything the walk needs for one channel: lepton-split totals plus each
/// individual signal process.
#[derive(Debug, Clone)]
pub struct ChannelHists<'a> {
    /// Total background.
    pub bkg: LeptonPair<'a>,
    /// Total data.
    pub dat: LeptonPair<'a>,
    /// Total signal.
    pub sig: LeptonPair<'a>,
    /// Individual signal processes, tracked separately so no single signal
    /// goes empty in a merged bin.
    pub signals: Vec<LeptonPair<'a>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Window {
    yields: f64,
    err2: f64,
}

impl Window {
    fn push(&mut self, hist: &Histogram, bin: usize) {
        self.yields += hist.contents[bin];
        self.err2 += hist.errors[bin] * hist.errors[bin];
    }

    fn ratio(&self) -> f64 {
        self.err2.sqrt() / self.yields
    }
}

#[derive(Debug, Clone)]
struct Accum {
    bkg_e: Window,
    bkg_m: Window,
    dat_e: Window,
    dat_m: Window,
    sig_e: Window,
    sig_m: Window,
    signals: Vec<(Window, Window)>,
}

impl Accum {
    fn new(n_signals: usize) -> Accum {
        Accum {
            bkg_e: Window::default(),
            bkg_m: Window::default(),
            dat_e: Window::default(),
            dat_m: Window::default(),
            sig_e: Window::default(),
            sig_m: Window::default(),
            signals: vec![(Window::default(), Window::default()); n_signals],
        }
    }

    fn push(&mut self, hists: &ChannelHists<'_>, bin: usize) {
        self.bkg_e.push(hists.bkg.e, bin);
        self.bkg_m.push(hists.bkg.m, bin);
        self.dat_e.push(hists.dat.e, bin);
        self.dat_m.push(hists.dat.m, bin);
        self.sig_e.push(hists.sig.e, bin);
        self.sig_m.push(hists.sig.m, bin);
        for (pair, (we, wm)) in hists.signals.iter().zip(self.signals.iter_mut()) {
            we.push(pair.e, bin);
            wm.push(pair.m, bin);
        }
    }

    /// Every tracked lepton-split yield must be strictly positive before a
    /// boundary may be committed.
    fn all_positive(&self) -> bool {
        let mut yields = vec![
            self.bkg_e.yields,
            self.bkg_m.yields,
            self.dat_e.yields,
            self.dat_m.yields,
            self.sig_e.yields,
            self.sig_m.yields,
        ];
        for (we, wm) in &self.signals {
            yields.push(we.yields);
            yields.push(wm.yields);
        }
        yields.into_iter().all(|y| y > 0.0)
    }

    fn ratios_pass(&self, threshold: f64) -> bool {
        let ratio_sig = (self.sig_e.err2 + self.sig_m.err2).sqrt()
            / (self.sig_e.yields + self.sig_m.yields);
        self.bkg_e.ratio() <= threshold
            && self.bkg_m.ratio() <= threshold
            && ratio_sig <= threshold
    }
}

/// Walk the channel from the high end of the spectrum toward the low end and
/// return the committed edge array, ascending, clipped to the variable's
/// plotting range.
pub fn determine_edges(
    channel: &str,
    hists: &ChannelHists<'_>,
    var: &VariableSpec,
    params: &BinningParams,
) -> Result<Vec<f64>> {
    let bkg_e = hists.bkg.e;
    let bkg_m = hists.bkg.m;
    if bkg_e.n_bins() != bkg_m.n_bins() {
        return Err(Error::Validation(format!(
            "channel {channel}: lepton histograms disagree on bin count"
        )));
    }
    let n = bkg_e.n_bins();
    let edges = &bkg_e.edges;

    // Committed boundaries, high edge first.
    let mut desc = vec![edges[n]];
    let mut acc = Accum::new(hists.signals.len());
    let mut n_merged = 0usize;

    for k in 0..n {
        let bin = n - 1 - k;
        n_merged += 1;
        if params.stat_threshold > 1.0 {
            // Fixed-merge-count mode.
            if n_merged < params.min_merge {
                continue;
            }
            desc.push(edges[bin]);
            n_merged = 0;
        } else if var.integer {
            // Multiplicity variables: boundary at every populated bin.
            if bkg_e.contents[bin] + bkg_m.contents[bin] > 0.0 {
                desc.push(edges[bin]);
            }
            n_merged = 0;
        } else {
            acc.push(hists, bin);
            if n_merged < params.min_merge {
                continue;
            }
            if !acc.all_positive() {
                continue;
            }
            if acc.ratios_pass(params.stat_threshold) {
                acc = Accum::new(hists.signals.len());
                n_merged = 0;
                desc.push(edges[bin]);
            }
        }
    }
    if *desc.last().expect("seeded with the high edge") != edges[0] {
        desc.push(edges[0]);
    }

    if params.stat_threshold <= 1.0 {
        low_edge_correction(&mut desc, hists, var, params);
    }

    let mut ascending: Vec<f64> = desc.into_iter().rev().collect();
    clip_to_range(&mut ascending, var);

    if ascending.len() < 2 {
        return Err(Error::Binning {
            channel: channel.to_string(),
            reason: format!("{} edges remain after the merge walk", ascending.len()),
        });
    }
    tracing::debug!(channel, bins = ascending.len() - 1, "channel binning determined");
    Ok(ascending)
}

/// Edge-retention rules for the lowest part of the spectrum. The exact
/// tie-breaks here reproduce the reference analysis; see DESIGN.md.
fn low_edge_correction(
    desc: &mut Vec<f64>,
    hists: &ChannelHists<'_>,
    var: &VariableSpec,
    params: &BinningParams,
) {
    if var.integer {
        if hists.bkg.e.contents[0] + hists.bkg.m.contents[0] == 0.0 {
            desc.pop();
        }
        return;
    }
    let zero_first = hists.bkg.e.contents[0] == 0.0
        || hists.bkg.m.contents[0] == 0.0
        || hists.sig.e.contents[0] == 0.0
        || hists.sig.m.contents[0] == 0.0;
    if zero_first {
        if desc.len() > 2 {
            desc.remove(desc.len() - 2);
        }
        return;
    }
    let sig_l_yield = hists.sig.e.contents[0] + hists.sig.m.contents[0];
    let sig_l_err = (hists.sig.e.errors[0].powi(2) + hists.sig.m.errors[0].powi(2)).sqrt();
    let beneath = hists.bkg.e.errors[0] / hists.bkg.e.contents[0] > params.stat_threshold
        || hists.bkg.m.errors[0] / hists.bkg.m.contents[0] > params.stat_threshold
        || sig_l_err / sig_l_yield > params.stat_threshold;
    if beneath && desc.len() > 2 {
        desc.remove(desc.len() - 2);
    }
}

/// Clamp the outer edges to the variable's plotting range and drop interior
/// edges pushed outside it.
fn clip_to_range(ascending: &mut Vec<f64>, var: &VariableSpec) {
    if ascending.is_empty() {
        return;
    }
    ascending[0] = ascending[0].max(var.x_min);
    let last = ascending.len() - 1;
    ascending[last] = ascending[last].min(var.x_max);
    let (lo, hi) = (ascending[0], ascending[last]);
    let inner: Vec<f64> =
        ascending[1..last].iter().copied().filter(|&x| x > lo && x < hi).collect();
    let mut clipped = Vec::with_capacity(inner.len() + 2);
    clipped.push(lo);
    clipped.extend(inner);
    clipped.push(hi);
    clipped.dedup();
    *ascending = clipped;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(n: usize, content: f64, error: f64) -> Histogram {
        let edges: Vec<f64> = (0..=n).map(|i| i as f64).collect();
        Histogram::with_bins(edges, vec![content; n], vec![error; n]).unwrap()
    }

    fn var(name: &str, n: usize, integer: bool) -> VariableSpec {
        VariableSpec { name: name.into(), x_min: 0.0, x_max: n as f64, integer }
    }

    struct Fixture {
        bkg: (Histogram, Histogram),
        dat: (Histogram, Histogram),
        sig: (Histogram, Histogram),
    }

    impl Fixture {
        fn uniform(n: usize, content: f64, error: f64) -> Fixture {
            Fixture {
                bkg: (flat(n, content, error), flat(n, content, error)),
                dat: (flat(n, content, error), flat(n, content, error)),
                sig: (flat(n, content, error), flat(n, content, error)),
            }
        }

        fn hists(&self) -> ChannelHists<'_> {
            ChannelHists {
                bkg: LeptonPair { e: &self.bkg.0, m: &self.bkg.1 },
                dat: LeptonPair { e: &self.dat.0, m: &self.dat.1 },
                sig: LeptonPair { e: &self.sig.0, m: &self.sig.1 },
                signals: vec![LeptonPair { e: &self.sig.0, m: &self.sig.1 }],
            }
        }
    }

    fn params(threshold: f64) -> BinningParams {
        BinningParams { stat_threshold: threshold, ..BinningParams::default() }
    }

    #[test]
    fn keeps_every_bin_when_each_satisfies_the_ratio() {
        // ratio per bin = 1.5 / 5 = 0.3 exactly at threshold
        let fx = Fixture::uniform(10, 5.0, 1.5);
        let edges =
            determine_edges("ch", &fx.hists(), &var("HT", 10, false), &params(0.30)).unwrap();
        assert_eq!(edges.len(), 11);
    }

    #[test]
    fn merges_until_the_window_ratio_passes() {
        // per-bin ratio 0.6; quadrature needs a 4-bin window for 0.30, and
        // the low-edge re-check folds the remainder into the lowest bin.
        let fx = Fixture::uniform(10, 5.0, 3.0);
        let edges =
            determine_edges("ch", &fx.hists(), &var("HT", 10, false), &params(0.30)).unwrap();
        assert_eq!(edges, vec![0.0, 6.0, 10.0]);
        // every committed window satisfies the target
        for w in edges.windows(2) {
            let nbins = (w[1] - w[0]) as f64;
            let ratio = (nbins * 9.0).sqrt() / (nbins * 5.0);
            assert!(ratio <= 0.30 + 1e-9, "window {w:?} ratio {ratio}");
        }
    }

    #[test]
    fn tighter_threshold_never_increases_bin_count() {
        let fx = Fixture::uniform(10, 5.0, 3.0);
        let v = var("HT", 10, false);
        let mut previous = usize::MAX;
        for threshold in [0.6, 0.4, 0.3, 0.2, 0.1] {
            let edges = determine_edges("ch", &fx.hists(), &v, &params(threshold)).unwrap();
            let bins = edges.len() - 1;
            assert!(bins <= previous, "threshold {threshold} grew bins to {bins}");
            previous = bins;
        }
    }

    #[test]
    fn fixed_merge_mode_ignores_contents() {
        let fx = Fixture::uniform(10, 0.0, 0.0);
        let p = BinningParams { stat_threshold: 1.3, min_merge: 2, ..BinningParams::default() };
        let edges = determine_edges("ch", &fx.hists(), &var("HT", 10, false), &p).unwrap();
        // a boundary every 2 bins
        assert_eq!(edges, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn integer_variable_commits_populated_bins() {
        let mut fx = Fixture::uniform(6, 1.0, 0.2);
        fx.bkg.0.contents = vec![0.0, 0.0, 4.0, 3.0, 0.0, 1.0];
        fx.bkg.1.contents = vec![0.0, 0.0, 4.0, 3.0, 0.0, 1.0];
        let edges =
            determine_edges("ch", &fx.hists(), &var("NJETS", 6, true), &params(0.30)).unwrap();
        // populated bins 2, 3, 5 get boundaries; empty lowest bin is dropped
        assert_eq!(edges, vec![2.0, 3.0, 5.0, 6.0]);
    }

    #[test]
    fn zero_yield_channel_fails_to_converge() {
        let fx = Fixture::uniform(4, 0.0, 0.0);
        // empty channel commits no boundaries and the range clip collapses
        let v = VariableSpec { name: "HT".into(), x_min: 4.0, x_max: 4.0, integer: false };
        let err = determine_edges("dead", &fx.hists(), &v, &params(0.30)).unwrap_err();
        assert!(matches!(err, Error::Binning { .. }));
    }

    #[test]
    fn clip_respects_plotting_range() {
        let fx = Fixture::uniform(10, 5.0, 1.5);
        let v = VariableSpec { name: "HT".into(), x_min: 2.0, x_max: 8.0, integer: false };
        let edges = determine_edges("ch", &fx.hists(), &v, &params(0.30)).unwrap();
        assert_eq!(*edges.first().unwrap(), 2.0);
        assert_eq!(*edges.last().unwrap(), 8.0);
        assert!(edges.windows(2).all(|w| w[1] > w[0]));
    }
}
