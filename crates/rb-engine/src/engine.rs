//! Pipeline driver: load/aggregate, per-channel binning, rebin, shape layers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rb_core::{Error, Result};
use rb_hist::key::{nominal_key, parse_key};
use rb_hist::{Group, Histogram, SampleRegistry, SystTag, TemplateSet};

use crate::binning::{determine_edges, ChannelHists, LeptonPair};
use crate::config::{BinningParams, EngineOptions, SystematicsRegistry, Unit};
use crate::shapes::{self, ShapeCtx};

/// Histograms of one unit of work, partitioned by group and systematic
/// status, with the lepton-summed per-category totals.
#[derive(Debug, Default)]
pub struct HistStore {
    /// Nominal background shapes keyed `<combine>_<category>`.
    pub bkg: BTreeMap<String, Histogram>,
    /// Background systematic variants.
    pub bkg_syst: BTreeMap<String, Histogram>,
    /// Nominal signal shapes.
    pub sig: BTreeMap<String, Histogram>,
    /// Signal systematic variants.
    pub sig_syst: BTreeMap<String, Histogram>,
    /// Observed data keyed `data_obs_<category>`.
    pub dat: BTreeMap<String, Histogram>,
    /// Total background per category.
    pub total_bkg: BTreeMap<String, Histogram>,
    /// Total signal per category.
    pub total_sig: BTreeMap<String, Histogram>,
    /// Total data per category.
    pub total_dat: BTreeMap<String, Histogram>,
    /// Categories seen in the input (plus lepton-merged ones after merging).
    pub categories: BTreeSet<String>,
    /// Lepton-stripped channels seen in the input.
    pub channels: BTreeSet<String>,
}

impl HistStore {
    fn group_maps_mut(&mut self) -> [&mut BTreeMap<String, Histogram>; 5] {
        [&mut self.bkg, &mut self.bkg_syst, &mut self.sig, &mut self.sig_syst, &mut self.dat]
    }

    fn total_maps_mut(&mut self) -> [&mut BTreeMap<String, Histogram>; 3] {
        [&mut self.total_bkg, &mut self.total_sig, &mut self.total_dat]
    }
}

fn accumulate(
    totals: &mut BTreeMap<String, Histogram>,
    category: &str,
    hist: &Histogram,
) -> Result<()> {
    match totals.get_mut(category) {
        Some(total) => total.add(hist)?,
        None => {
            totals.insert(category.to_string(), hist.clone());
        }
    }
    Ok(())
}

/// The binning-modification engine for one (variable, year, region) unit.
pub struct Engine {
    unit: Unit,
    params: BinningParams,
    options: EngineOptions,
    systematics: SystematicsRegistry,
    registry: SampleRegistry,
}

impl Engine {
    /// Build an engine after validating the numeric parameters.
    pub fn new(
        unit: Unit,
        params: BinningParams,
        options: EngineOptions,
        systematics: SystematicsRegistry,
        registry: SampleRegistry,
    ) -> Result<Engine> {
        params.validate()?;
        Ok(Engine { unit, params, options, systematics, registry })
    }

    fn ctx(&self) -> ShapeCtx<'_> {
        ShapeCtx {
            registry: &self.registry,
            systematics: &self.systematics,
            params: &self.params,
            options: &self.options,
            year: self.unit.year,
            variable: &self.unit.variable.name,
        }
    }

    fn missing(&self, name: &str, category: &str, systematic: &str) -> Error {
        Error::MissingHistogram {
            name: name.to_string(),
            variable: self.unit.variable.name.clone(),
            year: self.unit.year.label().to_string(),
            category: category.to_string(),
            systematic: systematic.to_string(),
        }
    }

    /// Whether a background histogram enters the TOTAL BKG aggregate,
    /// honoring the ABCDNN control-region replacement when enabled. Excluded
    /// histograms are still rebinned and written; they only stop steering
    /// the binning walk.
    fn in_total_background(&self, combine: &str, abcdnn_region: bool) -> bool {
        if self.options.abcdnn && abcdnn_region {
            combine == "ABCDNN" || self.registry.abcdnn_minor.iter().any(|g| g == combine)
        } else {
            combine != "ABCDNN"
        }
    }

    /// Step A: partition the input and accumulate the per-category totals.
    /// Unclassifiable keys are logged and skipped.
    fn load(&self, input: &TemplateSet) -> Result<HistStore> {
        if input.variable != self.unit.variable.name {
            return Err(Error::Validation(format!(
                "collection is binned in {}, engine configured for {}",
                input.variable, self.unit.variable.name
            )));
        }
        let mut store = HistStore::default();
        let mut skipped = 0usize;
        for (name, hist) in &input.histograms {
            let parse = match parse_key(name, &self.registry) {
                Ok(parse) => parse,
                Err(err) => {
                    tracing::warn!(name, %err, "skipping unclassifiable histogram key");
                    skipped += 1;
                    continue;
                }
            };
            let category = parse.category_name();
            match parse.group {
                Group::Dat => {
                    store.dat.insert(name.clone(), hist.clone());
                    accumulate(&mut store.total_dat, &category, hist)?;
                }
                Group::Bkg => {
                    if parse.is_syst() {
                        store.bkg_syst.insert(name.clone(), hist.clone());
                    } else {
                        store.bkg.insert(name.clone(), hist.clone());
                        if self.in_total_background(&parse.combine, parse.abcdnn) {
                            accumulate(&mut store.total_bkg, &category, hist)?;
                        }
                    }
                }
                Group::Sig => {
                    if parse.is_syst() {
                        store.sig_syst.insert(name.clone(), hist.clone());
                    } else {
                        store.sig.insert(name.clone(), hist.clone());
                        accumulate(&mut store.total_sig, &category, hist)?;
                    }
                }
            }
            store.categories.insert(category);
            store.channels.insert(parse.channel());
        }
        tracing::info!(
            bkg = store.bkg.len(),
            bkg_syst = store.bkg_syst.len(),
            sig = store.sig.len(),
            sig_syst = store.sig_syst.len(),
            dat = store.dat.len(),
            skipped,
            "partitioned input histograms"
        );
        Ok(store)
    }

    fn merge_map(&self, map: &mut BTreeMap<String, Histogram>) -> Result<()> {
        let names: Vec<String> = map.keys().filter(|n| n.contains("isE")).cloned().collect();
        for name in names {
            let partner = name.replace("isE", "isM");
            let category = partner
                .split('_')
                .find(|p| p.starts_with("is"))
                .unwrap_or(&partner)
                .to_string();
            let mut merged = map[&name].clone();
            let other =
                map.get(&partner).ok_or_else(|| self.missing(&partner, &category, ""))?;
            merged.add(other)?;
            map.insert(name.replace("isE", "isL"), merged);
        }
        Ok(())
    }

    /// Step A continued: add lepton-merged variants by summing the electron
    /// and muon histograms. A missing muon partner is fatal.
    fn merge_leptons(&self, store: &mut HistStore) -> Result<()> {
        for map in store.group_maps_mut() {
            self.merge_map(map)?;
        }
        for map in store.total_maps_mut() {
            self.merge_map(map)?;
        }
        let merged: Vec<String> = store
            .categories
            .iter()
            .filter(|c| c.starts_with("isE"))
            .map(|c| c.replace("isE", "isL"))
            .collect();
        store.categories.extend(merged);
        tracing::info!(categories = store.categories.len(), "merged lepton flavors");
        Ok(())
    }

    fn total_pair<'h>(
        &self,
        map: &'h BTreeMap<String, Histogram>,
        label: &str,
        cat_e: &str,
        cat_m: &str,
    ) -> Result<(&'h Histogram, &'h Histogram)> {
        let e = map.get(cat_e).ok_or_else(|| self.missing(label, cat_e, ""))?;
        let m = map.get(cat_m).ok_or_else(|| self.missing(label, cat_m, ""))?;
        Ok((e, m))
    }

    /// Step B: one shared edge array per channel.
    fn channel_edges(&self, store: &HistStore) -> Result<BTreeMap<String, Vec<f64>>> {
        let mut edges = BTreeMap::new();
        for channel in &store.channels {
            let cat_e = format!("isE{channel}");
            let cat_m = format!("isM{channel}");
            let (bkg_e, bkg_m) = self.total_pair(&store.total_bkg, "TOTAL BKG", &cat_e, &cat_m)?;
            let (dat_e, dat_m) = self.total_pair(&store.total_dat, "TOTAL DAT", &cat_e, &cat_m)?;
            let (sig_e, sig_m) = self.total_pair(&store.total_sig, "TOTAL SIG", &cat_e, &cat_m)?;
            let mut signals = Vec::with_capacity(self.registry.signals.len());
            for proc in &self.registry.signals {
                let e = store
                    .sig
                    .get(&nominal_key(proc, &cat_e))
                    .ok_or_else(|| self.missing(proc, &cat_e, ""))?;
                let m = store
                    .sig
                    .get(&nominal_key(proc, &cat_m))
                    .ok_or_else(|| self.missing(proc, &cat_m, ""))?;
                signals.push(LeptonPair { e, m });
            }
            let hists = ChannelHists {
                bkg: LeptonPair { e: bkg_e, m: bkg_m },
                dat: LeptonPair { e: dat_e, m: dat_m },
                sig: LeptonPair { e: sig_e, m: sig_m },
                signals,
            };
            let committed = determine_edges(channel, &hists, &self.unit.variable, &self.params)?;
            tracing::info!(channel, bins = committed.len() - 1, "channel binning determined");
            edges.insert(channel.clone(), committed);
        }
        Ok(edges)
    }

    /// Step C: rebin every histogram onto its channel's edges, then fold the
    /// under/overflow into the outermost real bins.
    fn rebin_all(
        &self,
        store: &mut HistStore,
        edges: &BTreeMap<String, Vec<f64>>,
    ) -> Result<()> {
        let channel_of = |category: &str| -> Result<String> {
            Ok(rb_hist::Category::parse(category)?.channel())
        };
        for map in store.group_maps_mut() {
            for (name, hist) in map.iter_mut() {
                let category = name
                    .split('_')
                    .find(|p| p.starts_with("is"))
                    .ok_or_else(|| Error::Key(format!("no category in key {name}")))?;
                let channel = channel_of(category)?;
                let target = edges.get(&channel).ok_or_else(|| Error::Binning {
                    channel: channel.clone(),
                    reason: "no edges determined for channel".into(),
                })?;
                let mut rebinned = hist.rebin(target)?;
                rebinned.fold_flows();
                *hist = rebinned;
            }
        }
        for map in store.total_maps_mut() {
            for (category, hist) in map.iter_mut() {
                let channel = channel_of(category)?;
                let target = edges.get(&channel).ok_or_else(|| Error::Binning {
                    channel: channel.clone(),
                    reason: "no edges determined for channel".into(),
                })?;
                let mut rebinned = hist.rebin(target)?;
                rebinned.fold_flows();
                *hist = rebinned;
            }
        }
        tracing::info!(channels = edges.len(), "rebinned all histograms");
        Ok(())
    }

    fn log_yield_summary(&self, store: &HistStore) {
        for (kind, map) in [
            ("BKG", &store.bkg),
            ("SIG", &store.sig),
            ("DAT", &store.dat),
        ] {
            for (name, hist) in map {
                tracing::debug!(
                    kind,
                    name,
                    integral = hist.integral(),
                    error = hist.integral_error(),
                    "yield"
                );
            }
        }
    }

    /// Step D: the systematic-shape layers, in dependency order.
    fn build_shapes(&self, store: &mut HistStore) -> Result<()> {
        let ctx = self.ctx();
        if self.options.symm_top_pt {
            shapes::symmetrize_top_pt(&store.bkg, &mut store.bkg_syst, &ctx)?;
            shapes::symmetrize_top_pt(&store.sig, &mut store.sig_syst, &ctx)?;
        }
        if self.options.symm_theory {
            shapes::symmetrize_theory(&store.bkg, &mut store.bkg_syst, &ctx)?;
            shapes::symmetrize_theory(&store.sig, &mut store.sig_syst, &ctx)?;
        }
        if self.options.symm_hotclosure {
            shapes::symmetrize_hot_closure(&store.bkg, &mut store.bkg_syst, &ctx)?;
            shapes::symmetrize_hot_closure(&store.sig, &mut store.sig_syst, &ctx)?;
        }
        if self.options.shape_stat {
            // bin-by-bin shapes exist per lepton flavor only
            let categories: BTreeSet<String> = store
                .categories
                .iter()
                .filter(|c| !c.starts_with("isL"))
                .cloned()
                .collect();
            shapes::add_statistical_shapes(
                &mut store.bkg,
                &mut store.sig,
                &store.total_bkg,
                &categories,
                &ctx,
            )?;
        }
        if self.options.murf_shapes {
            shapes::add_murf_envelope(&store.bkg, &mut store.bkg_syst, false, &ctx)?;
            shapes::add_murf_envelope(&store.sig, &mut store.sig_syst, true, &ctx)?;
        }
        if self.options.ps_weights {
            shapes::add_ps_weight_envelope(&store.bkg, &mut store.bkg_syst, false, &ctx)?;
            shapes::add_ps_weight_envelope(&store.sig, &mut store.sig_syst, true, &ctx)?;
        }
        if self.options.pdf {
            shapes::add_pdf_envelope(&store.bkg, &mut store.bkg_syst, false, &ctx)?;
            shapes::add_pdf_envelope(&store.sig, &mut store.sig_syst, true, &ctx)?;
        }
        if self.options.norm_abcdnn && self.options.abcdnn {
            shapes::normalize_abcdnn(&store.bkg, &mut store.bkg_syst, &ctx)?;
        }
        if self.options.smooth {
            shapes::smooth_shapes(&store.bkg, &mut store.bkg_syst, &ctx)?;
            shapes::smooth_shapes(&store.sig, &mut store.sig_syst, &ctx)?;
        }
        if self.options.trigger_efficiency {
            shapes::split_trigger_efficiency(&mut store.bkg_syst, &ctx)?;
            shapes::split_trigger_efficiency(&mut store.sig_syst, &ctx)?;
        }
        if self.options.uncorrelate_years {
            shapes::decorrelate_years(&mut store.bkg_syst, &ctx)?;
            shapes::decorrelate_years(&mut store.sig_syst, &ctx)?;
        }
        Ok(())
    }

    /// Collect the output set: every histogram, data included, gets the
    /// negative-bin correction; PDF replicas and totals are dropped.
    fn finalize(&self, store: HistStore) -> Result<TemplateSet> {
        let mut out = TemplateSet::new(self.unit.variable.name.clone(), self.unit.year);
        for map in [store.bkg, store.bkg_syst, store.sig, store.sig_syst, store.dat] {
            for (name, mut hist) in map {
                let parse = parse_key(&name, &self.registry)?;
                if matches!(parse.syst, Some(SystTag::PdfReplica(_))) {
                    continue;
                }
                hist.negative_bin_correction(self.params.zero);
                out.insert(name, hist);
            }
        }
        tracing::info!(histograms = out.histograms.len(), "finalized output collection");
        Ok(out)
    }

    /// Run the full pipeline over a loaded collection.
    pub fn run(&self, input: &TemplateSet) -> Result<TemplateSet> {
        tracing::info!(
            variable = %self.unit.variable.name,
            year = %self.unit.year,
            region = ?self.unit.region,
            "rebinning unit of work"
        );
        let mut store = self.load(input)?;
        self.merge_leptons(&mut store)?;
        let edges = self.channel_edges(&store)?;
        self.rebin_all(&mut store, &edges)?;
        self.log_yield_summary(&store);
        self.build_shapes(&mut store)?;
        self.finalize(store)
    }

    /// Output path for an input file: the stem gains a suffix recording the
    /// merge and threshold parameters, e.g. `..._rebinned_merge2_stat0p3.json`.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("template");
        let threshold = format!("{}", self.params.stat_threshold).replace('.', "p");
        input.with_file_name(format!(
            "{stem}_rebinned_merge{}_stat{threshold}.json",
            self.params.min_merge
        ))
    }

    /// Load a collection from disk, run the pipeline, and commit the result
    /// beside the input. Returns the output path.
    pub fn process_file(&self, input: &Path) -> Result<PathBuf> {
        let set = TemplateSet::load(input)?;
        let out = self.run(&set)?;
        let path = self.output_path(input);
        out.save(&path)?;
        Ok(path)
    }
}
