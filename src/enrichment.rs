//! Over-representation scoring shared by GO terms and gene-set collections.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KiraError;
use crate::genesets::GeneSetCollection;
use crate::progress::{Milestones, ProgressSink};
use crate::stats::{self, ProbabilityModel};

/// Result row for one term or gene set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentEntry {
    /// Cluster genes annotated to the category, as given by the caller.
    pub genes: Vec<String>,
    pub p_value: f64,
    /// Reference genes annotated to the category.
    pub ref_count: usize,
    /// `(k / n) / (m / N)`.
    pub enrichment: f64,
}

impl EnrichmentEntry {
    pub fn count(&self) -> usize {
        self.genes.len()
    }
}

pub fn fold_enrichment(mapped: usize, cluster: usize, ref_mapped: usize, reference: usize) -> f64 {
    if mapped == 0 || cluster == 0 {
        return 0.0;
    }
    if ref_mapped == 0 || reference == 0 {
        return f64::INFINITY;
    }
    (mapped as f64 / cluster as f64) / (ref_mapped as f64 / reference as f64)
}

/// Replaces every p-value with its Benjamini-Hochberg adjustment.
pub fn adjust_fdr(results: &mut BTreeMap<String, EnrichmentEntry>) {
    let raw = results.values().map(|entry| entry.p_value).collect::<Vec<_>>();
    for (entry, adjusted) in results.values_mut().zip(stats::fdr(&raw)) {
        entry.p_value = adjusted;
    }
}

pub fn filter_by_p(
    results: &BTreeMap<String, EnrichmentEntry>,
    max_p: f64,
) -> BTreeMap<String, EnrichmentEntry> {
    retain(results, |entry| entry.p_value <= max_p)
}

pub fn filter_by_frequency(
    results: &BTreeMap<String, EnrichmentEntry>,
    min_count: usize,
) -> BTreeMap<String, EnrichmentEntry> {
    retain(results, |entry| entry.count() >= min_count)
}

pub fn filter_by_ref_frequency(
    results: &BTreeMap<String, EnrichmentEntry>,
    min_ref: usize,
) -> BTreeMap<String, EnrichmentEntry> {
    retain(results, |entry| entry.ref_count >= min_ref)
}

/// Thresholds applied after scoring. Unset bounds keep every entry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResultFilter {
    pub max_p: Option<f64>,
    pub min_count: Option<usize>,
    pub min_ref: Option<usize>,
}

impl ResultFilter {
    pub fn apply(
        &self,
        results: BTreeMap<String, EnrichmentEntry>,
    ) -> BTreeMap<String, EnrichmentEntry> {
        let mut results = results;
        if let Some(max_p) = self.max_p {
            results = filter_by_p(&results, max_p);
        }
        if let Some(min_count) = self.min_count {
            results = filter_by_frequency(&results, min_count);
        }
        if let Some(min_ref) = self.min_ref {
            results = filter_by_ref_frequency(&results, min_ref);
        }
        results
    }
}

fn retain<F>(results: &BTreeMap<String, EnrichmentEntry>, keep: F) -> BTreeMap<String, EnrichmentEntry>
where
    F: Fn(&EnrichmentEntry) -> bool,
{
    results
        .iter()
        .filter(|(_, entry)| keep(entry))
        .map(|(id, entry)| (id.clone(), entry.clone()))
        .collect()
}

/// Scores every gene set of `collection` that overlaps `genes`. P-values
/// are FDR adjusted across the scored sets. Results are keyed as by
/// [`GeneSetCollection::keyed`], so sets sharing an id stay apart.
pub fn pathway_enrichment(
    collection: &GeneSetCollection,
    genes: &BTreeSet<String>,
    reference: &BTreeSet<String>,
    model: ProbabilityModel,
    progress: &dyn ProgressSink,
) -> Result<BTreeMap<String, EnrichmentEntry>, KiraError> {
    let mut results = BTreeMap::new();
    if genes.is_empty() {
        progress.progress(100.0);
        return Ok(results);
    }

    let keyed = collection.keyed()?;
    let mut milestones = Milestones::new(progress, keyed.len());
    for (key, set) in keyed {
        milestones.advance();
        let mapped = set.genes.intersection(genes).cloned().collect::<Vec<_>>();
        if mapped.is_empty() {
            continue;
        }
        let ref_mapped = set.genes.intersection(reference).count();
        let p_value = model.p_value(
            mapped.len() as u64,
            reference.len() as u64,
            ref_mapped as u64,
            genes.len() as u64,
        )?;
        let enrichment = fold_enrichment(mapped.len(), genes.len(), ref_mapped, reference.len());
        results.insert(
            key,
            EnrichmentEntry {
                genes: mapped,
                p_value,
                ref_count: ref_mapped,
                enrichment,
            },
        );
    }
    milestones.finish();

    adjust_fdr(&mut results);
    debug!(sets = collection.len(), scored = results.len(), "pathway enrichment");
    Ok(results)
}
