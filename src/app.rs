use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::annotations::{self, Annotations, TermEnrichmentOptions};
use crate::config::ResolvedConfig;
use crate::domain::{EvidenceCode, TaxId};
use crate::enrichment::{self, EnrichmentEntry, ResultFilter};
use crate::error::KiraError;
use crate::genesets::{CollectionSpec, GeneSet, GeneSetCollection, GeneSetRegistry};
use crate::matcher::{AliasSource, ComposeItem, GeneMatcher};
use crate::ontology::Ontology;
use crate::organism;
use crate::progress::{NoProgress, ProgressSink};
use crate::result_cache::ResultCache;
use crate::serverfiles::{HttpRemoteFiles, RemoteFiles, ServerFiles};
use crate::stats::ProbabilityModel;
use crate::store::{FileInfo, Store};
use crate::taxonomy::{self, Taxonomy};

/// Bumped whenever the shape of memoized taxonomy searches changes.
const SEARCH_CACHE_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize)]
pub struct TaxonSummary {
    pub taxid: TaxId,
    pub scientific_name: String,
    pub rank: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaxonInfo {
    pub taxid: TaxId,
    pub scientific_name: String,
    pub rank: String,
    pub parent: TaxId,
    pub other_names: Vec<(String, String)>,
    pub lineage: Vec<TaxonSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TermHit {
    pub term_id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub genes: Vec<String>,
    pub count: usize,
    pub ref_count: usize,
    pub p_value: f64,
    pub enrichment: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TermEnrichmentResult {
    pub organism: String,
    pub ontology_version: Option<String>,
    pub terms: Vec<TermHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedTerm {
    pub term_id: String,
    pub name: String,
    pub genes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedTermsResult {
    pub organism: String,
    pub direct_only: bool,
    pub terms: Vec<AnnotatedTerm>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathwayHit {
    /// Unique within one result; equals `id` unless several sets share it.
    pub key: String,
    pub id: String,
    pub name: Option<String>,
    pub hierarchy: Vec<String>,
    pub link: Option<String>,
    pub genes: Vec<String>,
    pub count: usize,
    pub ref_count: usize,
    pub p_value: f64,
    pub enrichment: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathwayEnrichmentResult {
    pub organism: Option<String>,
    pub sets_tested: usize,
    pub unmatched_genes: Vec<String>,
    pub pathways: Vec<PathwayHit>,
}

/// Gene-set query of [`KnowledgeBase::enrich_pathways`].
#[derive(Debug, Clone, Default)]
pub struct PathwayQuery {
    pub organism: Option<String>,
    /// Stored hierarchies to include; empty means every stored collection
    /// when no GMT file is given.
    pub hierarchies: Vec<Vec<String>>,
    pub gmt_files: Vec<Utf8PathBuf>,
    /// Adds one set per GO term of the organism's annotations.
    pub go_terms: bool,
    /// Defaults to every gene of the loaded collections.
    pub reference: Option<Vec<String>>,
    pub model: Option<ProbabilityModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListResult {
    pub domain: String,
    pub local: Vec<String>,
    /// `None` when the server could not be reached.
    pub remote: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnsureResult {
    pub domain: String,
    pub filename: String,
    pub path: Utf8PathBuf,
    pub info: Option<FileInfo>,
}

/// Entry point tying the server-files cache to the knowledge stores.
pub struct KnowledgeBase<R: RemoteFiles> {
    files: ServerFiles<R>,
    config: ResolvedConfig,
    genesets: GeneSetRegistry,
}

impl KnowledgeBase<HttpRemoteFiles> {
    pub fn from_config(config: ResolvedConfig) -> Result<Self, KiraError> {
        let remote = HttpRemoteFiles::new(&config)?;
        Ok(Self::new(config, remote))
    }
}

impl<R: RemoteFiles> KnowledgeBase<R> {
    pub fn new(config: ResolvedConfig, remote: R) -> Self {
        let store = Store::new_with_root(config.cache_root.clone());
        let genesets = GeneSetRegistry::new(&store);
        Self {
            files: ServerFiles::new(store, remote),
            config,
            genesets,
        }
    }

    pub fn files(&self) -> &ServerFiles<R> {
        &self.files
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn genesets(&self) -> &GeneSetRegistry {
        &self.genesets
    }

    pub fn ontology(&self) -> Result<Arc<Ontology>, KiraError> {
        Ontology::get_default(&self.files)
    }

    pub fn taxonomy(&self) -> Result<Arc<Taxonomy>, KiraError> {
        Taxonomy::get_default(&self.files)
    }

    /// Taxonomy search memoized against the installed taxonomy version.
    pub fn search_taxonomy(
        &self,
        needle: &str,
        species_only: bool,
        exact: bool,
    ) -> Result<Vec<TaxId>, KiraError> {
        let taxonomy = self.taxonomy()?;
        let cache = ResultCache::in_store(
            self.files.store(),
            "taxonomy_search",
            &[(taxonomy::DOMAIN, taxonomy::FILENAME)],
        )
        .with_capacity(self.config.result_cache_capacity)
        .with_version(SEARCH_CACHE_VERSION);
        let needle = needle.trim().to_lowercase();
        cache.get_or_compute(&self.files, &(&needle, species_only, exact), || {
            Ok(taxonomy.search(&needle, species_only, exact))
        })
    }

    pub fn taxon_summary(&self, taxid: &TaxId) -> Result<TaxonSummary, KiraError> {
        let record = self.taxonomy()?.get(taxid)?;
        Ok(TaxonSummary {
            scientific_name: record.scientific_name().to_string(),
            taxid: record.taxid,
            rank: record.rank,
        })
    }

    pub fn lineage(&self, organism: &str) -> Result<Vec<TaxonSummary>, KiraError> {
        let taxid = self.resolve_taxid(organism)?;
        self.taxonomy()?
            .lineage(&taxid)?
            .iter()
            .map(|id| self.taxon_summary(id))
            .collect()
    }

    pub fn taxon_info(&self, organism: &str) -> Result<TaxonInfo, KiraError> {
        let taxid = self.resolve_taxid(organism)?;
        let taxonomy = self.taxonomy()?;
        let record = taxonomy.get(&taxid)?;
        Ok(TaxonInfo {
            scientific_name: record.scientific_name().to_string(),
            other_names: taxonomy.other_names(&taxid)?,
            lineage: self.lineage(taxid.as_str())?,
            taxid: record.taxid,
            rank: record.rank,
            parent: record.parent,
        })
    }

    /// Taxid of an organism given as a taxid, a known organism code or an
    /// exact scientific name.
    pub fn resolve_taxid(&self, organism: &str) -> Result<TaxId, KiraError> {
        let organism = organism.trim();
        if let Ok(taxid) = organism.parse::<TaxId>() {
            return Ok(taxid);
        }
        let known = organism::taxids_for_code(organism);
        match known.len() {
            1 => {
                if let Some(taxid) = known.into_iter().next() {
                    return taxid.parse();
                }
            }
            0 => {}
            _ => {
                return Err(KiraError::MultipleSpecies(
                    known.into_iter().map(str::to_string).collect(),
                ));
            }
        }
        let mut hits = self.search_taxonomy(organism, false, true)?;
        match hits.len() {
            1 => hits
                .pop()
                .ok_or_else(|| KiraError::UnknownSpecies(organism.to_string())),
            0 => Err(KiraError::UnknownSpecies(organism.to_string())),
            _ => Err(KiraError::MultipleSpecies(
                hits.into_iter().map(|id| id.to_string()).collect(),
            )),
        }
    }

    /// GO annotation code of an organism. Names unknown to the static
    /// organism table are resolved through the taxonomy first.
    pub fn go_code(&self, organism: &str) -> Result<String, KiraError> {
        match annotations::organism_code(organism) {
            Err(KiraError::UnknownSpecies(_)) => {
                let taxid = self.resolve_taxid(organism)?;
                debug!(organism, taxid = %taxid, "resolved organism through taxonomy");
                annotations::organism_code(taxid.as_str())
            }
            other => other,
        }
    }

    pub fn annotations(
        &self,
        organism: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Annotations, KiraError> {
        let code = self.go_code(organism)?;
        let ontology_progress = |percent: f64| progress.progress(percent * 0.3);
        ontology_progress(0.0);
        let ontology = self.ontology()?;
        ontology_progress(100.0);
        let annotation_progress = |percent: f64| progress.progress(30.0 + percent * 0.7);
        Annotations::load(&self.files, &code, ontology, &annotation_progress)
    }

    /// Composite matcher over every alias source available for `taxid`,
    /// led by a case-insensitive direct match. Sources the server does not
    /// provide are skipped.
    pub fn gene_matcher(&self, taxid: &str) -> Result<GeneMatcher, KiraError> {
        let mut items = Vec::new();
        for source in AliasSource::for_taxid(taxid) {
            match source.load_matcher(&self.files, true) {
                Ok(aliases) => {
                    items.push(ComposeItem::Single(GeneMatcher::aliases(Arc::new(aliases))))
                }
                Err(err @ (KiraError::NotAuthorized { .. } | KiraError::Filesystem(_))) => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(taxid, source = %source.filename(), error = %err, "alias source unavailable");
                }
            }
        }
        debug!(taxid, sources = items.len(), "built gene matcher");
        Ok(GeneMatcher::compose(items, true))
    }

    fn attach_matcher(&self, annotations: &mut Annotations) {
        let Some(taxid) = annotations.taxid().map(str::to_string) else {
            return;
        };
        match self.gene_matcher(&taxid) {
            Ok(matcher) => annotations.set_matcher(matcher),
            Err(err) => {
                warn!(taxid, error = %err, "using annotation aliases for gene names");
            }
        }
    }

    pub fn enrich_terms(
        &self,
        organism: &str,
        genes: &[String],
        options: &TermEnrichmentOptions,
        filter: &ResultFilter,
        progress: &dyn ProgressSink,
    ) -> Result<TermEnrichmentResult, KiraError> {
        let load_progress = |percent: f64| progress.progress(percent * 0.5);
        let mut annotations = self.annotations(organism, &load_progress)?;
        self.attach_matcher(&mut annotations);

        let enrich_progress = |percent: f64| progress.progress(50.0 + percent * 0.5);
        let results = filter.apply(annotations.enriched_terms(genes, options, &enrich_progress)?);
        let ontology = annotations.ontology();
        let mut terms = results
            .into_iter()
            .map(|(term_id, entry)| {
                let term = ontology.get(&term_id);
                TermHit {
                    name: term.map(|term| term.name().to_string()).unwrap_or_default(),
                    namespace: term.and_then(|term| term.namespace()).map(str::to_string),
                    count: entry.count(),
                    genes: entry.genes,
                    ref_count: entry.ref_count,
                    p_value: entry.p_value,
                    enrichment: entry.enrichment,
                    term_id,
                }
            })
            .collect::<Vec<_>>();
        terms.sort_by(|left, right| {
            left.p_value
                .total_cmp(&right.p_value)
                .then_with(|| left.term_id.cmp(&right.term_id))
        });
        info!(organism, terms = terms.len(), "GO term enrichment finished");
        Ok(TermEnrichmentResult {
            organism: self.go_code(organism)?,
            ontology_version: ontology.data_version().map(str::to_string),
            terms,
        })
    }

    pub fn annotated_terms(
        &self,
        organism: &str,
        genes: &[String],
        direct_only: bool,
        options: &TermEnrichmentOptions,
        progress: &dyn ProgressSink,
    ) -> Result<AnnotatedTermsResult, KiraError> {
        let mut annotations = self.annotations(organism, progress)?;
        self.attach_matcher(&mut annotations);
        let terms = annotations
            .annotated_terms(genes, direct_only, options.evidence_codes.as_ref())?
            .into_iter()
            .map(|(term_id, genes)| AnnotatedTerm {
                name: annotations
                    .ontology()
                    .get(&term_id)
                    .map(|term| term.name().to_string())
                    .unwrap_or_default(),
                genes: genes.into_iter().collect(),
                term_id,
            })
            .collect();
        Ok(AnnotatedTermsResult {
            organism: self.go_code(organism)?,
            direct_only,
            terms,
        })
    }

    /// GO terms of `organism` as gene sets, see
    /// [`GeneSetCollection::from_annotations`].
    pub fn go_gene_sets(
        &self,
        organism: &str,
        evidence_codes: Option<&BTreeSet<EvidenceCode>>,
        progress: &dyn ProgressSink,
    ) -> Result<GeneSetCollection, KiraError> {
        let annotations = self.annotations(organism, progress)?;
        let collection = GeneSetCollection::from_annotations(&annotations, evidence_codes);
        info!(organism, sets = collection.len(), "built GO gene sets");
        Ok(collection)
    }

    /// Scores gene sets against `genes`. With an organism, input names are
    /// first mapped onto the collection's gene names.
    pub fn enrich_pathways(
        &self,
        genes: &[String],
        query: &PathwayQuery,
        filter: &ResultFilter,
        progress: &dyn ProgressSink,
    ) -> Result<PathwayEnrichmentResult, KiraError> {
        let taxid = query
            .organism
            .as_deref()
            .map(|organism| self.resolve_taxid(organism))
            .transpose()?;

        let mut specs = query
            .gmt_files
            .iter()
            .cloned()
            .map(CollectionSpec::Gmt)
            .collect::<Vec<_>>();
        let organism = taxid.as_ref().map(|taxid| taxid.to_string());
        if query.go_terms {
            let Some(taxid) = &taxid else {
                return Err(KiraError::NoGeneSets {
                    hierarchy: vec!["GO".to_string()],
                    organism: None,
                });
            };
            specs.push(CollectionSpec::Collection(
                self.go_gene_sets(taxid.as_str(), None, &NoProgress)?,
            ));
        }
        if query.hierarchies.is_empty() && query.gmt_files.is_empty() && !query.go_terms {
            specs.push(CollectionSpec::Stored {
                hierarchy: Vec::new(),
                organism: organism.clone(),
            });
        }
        for hierarchy in &query.hierarchies {
            specs.push(CollectionSpec::Stored {
                hierarchy: hierarchy.clone(),
                organism: organism.clone(),
            });
        }
        let collection = self.genesets.collections(&self.files, specs)?;
        let universe = collection.genes();

        let mut matcher = match &taxid {
            Some(taxid) => self.gene_matcher(taxid.as_str())?,
            None => GeneMatcher::direct(false),
        };
        matcher.set_targets(&universe);

        let mut unmatched = Vec::new();
        let mut cluster = BTreeSet::new();
        for gene in genes {
            match matcher.umatch(gene)? {
                Some(canonical) => {
                    cluster.insert(canonical);
                }
                None => unmatched.push(gene.clone()),
            }
        }
        if !unmatched.is_empty() {
            warn!(unmatched = unmatched.len(), "genes without a gene set match");
        }
        let reference = match &query.reference {
            Some(reference) => {
                let mut mapped = BTreeSet::new();
                for gene in reference {
                    mapped.extend(matcher.umatch(gene)?);
                }
                mapped
            }
            None => universe,
        };

        let model = query.model.unwrap_or(ProbabilityModel::Hypergeometric);
        let results = filter.apply(enrichment::pathway_enrichment(
            &collection,
            &cluster,
            &reference,
            model,
            progress,
        )?);
        let keyed = collection.keyed()?;
        let mut pathways = results
            .into_iter()
            .map(|(key, entry)| pathway_hit(&keyed, key, entry))
            .collect::<Vec<_>>();
        pathways.sort_by(|left, right| {
            left.p_value
                .total_cmp(&right.p_value)
                .then_with(|| left.key.cmp(&right.key))
        });
        Ok(PathwayEnrichmentResult {
            organism,
            sets_tested: collection.len(),
            unmatched_genes: unmatched,
            pathways,
        })
    }

    pub fn list_files(&self, domain: &str) -> Result<FileListResult, KiraError> {
        let local = self.files.list(domain)?;
        let remote = match self.files.list_remote(domain) {
            Ok(remote) => Some(remote),
            Err(err) => {
                warn!(domain, error = %err, "server listing unavailable");
                None
            }
        };
        Ok(FileListResult {
            domain: domain.to_string(),
            local,
            remote,
        })
    }

    pub fn ensure_file(
        &self,
        domain: &str,
        filename: &str,
        progress: &dyn ProgressSink,
    ) -> Result<EnsureResult, KiraError> {
        let path = self.files.ensure(domain, filename, progress)?;
        Ok(EnsureResult {
            domain: domain.to_string(),
            filename: filename.to_string(),
            info: self.files.local_info(domain, filename)?,
            path,
        })
    }

    pub fn file_info(&self, domain: &str, filename: &str) -> Result<FileInfo, KiraError> {
        self.files.info(domain, filename)
    }
}

fn pathway_hit(
    keyed: &BTreeMap<String, &GeneSet>,
    key: String,
    entry: EnrichmentEntry,
) -> PathwayHit {
    let set = keyed.get(&key);
    PathwayHit {
        id: set.map(|set| set.id.clone()).unwrap_or_else(|| key.clone()),
        name: set.and_then(|set| set.name.clone()),
        hierarchy: set.map(|set| set.hierarchy.clone()).unwrap_or_default(),
        link: set.and_then(|set| set.link.clone()),
        count: entry.count(),
        genes: entry.genes,
        ref_count: entry.ref_count,
        p_value: entry.p_value,
        enrichment: entry.enrichment,
        key,
    }
}
