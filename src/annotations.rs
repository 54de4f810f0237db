//! Gene association (GAF) store with gene and term indices and transitive
//! rollup of annotations through the ontology.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{Aspect, EvidenceCode};
use crate::enrichment::{self, EnrichmentEntry};
use crate::error::KiraError;
use crate::fs_util;
use crate::matcher::GeneMatcher;
use crate::ontology::{self, Ontology};
use crate::organism;
use crate::progress::{Milestones, ProgressSink};
use crate::serverfiles::{RemoteFiles, ServerFiles};
use crate::stats::ProbabilityModel;

pub const DOMAIN: &str = "GO";
pub const MEMBER: &str = "gene_association";

pub fn filename(code: &str) -> String {
    format!("gene_association.{code}.tar.gz")
}

/// One GAF 2.0 row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub db: String,
    pub object_id: String,
    pub symbol: String,
    pub qualifier: String,
    pub term_id: String,
    pub reference: String,
    pub evidence: EvidenceCode,
    pub with_from: String,
    pub aspect: Aspect,
    pub object_name: String,
    pub synonyms: Vec<String>,
    pub object_type: String,
    pub taxon: String,
    pub date: String,
    pub assigned_by: String,
    pub annotation_extension: Option<String>,
    pub gene_product_form_id: Option<String>,
}

impl AnnotationRecord {
    pub fn parse(line: &str) -> Result<Self, KiraError> {
        let columns = line.split('\t').collect::<Vec<_>>();
        if columns.len() < 15 {
            return Err(KiraError::InvalidAnnotation(format!(
                "{} columns, expected at least 15",
                columns.len()
            )));
        }
        let optional = |index: usize| {
            columns
                .get(index)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Ok(Self {
            db: columns[0].to_string(),
            object_id: columns[1].to_string(),
            symbol: columns[2].trim().to_string(),
            qualifier: columns[3].to_string(),
            term_id: columns[4].trim().to_string(),
            reference: columns[5].to_string(),
            evidence: columns[6].parse()?,
            with_from: columns[7].to_string(),
            aspect: columns[8].parse()?,
            object_name: columns[9].to_string(),
            synonyms: columns[10]
                .split('|')
                .filter(|alias| !alias.is_empty())
                .map(str::to_string)
                .collect(),
            object_type: columns[11].to_string(),
            taxon: columns[12].to_string(),
            date: columns[13].to_string(),
            assigned_by: columns[14].trim_end().to_string(),
            annotation_extension: optional(15),
            gene_product_form_id: optional(16),
        })
    }

    pub fn is_negated(&self) -> bool {
        self.qualifier.split('|').any(|qualifier| qualifier == "NOT")
    }

    /// Synonyms, symbol and object id.
    pub fn aliases(&self) -> BTreeSet<&str> {
        self.synonyms
            .iter()
            .map(String::as_str)
            .chain([self.symbol.as_str(), self.object_id.as_str()])
            .collect()
    }

    fn passes(&self, evidence: Option<&BTreeSet<EvidenceCode>>, aspects: Option<&BTreeSet<Aspect>>) -> bool {
        evidence.is_none_or(|codes| codes.contains(&self.evidence))
            && aspects.is_none_or(|aspects| aspects.contains(&self.aspect))
    }
}

/// GO code of an organism given as a taxid, GO/KEGG code or common name.
pub fn organism_code(organism: &str) -> Result<String, KiraError> {
    let trimmed = organism.trim();
    let taxids = if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        BTreeSet::from([trimmed])
    } else {
        organism::taxids_for_code(trimmed)
    };
    let codes = taxids
        .iter()
        .filter_map(|taxid| organism::go_code(taxid))
        .collect::<BTreeSet<_>>();
    match codes.len() {
        0 => Err(KiraError::UnknownSpecies(organism.to_string())),
        1 => Ok(codes.into_iter().next().unwrap_or_default().to_string()),
        _ => Err(KiraError::MultipleSpecies(
            taxids
                .iter()
                .map(|taxid| format!("{taxid}: {}", organism::common_taxid_to_name(taxid).unwrap_or("?")))
                .collect(),
        )),
    }
}

/// Memoized rollup of a term: partial lists while children are still being
/// collected, a reduced set once requested directly.
#[derive(Debug, Clone)]
enum Rollup {
    Parts(Vec<Arc<BTreeSet<usize>>>),
    Reduced(Arc<BTreeSet<usize>>),
}

/// Options of [`Annotations::enriched_terms`].
#[derive(Debug, Clone)]
pub struct TermEnrichmentOptions {
    /// Defaults to every annotated gene.
    pub reference: Option<Vec<String>>,
    /// Defaults to all codes.
    pub evidence_codes: Option<BTreeSet<EvidenceCode>>,
    /// Defaults to all aspects.
    pub aspects: Option<BTreeSet<Aspect>>,
    pub model: ProbabilityModel,
    pub slims_only: bool,
    pub use_fdr: bool,
}

impl Default for TermEnrichmentOptions {
    fn default() -> Self {
        Self {
            reference: None,
            evidence_codes: None,
            aspects: None,
            model: ProbabilityModel::Binomial,
            slims_only: false,
            use_fdr: true,
        }
    }
}

pub struct Annotations {
    ontology: Arc<Ontology>,
    records: Vec<AnnotationRecord>,
    by_gene: BTreeMap<String, Vec<usize>>,
    by_term: BTreeMap<String, Arc<BTreeSet<usize>>>,
    header: Vec<String>,
    taxid: Option<String>,
    matcher: Option<GeneMatcher>,
    alias_to_symbol: OnceLock<BTreeMap<String, String>>,
    rollups: Mutex<HashMap<String, Rollup>>,
}

impl Annotations {
    pub fn new(ontology: Arc<Ontology>) -> Self {
        Self {
            ontology,
            records: Vec::new(),
            by_gene: BTreeMap::new(),
            by_term: BTreeMap::new(),
            header: Vec::new(),
            taxid: None,
            matcher: None,
            alias_to_symbol: OnceLock::new(),
            rollups: Mutex::new(HashMap::new()),
        }
    }

    pub fn parse(text: &str, ontology: Arc<Ontology>, progress: &dyn ProgressSink) -> Self {
        let mut annotations = Self::new(ontology);
        let lines = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>();
        let mut milestones = Milestones::new(progress, lines.len());
        let mut malformed = 0usize;
        for (index, line) in lines.iter().enumerate() {
            milestones.advance();
            if line.starts_with('!') {
                annotations.header.push(line.to_string());
                continue;
            }
            match AnnotationRecord::parse(line) {
                Ok(record) => annotations.insert(record),
                Err(err) => {
                    if malformed == 0 {
                        warn!(line = index + 1, error = %err, "skipping malformed annotation line");
                    }
                    malformed += 1;
                }
            }
        }
        milestones.finish();
        if malformed > 1 {
            warn!(malformed, "skipped malformed annotation lines");
        }
        debug!(
            records = annotations.records.len(),
            genes = annotations.by_gene.len(),
            terms = annotations.by_term.len(),
            "parsed annotations"
        );
        annotations
    }

    /// Reads a `gene_association` tarball, a `.gz` file or a plain file.
    pub fn from_path(
        path: &Utf8Path,
        ontology: Arc<Ontology>,
        progress: &dyn ProgressSink,
    ) -> Result<Self, KiraError> {
        let bytes = if path.as_str().ends_with(".tar.gz") {
            fs_util::read_tar_gz_member(path.as_std_path(), MEMBER)?
        } else if path.as_std_path().is_dir() {
            fs_util::read_any(path.join(MEMBER).as_std_path())?
        } else {
            fs_util::read_any(path.as_std_path())?
        };
        Ok(Self::parse(&String::from_utf8_lossy(&bytes), ontology, progress))
    }

    /// Loads the organism's association file through the server-files cache.
    pub fn load<R: RemoteFiles>(
        files: &ServerFiles<R>,
        organism: &str,
        ontology: Arc<Ontology>,
        progress: &dyn ProgressSink,
    ) -> Result<Self, KiraError> {
        let code = organism_code(organism)?;
        let download_progress = |percent: f64| progress.progress(percent * 0.5);
        let path = files.ensure(DOMAIN, &filename(&code), &download_progress)?;
        let parse_progress = |percent: f64| progress.progress(50.0 + percent * 0.5);
        let mut annotations = Self::from_path(&path, ontology, &parse_progress)?;
        annotations.taxid = organism::taxids_for_code(&code)
            .into_iter()
            .next()
            .map(str::to_string);
        info!(organism = %code, records = annotations.len(), "loaded gene annotations");
        Ok(annotations)
    }

    fn insert(&mut self, record: AnnotationRecord) {
        if record.symbol.is_empty() || record.term_id.is_empty() || record.is_negated() {
            return;
        }
        let index = self.records.len();
        self.by_gene
            .entry(record.symbol.clone())
            .or_default()
            .push(index);
        Arc::make_mut(self.by_term.entry(record.term_id.clone()).or_default()).insert(index);
        self.records.push(record);
        self.alias_to_symbol = OnceLock::new();
        self.rollups
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn refresh_matcher(&mut self) {
        let genes = self.by_gene.keys().cloned().collect::<Vec<_>>();
        if let Some(matcher) = self.matcher.as_mut() {
            matcher.set_targets(&genes);
        }
    }

    /// Adds one record; negated or incomplete records are ignored.
    pub fn add(&mut self, record: AnnotationRecord) {
        self.insert(record);
        self.refresh_matcher();
    }

    pub fn extend<I: IntoIterator<Item = AnnotationRecord>>(&mut self, records: I) {
        for record in records {
            self.insert(record);
        }
        self.refresh_matcher();
    }

    pub fn ontology(&self) -> &Arc<Ontology> {
        &self.ontology
    }

    pub fn set_ontology(&mut self, ontology: Arc<Ontology>) {
        self.ontology = ontology;
        self.rollups
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Installs a matcher targeting this store's gene names.
    pub fn set_matcher(&mut self, matcher: GeneMatcher) {
        self.matcher = Some(matcher);
        self.refresh_matcher();
    }

    pub fn matcher(&self) -> Option<&GeneMatcher> {
        self.matcher.as_ref()
    }

    pub fn taxid(&self) -> Option<&str> {
        self.taxid.as_deref()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn gene_names(&self) -> BTreeSet<&str> {
        self.by_gene.keys().map(String::as_str).collect()
    }

    pub fn gene_annotations(&self, symbol: &str) -> Vec<&AnnotationRecord> {
        self.by_gene
            .get(symbol)
            .into_iter()
            .flatten()
            .map(|index| &self.records[*index])
            .collect()
    }

    pub fn term_annotations(&self, term_id: &str) -> Vec<&AnnotationRecord> {
        self.by_term
            .get(term_id)
            .into_iter()
            .flat_map(|indices| indices.iter())
            .map(|index| &self.records[*index])
            .collect()
    }

    /// Alias, symbol or object id to gene symbol. Built on first use.
    pub fn alias_to_symbol(&self) -> &BTreeMap<String, String> {
        self.alias_to_symbol.get_or_init(|| {
            let mut map = BTreeMap::new();
            for record in &self.records {
                for alias in record.aliases() {
                    map.insert(alias.to_string(), record.symbol.clone());
                }
            }
            map
        })
    }

    /// Symbol to all of its aliases.
    pub fn gene_names_dict(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut dict: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (alias, symbol) in self.alias_to_symbol() {
            dict.entry(symbol.clone()).or_default().insert(alias.clone());
        }
        dict
    }

    fn canonical(&self, gene: &str) -> Result<Option<String>, KiraError> {
        if let Some(matcher) = &self.matcher {
            return matcher.umatch(gene);
        }
        if self.by_gene.contains_key(gene) {
            return Ok(Some(gene.to_string()));
        }
        Ok(self.alias_to_symbol().get(gene).cloned())
    }

    /// Canonical symbol to the input name it was matched from.
    pub fn gene_names_translator<S: AsRef<str>>(
        &self,
        genes: &[S],
    ) -> Result<BTreeMap<String, String>, KiraError> {
        let mut translated = BTreeMap::new();
        let mut unmatched = 0usize;
        for gene in genes {
            let gene = gene.as_ref();
            match self.canonical(gene)? {
                Some(symbol) => {
                    translated.entry(symbol).or_insert_with(|| gene.to_string());
                }
                None => unmatched += 1,
            }
        }
        if unmatched > 0 {
            warn!(unmatched, total = genes.len(), "genes without annotations");
        }
        Ok(translated)
    }

    /// Direct annotation sets of `term` and everything below it. The flag is
    /// false when the walk was cut short at a term already on the path, in
    /// which case the parts are not memoized.
    fn collect_parts(
        &self,
        term: &str,
        visited: &mut BTreeSet<String>,
        memo: &mut HashMap<String, Rollup>,
    ) -> (Vec<Arc<BTreeSet<usize>>>, bool) {
        match memo.get(term) {
            Some(Rollup::Reduced(set)) => return (vec![Arc::clone(set)], true),
            Some(Rollup::Parts(parts)) => return (parts.clone(), true),
            None => {}
        }
        if !visited.insert(term.to_string()) {
            return (Vec::new(), false);
        }
        let mut parts = Vec::new();
        for id in std::iter::once(term).chain(self.ontology.alt_ids_of(term)) {
            if let Some(direct) = self.by_term.get(id) {
                parts.push(Arc::clone(direct));
            }
        }
        let children = self
            .ontology
            .children(term)
            .filter(|(relation, _)| self.ontology.follows(relation))
            .map(|(_, child)| child.clone())
            .collect::<Vec<_>>();
        let mut complete = true;
        for child in children {
            let (child_parts, child_complete) = self.collect_parts(&child, visited, memo);
            parts.extend(child_parts);
            complete &= child_complete;
        }
        if complete {
            memo.insert(term.to_string(), Rollup::Parts(parts.clone()));
        }
        (parts, complete)
    }

    fn rollup(&self, term: &str) -> Arc<BTreeSet<usize>> {
        let term = self.ontology.primary_id(term).unwrap_or(term).to_string();
        let mut memo = self.rollups.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(Rollup::Reduced(set)) = memo.get(&term) {
            return Arc::clone(set);
        }
        let (parts, _) = self.collect_parts(&term, &mut BTreeSet::new(), &mut memo);
        let reduced = Arc::new(
            parts
                .iter()
                .flat_map(|part| part.iter().copied())
                .collect::<BTreeSet<_>>(),
        );
        memo.insert(term, Rollup::Reduced(Arc::clone(&reduced)));
        reduced
    }

    /// Annotations of `term_id`, its alt-ids and every descendant term.
    pub fn all_annotations_for(&self, term_id: &str) -> Vec<&AnnotationRecord> {
        self.rollup(term_id)
            .iter()
            .map(|index| &self.records[*index])
            .collect()
    }

    /// Genes annotated to `term_id` or below it.
    pub fn genes_for(
        &self,
        term_id: &str,
        evidence_codes: Option<&BTreeSet<EvidenceCode>>,
    ) -> BTreeSet<String> {
        self.rollup(term_id)
            .iter()
            .map(|index| &self.records[*index])
            .filter(|record| record.passes(evidence_codes, None))
            .map(|record| record.symbol.clone())
            .collect()
    }

    fn indices_for<'a, I>(
        &self,
        genes: I,
        evidence: Option<&BTreeSet<EvidenceCode>>,
        aspects: Option<&BTreeSet<Aspect>>,
    ) -> BTreeSet<usize>
    where
        I: IntoIterator<Item = &'a String>,
    {
        genes
            .into_iter()
            .filter_map(|gene| self.by_gene.get(gene))
            .flatten()
            .copied()
            .filter(|index| self.records[*index].passes(evidence, aspects))
            .collect()
    }

    /// Terms present in the ontology; a single summary warning covers the
    /// rest.
    fn known_terms(&self, terms: BTreeSet<String>) -> Vec<String> {
        let (known, missing): (Vec<_>, Vec<_>) = terms
            .into_iter()
            .partition(|term| self.ontology.contains(term));
        if !missing.is_empty() {
            warn!(
                missing = missing.len(),
                terms = %missing.join(","),
                "annotated terms not found in the ontology"
            );
        }
        known
    }

    /// Over-representation of ontology terms among `genes`.
    pub fn enriched_terms<S: AsRef<str>>(
        &self,
        genes: &[S],
        options: &TermEnrichmentOptions,
        progress: &dyn ProgressSink,
    ) -> Result<BTreeMap<String, EnrichmentEntry>, KiraError> {
        let translator = self.gene_names_translator(genes)?;
        let cluster = translator.keys().cloned().collect::<BTreeSet<_>>();
        let reference = match &options.reference {
            Some(reference) => self
                .gene_names_translator(reference)?
                .into_keys()
                .collect::<BTreeSet<_>>(),
            None => self.by_gene.keys().cloned().collect(),
        };
        let mut results = BTreeMap::new();
        if cluster.is_empty() {
            progress.progress(100.0);
            return Ok(results);
        }

        let evidence = options.evidence_codes.as_ref();
        let aspects = options.aspects.as_ref();
        let cluster_annotations = self.indices_for(&cluster, evidence, aspects);
        let reference_annotations = self.indices_for(&reference, evidence, aspects);

        let slims = if options.slims_only {
            let selected = self.ontology.slims();
            if selected.is_empty() {
                warn!(subset = ontology::DEFAULT_SLIM, "no slim subset selected, using the default");
                Some(self.ontology.named_slims_subset(ontology::DEFAULT_SLIM))
            } else {
                Some(selected)
            }
        } else {
            None
        };

        let annotated = cluster_annotations
            .iter()
            .map(|index| self.records[*index].term_id.clone())
            .collect::<BTreeSet<_>>();
        let candidates = self.ontology.super_graph(self.known_terms(annotated));

        let mut milestones = Milestones::new(progress, candidates.len());
        for term in candidates {
            milestones.advance();
            if slims.as_ref().is_some_and(|slims| !slims.contains(&term)) {
                continue;
            }
            let rollup = self.rollup(&term);
            let annotated_genes = rollup
                .intersection(&reference_annotations)
                .map(|index| self.records[*index].symbol.as_str())
                .collect::<BTreeSet<_>>();
            let mapped = cluster
                .iter()
                .filter(|gene| annotated_genes.contains(gene.as_str()))
                .collect::<Vec<_>>();
            let ref_mapped = reference
                .iter()
                .filter(|gene| annotated_genes.contains(gene.as_str()))
                .count();
            let p_value = options.model.p_value(
                mapped.len() as u64,
                reference.len() as u64,
                ref_mapped as u64,
                cluster.len() as u64,
            )?;
            results.insert(
                term,
                EnrichmentEntry {
                    genes: mapped
                        .iter()
                        .map(|gene| translator.get(*gene).cloned().unwrap_or_else(|| gene.to_string()))
                        .collect(),
                    p_value,
                    ref_count: ref_mapped,
                    enrichment: enrichment::fold_enrichment(
                        mapped.len(),
                        cluster.len(),
                        ref_mapped,
                        reference.len(),
                    ),
                },
            );
        }
        milestones.finish();

        if options.use_fdr {
            enrichment::adjust_fdr(&mut results);
        }
        debug!(cluster = cluster.len(), reference = reference.len(), terms = results.len(), "term enrichment");
        Ok(results)
    }

    /// Terms annotated by `genes`, mapped to the input names annotating
    /// them. Ancestral terms are included unless `direct_only`.
    pub fn annotated_terms<S: AsRef<str>>(
        &self,
        genes: &[S],
        direct_only: bool,
        evidence_codes: Option<&BTreeSet<EvidenceCode>>,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, KiraError> {
        let translator = self.gene_names_translator(genes)?;
        let annotations = self.indices_for(translator.keys(), evidence_codes, None);
        let input_name = |index: &usize| {
            let symbol = &self.records[*index].symbol;
            translator.get(symbol).cloned().unwrap_or_else(|| symbol.clone())
        };

        let mut terms: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for index in &annotations {
            terms
                .entry(self.records[*index].term_id.clone())
                .or_default()
                .insert(input_name(index));
        }
        if direct_only {
            return Ok(terms);
        }

        let direct = terms.keys().cloned().collect::<BTreeSet<_>>();
        for term in self.ontology.super_graph(self.known_terms(direct)) {
            let names = self
                .rollup(&term)
                .intersection(&annotations)
                .map(input_name)
                .collect::<Vec<_>>();
            terms.entry(term).or_default().extend(names);
        }
        Ok(terms)
    }

    /// Duplicates the annotations of each key gene under every listed name
    /// and switches to direct matching.
    pub fn remap_genes(&mut self, map: &BTreeMap<String, Vec<String>>) {
        for (gene, names) in map {
            let records = self
                .gene_annotations(gene)
                .into_iter()
                .cloned()
                .collect::<Vec<_>>();
            for record in records {
                for name in names {
                    let mut renamed = record.clone();
                    renamed.symbol = name.clone();
                    self.insert(renamed);
                }
            }
        }
        self.set_matcher(GeneMatcher::direct(true));
    }
}
