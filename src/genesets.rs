//! Gene-set collections: model, GMT import, file naming and the local and
//! server repositories.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::annotations::Annotations;
use crate::domain::EvidenceCode;
use crate::error::KiraError;
use crate::organism;
use crate::progress::NoProgress;
use crate::serverfiles::{RemoteFiles, ServerFiles};
use crate::store::Store;

pub const DOMAIN: &str = "gene_sets";
pub const LOCAL_DIR: &str = "gene_sets_local";
const PREFIX: &str = "gs_";
const SUFFIX: &str = ".pck";
const SEPARATOR: &str = "_._";
const GO_TERM_LINK: &str = "http://amigo.geneontology.org/cgi-bin/amigo/term-details.cgi?term=";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeneSet {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hierarchy: Vec<String>,
    /// NCBI taxonomy id.
    #[serde(default)]
    pub organism: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    pub genes: BTreeSet<String>,
}

impl GeneSet {
    pub fn new<I, S>(id: &str, genes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            name: None,
            description: None,
            hierarchy: Vec::new(),
            organism: None,
            link: None,
            genes: genes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_hierarchy(mut self, hierarchy: &[&str]) -> Self {
        self.hierarchy = hierarchy.iter().map(|level| level.to_string()).collect();
        self
    }

    pub fn with_organism(mut self, organism: &str) -> Self {
        self.organism = Some(organism.to_string());
        self
    }

    pub fn with_link(mut self, link: &str) -> Self {
        self.link = Some(link.to_string());
        self
    }

    pub fn size(&self) -> usize {
        self.genes.len()
    }

    /// `hierarchy/id`, followed by `@organism` when the set has one.
    pub fn qualified_id(&self) -> String {
        let mut qualified = self
            .hierarchy
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.id.as_str()))
            .collect::<Vec<_>>()
            .join("/");
        if let Some(organism) = &self.organism {
            qualified.push('@');
            qualified.push_str(organism);
        }
        qualified
    }

    /// Display name: `[ hierarchy ] id name`.
    pub fn cname(&self) -> String {
        let mut cname = String::new();
        if !self.hierarchy.is_empty() {
            cname.push_str(&format!("[ {} ] ", self.hierarchy.join(", ")));
        }
        cname.push_str(&self.id);
        if let Some(name) = &self.name {
            cname.push(' ');
            cname.push_str(name);
        }
        cname
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeneSetStats {
    pub sets: usize,
    pub unique_genes: usize,
    pub mean_size: f64,
}

/// Deduplicating set of gene sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneSetCollection {
    sets: BTreeSet<GeneSet>,
}

impl GeneSetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, set: GeneSet) -> bool {
        self.sets.insert(set)
    }

    pub fn update(&mut self, other: GeneSetCollection) {
        self.sets.extend(other.sets);
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneSet> {
        self.sets.iter()
    }

    pub fn get(&self, id: &str) -> Option<&GeneSet> {
        self.sets.iter().find(|set| set.id == id)
    }

    /// One set per ontology term with at least one annotated gene, holding
    /// the genes annotated to the term or any of its descendants.
    pub fn from_annotations(
        annotations: &Annotations,
        evidence_codes: Option<&BTreeSet<EvidenceCode>>,
    ) -> Self {
        let ontology = annotations.ontology();
        let mut collection = Self::new();
        for term in ontology.terms() {
            let genes = annotations.genes_for(&term.id, evidence_codes);
            if genes.is_empty() {
                continue;
            }
            let mut set = GeneSet::new(&term.id, genes)
                .with_name(term.name())
                .with_link(&format!("{GO_TERM_LINK}{}", term.id));
            set.hierarchy = std::iter::once("GO")
                .chain(term.namespace())
                .map(str::to_string)
                .collect();
            set.organism = annotations.taxid().map(str::to_string);
            collection.insert(set);
        }
        debug!(sets = collection.len(), "gene sets from annotations");
        collection
    }

    /// Result keys for every set: the plain id when it is unique in the
    /// collection, the qualified id otherwise.
    pub fn keyed(&self) -> Result<BTreeMap<String, &GeneSet>, KiraError> {
        let mut id_counts = BTreeMap::<&str, usize>::new();
        for set in &self.sets {
            *id_counts.entry(set.id.as_str()).or_default() += 1;
        }
        let mut keyed = BTreeMap::new();
        for set in &self.sets {
            let key = if id_counts[set.id.as_str()] > 1 {
                set.qualified_id()
            } else {
                set.id.clone()
            };
            if keyed.insert(key.clone(), set).is_some() {
                return Err(KiraError::GeneSetRegistration(format!(
                    "gene set {key} appears more than once with different genes"
                )));
            }
        }
        Ok(keyed)
    }

    /// Union of all member genes.
    pub fn genes(&self) -> BTreeSet<String> {
        self.sets
            .iter()
            .flat_map(|set| set.genes.iter().cloned())
            .collect()
    }

    pub fn set_hierarchy(&mut self, hierarchy: &[&str]) {
        let sets = std::mem::take(&mut self.sets);
        self.sets = sets
            .into_iter()
            .map(|set| set.with_hierarchy(hierarchy))
            .collect();
    }

    pub fn hierarchies(&self) -> Result<BTreeSet<Vec<String>>, KiraError> {
        if self.sets.is_empty() {
            return Err(KiraError::GeneSetRegistration("empty gene set collection".to_string()));
        }
        Ok(self.sets.iter().map(|set| set.hierarchy.clone()).collect())
    }

    /// The organism shared by every set.
    pub fn common_organism(&self) -> Result<Option<String>, KiraError> {
        if self.sets.is_empty() {
            return Err(KiraError::GeneSetRegistration("empty gene set collection".to_string()));
        }
        let organisms = self
            .sets
            .iter()
            .map(|set| set.organism.clone())
            .collect::<BTreeSet<_>>();
        if organisms.len() > 1 {
            return Err(KiraError::GeneSetRegistration(format!(
                "multiple organisms: {}",
                organisms
                    .iter()
                    .map(|organism| organism.as_deref().unwrap_or("none"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(organisms.into_iter().next().flatten())
    }

    /// Longest hierarchy prefix shared by every set.
    pub fn common_hierarchy(&self) -> Result<Vec<String>, KiraError> {
        let hierarchies = self.hierarchies()?;
        let mut length = hierarchies.iter().map(Vec::len).max().unwrap_or(0);
        loop {
            let prefixes = hierarchies
                .iter()
                .map(|hierarchy| &hierarchy[..length.min(hierarchy.len())])
                .collect::<BTreeSet<_>>();
            if prefixes.len() <= 1 || length == 0 {
                return Ok(prefixes
                    .into_iter()
                    .next()
                    .map(<[String]>::to_vec)
                    .unwrap_or_default());
            }
            length -= 1;
        }
    }

    pub fn split_by_hierarchy(&self) -> Vec<GeneSetCollection> {
        let mut split: BTreeMap<&[String], GeneSetCollection> = BTreeMap::new();
        for set in &self.sets {
            split
                .entry(set.hierarchy.as_slice())
                .or_default()
                .insert(set.clone());
        }
        split.into_values().collect()
    }

    pub fn stats(&self) -> GeneSetStats {
        let sets = self.sets.len();
        let total = self.sets.iter().map(GeneSet::size).sum::<usize>();
        GeneSetStats {
            sets,
            unique_genes: self.genes().len(),
            mean_size: if sets == 0 { 0.0 } else { total as f64 / sets as f64 },
        }
    }
}

impl FromIterator<GeneSet> for GeneSetCollection {
    fn from_iter<I: IntoIterator<Item = GeneSet>>(iter: I) -> Self {
        Self {
            sets: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for GeneSetCollection {
    type Item = GeneSet;
    type IntoIter = std::collections::btree_set::IntoIter<GeneSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.into_iter()
    }
}

/// `gs_<hierarchy joined by "_._">_._<organism>.pck`.
pub fn filename<S: AsRef<str>>(hierarchy: &[S], organism: Option<&str>) -> String {
    let parts = hierarchy
        .iter()
        .map(AsRef::as_ref)
        .chain(std::iter::once(organism.unwrap_or("")))
        .collect::<Vec<_>>();
    format!("{PREFIX}{}{SUFFIX}", parts.join(SEPARATOR))
}

pub fn is_genesets_file(name: &str) -> bool {
    name.starts_with(PREFIX) && name.ends_with(SUFFIX)
}

pub fn parse_filename(name: &str) -> Result<(Vec<String>, Option<String>), KiraError> {
    let inner = name
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .ok_or_else(|| KiraError::InvalidGeneSetFile(name.to_string()))?;
    let mut parts = inner.split(SEPARATOR).map(str::to_string).collect::<Vec<_>>();
    let organism = parts.pop().filter(|organism| !organism.is_empty());
    Ok((parts, organism))
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.*?)\s?(?:\[(https?://[^\[\]]*)\])?$")
            .unwrap_or_else(|err| panic!("gmt link pattern: {err}"))
    })
}

/// Parses GMT text. Each line is `id<TAB>description [link]<TAB>genes...`;
/// sets are placed under the `("Custom", name)` hierarchy.
pub fn parse_gmt(contents: &str, name: &str) -> GeneSetCollection {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let tabs = line.split('\t').map(str::trim).collect::<Vec<_>>();
            let mut set = GeneSet::new(
                tabs[0],
                tabs.iter().skip(2).filter(|gene| !gene.is_empty()).copied(),
            )
            .with_hierarchy(&["Custom", name]);
            if let Some(captures) = tabs.get(1).and_then(|field| link_pattern().captures(field)) {
                set.description = captures
                    .get(1)
                    .map(|text| text.as_str().to_string())
                    .filter(|text| !text.is_empty());
                set.link = captures.get(2).map(|link| link.as_str().to_string());
            }
            set
        })
        .collect()
}

pub fn read_collection(path: &Utf8Path) -> Result<GeneSetCollection, KiraError> {
    let bytes = fs::read(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| KiraError::InvalidGeneSetFile(format!("{path}: {err}")))
}

/// `(hierarchy, organism, available locally)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Availability {
    pub hierarchy: Vec<String>,
    pub organism: Option<String>,
    pub local: bool,
}

/// Source of a [`GeneSetRegistry::collections`] merge.
#[derive(Debug, Clone)]
pub enum CollectionSpec {
    Gmt(Utf8PathBuf),
    Stored {
        hierarchy: Vec<String>,
        organism: Option<String>,
    },
    Collection(GeneSetCollection),
}

/// Gene sets registered on this machine plus those hosted by the server.
pub struct GeneSetRegistry {
    local_dir: Utf8PathBuf,
}

impl GeneSetRegistry {
    pub fn new(store: &Store) -> Self {
        Self {
            local_dir: store.root().join(LOCAL_DIR),
        }
    }

    pub fn with_local_dir(local_dir: Utf8PathBuf) -> Self {
        Self { local_dir }
    }

    pub fn local_dir(&self) -> &Utf8Path {
        &self.local_dir
    }

    /// Saves `collection` under its common hierarchy and organism.
    pub fn register_local(&self, collection: &GeneSetCollection) -> Result<String, KiraError> {
        let organism = collection.common_organism()?;
        let hierarchy = collection.common_hierarchy()?;
        let name = filename(&hierarchy, organism.as_deref());
        fs::create_dir_all(self.local_dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", self.local_dir)))?;
        let payload = serde_json::to_vec(collection)
            .map_err(|err| KiraError::GeneSetRegistration(err.to_string()))?;
        Store::write_bytes_atomic(&self.local_dir.join(&name), &payload)?;
        info!(file = %name, sets = collection.len(), "registered local gene sets");
        Ok(name)
    }

    fn local_files(&self) -> Result<Vec<String>, KiraError> {
        if !self.local_dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(self.local_dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", self.local_dir)))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            if let Some(name) = entry.file_name().to_str()
                && is_genesets_file(name)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn list_local(&self) -> Result<Vec<(Vec<String>, Option<String>)>, KiraError> {
        self.local_files()?
            .iter()
            .map(|name| parse_filename(name))
            .collect()
    }

    /// Removes every local file whose name contains `pattern`.
    pub fn remove_local(&self, pattern: &str) -> Result<usize, KiraError> {
        let mut removed = 0;
        for name in self.local_files()? {
            if name.contains(pattern) {
                let path = self.local_dir.join(&name);
                fs::remove_file(path.as_std_path())
                    .map_err(|err| KiraError::Filesystem(format!("remove {path}: {err}")))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Server-hosted collections, marked local when already downloaded.
    fn server_files<R: RemoteFiles>(files: &ServerFiles<R>) -> Result<Vec<(String, bool)>, KiraError> {
        let downloaded = files
            .list(DOMAIN)?
            .into_iter()
            .filter(|name| is_genesets_file(name))
            .collect::<BTreeSet<_>>();
        let remote = match files.list_remote(DOMAIN) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(error = %err, "gene set server listing unavailable, using downloaded files");
                Vec::new()
            }
        };
        let mut all = remote
            .into_iter()
            .filter(|name| is_genesets_file(name))
            .collect::<BTreeSet<_>>();
        all.extend(downloaded.iter().cloned());
        Ok(all
            .into_iter()
            .map(|name| {
                let local = downloaded.contains(&name);
                (name, local)
            })
            .collect())
    }

    pub fn list_all<R: RemoteFiles>(
        &self,
        files: &ServerFiles<R>,
        organism: Option<&str>,
        local: Option<bool>,
    ) -> Result<Vec<Availability>, KiraError> {
        let mut merged: BTreeMap<(Vec<String>, Option<String>), bool> = BTreeMap::new();
        for key in self.list_local()? {
            merged.insert(key, true);
        }
        for (name, on_disk) in Self::server_files(files)? {
            let key = parse_filename(&name)?;
            let entry = merged.entry(key).or_insert(true);
            *entry = *entry && on_disk;
        }
        Ok(merged
            .into_iter()
            .filter(|(_, available)| local.is_none_or(|wanted| wanted == *available))
            .filter(|((_, org), _)| organism.is_none_or(|wanted| org.as_deref() == Some(wanted)))
            .map(|((hierarchy, organism), local)| Availability {
                hierarchy,
                organism,
                local,
            })
            .collect())
    }

    /// Loads every collection at or below `hierarchy` for `organism`,
    /// preferring locally registered files over the server's.
    pub fn load<R: RemoteFiles>(
        &self,
        files: &ServerFiles<R>,
        hierarchy: &[String],
        organism: Option<&str>,
    ) -> Result<GeneSetCollection, KiraError> {
        let organism = organism.map(normalize_organism).transpose()?;
        let organism = organism.as_deref();

        let local = self
            .local_files()?
            .into_iter()
            .filter(|name| matches_spec(name, hierarchy, organism))
            .collect::<Vec<_>>();
        if !local.is_empty() {
            let mut collection = GeneSetCollection::new();
            for name in local {
                collection.update(read_collection(&self.local_dir.join(&name))?);
            }
            debug!(sets = collection.len(), "loaded local gene sets");
            return Ok(collection);
        }

        let server = Self::server_files(files)?
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| matches_spec(name, hierarchy, organism))
            .collect::<Vec<_>>();
        if server.is_empty() {
            return Err(KiraError::NoGeneSets {
                hierarchy: hierarchy.to_vec(),
                organism: organism.map(str::to_string),
            });
        }
        let mut collection = GeneSetCollection::new();
        for name in server {
            let path = files.ensure(DOMAIN, &name, &NoProgress)?;
            collection.update(read_collection(&path)?);
        }
        debug!(sets = collection.len(), "loaded server gene sets");
        Ok(collection)
    }

    /// Merges gene sets from GMT files, stored collections and in-memory
    /// collections.
    pub fn collections<R: RemoteFiles>(
        &self,
        files: &ServerFiles<R>,
        specs: Vec<CollectionSpec>,
    ) -> Result<GeneSetCollection, KiraError> {
        let mut result = GeneSetCollection::new();
        for spec in specs {
            match spec {
                CollectionSpec::Collection(collection) => result.update(collection),
                CollectionSpec::Stored {
                    hierarchy,
                    organism,
                } => result.update(self.load(files, &hierarchy, organism.as_deref())?),
                CollectionSpec::Gmt(path) => {
                    let is_gmt = path
                        .extension()
                        .is_some_and(|extension| extension.eq_ignore_ascii_case("gmt"));
                    if !is_gmt {
                        return Err(KiraError::InvalidGeneSetFile(format!(
                            "{path}: only .gmt files are accepted"
                        )));
                    }
                    let contents = fs::read_to_string(path.as_std_path())
                        .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
                    let name = path.file_name().unwrap_or(path.as_str());
                    result.update(parse_gmt(&contents, name));
                }
            }
        }
        Ok(result)
    }
}

/// Organism codes other than taxids are resolved through the static
/// organism tables and must denote exactly one taxid.
fn normalize_organism(organism: &str) -> Result<String, KiraError> {
    if organism.chars().all(|ch| ch.is_ascii_digit()) {
        return Ok(organism.to_string());
    }
    let taxids = organism::taxids_for_code(organism);
    if taxids.len() == 1 {
        if let Some(taxid) = taxids.into_iter().next() {
            return Ok(taxid.to_string());
        }
    }
    Err(KiraError::NoGeneSets {
        hierarchy: Vec::new(),
        organism: Some(organism.to_string()),
    })
}

fn matches_spec(name: &str, hierarchy: &[String], organism: Option<&str>) -> bool {
    match parse_filename(name) {
        Ok((file_hierarchy, file_organism)) => {
            file_organism.as_deref() == organism && file_hierarchy.starts_with(hierarchy)
        }
        Err(_) => false,
    }
}
