//! OBO ontology store: parser, typed term graph, traversals and slims.
//!
//! The graph is kept as `id -> term` plus an inverted `children` index; terms
//! refer to each other by id only.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use camino::Utf8Path;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::KiraError;
use crate::fs_util;
use crate::progress::{Milestones, NoProgress, ProgressSink};
use crate::serverfiles::{RemoteFiles, ServerFiles};

pub const DOMAIN: &str = "GO";
pub const FILENAME: &str = "gene_ontology_edit.obo.tar.gz";
pub const MEMBER: &str = "gene_ontology_edit.obo";
pub const DEFAULT_SLIM: &str = "goslim_generic";

/// Tags that may appear more than once per stanza.
pub const MULTI_VALUED_TAGS: [&str; 17] = [
    "alt_id",
    "is_a",
    "subset",
    "synonym",
    "related_synonym",
    "exact_synonym",
    "broad_synonym",
    "narrow_synonym",
    "xref",
    "xref_analog",
    "xref_unknown",
    "relationship",
    "intersection_of",
    "union_of",
    "disjoint_from",
    "consider",
    "replaced_by",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaKind {
    Term,
    Typedef,
    Instance,
}

impl StanzaKind {
    fn header(&self) -> &'static str {
        match self {
            StanzaKind::Term => "[Term]",
            StanzaKind::Typedef => "[Typedef]",
            StanzaKind::Instance => "[Instance]",
        }
    }
}

/// One `tag: value {modifiers} ! comment` line as written in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLine {
    pub tag: String,
    pub value: String,
    pub modifiers: Option<String>,
    pub comment: Option<String>,
}

/// A parsed stanza. `def` is exposed as [`OboObject::definition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OboObject {
    pub kind: StanzaKind,
    pub id: String,
    lines: Vec<TagLine>,
    values: BTreeMap<String, Vec<String>>,
    /// Outgoing `(relation type, target id)` edges, resolved to primary ids.
    parents: Vec<(String, String)>,
}

impl OboObject {
    fn from_lines(kind: StanzaKind, lines: Vec<TagLine>, line_num: usize) -> Result<Self, KiraError> {
        let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for line in &lines {
            let entry = values.entry(line.tag.clone()).or_default();
            if !MULTI_VALUED_TAGS.contains(&line.tag.as_str()) {
                entry.clear();
            }
            entry.push(line.value.clone());
        }
        let id = values
            .get("id")
            .and_then(|ids| ids.last())
            .cloned()
            .ok_or_else(|| KiraError::OboParse {
                line: line_num,
                reason: format!("{} stanza without id", kind.header()),
            })?;
        Ok(Self {
            kind,
            id,
            lines,
            values,
            parents: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.tag_value("name").unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.tag_value("namespace")
    }

    pub fn definition(&self) -> Option<&str> {
        self.tag_value("def")
    }

    pub fn alt_ids(&self) -> &[String] {
        self.tag_values("alt_id")
    }

    pub fn subsets(&self) -> &[String] {
        self.tag_values("subset")
    }

    /// Synonyms of every subtype, in file order.
    pub fn synonyms(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.tag == "synonym" || line.tag.ends_with("_synonym"))
            .map(|line| line.value.as_str())
            .collect()
    }

    pub fn is_obsolete(&self) -> bool {
        self.tag_value("is_obsolete") == Some("true")
    }

    /// Last value of a scalar tag.
    pub fn tag_value(&self, tag: &str) -> Option<&str> {
        self.values
            .get(tag)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    pub fn tag_values(&self, tag: &str) -> &[String] {
        self.values.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn lines(&self) -> &[TagLine] {
        &self.lines
    }

    pub fn parents(&self) -> &[(String, String)] {
        &self.parents
    }

    /// Relations as written: `is_a` targets and `relationship: TYPE TARGET`.
    fn declared_relations(&self) -> Vec<(String, String)> {
        let mut relations = self
            .tag_values("is_a")
            .iter()
            .map(|target| ("is_a".to_string(), target.clone()))
            .collect::<Vec<_>>();
        for relationship in self.tag_values("relationship") {
            let mut parts = relationship.split_whitespace();
            if let (Some(kind), Some(target)) = (parts.next(), parts.next()) {
                relations.push((kind.to_string(), target.to_string()));
            }
        }
        relations
    }

    fn write_obo(&self, out: &mut String) {
        out.push_str(self.kind.header());
        out.push('\n');
        for line in &self.lines {
            let _ = write!(out, "{}: {}", line.tag, line.value);
            if let Some(modifiers) = &line.modifiers {
                let _ = write!(out, " {{{modifiers}}}");
            }
            if let Some(comment) = &line.comment {
                let _ = write!(out, " ! {comment}");
            }
            out.push('\n');
        }
        out.push('\n');
    }
}

/// Splits the text after `tag:` into value, `{modifiers}` and `! comment`,
/// ignoring delimiters inside quoted strings.
fn split_tag_value(rest: &str) -> (String, Option<String>, Option<String>) {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut modifier_at = None;
    let mut comment_at = None;
    for (index, ch) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '{' if !in_quotes && modifier_at.is_none() => modifier_at = Some(index),
            '!' if !in_quotes => {
                comment_at = Some(index);
                break;
            }
            _ => {}
        }
    }

    let (body, comment) = match comment_at {
        Some(index) => (&rest[..index], Some(rest[index + 1..].trim())),
        None => (rest, None),
    };
    let (value, modifiers) = match modifier_at {
        Some(index) if index < body.len() => {
            let raw = body[index + 1..].trim();
            let raw = raw.strip_suffix('}').unwrap_or(raw).trim();
            (&body[..index], Some(raw))
        }
        _ => (body, None),
    };
    (
        value.trim().to_string(),
        modifiers.filter(|text| !text.is_empty()).map(str::to_string),
        comment.filter(|text| !text.is_empty()).map(str::to_string),
    )
}

fn stanza_kind(header: &str) -> Option<StanzaKind> {
    match header {
        "Term" => Some(StanzaKind::Term),
        "Typedef" => Some(StanzaKind::Typedef),
        "Instance" => Some(StanzaKind::Instance),
        _ => None,
    }
}

struct RawStanza {
    kind: Option<StanzaKind>,
    header: String,
    line: usize,
    lines: Vec<TagLine>,
}

/// Parsed ontology graph.
#[derive(Debug)]
pub struct Ontology {
    header: Vec<String>,
    terms: BTreeMap<String, OboObject>,
    typedefs: BTreeMap<String, OboObject>,
    instances: BTreeMap<String, OboObject>,
    alias_to_primary: BTreeMap<String, String>,
    children: BTreeMap<String, BTreeSet<(String, String)>>,
    slims: RwLock<BTreeSet<String>>,
    depths: Mutex<HashMap<String, usize>>,
}

static DEFAULT: OnceLock<RwLock<Option<Arc<Ontology>>>> = OnceLock::new();

fn default_slot() -> &'static RwLock<Option<Arc<Ontology>>> {
    DEFAULT.get_or_init(|| RwLock::new(None))
}

impl Ontology {
    pub fn parse(text: &str) -> Result<Self, KiraError> {
        Self::parse_with_progress(text, &NoProgress)
    }

    pub fn parse_with_progress(text: &str, progress: &dyn ProgressSink) -> Result<Self, KiraError> {
        let lines = text.lines().collect::<Vec<_>>();
        let parse_progress = |percent: f64| progress.progress(percent * 0.9);
        let mut milestones = Milestones::new(&parse_progress, lines.len());

        let mut header = Vec::new();
        let mut stanzas: Vec<RawStanza> = Vec::new();
        for (index, raw) in lines.iter().enumerate() {
            milestones.advance();
            let line_num = index + 1;
            if raw.starts_with('!') {
                continue;
            }
            let line = raw.trim();
            if line.starts_with('[') {
                let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']'))
                else {
                    return Err(KiraError::OboParse {
                        line: line_num,
                        reason: format!("unterminated stanza header {line:?}"),
                    });
                };
                let kind = stanza_kind(name.trim());
                if kind.is_none() {
                    warn!(line = line_num, stanza = name, "skipping unknown stanza type");
                }
                stanzas.push(RawStanza {
                    kind,
                    header: name.to_string(),
                    line: line_num,
                    lines: Vec::new(),
                });
                continue;
            }
            let Some(stanza) = stanzas.last_mut() else {
                header.push(raw.to_string());
                continue;
            };
            if line.is_empty() {
                continue;
            }
            let Some((tag, rest)) = line.split_once(':') else {
                warn!(line = line_num, stanza = %stanza.header, "skipping OBO line without a tag");
                continue;
            };
            let (value, modifiers, comment) = split_tag_value(rest);
            stanza.lines.push(TagLine {
                tag: tag.trim().to_string(),
                value,
                modifiers,
                comment,
            });
        }
        milestones.finish();
        while header.last().is_some_and(|line| line.trim().is_empty()) {
            header.pop();
        }

        let mut ontology = Self {
            header,
            terms: BTreeMap::new(),
            typedefs: BTreeMap::new(),
            instances: BTreeMap::new(),
            alias_to_primary: BTreeMap::new(),
            children: BTreeMap::new(),
            slims: RwLock::new(BTreeSet::new()),
            depths: Mutex::new(HashMap::new()),
        };
        for stanza in stanzas {
            let Some(kind) = stanza.kind else {
                continue;
            };
            let object = OboObject::from_lines(kind, stanza.lines, stanza.line)?;
            let target = match kind {
                StanzaKind::Term => &mut ontology.terms,
                StanzaKind::Typedef => &mut ontology.typedefs,
                StanzaKind::Instance => &mut ontology.instances,
            };
            if target.contains_key(&object.id) {
                warn!(id = %object.id, line = stanza.line, "duplicate stanza id, keeping the later one");
            }
            target.insert(object.id.clone(), object);
        }

        let build_progress = |percent: f64| progress.progress(90.0 + percent * 0.1);
        ontology.build_graph(&build_progress);
        debug!(
            terms = ontology.terms.len(),
            typedefs = ontology.typedefs.len(),
            aliases = ontology.alias_to_primary.len(),
            "parsed ontology"
        );
        Ok(ontology)
    }

    fn build_graph(&mut self, progress: &dyn ProgressSink) {
        self.alias_to_primary.clear();
        self.children.clear();
        for (id, term) in &self.terms {
            for alt in term.alt_ids() {
                if self.terms.contains_key(alt) {
                    warn!(alt_id = %alt, primary = %id, "alt_id collides with a primary id, ignoring");
                    continue;
                }
                self.alias_to_primary.insert(alt.clone(), id.clone());
            }
        }

        let mut milestones = Milestones::new(progress, self.terms.len());
        let mut resolved = BTreeMap::new();
        let mut dangling = 0usize;
        for (id, term) in &self.terms {
            let mut parents = Vec::new();
            for (relation, target) in term.declared_relations() {
                let Some(primary) = self.primary_id(&target) else {
                    warn!(term = %id, relation = %relation, target = %target, "dropping edge to unknown term");
                    dangling += 1;
                    continue;
                };
                let edge = (relation, primary.to_string());
                if !parents.contains(&edge) {
                    parents.push(edge);
                }
            }
            resolved.insert(id.clone(), parents);
            milestones.advance();
        }
        for (id, parents) in resolved {
            for (relation, parent) in &parents {
                self.children
                    .entry(parent.clone())
                    .or_default()
                    .insert((relation.clone(), id.clone()));
            }
            if let Some(term) = self.terms.get_mut(&id) {
                term.parents = parents;
            }
        }
        milestones.finish();
        if dangling > 0 {
            warn!(dangling, "ontology references unknown parent terms");
        }
    }

    /// Parses a plain `.obo` file or the server's `.obo.tar.gz` archive.
    pub fn from_path(path: &Utf8Path, progress: &dyn ProgressSink) -> Result<Self, KiraError> {
        let bytes = if path.as_str().ends_with(".tar.gz") {
            let mut members = fs_util::read_tar_gz(path.as_std_path(), &[])?;
            match members.remove(MEMBER) {
                Some(bytes) => bytes,
                None => members
                    .into_iter()
                    .find(|(name, _)| name.ends_with(".obo"))
                    .map(|(_, bytes)| bytes)
                    .ok_or_else(|| KiraError::Archive(format!("no .obo member in {path}")))?,
            }
        } else {
            fs_util::read_any(path.as_std_path())?
        };
        Self::parse_with_progress(&String::from_utf8_lossy(&bytes), progress)
    }

    /// Loads the current ontology through the server-files cache.
    pub fn load<R: RemoteFiles>(
        files: &ServerFiles<R>,
        progress: &dyn ProgressSink,
    ) -> Result<Self, KiraError> {
        let download_progress = |percent: f64| progress.progress(percent * 0.5);
        let path = files.ensure(DOMAIN, FILENAME, &download_progress)?;
        let parse_progress = |percent: f64| progress.progress(50.0 + percent * 0.5);
        let ontology = Self::from_path(&path, &parse_progress)?;
        info!(terms = ontology.len(), "loaded gene ontology");
        Ok(ontology)
    }

    /// Loads the ontology at a CVS revision such as `5.2092` or `rev5.2092`.
    pub fn at_revision<R: RemoteFiles>(
        files: &ServerFiles<R>,
        revision: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Self, KiraError> {
        let revision = validate_revision(revision)?;
        let filename = revision_filename(&revision);
        let download_progress = |percent: f64| progress.progress(percent * 0.5);
        let path = files.ensure(DOMAIN, &filename, &download_progress)?;
        let parse_progress = |percent: f64| progress.progress(50.0 + percent * 0.5);
        Self::from_path(&path, &parse_progress)
    }

    /// Process-wide shared ontology, loaded on first use.
    pub fn get_default<R: RemoteFiles>(files: &ServerFiles<R>) -> Result<Arc<Ontology>, KiraError> {
        let slot = default_slot();
        if let Some(ontology) = slot.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(Arc::clone(ontology));
        }
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(ontology) = guard.as_ref() {
            return Ok(Arc::clone(ontology));
        }
        let ontology = Arc::new(Self::load(files, &NoProgress)?);
        *guard = Some(Arc::clone(&ontology));
        Ok(ontology)
    }

    pub fn reload_default<R: RemoteFiles>(files: &ServerFiles<R>) -> Result<Arc<Ontology>, KiraError> {
        let mut guard = default_slot()
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let ontology = Arc::new(Self::load(files, &NoProgress)?);
        *guard = Some(Arc::clone(&ontology));
        Ok(ontology)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.header.iter().find_map(|line| {
            let (tag, value) = line.split_once(':')?;
            (tag.trim() == key).then(|| value.trim())
        })
    }

    pub fn data_version(&self) -> Option<&str> {
        self.header_value("data-version")
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Primary id of `id`, following the alt-id map.
    pub fn primary_id<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        if let Some((primary, _)) = self.terms.get_key_value(id) {
            return Some(primary.as_str());
        }
        self.alias_to_primary.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.primary_id(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&OboObject> {
        self.terms.get(self.primary_id(id)?)
    }

    pub fn terms(&self) -> impl Iterator<Item = &OboObject> {
        self.terms.values()
    }

    pub fn term_ids(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(String::as_str)
    }

    pub fn typedefs(&self) -> impl Iterator<Item = &OboObject> {
        self.typedefs.values()
    }

    pub fn instances(&self) -> impl Iterator<Item = &OboObject> {
        self.instances.values()
    }

    pub fn alias_map(&self) -> &BTreeMap<String, String> {
        &self.alias_to_primary
    }

    /// Alt-ids redirecting to `primary`.
    pub fn alt_ids_of(&self, primary: &str) -> Vec<&str> {
        self.terms
            .get(primary)
            .map(|term| {
                term.alt_ids()
                    .iter()
                    .filter(|alt| self.alias_to_primary.get(alt.as_str()).map(String::as_str) == Some(primary))
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `(relation, child)` pairs pointing at `id`.
    pub fn children(&self, id: &str) -> impl Iterator<Item = &(String, String)> {
        self.primary_id(id)
            .and_then(|primary| self.children.get(primary))
            .into_iter()
            .flatten()
    }

    /// True for relation types followed by default traversals: `is_a` and
    /// every type whose Typedef declares no `inverse_of`.
    pub fn follows(&self, relation: &str) -> bool {
        relation == "is_a"
            || self
                .typedefs
                .get(relation)
                .is_none_or(|typedef| typedef.tag_values("inverse_of").is_empty())
    }

    fn followed_parents<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.terms
            .get(id)
            .map(|term| term.parents.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|(relation, _)| self.follows(relation))
            .map(|(_, parent)| parent.as_str())
    }

    fn followed_children<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .filter(|(relation, _)| self.follows(relation))
            .map(|(_, child)| child.as_str())
    }

    /// `seeds` and all their ancestors. Unknown seeds are ignored.
    pub fn super_graph<I, S>(&self, seeds: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.closure(seeds, |id| self.followed_parents(id).collect())
    }

    /// `seeds` and all their descendants. Unknown seeds are ignored.
    pub fn sub_graph<I, S>(&self, seeds: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.closure(seeds, |id| self.followed_children(id).collect())
    }

    fn closure<'a, I, S, F>(&'a self, seeds: I, next: F) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str) -> Vec<&'a str>,
    {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if let Some(primary) = self.primary_id(seed.as_ref()) {
                queue.push_back(primary.to_string());
            }
        }
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            for neighbour in next(&id) {
                if !visited.contains(neighbour) {
                    queue.push_back(neighbour.to_string());
                }
            }
        }
        visited
    }

    /// Length of the shortest path to a root, counting the root as depth 1.
    /// Terms that reach no root through followed relations have depth 1.
    pub fn term_depth(&self, id: &str) -> Option<usize> {
        let primary = self.primary_id(id)?.to_string();
        let memoized = self
            .depths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&primary)
            .copied();
        if let Some(depth) = memoized {
            return Some(depth);
        }
        let depth = self.shortest_depth(&primary);
        self.depths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(primary, depth);
        Some(depth)
    }

    /// Level-order walk over followed parents. Memoized depths are exact, so
    /// they shortcut the walk without depending on query order.
    fn shortest_depth(&self, id: &str) -> usize {
        let mut best: Option<usize> = None;
        let mut visited = BTreeSet::from([id.to_string()]);
        let mut frontier = vec![id.to_string()];
        let mut level = 0;
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for current in &frontier {
                let known = self
                    .depths
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(current)
                    .copied();
                let candidate = match known {
                    Some(depth) => Some(level + depth),
                    None => {
                        let mut parents = self.followed_parents(current).peekable();
                        if parents.peek().is_none() {
                            Some(level + 1)
                        } else {
                            for parent in parents {
                                if visited.insert(parent.to_string()) {
                                    next.push(parent.to_string());
                                }
                            }
                            None
                        }
                    }
                };
                if let Some(candidate) = candidate {
                    best = Some(best.map_or(candidate, |best| best.min(candidate)));
                }
            }
            if best.is_some_and(|best| best <= level + 2) {
                break;
            }
            frontier = next;
            level += 1;
        }
        best.unwrap_or(1)
    }

    /// Subset names declared by `subsetdef:` header lines.
    pub fn defined_slim_subsets(&self) -> Vec<String> {
        self.header
            .iter()
            .filter(|line| line.starts_with("subsetdef:"))
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(str::to_string)
            .collect()
    }

    pub fn named_slims_subset(&self, subset: &str) -> BTreeSet<String> {
        self.terms
            .values()
            .filter(|term| term.subsets().iter().any(|name| name == subset))
            .map(|term| term.id.clone())
            .collect()
    }

    /// Selects the terms of a named subset as the current slim set.
    pub fn set_slims_subset(&self, subset: &str) {
        self.set_slims(self.named_slims_subset(subset));
    }

    pub fn set_slims<I, S>(&self, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slims = terms.into_iter().map(Into::into).collect();
        *self.slims.write().unwrap_or_else(PoisonError::into_inner) = slims;
    }

    pub fn slims(&self) -> BTreeSet<String> {
        self.slims
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most specific members of the current slim set covering `id`.
    pub fn slim_terms(&self, id: &str) -> BTreeSet<String> {
        let slims = self.slims.read().unwrap_or_else(PoisonError::into_inner);
        self.slim_terms_in(id, &slims)
    }

    /// Nearest ancestors of `id` (or `id` itself) contained in `slim_set`;
    /// the search does not continue above a hit.
    pub fn slim_terms_in(&self, id: &str, slim_set: &BTreeSet<String>) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let Some(primary) = self.primary_id(id) else {
            return result;
        };
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([primary.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if slim_set.contains(&current) {
                result.insert(current);
                continue;
            }
            for parent in self.followed_parents(&current) {
                if !visited.contains(parent) {
                    queue.push_back(parent.to_string());
                }
            }
        }
        result
    }

    /// Serializes the ontology back to OBO text.
    pub fn to_obo(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        for object in self
            .typedefs
            .values()
            .chain(self.terms.values())
            .chain(self.instances.values())
        {
            object.write_obo(&mut out);
        }
        out
    }
}

/// Validates a CVS revision and strips an optional `rev` prefix.
pub fn validate_revision(revision: &str) -> Result<String, KiraError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^(rev)?(\d+\.\d+)+$").unwrap_or_else(|err| panic!("revision pattern: {err}"))
    });
    if !pattern.is_match(revision) {
        return Err(KiraError::InvalidRevision(revision.to_string()));
    }
    Ok(revision.trim_start_matches("rev").to_string())
}

pub fn revision_filename(revision: &str) -> String {
    format!("gene_ontology_edit@rev{revision}.obo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tag_value_respects_quotes() {
        let (value, modifiers, comment) =
            split_tag_value(r#" "a ! b {c}" EXACT [] {source="x"} ! note"#);
        assert_eq!(value, r#""a ! b {c}" EXACT []"#);
        assert_eq!(modifiers.as_deref(), Some(r#"source="x""#));
        assert_eq!(comment.as_deref(), Some("note"));
    }

    #[test]
    fn plain_value_has_no_extras() {
        let (value, modifiers, comment) = split_tag_value(" GO:0000001");
        assert_eq!(value, "GO:0000001");
        assert!(modifiers.is_none());
        assert!(comment.is_none());
    }

    #[test]
    fn revision_pattern() {
        assert_eq!(validate_revision("rev5.2092").unwrap(), "5.2092");
        assert_eq!(validate_revision("1.2.3.4").unwrap(), "1.2.3.4");
        assert!(validate_revision("head").is_err());
        assert_eq!(revision_filename("5.2092"), "gene_ontology_edit@rev5.2092.obo");
    }
}
