//! Gene identifier matching across alias dictionaries.
//!
//! A [`GeneMatcher`] is a tree: leaves match directly or through alias
//! groups, `Sequence` takes the first non-empty answer of its children and
//! `Consensus` keeps only the targets every child agrees on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::KiraError;
use crate::fs_util;
use crate::gene_info::{self, GeneInfo};
use crate::organism;
use crate::progress::NoProgress;
use crate::result_cache::ResultCache;
use crate::serverfiles::{RemoteFiles, ServerFiles};

fn normalize(name: &str, ignore_case: bool) -> String {
    if ignore_case {
        name.to_lowercase()
    } else {
        name.to_string()
    }
}

/// Groups of names that denote the same gene, indexed by alias.
#[derive(Debug, Clone, Default)]
pub struct AliasMatcher {
    groups: Vec<BTreeSet<String>>,
    ignore_case: bool,
    index: HashMap<String, Vec<usize>>,
}

impl AliasMatcher {
    pub fn new(groups: Vec<BTreeSet<String>>, ignore_case: bool) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, group) in groups.iter().enumerate() {
            for alias in group {
                let ids = index.entry(normalize(alias, ignore_case)).or_default();
                if ids.last() != Some(&position) {
                    ids.push(position);
                }
            }
        }
        Self {
            groups,
            ignore_case,
            index,
        }
    }

    /// Merges alias groups of several matchers; groups from different
    /// sources are united when they share an alias.
    pub fn joined(matchers: &[AliasMatcher], ignore_case: bool) -> Self {
        let mut current: Vec<BTreeSet<String>> = Vec::new();
        for (position, matcher) in matchers.iter().enumerate() {
            if position == 0 {
                current = matcher.groups.clone();
            } else {
                current = join_groups(&current, &matcher.groups, ignore_case);
            }
        }
        Self::new(current, ignore_case)
    }

    pub fn groups(&self) -> &[BTreeSet<String>] {
        &self.groups
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Indices of the groups containing `name`.
    pub fn group_ids(&self, name: &str) -> &[usize] {
        self.index
            .get(&normalize(name, self.ignore_case))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Joins two alias group lists. A group of `left` and a group of `right`
/// produce their union when they intersect; unmatched groups are kept.
pub fn join_groups(
    left: &[BTreeSet<String>],
    right: &[BTreeSet<String>],
    ignore_case: bool,
) -> Vec<BTreeSet<String>> {
    let left_index = AliasMatcher::new(left.to_vec(), ignore_case);
    let mut joined = Vec::new();
    let mut left_used = BTreeSet::new();
    let mut right_used = BTreeSet::new();

    for (right_id, group) in right.iter().enumerate() {
        let crossing = group
            .iter()
            .flat_map(|alias| left_index.group_ids(alias).iter().copied())
            .collect::<BTreeSet<_>>();
        for left_id in crossing {
            left_used.insert(left_id);
            right_used.insert(right_id);
            joined.push(group.union(&left[left_id]).cloned().collect());
        }
    }
    joined.extend(
        left.iter()
            .enumerate()
            .filter(|(id, _)| !left_used.contains(id))
            .map(|(_, group)| group.clone()),
    );
    joined.extend(
        right
            .iter()
            .enumerate()
            .filter(|(id, _)| !right_used.contains(id))
            .map(|(_, group)| group.clone()),
    );
    joined
}

/// One line of [`GeneMatcher::explain`]: matched targets and the alias
/// group that linked them to the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub targets: Vec<String>,
    pub aliases: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct DirectMatcher {
    ignore_case: bool,
    targets: Option<BTreeMap<String, BTreeSet<String>>>,
}

#[derive(Debug, Clone)]
pub struct AliasTargets {
    aliases: Arc<AliasMatcher>,
    targets: Option<BTreeMap<usize, BTreeSet<String>>>,
}

/// Element of [`GeneMatcher::compose`]: a matcher, or a group of matchers
/// that must agree.
#[derive(Debug, Clone)]
pub enum ComposeItem {
    Single(GeneMatcher),
    Agreeing(Vec<GeneMatcher>),
}

#[derive(Debug, Clone)]
pub enum GeneMatcher {
    Direct(DirectMatcher),
    Aliases(AliasTargets),
    Sequence(Vec<GeneMatcher>),
    Consensus(Vec<GeneMatcher>),
}

impl GeneMatcher {
    pub fn direct(ignore_case: bool) -> Self {
        GeneMatcher::Direct(DirectMatcher {
            ignore_case,
            targets: None,
        })
    }

    pub fn aliases(aliases: Arc<AliasMatcher>) -> Self {
        GeneMatcher::Aliases(AliasTargets {
            aliases,
            targets: None,
        })
    }

    pub fn sequence(matchers: Vec<GeneMatcher>) -> Self {
        GeneMatcher::Sequence(matchers)
    }

    pub fn consensus(matchers: Vec<GeneMatcher>) -> Self {
        GeneMatcher::Consensus(matchers)
    }

    /// Sequence over `items`, optionally led by a case-insensitive direct
    /// matcher.
    pub fn compose(items: Vec<ComposeItem>, direct: bool) -> Self {
        let mut sequence = Vec::with_capacity(items.len() + 1);
        if direct {
            sequence.push(Self::direct(true));
        }
        for item in items {
            match item {
                ComposeItem::Single(matcher) => sequence.push(matcher),
                ComposeItem::Agreeing(matchers) => sequence.push(Self::consensus(matchers)),
            }
        }
        Self::sequence(sequence)
    }

    /// Restricts every leaf to the canonical names in `targets`.
    pub fn set_targets<I, S>(&mut self, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = targets
            .into_iter()
            .map(|target| target.as_ref().to_string())
            .collect::<Vec<_>>();
        self.bind(&targets);
        debug!(targets = targets.len(), "gene matcher targets set");
    }

    fn bind(&mut self, targets: &[String]) {
        match self {
            GeneMatcher::Direct(direct) => {
                let mut table: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
                for target in targets {
                    table
                        .entry(normalize(target, direct.ignore_case))
                        .or_default()
                        .insert(target.clone());
                }
                direct.targets = Some(table);
            }
            GeneMatcher::Aliases(aliases) => {
                let mut table: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
                for target in targets {
                    for id in aliases.aliases.group_ids(target) {
                        table.entry(*id).or_default().insert(target.clone());
                    }
                }
                aliases.targets = Some(table);
            }
            GeneMatcher::Sequence(children) | GeneMatcher::Consensus(children) => {
                for child in children {
                    child.bind(targets);
                }
            }
        }
    }

    pub fn has_targets(&self) -> bool {
        match self {
            GeneMatcher::Direct(direct) => direct.targets.is_some(),
            GeneMatcher::Aliases(aliases) => aliases.targets.is_some(),
            GeneMatcher::Sequence(children) | GeneMatcher::Consensus(children) => {
                children.iter().all(GeneMatcher::has_targets)
            }
        }
    }

    /// Targets matching `name`, sorted. Empty when nothing matches.
    pub fn match_name(&self, name: &str) -> Result<Vec<String>, KiraError> {
        Ok(self.matches(name)?.into_iter().collect())
    }

    /// The single matching target, or `None` for no or ambiguous matches.
    pub fn umatch(&self, name: &str) -> Result<Option<String>, KiraError> {
        let mut found = self.matches(name)?;
        if found.len() == 1 {
            Ok(found.pop_first())
        } else {
            Ok(None)
        }
    }

    fn matches(&self, name: &str) -> Result<BTreeSet<String>, KiraError> {
        match self {
            GeneMatcher::Direct(direct) => {
                let table = direct.targets.as_ref().ok_or(KiraError::TargetsNotSet)?;
                Ok(table
                    .get(&normalize(name, direct.ignore_case))
                    .cloned()
                    .unwrap_or_default())
            }
            GeneMatcher::Aliases(aliases) => {
                let table = aliases.targets.as_ref().ok_or(KiraError::TargetsNotSet)?;
                Ok(aliases
                    .aliases
                    .group_ids(name)
                    .iter()
                    .filter_map(|id| table.get(id))
                    .flatten()
                    .cloned()
                    .collect())
            }
            GeneMatcher::Sequence(children) => {
                for child in children {
                    let found = child.matches(name)?;
                    if !found.is_empty() {
                        return Ok(found);
                    }
                }
                Ok(BTreeSet::new())
            }
            GeneMatcher::Consensus(children) => {
                let mut agreed: Option<BTreeSet<String>> = None;
                for child in children {
                    let found = child.matches(name)?;
                    agreed = Some(match agreed {
                        None => found,
                        Some(previous) => previous.intersection(&found).cloned().collect(),
                    });
                    if agreed.as_ref().is_some_and(BTreeSet::is_empty) {
                        break;
                    }
                }
                Ok(agreed.unwrap_or_default())
            }
        }
    }

    pub fn explain(&self, name: &str) -> Result<Vec<Explanation>, KiraError> {
        match self {
            GeneMatcher::Direct(_) => {
                let targets = self.match_name(name)?;
                if targets.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![Explanation {
                    targets,
                    aliases: BTreeSet::from([name.to_string()]),
                }])
            }
            GeneMatcher::Aliases(aliases) => {
                let table = aliases.targets.as_ref().ok_or(KiraError::TargetsNotSet)?;
                Ok(aliases
                    .aliases
                    .group_ids(name)
                    .iter()
                    .map(|id| Explanation {
                        targets: table
                            .get(id)
                            .map(|targets| targets.iter().cloned().collect())
                            .unwrap_or_default(),
                        aliases: aliases.aliases.groups[*id].clone(),
                    })
                    .collect())
            }
            GeneMatcher::Sequence(children) => {
                for child in children {
                    if !child.matches(name)?.is_empty() {
                        return child.explain(name);
                    }
                }
                Ok(Vec::new())
            }
            GeneMatcher::Consensus(children) => {
                if self.matches(name)?.is_empty() {
                    return Ok(Vec::new());
                }
                let mut explanations = Vec::new();
                for child in children {
                    explanations.extend(child.explain(name)?);
                }
                Ok(explanations)
            }
        }
    }
}

/// Server-hosted alias dictionaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasSource {
    /// Symbols and synonyms of a GO annotation file (`gene_association.<code>`).
    Go(String),
    Kegg(String),
    Ncbi(String),
    Affy(String),
    Dictybase,
}

impl AliasSource {
    pub fn domain(&self) -> &'static str {
        match self {
            AliasSource::Go(_) => "GO",
            AliasSource::Kegg(_) => "KEGG",
            AliasSource::Ncbi(_) => "NCBI_geneinfo",
            AliasSource::Affy(_) => "Affy",
            AliasSource::Dictybase => "Dictybase",
        }
    }

    pub fn filename(&self) -> String {
        match self {
            AliasSource::Go(code) => format!("gene_association.{code}.tar.gz"),
            AliasSource::Kegg(org) => format!("aliases.{org}.tab"),
            AliasSource::Ncbi(taxid) => format!("gene_info.{taxid}.db"),
            AliasSource::Affy(org) => format!("{org}.aliases.tab"),
            AliasSource::Dictybase => "aliases.tab".to_string(),
        }
    }

    /// Name of the memoized alias table.
    pub fn cache_name(&self) -> String {
        match self {
            AliasSource::Go(code) => format!("aliases_go_{code}"),
            AliasSource::Kegg(org) => format!("aliases_kegg_{org}"),
            AliasSource::Ncbi(taxid) => format!("aliases_ncbi_{taxid}"),
            AliasSource::Affy(org) => format!("aliases_affy_{org}"),
            AliasSource::Dictybase => "aliases_dictybase".to_string(),
        }
    }

    /// Alias sources suited to `taxid`, in lookup order.
    pub fn for_taxid(taxid: &str) -> Vec<AliasSource> {
        let mut sources = Vec::new();
        if let Some(code) = organism::go_code(taxid) {
            sources.push(AliasSource::Go(code.to_string()));
        }
        if let Some(code) = organism::kegg_code(taxid) {
            sources.push(AliasSource::Kegg(code.to_string()));
        }
        sources.push(AliasSource::Ncbi(gene_info::geneinfo_taxid(taxid).to_string()));
        sources
    }

    /// Parses alias groups out of the raw source file.
    pub fn parse_groups(&self, bytes: &[u8]) -> Result<Vec<BTreeSet<String>>, KiraError> {
        let text = String::from_utf8_lossy(bytes);
        let groups = match self {
            AliasSource::Go(_) => {
                let mut by_symbol: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
                for line in text.lines() {
                    if line.starts_with('!') || line.trim().is_empty() {
                        continue;
                    }
                    let columns = line.split('\t').collect::<Vec<_>>();
                    if columns.len() < 11 || columns[2].is_empty() {
                        continue;
                    }
                    let group = by_symbol.entry(columns[2].to_string()).or_default();
                    group.insert(columns[1].to_string());
                    group.insert(columns[2].to_string());
                    group.extend(
                        columns[10]
                            .split('|')
                            .filter(|alias| !alias.is_empty())
                            .map(str::to_string),
                    );
                }
                by_symbol
                    .into_iter()
                    .map(|(symbol, mut group)| {
                        group.insert(symbol);
                        group
                    })
                    .collect()
            }
            AliasSource::Ncbi(_) => text
                .lines()
                .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
                .filter_map(|line| GeneInfo::parse(line).ok())
                .map(|info| info.aliases())
                .collect(),
            AliasSource::Kegg(_) | AliasSource::Affy(_) | AliasSource::Dictybase => text
                .lines()
                .filter(|line| !line.starts_with('#'))
                .map(|line| {
                    line.split('\t')
                        .map(str::trim)
                        .filter(|alias| !alias.is_empty())
                        .map(str::to_string)
                        .collect::<BTreeSet<_>>()
                })
                .filter(|group| !group.is_empty())
                .collect(),
        };
        Ok(groups)
    }

    /// Downloads the source when needed and returns its alias groups,
    /// memoized against the file's server version.
    pub fn load_groups<R: RemoteFiles>(
        &self,
        files: &ServerFiles<R>,
    ) -> Result<Vec<BTreeSet<String>>, KiraError> {
        let domain = self.domain();
        let filename = self.filename();
        let path = files.ensure(domain, &filename, &NoProgress)?;
        let cache = ResultCache::in_store(files.store(), &self.cache_name(), &[(domain, &filename)]);
        cache.get_or_compute(files, &filename, || {
            let bytes = if filename.ends_with(".tar.gz") {
                fs_util::read_tar_gz_member(path.as_std_path(), "gene_association")?
            } else {
                fs_util::read_any(path.as_std_path())?
            };
            self.parse_groups(&bytes)
        })
    }

    pub fn load_matcher<R: RemoteFiles>(
        &self,
        files: &ServerFiles<R>,
        ignore_case: bool,
    ) -> Result<AliasMatcher, KiraError> {
        Ok(AliasMatcher::new(self.load_groups(files)?, ignore_case))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn group(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn unbound_matcher_is_an_error() {
        let matcher = GeneMatcher::direct(true);
        assert_matches!(matcher.match_name("x"), Err(KiraError::TargetsNotSet));
    }

    #[test]
    fn join_unites_intersecting_groups() {
        let left = vec![group(&["a", "b"]), group(&["x"])];
        let right = vec![group(&["B", "c"]), group(&["y"])];
        let joined = join_groups(&left, &right, true);
        assert!(joined.contains(&group(&["a", "b", "B", "c"])));
        assert!(joined.contains(&group(&["x"])));
        assert!(joined.contains(&group(&["y"])));
        assert_eq!(joined.len(), 3);
    }

    #[test]
    fn ncbi_groups_from_gene_info() {
        let line = "9606\t1\tA1BG\t-\tA1B|ABG\tMIM:138670\t19\t19q13.43\talpha-1-B glycoprotein\tprotein-coding\tA1BG\talpha-1-B glycoprotein\tO\tglycoprotein\t20240101";
        let groups = AliasSource::Ncbi("9606".to_string())
            .parse_groups(line.as_bytes())
            .unwrap();
        assert_eq!(groups, vec![group(&["1", "A1BG", "A1B", "ABG"])]);
    }
}
