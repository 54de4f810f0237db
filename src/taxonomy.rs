//! NCBI taxonomy store.
//!
//! Records live in two parallel text databases. The main one holds
//! `0xFF taxid 0xFD parent 0xFD rank 0xFD name0 0xFD name1 ... 0xFE \n`
//! with the scientific name first; the sidecar holds `taxid` followed by
//! the name class of every name in the same order.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use camino::Utf8Path;
use memchr::memmem;
use tracing::{debug, info, warn};

use crate::domain::TaxId;
use crate::error::KiraError;
use crate::fs_util;
use crate::organism;
use crate::progress::{Milestones, ProgressSink};
use crate::serverfiles::{RemoteFiles, ServerFiles};
use crate::store::Store;

pub const DOMAIN: &str = "Taxonomy";
pub const FILENAME: &str = "ncbi_taxonomy.tar.gz";
pub const TEXT_MEMBER: &str = "ncbi_taxonomy.db";
pub const INFO_MEMBER: &str = "ncbi_taxonomy_inf.db";
pub const SCIENTIFIC_NAME: &str = "scientific name";

const ENTRY_START: u8 = 0xFF;
const FIELD_SEPARATOR: u8 = 0xFD;
const ENTRY_END: [u8; 2] = [0xFE, b'\n'];

/// Append-only record file with substring search over a lowercased shadow copy.
pub struct TextDb {
    text: Vec<u8>,
    lower: CaseFolded,
    offsets: Mutex<HashMap<String, (usize, usize)>>,
}

/// Unicode-lowercased copy of the record bytes. Lowercasing may change the
/// byte length of a character, so `shifts` records `(lower, text)` offset
/// pairs after every such character; delimiter bytes map exactly.
#[derive(Default)]
struct CaseFolded {
    bytes: Vec<u8>,
    shifts: Vec<(usize, usize)>,
}

impl CaseFolded {
    fn extend(&mut self, text: &[u8], text_start: usize) {
        let mut position = text_start;
        for segment in text[text_start..].split_inclusive(|byte| is_delimiter(*byte)) {
            let (body, delimiter) = match segment.split_last() {
                Some((last, body)) if is_delimiter(*last) => (body, Some(*last)),
                _ => (segment, None),
            };
            match std::str::from_utf8(body) {
                Ok(body) => {
                    for (offset, ch) in body.char_indices() {
                        let before = self.bytes.len();
                        let mut buffer = [0u8; 4];
                        for lower in ch.to_lowercase() {
                            self.bytes
                                .extend_from_slice(lower.encode_utf8(&mut buffer).as_bytes());
                        }
                        if self.bytes.len() - before != ch.len_utf8() {
                            self.shifts
                                .push((self.bytes.len(), position + offset + ch.len_utf8()));
                        }
                    }
                }
                Err(_) => self.bytes.extend(body.iter().map(u8::to_ascii_lowercase)),
            }
            position += body.len();
            if let Some(delimiter) = delimiter {
                self.bytes.push(delimiter);
                position += 1;
            }
        }
    }

    /// Offset in the original text of byte `index` of the folded copy.
    fn text_offset(&self, index: usize) -> usize {
        match self.shifts.partition_point(|(lower, _)| *lower <= index) {
            0 => index,
            at => {
                let (lower, text) = self.shifts[at - 1];
                text + (index - lower)
            }
        }
    }
}

fn is_delimiter(byte: u8) -> bool {
    matches!(byte, ENTRY_START | FIELD_SEPARATOR | 0xFE)
}

impl TextDb {
    pub fn new() -> Self {
        Self::from_bytes(Vec::new())
    }

    pub fn from_bytes(text: Vec<u8>) -> Self {
        let mut lower = CaseFolded::default();
        lower.extend(&text, 0);
        Self {
            text,
            lower,
            offsets: Mutex::new(HashMap::new()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Appends one record; `fields[0]` is the record id.
    pub fn insert<S: AsRef<str>>(&mut self, fields: &[S]) {
        let start = self.text.len();
        self.text.push(ENTRY_START);
        for (position, field) in fields.iter().enumerate() {
            if position > 0 {
                self.text.push(FIELD_SEPARATOR);
            }
            self.text.extend_from_slice(field.as_ref().as_bytes());
        }
        self.text.extend_from_slice(&ENTRY_END);
        self.lower.extend(&self.text, start);
    }

    /// Fields of record `id`, excluding the id itself.
    pub fn get(&self, id: &str) -> Option<Vec<&str>> {
        let cached = self
            .offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied();
        let (start, end) = match cached {
            Some(span) => span,
            None => {
                let mut needle = Vec::with_capacity(id.len() + 2);
                needle.push(ENTRY_START);
                needle.extend_from_slice(id.as_bytes());
                needle.push(FIELD_SEPARATOR);
                let index = memmem::find(&self.text, &needle)?;
                let span = self.entry_span(index)?;
                self.offsets
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id.to_string(), span);
                span
            }
        };
        let mut fields = self.fields(start, end)?;
        fields.remove(0);
        Some(fields)
    }

    /// Ids of records containing `needle`, ignoring case, in file order.
    pub fn search(&self, needle: &str) -> Vec<String> {
        let needle = needle.to_lowercase();
        self.find_all(&self.lower.bytes, needle.as_bytes())
            .into_iter()
            .filter_map(|index| self.entry_id(self.lower.text_offset(index).min(self.text.len() - 1)))
            .collect()
    }

    /// Ids of records containing the exact byte sequence `needle`.
    fn search_raw(&self, needle: &[u8]) -> Vec<String> {
        self.find_all(&self.text, needle)
            .into_iter()
            .filter_map(|index| self.entry_id(index))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.search_raw(&[ENTRY_START])
    }

    pub fn entries(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        self.find_all(&self.text, &[ENTRY_START])
            .into_iter()
            .filter_map(|index| {
                let (start, end) = self.entry_span(index)?;
                self.fields(start, end)
            })
    }

    fn fields(&self, start: usize, end: usize) -> Option<Vec<&str>> {
        self.text[start..end]
            .split(|byte| *byte == FIELD_SEPARATOR)
            .map(|field| std::str::from_utf8(field).ok())
            .collect()
    }

    /// Hit positions of `needle`, at most one per record.
    fn find_all(&self, haystack: &[u8], needle: &[u8]) -> Vec<usize> {
        let finder = memmem::Finder::new(needle);
        let mut hits = Vec::new();
        let mut start = 0;
        while start < haystack.len() {
            let Some(found) = finder.find(&haystack[start..]) else {
                break;
            };
            let index = start + found;
            hits.push(index);
            match memchr::memchr(ENTRY_START, &haystack[index + 1..]) {
                Some(next) => start = index + 1 + next,
                None => break,
            }
        }
        hits
    }

    /// Byte range of the record body around `index`, without delimiters.
    fn entry_span(&self, index: usize) -> Option<(usize, usize)> {
        let start = memchr::memrchr(ENTRY_START, &self.text[..=index])?;
        let end = index + memmem::find(&self.text[index..], &ENTRY_END)?;
        Some((start + 1, end))
    }

    fn entry_id(&self, index: usize) -> Option<String> {
        let (start, end) = self.entry_span(index)?;
        let body = &self.text[start..end];
        let id_end = memchr::memchr(FIELD_SEPARATOR, body).unwrap_or(body.len());
        let id = std::str::from_utf8(&body[..id_end]).ok()?.to_string();
        self.offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_insert((start, end));
        Some(id)
    }
}

impl Default for TextDb {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TextDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextDb")
            .field("bytes", &self.text.len())
            .finish()
    }
}

/// One taxon with its names ordered so the scientific name comes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRecord {
    pub taxid: TaxId,
    pub parent: TaxId,
    pub rank: String,
    /// `(name, name class)` pairs.
    pub names: Vec<(String, String)>,
}

impl TaxonRecord {
    pub fn scientific_name(&self) -> &str {
        self.names
            .first()
            .map(|(name, _)| name.as_str())
            .unwrap_or_default()
    }
}

fn name_order(names: &mut [(String, String)]) {
    names.sort_by(|(name_a, class_a), (name_b, class_b)| {
        (class_a != SCIENTIFIC_NAME, class_a, name_a).cmp(&(
            class_b != SCIENTIFIC_NAME,
            class_b,
            name_b,
        ))
    });
}

/// Builds taxon records from the contents of `names.dmp` and `nodes.dmp`.
///
/// Malformed lines and names without a node are skipped with a warning.
/// Records come out sorted by numeric taxid.
pub fn parse_taxdump(names: &str, nodes: &str) -> Vec<TaxonRecord> {
    let mut names_by_id: HashMap<&str, Vec<(String, String)>> = HashMap::new();
    for (line_num, line) in names.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = line
            .trim_end_matches(['\t', '\r', '\n', '|'])
            .split("\t|\t")
            .collect::<Vec<_>>();
        let [taxid, name, unique_name, name_class] = fields[..] else {
            warn!(line = line_num + 1, fields = fields.len(), "skipping malformed names.dmp line");
            continue;
        };
        let name = if unique_name.is_empty() { name } else { unique_name };
        names_by_id
            .entry(taxid.trim())
            .or_default()
            .push((name.to_string(), name_class.to_string()));
    }
    debug!("Parsed names for {} taxa", names_by_id.len());

    let mut nodes_by_id: HashMap<&str, (&str, &str)> = HashMap::new();
    for (line_num, line) in nodes.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split("\t|\t");
        match (fields.next(), fields.next(), fields.next()) {
            (Some(taxid), Some(parent), Some(rank)) => {
                nodes_by_id.insert(taxid.trim(), (parent.trim(), rank.trim_end_matches(['\t', '|'])));
            }
            _ => warn!(line = line_num + 1, "skipping malformed nodes.dmp line"),
        }
    }
    debug!("Parsed {} taxonomy nodes", nodes_by_id.len());

    let mut records = Vec::with_capacity(names_by_id.len());
    for (taxid, mut names) in names_by_id {
        let Some((parent, rank)) = nodes_by_id.get(taxid) else {
            warn!(taxid, "taxon has names but no node, skipping");
            continue;
        };
        let (Ok(taxid), Ok(parent)) = (taxid.parse::<TaxId>(), parent.parse::<TaxId>()) else {
            warn!(taxid, "non-numeric taxonomy id, skipping");
            continue;
        };
        name_order(&mut names);
        records.push(TaxonRecord {
            taxid,
            parent,
            rank: rank.to_string(),
            names,
        });
    }
    records.sort_by(|a, b| {
        a.taxid
            .numeric()
            .cmp(&b.taxid.numeric())
            .then_with(|| a.taxid.cmp(&b.taxid))
    });
    records
}

pub struct Taxonomy {
    text: TextDb,
    info: TextDb,
}

static DEFAULT: OnceLock<RwLock<Option<Arc<Taxonomy>>>> = OnceLock::new();

fn default_slot() -> &'static RwLock<Option<Arc<Taxonomy>>> {
    DEFAULT.get_or_init(|| RwLock::new(None))
}

impl Taxonomy {
    pub fn from_db_bytes(text: Vec<u8>, info: Vec<u8>) -> Self {
        Self {
            text: TextDb::from_bytes(text),
            info: TextDb::from_bytes(info),
        }
    }

    pub fn from_records(records: &[TaxonRecord]) -> Self {
        Self::from_records_with_progress(records, &crate::progress::NoProgress)
    }

    pub fn from_records_with_progress(records: &[TaxonRecord], progress: &dyn ProgressSink) -> Self {
        let mut text = TextDb::new();
        let mut info = TextDb::new();
        let mut milestones = Milestones::new(progress, records.len());
        for record in records {
            let mut entry = vec![
                record.taxid.as_str(),
                record.parent.as_str(),
                record.rank.as_str(),
            ];
            entry.extend(record.names.iter().map(|(name, _)| name.as_str()));
            text.insert(&entry);

            let mut info_entry = vec![record.taxid.as_str()];
            info_entry.extend(record.names.iter().map(|(_, class)| class.as_str()));
            info.insert(&info_entry);
            milestones.advance();
        }
        milestones.finish();
        Self { text, info }
    }

    /// Reads the packed record files produced by [`Taxonomy::write_archive`].
    pub fn from_archive(path: &Utf8Path) -> Result<Self, KiraError> {
        let mut members = fs_util::read_tar_gz(path.as_std_path(), &[TEXT_MEMBER, INFO_MEMBER])?;
        let text = members.remove(TEXT_MEMBER).unwrap_or_default();
        let info = members.remove(INFO_MEMBER).unwrap_or_default();
        Ok(Self::from_db_bytes(text, info))
    }

    /// Builds the store from an upstream `taxdump.tar.gz`.
    pub fn from_taxdump(path: &Utf8Path, progress: &dyn ProgressSink) -> Result<Self, KiraError> {
        let members = fs_util::read_tar_gz(path.as_std_path(), &["names.dmp", "nodes.dmp"])?;
        let names = String::from_utf8_lossy(&members["names.dmp"]);
        let nodes = String::from_utf8_lossy(&members["nodes.dmp"]);
        let records = parse_taxdump(&names, &nodes);
        info!(taxa = records.len(), "parsed NCBI taxdump");
        Ok(Self::from_records_with_progress(&records, progress))
    }

    /// Loads the store from the server-files cache, downloading it if needed.
    pub fn load<R: RemoteFiles>(
        files: &ServerFiles<R>,
        progress: &dyn ProgressSink,
    ) -> Result<Self, KiraError> {
        let path = files.ensure(DOMAIN, FILENAME, progress)?;
        Self::from_archive(&path)
    }

    /// Process-wide shared store, loaded on first use.
    pub fn get_default<R: RemoteFiles>(files: &ServerFiles<R>) -> Result<Arc<Taxonomy>, KiraError> {
        let slot = default_slot();
        if let Some(taxonomy) = slot.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(Arc::clone(taxonomy));
        }
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(taxonomy) = guard.as_ref() {
            return Ok(Arc::clone(taxonomy));
        }
        let taxonomy = Arc::new(Self::load(files, &crate::progress::NoProgress)?);
        *guard = Some(Arc::clone(&taxonomy));
        Ok(taxonomy)
    }

    /// Replaces the shared store with a fresh copy from disk.
    pub fn reload_default<R: RemoteFiles>(
        files: &ServerFiles<R>,
    ) -> Result<Arc<Taxonomy>, KiraError> {
        let mut guard = default_slot()
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let taxonomy = Arc::new(Self::load(files, &crate::progress::NoProgress)?);
        *guard = Some(Arc::clone(&taxonomy));
        Ok(taxonomy)
    }

    pub fn text_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn info_bytes(&self) -> &[u8] {
        self.info.as_bytes()
    }

    /// Packs both record files into a `.tar.gz` laid out like the server's.
    pub fn write_archive(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let bytes = fs_util::tar_gz_bytes(&[
            (TEXT_MEMBER, self.text.as_bytes()),
            (INFO_MEMBER, self.info.as_bytes()),
        ])?;
        Store::write_bytes_atomic(path, &bytes)
    }

    pub fn contains(&self, id: impl AsRef<str>) -> bool {
        self.text.get(id.as_ref()).is_some()
    }

    pub fn get(&self, id: impl AsRef<str>) -> Result<TaxonRecord, KiraError> {
        let id = id.as_ref().trim();
        let fields = self
            .text
            .get(id)
            .ok_or_else(|| KiraError::UnknownSpecies(id.to_string()))?;
        let [parent, rank, names @ ..] = fields.as_slice() else {
            return Err(KiraError::Archive(format!("malformed taxonomy record {id}")));
        };
        let classes = self.info.get(id).unwrap_or_default();
        let names = names
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let class = classes.get(position).copied().unwrap_or_default();
                (name.to_string(), class.to_string())
            })
            .collect();
        Ok(TaxonRecord {
            taxid: id.parse()?,
            parent: parent.parse()?,
            rank: rank.to_string(),
            names,
        })
    }

    pub fn scientific_name(&self, id: impl AsRef<str>) -> Result<String, KiraError> {
        Ok(self.get(id)?.scientific_name().to_string())
    }

    /// `(name, class)` pairs excluding the scientific name.
    pub fn other_names(&self, id: impl AsRef<str>) -> Result<Vec<(String, String)>, KiraError> {
        Ok(self.get(id)?.names.into_iter().skip(1).collect())
    }

    pub fn rank(&self, id: impl AsRef<str>) -> Result<String, KiraError> {
        Ok(self.get(id)?.rank)
    }

    pub fn parent(&self, id: impl AsRef<str>) -> Result<TaxId, KiraError> {
        Ok(self.get(id)?.parent)
    }

    /// Descendants of `id` down to `levels` generations, closest first.
    pub fn subnodes(&self, id: impl AsRef<str>, levels: usize) -> Result<Vec<TaxId>, KiraError> {
        let root = self.get(id)?.taxid;
        let mut result = Vec::new();
        let mut frontier = vec![root];
        for _ in 0..levels {
            let mut next = Vec::new();
            for parent in &frontier {
                let mut needle = vec![FIELD_SEPARATOR];
                needle.extend_from_slice(parent.as_str().as_bytes());
                needle.push(FIELD_SEPARATOR);
                for child in self.text.search_raw(&needle) {
                    if child == parent.as_str() {
                        continue;
                    }
                    let record = self.get(&child)?;
                    if record.parent == *parent {
                        next.push(record.taxid);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            result.extend(next.iter().cloned());
            frontier = next;
        }
        Ok(result)
    }

    /// Taxa whose record mentions `needle`, ignoring case.
    ///
    /// `species_only` keeps ranks containing "species"; `exact` keeps taxa
    /// with a name equal to the needle.
    pub fn search(&self, needle: &str, species_only: bool, exact: bool) -> Vec<TaxId> {
        let needle = needle.trim();
        let mut result = Vec::new();
        for id in self.text.search(needle) {
            let Ok(record) = self.get(&id) else {
                continue;
            };
            if species_only && !record.rank.contains("species") {
                continue;
            }
            if exact
                && !record
                    .names
                    .iter()
                    .any(|(name, _)| name.to_lowercase() == needle.to_lowercase())
            {
                continue;
            }
            result.push(record.taxid);
        }
        result
    }

    /// Path from the root down to `id`, both inclusive.
    pub fn lineage(&self, id: impl AsRef<str>) -> Result<Vec<TaxId>, KiraError> {
        let record = self.get(id)?;
        let mut result = vec![record.taxid.clone()];
        if record.taxid.is_root() {
            return Ok(result);
        }
        let mut current = record;
        loop {
            let parent = self.get(&current.parent)?;
            let reached_root = parent.taxid.is_root() || parent.scientific_name() == "root";
            if result.contains(&parent.taxid) {
                break;
            }
            result.push(parent.taxid.clone());
            if reached_root {
                break;
            }
            current = parent;
        }
        result.reverse();
        Ok(result)
    }

    pub fn taxids(&self) -> Vec<TaxId> {
        self.text
            .ids()
            .into_iter()
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    /// All records in file order.
    pub fn records(&self) -> Result<Vec<TaxonRecord>, KiraError> {
        self.text.ids().iter().map(|id| self.get(id)).collect()
    }

    /// Taxids a code may denote: a known taxid, a GO or KEGG organism code,
    /// a common scientific name or a short name such as "human".
    pub fn to_taxid(&self, code: &str) -> BTreeSet<TaxId> {
        let code = code.trim();
        if let Ok(taxid) = code.parse::<TaxId>() {
            if self.contains(&taxid) {
                return BTreeSet::from([taxid]);
            }
        }
        organism::taxids_for_code(code)
            .into_iter()
            .filter_map(|taxid| taxid.parse().ok())
            .collect()
    }

    pub fn to_unique_taxid(&self, code: &str) -> Result<TaxId, KiraError> {
        let mut candidates = self.to_taxid(code);
        match candidates.len() {
            0 => Err(KiraError::UnknownSpecies(code.to_string())),
            1 => candidates
                .pop_first()
                .ok_or_else(|| KiraError::UnknownSpecies(code.to_string())),
            _ => Err(KiraError::MultipleSpecies(
                candidates.into_iter().map(|id| id.to_string()).collect(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_db_lookup_and_search() {
        let mut db = TextDb::new();
        db.insert(&["1", "1", "no rank", "root"]);
        db.insert(&["9606", "9605", "species", "Homo sapiens", "human"]);
        db.insert(&["96060", "9606", "subspecies", "Homo sapiens x"]);

        assert_eq!(db.get("9606").unwrap(), vec!["9605", "species", "Homo sapiens", "human"]);
        assert!(db.get("960").is_none());
        assert_eq!(db.search("HOMO"), vec!["9606", "96060"]);
        assert_eq!(db.ids(), vec!["1", "9606", "96060"]);

        let reread = TextDb::from_bytes(db.as_bytes().to_vec());
        assert_eq!(reread.entries().count(), 3);
    }

    #[test]
    fn search_folds_non_ascii_case() {
        let mut db = TextDb::new();
        db.insert(&["1", "1", "no rank", "root"]);
        db.insert(&["7", "1", "species", "Ölandia İstanbulensis"]);
        db.insert(&["8", "1", "species", "Ölandia minor"]);
        assert_eq!(db.search("ölandia"), vec!["7", "8"]);
        assert_eq!(db.search("ÖLANDIA MINOR"), vec!["8"]);
        assert_eq!(db.search("stanbulensis"), vec!["7"]);

        let reread = TextDb::from_bytes(db.as_bytes().to_vec());
        assert_eq!(reread.search("ölandia minor"), vec!["8"]);
    }

    #[test]
    fn names_are_ordered_scientific_first() {
        let mut names = vec![
            ("man".to_string(), "common name".to_string()),
            ("Homo sapiens".to_string(), SCIENTIFIC_NAME.to_string()),
            ("human".to_string(), "genbank common name".to_string()),
        ];
        name_order(&mut names);
        assert_eq!(names[0].0, "Homo sapiens");
        assert_eq!(names[1].0, "man");
    }
}
