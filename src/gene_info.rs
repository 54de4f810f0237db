use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::fs_util;
use crate::matcher::{AliasMatcher, AliasSource, GeneMatcher};
use crate::progress::NoProgress;
use crate::serverfiles::{RemoteFiles, ServerFiles};

pub const DOMAIN: &str = "NCBI_geneinfo";

/// Species whose gene info is published under a reference strain id.
const STRAIN_TAXIDS: [(&str, &str); 4] = [
    ("2104", "272634"),
    ("4530", "39947"),
    ("5833", "36329"),
    ("4932", "559292"),
];

pub fn geneinfo_taxid(taxid: &str) -> &str {
    STRAIN_TAXIDS
        .iter()
        .find(|(species, _)| *species == taxid)
        .map(|(_, strain)| *strain)
        .unwrap_or(taxid)
}

pub fn filename(taxid: &str) -> String {
    format!("gene_info.{}.db", geneinfo_taxid(taxid))
}

/// One row of an NCBI `gene_info` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneInfo {
    pub tax_id: String,
    pub gene_id: String,
    pub symbol: Option<String>,
    pub locus_tag: Option<String>,
    pub synonyms: Vec<String>,
    pub db_xrefs: Vec<String>,
    pub chromosome: Option<String>,
    pub map_location: Option<String>,
    pub description: Option<String>,
    pub gene_type: Option<String>,
    pub symbol_from_nomenclature_authority: Option<String>,
    pub full_name_from_nomenclature_authority: Option<String>,
    pub nomenclature_status: Option<String>,
    pub other_designations: Vec<String>,
    pub modification_date: Option<String>,
}

fn single(value: &str) -> Option<String> {
    match value.trim() {
        "" | "-" => None,
        other => Some(other.to_string()),
    }
}

fn multiple(value: &str) -> Vec<String> {
    single(value)
        .map(|value| value.split('|').map(str::to_string).collect())
        .unwrap_or_default()
}

impl GeneInfo {
    pub fn parse(line: &str) -> Result<Self, KiraError> {
        let columns = line.split('\t').collect::<Vec<_>>();
        if columns.len() < 15 {
            return Err(KiraError::InvalidAnnotation(format!(
                "gene info line has {} columns, expected 15",
                columns.len()
            )));
        }
        Ok(Self {
            tax_id: columns[0].trim().to_string(),
            gene_id: columns[1].trim().to_string(),
            symbol: single(columns[2]),
            locus_tag: single(columns[3]),
            synonyms: multiple(columns[4]),
            db_xrefs: multiple(columns[5]),
            chromosome: single(columns[6]),
            map_location: single(columns[7]),
            description: single(columns[8]),
            gene_type: single(columns[9]),
            symbol_from_nomenclature_authority: single(columns[10]),
            full_name_from_nomenclature_authority: single(columns[11]),
            nomenclature_status: single(columns[12]),
            other_designations: multiple(columns[13]),
            modification_date: single(columns[14]),
        })
    }

    /// Gene id, symbol, locus tag and synonyms.
    pub fn aliases(&self) -> BTreeSet<String> {
        let mut aliases = BTreeSet::from([self.gene_id.clone()]);
        aliases.extend(self.symbol.iter().cloned());
        aliases.extend(self.locus_tag.iter().cloned());
        aliases.extend(self.synonyms.iter().cloned());
        aliases
    }
}

impl fmt::Display for GeneInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn one(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("-")
        }
        fn many(values: &[String]) -> String {
            if values.is_empty() {
                "-".to_string()
            } else {
                values.join("|")
            }
        }
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.tax_id,
            self.gene_id,
            one(&self.symbol),
            one(&self.locus_tag),
            many(&self.synonyms),
            many(&self.db_xrefs),
            one(&self.chromosome),
            one(&self.map_location),
            one(&self.description),
            one(&self.gene_type),
            one(&self.symbol_from_nomenclature_authority),
            one(&self.full_name_from_nomenclature_authority),
            one(&self.nomenclature_status),
            many(&self.other_designations),
            one(&self.modification_date),
        )
    }
}

/// Gene info records of one organism, keyed by gene id, with a matcher that
/// resolves symbols and synonyms to gene ids.
pub struct GeneInfoStore {
    taxid: String,
    records: BTreeMap<String, GeneInfo>,
    matcher: GeneMatcher,
}

impl GeneInfoStore {
    pub fn parse(taxid: &str, text: &str) -> Self {
        let mut records = BTreeMap::new();
        let mut malformed = 0usize;
        for line in text.lines() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            match GeneInfo::parse(line) {
                Ok(info) => {
                    records.insert(info.gene_id.clone(), info);
                }
                Err(_) => malformed += 1,
            }
        }
        if malformed > 0 {
            warn!(taxid, malformed, "skipped malformed gene info lines");
        }
        let groups = records.values().map(GeneInfo::aliases).collect();
        let mut matcher = GeneMatcher::sequence(vec![
            GeneMatcher::direct(true),
            GeneMatcher::aliases(Arc::new(AliasMatcher::new(groups, true))),
        ]);
        matcher.set_targets(records.keys());
        debug!(taxid, genes = records.len(), "parsed gene info");
        Self {
            taxid: taxid.to_string(),
            records,
            matcher,
        }
    }

    pub fn load<R: RemoteFiles>(files: &ServerFiles<R>, taxid: &str) -> Result<Self, KiraError> {
        let source = AliasSource::Ncbi(geneinfo_taxid(taxid).to_string());
        let path = files.ensure(DOMAIN, &source.filename(), &NoProgress)?;
        let bytes = fs_util::read_any(path.as_std_path())?;
        Ok(Self::parse(geneinfo_taxid(taxid), &String::from_utf8_lossy(&bytes)))
    }

    pub fn taxid(&self) -> &str {
        &self.taxid
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, gene_id: &str) -> Option<&GeneInfo> {
        self.records.get(gene_id)
    }

    /// Record of the gene uniquely matching `name`.
    pub fn info(&self, name: &str) -> Result<Option<&GeneInfo>, KiraError> {
        Ok(self
            .matcher
            .umatch(name)?
            .and_then(|gene_id| self.records.get(&gene_id)))
    }

    pub fn records(&self) -> impl Iterator<Item = &GeneInfo> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "9606\t2\tA2M\t-\tA2MD|CPAMD5\tMIM:103950|HGNC:HGNC:7\t12\t12p13.31\talpha-2-macroglobulin\tprotein-coding\tA2M\talpha-2-macroglobulin\tO\talpha-2-macroglobulin\t20240101";

    #[test]
    fn dash_means_empty() {
        let info = GeneInfo::parse(LINE).unwrap();
        assert_eq!(info.symbol.as_deref(), Some("A2M"));
        assert!(info.locus_tag.is_none());
        assert_eq!(info.synonyms, vec!["A2MD", "CPAMD5"]);
        assert_eq!(info.to_string(), LINE);
    }

    #[test]
    fn store_resolves_synonyms() {
        let store = GeneInfoStore::parse("9606", LINE);
        assert_eq!(store.info("cpamd5").unwrap().unwrap().gene_id, "2");
        assert_eq!(store.info("a2m").unwrap().unwrap().gene_id, "2");
        assert!(store.info("nothing").unwrap().is_none());
    }

    #[test]
    fn strain_mapping() {
        assert_eq!(filename("4932"), "gene_info.559292.db");
        assert_eq!(filename("9606"), "gene_info.9606.db");
    }
}
