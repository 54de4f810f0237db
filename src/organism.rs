//! Static organism tables: common model organisms, their short names and
//! the per-database organism codes used in file names.

use std::collections::BTreeSet;

/// Common organisms as `(taxid, scientific name)`.
pub const COMMON_ORGANISMS: [(&str, &str); 21] = [
    ("3702", "Arabidopsis thaliana"),
    ("9913", "Bos taurus"),
    ("6239", "Caenorhabditis elegans"),
    ("3055", "Chlamydomonas reinhardtii"),
    ("7955", "Danio rerio"),
    ("352472", "Dictyostelium discoideum"),
    ("7227", "Drosophila melanogaster"),
    ("562", "Escherichia coli"),
    ("11103", "Hepatitis C virus"),
    ("9606", "Homo sapiens"),
    ("10090", "Mus musculus"),
    ("2104", "Mycoplasma pneumoniae"),
    ("4530", "Oryza sativa"),
    ("5833", "Plasmodium falciparum"),
    ("4754", "Pneumocystis carinii"),
    ("10116", "Rattus norvegicus"),
    ("4932", "Saccharomyces cerevisiae"),
    ("4896", "Schizosaccharomyces pombe"),
    ("31033", "Takifugu rubripes"),
    ("8355", "Xenopus laevis"),
    ("4577", "Zea mays"),
];

const ESSENTIAL_TAXIDS: [&str; 5] = ["352472", "7227", "9606", "10090", "4932"];

const SHORT_NAMES: [(&str, &[&str]); 21] = [
    ("3702", &["arabidopsis", "thaliana", "plant"]),
    ("9913", &["cattle", "cow"]),
    ("6239", &["nematode", "roundworm"]),
    ("3055", &["algae"]),
    ("7955", &["zebrafish"]),
    ("352472", &["dicty", "amoeba", "slime mold"]),
    ("7227", &["fly", "fruit fly", "vinegar fly"]),
    ("562", &["ecoli", "coli", "bacterium"]),
    ("11103", &["virus, hepatitis"]),
    ("9606", &["human"]),
    ("10090", &["mouse", "mus"]),
    ("2104", &["bacterium", "mycoplasma"]),
    ("4530", &["asian rice", "rice", "cereal", "plant"]),
    ("5833", &["plasmodium", "malaria", "parasite"]),
    ("4754", &["pneumonia", "fungus"]),
    ("10116", &["rat", "laboratory rat"]),
    ("4932", &["yeast", "baker yeast", "brewer yeast"]),
    ("4896", &["yeast", "fission yeast"]),
    ("31033", &["fish", "pufferfish"]),
    ("8355", &["frog", "african clawed frog"]),
    ("4577", &["corn", "cereal grain", "plant"]),
];

/// GO annotation file codes (`gene_association.<code>`).
const GO_CODES: [(&str, &str); 14] = [
    ("3702", "tair"),
    ("9913", "goa_cow"),
    ("6239", "wb"),
    ("7955", "zfin"),
    ("352472", "dictyBase"),
    ("7227", "fb"),
    ("562", "ecocyc"),
    ("9606", "goa_human"),
    ("10090", "mgi"),
    ("4530", "gramene_oryza"),
    ("5833", "GeneDB_Pfalciparum"),
    ("10116", "rgd"),
    ("4932", "sgd"),
    ("4896", "GeneDB_Spombe"),
];

/// Strain and subspecies ids folded onto the species carrying GO annotations.
const GO_STRAIN_MAP: [(&str, &str); 9] = [
    ("297284", "9913"),
    ("30523", "9913"),
    ("5782", "352472"),
    ("44689", "352472"),
    ("366501", "352472"),
    ("83333", "562"),
    ("39947", "4530"),
    ("39946", "4530"),
    ("4529", "4530"),
];

/// KEGG organism codes, resolved to species-level taxids.
const KEGG_CODES: [(&str, &str); 12] = [
    ("ath", "3702"),
    ("bta", "9913"),
    ("cel", "6239"),
    ("dre", "7955"),
    ("ddi", "352472"),
    ("dme", "7227"),
    ("hsa", "9606"),
    ("mmu", "10090"),
    ("osa", "4530"),
    ("rno", "10116"),
    ("sce", "4932"),
    ("spo", "4896"),
];

pub fn common_taxids() -> Vec<&'static str> {
    COMMON_ORGANISMS.iter().map(|(taxid, _)| *taxid).collect()
}

pub fn essential_taxids() -> Vec<&'static str> {
    ESSENTIAL_TAXIDS.to_vec()
}

pub fn common_taxid_to_name(taxid: &str) -> Option<&'static str> {
    COMMON_ORGANISMS
        .iter()
        .find(|(id, _)| *id == taxid)
        .map(|(_, name)| *name)
}

pub fn taxname_to_taxid(name: &str) -> Option<&'static str> {
    COMMON_ORGANISMS
        .iter()
        .find(|(_, scientific)| scientific.eq_ignore_ascii_case(name.trim()))
        .map(|(taxid, _)| *taxid)
}

pub fn shortnames(taxid: &str) -> &'static [&'static str] {
    SHORT_NAMES
        .iter()
        .find(|(id, _)| *id == taxid)
        .map(|(_, names)| *names)
        .unwrap_or(&[])
}

/// GO organism code of `taxid`, following strain-to-species folding.
pub fn go_code(taxid: &str) -> Option<&'static str> {
    let species = GO_STRAIN_MAP
        .iter()
        .find(|(strain, _)| *strain == taxid)
        .map(|(_, species)| *species)
        .unwrap_or(taxid);
    GO_CODES
        .iter()
        .find(|(id, _)| *id == species)
        .map(|(_, code)| *code)
}

pub fn kegg_code(taxid: &str) -> Option<&'static str> {
    KEGG_CODES
        .iter()
        .find(|(_, id)| *id == taxid)
        .map(|(code, _)| *code)
}

/// Taxids that a non-numeric organism code may denote: GO and KEGG codes,
/// common scientific names and short names. Matching ignores ASCII case.
pub fn taxids_for_code(code: &str) -> BTreeSet<&'static str> {
    let code = code.trim();
    let mut result = BTreeSet::new();
    result.extend(
        GO_CODES
            .iter()
            .filter(|(_, go)| go.eq_ignore_ascii_case(code))
            .map(|(taxid, _)| *taxid),
    );
    result.extend(
        KEGG_CODES
            .iter()
            .filter(|(kegg, _)| kegg.eq_ignore_ascii_case(code))
            .map(|(_, taxid)| *taxid),
    );
    result.extend(taxname_to_taxid(code));
    result.extend(
        SHORT_NAMES
            .iter()
            .filter(|(_, names)| names.iter().any(|name| name.eq_ignore_ascii_case(code)))
            .map(|(taxid, _)| *taxid),
    );
    result
}
