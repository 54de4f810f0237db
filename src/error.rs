use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid taxonomy id: {0}")]
    InvalidTaxId(String),

    #[error("invalid evidence code: {0}")]
    InvalidEvidenceCode(String),

    #[error("invalid GO aspect: {0} (expected P, F or C)")]
    InvalidAspect(String),

    #[error("unknown species: {0}")]
    #[diagnostic(help("try `kira-kb taxonomy search <name>` to find the taxonomy id"))]
    UnknownSpecies(String),

    #[error("ambiguous organism code, candidates: {}", .0.join(", "))]
    MultipleSpecies(Vec<String>),

    #[error("invalid ontology revision: {0}")]
    InvalidRevision(String),

    #[error("OBO parse error at line {line}: {reason}")]
    OboParse { line: usize, reason: String },

    #[error("malformed gene association line: {0}")]
    InvalidAnnotation(String),

    #[error("server files request failed: {0}")]
    Network(String),

    #[error("not authorized to access {domain}/{filename}")]
    #[diagnostic(help("set `username` in kira-kb.json and export KIRA_KB_PASSWORD"))]
    NotAuthorized { domain: String, filename: String },

    #[error("file not found on server: {domain}/{filename}")]
    NotFound { domain: String, filename: String },

    #[error("missing config file kira-kb.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("result cache error: {0}")]
    Cache(String),

    #[error("gene matcher used before targets were set")]
    TargetsNotSet,

    #[error("statistics error: {0}")]
    Statistics(String),

    #[error("no gene sets found for hierarchy {hierarchy:?} and organism {organism:?}")]
    NoGeneSets {
        hierarchy: Vec<String>,
        organism: Option<String>,
    },

    #[error("invalid gene set file name: {0}")]
    InvalidGeneSetFile(String),

    #[error("gene set collection cannot be registered: {0}")]
    GeneSetRegistration(String),
}
