pub mod annotations;
pub mod app;
pub mod config;
pub mod domain;
pub mod enrichment;
pub mod error;
pub mod fs_util;
pub mod gene_info;
pub mod genesets;
pub mod matcher;
pub mod ontology;
pub mod organism;
pub mod output;
pub mod progress;
pub mod result_cache;
pub mod serverfiles;
pub mod stats;
pub mod store;
pub mod taxonomy;
