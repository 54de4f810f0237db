use std::collections::BTreeSet;
use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_knowledge::annotations::TermEnrichmentOptions;
use kira_knowledge::app::{KnowledgeBase, PathwayQuery};
use kira_knowledge::config::ConfigLoader;
use kira_knowledge::domain::{Aspect, EvidenceCode};
use kira_knowledge::enrichment::ResultFilter;
use kira_knowledge::error::KiraError;
use kira_knowledge::output::{JsonOutput, StderrProgress};
use kira_knowledge::serverfiles::HttpRemoteFiles;
use kira_knowledge::stats::ProbabilityModel;

#[derive(Parser)]
#[command(name = "kira-kb")]
#[command(about = "GO, taxonomy and gene-set knowledge base with enrichment analysis")]
#[command(version, author)]
struct Cli {
    /// Path to a kira-kb.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand, about = "Query the NCBI taxonomy")]
    Taxonomy(TaxonomyCommand),
    #[command(subcommand, about = "Gene Ontology annotations and term enrichment")]
    Go(GoCommand),
    #[command(subcommand, about = "Gene set collections and pathway enrichment")]
    Genesets(GenesetsCommand),
    #[command(subcommand, about = "Inspect the local server-files cache")]
    Files(FilesCommand),
}

#[derive(Subcommand)]
enum TaxonomyCommand {
    #[command(about = "Find taxa by name")]
    Search {
        needle: String,
        /// Include ranks above species.
        #[arg(long)]
        all_ranks: bool,
        #[arg(long)]
        exact: bool,
    },
    #[command(about = "Print the lineage from the root to a taxon")]
    Lineage { organism: String },
    #[command(about = "Show a taxon record")]
    Info { organism: String },
}

#[derive(Args)]
struct GeneInput {
    /// Gene names or symbols.
    genes: Vec<String>,

    /// File with whitespace-separated gene names.
    #[arg(long)]
    genes_file: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    max_p: Option<f64>,
    #[arg(long)]
    min_count: Option<usize>,
    #[arg(long)]
    min_ref: Option<usize>,
}

#[derive(Subcommand)]
enum GoCommand {
    #[command(about = "Rank GO terms over-represented in a gene list")]
    Enrich {
        #[arg(long, short)]
        organism: String,
        #[command(flatten)]
        input: GeneInput,
        /// Reference genes; defaults to every annotated gene.
        #[arg(long)]
        reference_file: Option<Utf8PathBuf>,
        /// Comma-separated evidence codes, e.g. EXP,IDA.
        #[arg(long, value_delimiter = ',')]
        evidence: Vec<String>,
        #[arg(long, value_enum)]
        aspect: Vec<Aspect>,
        #[arg(long, value_enum, default_value = "binomial")]
        model: ProbabilityModel,
        #[arg(long)]
        slims: bool,
        #[arg(long)]
        no_fdr: bool,
        #[command(flatten)]
        filter: FilterArgs,
    },
    #[command(about = "List GO terms annotated to genes")]
    Terms {
        #[arg(long, short)]
        organism: String,
        #[command(flatten)]
        input: GeneInput,
        /// Skip ancestor terms.
        #[arg(long)]
        direct: bool,
        #[arg(long, value_delimiter = ',')]
        evidence: Vec<String>,
    },
}

#[derive(Subcommand)]
enum GenesetsCommand {
    #[command(about = "Score gene sets over-represented in a gene list")]
    Enrich {
        #[arg(long, short)]
        organism: Option<String>,
        #[command(flatten)]
        input: GeneInput,
        /// Hierarchy path such as `KEGG/pathways`; repeatable.
        #[arg(long)]
        hierarchy: Vec<String>,
        /// GMT file; repeatable.
        #[arg(long)]
        gmt: Vec<Utf8PathBuf>,
        /// Also score GO terms of the organism as gene sets.
        #[arg(long, requires = "organism")]
        go_terms: bool,
        #[arg(long)]
        reference_file: Option<Utf8PathBuf>,
        #[arg(long, value_enum, default_value = "hypergeometric")]
        model: ProbabilityModel,
        #[command(flatten)]
        filter: FilterArgs,
    },
    #[command(about = "List available gene set collections")]
    List {
        #[arg(long, short)]
        organism: Option<String>,
        /// Only collections already on disk.
        #[arg(long)]
        local: bool,
    },
    #[command(about = "Register a GMT file as a local collection")]
    Register {
        gmt: Utf8PathBuf,
        /// Hierarchy path such as `custom/mine`.
        #[arg(long)]
        hierarchy: String,
        #[arg(long, short)]
        organism: Option<String>,
    },
}

#[derive(Subcommand)]
enum FilesCommand {
    #[command(about = "List local and server files of a domain")]
    List { domain: String },
    #[command(about = "Download a file unless the local copy is current")]
    Ensure { domain: String, filename: String },
    #[command(about = "Show file metadata")]
    Info { domain: String, filename: String },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::UnknownSpecies(_)
        | KiraError::NotFound { .. }
        | KiraError::NoGeneSets { .. }
        | KiraError::MissingConfig => 2,
        KiraError::Network(_) | KiraError::NotAuthorized { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let kb = KnowledgeBase::from_config(config)?;

    match cli.command {
        Commands::Taxonomy(command) => run_taxonomy(&kb, command),
        Commands::Go(command) => run_go(&kb, command),
        Commands::Genesets(command) => run_genesets(&kb, command),
        Commands::Files(command) => run_files(&kb, command),
    }
}

fn run_taxonomy(kb: &KnowledgeBase<HttpRemoteFiles>, command: TaxonomyCommand) -> miette::Result<()> {
    match command {
        TaxonomyCommand::Search {
            needle,
            all_ranks,
            exact,
        } => {
            let hits = kb
                .search_taxonomy(&needle, !all_ranks, exact)?
                .iter()
                .map(|taxid| kb.taxon_summary(taxid))
                .collect::<Result<Vec<_>, _>>()?;
            JsonOutput::print_taxa(&hits).into_diagnostic()
        }
        TaxonomyCommand::Lineage { organism } => {
            JsonOutput::print_taxa(&kb.lineage(&organism)?).into_diagnostic()
        }
        TaxonomyCommand::Info { organism } => {
            JsonOutput::print_taxon(&kb.taxon_info(&organism)?).into_diagnostic()
        }
    }
}

fn run_go(kb: &KnowledgeBase<HttpRemoteFiles>, command: GoCommand) -> miette::Result<()> {
    match command {
        GoCommand::Enrich {
            organism,
            input,
            reference_file,
            evidence,
            aspect,
            model,
            slims,
            no_fdr,
            filter,
        } => {
            let genes = read_genes(&input)?;
            let options = TermEnrichmentOptions {
                reference: reference_file.as_ref().map(read_gene_file).transpose()?,
                evidence_codes: parse_evidence(&evidence)?,
                aspects: (!aspect.is_empty()).then(|| aspect.into_iter().collect()),
                model,
                slims_only: slims,
                use_fdr: !no_fdr,
            };
            let progress = StderrProgress::new("GO enrichment");
            let result = kb.enrich_terms(&organism, &genes, &options, &filter.into(), &progress);
            progress.finish();
            JsonOutput::print_terms(&result?).into_diagnostic()
        }
        GoCommand::Terms {
            organism,
            input,
            direct,
            evidence,
        } => {
            let genes = read_genes(&input)?;
            let options = TermEnrichmentOptions {
                evidence_codes: parse_evidence(&evidence)?,
                ..TermEnrichmentOptions::default()
            };
            let progress = StderrProgress::new("GO annotations");
            let result = kb.annotated_terms(&organism, &genes, direct, &options, &progress);
            progress.finish();
            JsonOutput::print_annotated(&result?).into_diagnostic()
        }
    }
}

fn run_genesets(kb: &KnowledgeBase<HttpRemoteFiles>, command: GenesetsCommand) -> miette::Result<()> {
    match command {
        GenesetsCommand::Enrich {
            organism,
            input,
            hierarchy,
            gmt,
            go_terms,
            reference_file,
            model,
            filter,
        } => {
            let genes = read_genes(&input)?;
            let query = PathwayQuery {
                organism,
                hierarchies: hierarchy.iter().map(|path| split_hierarchy(path)).collect(),
                gmt_files: gmt,
                go_terms,
                reference: reference_file.as_ref().map(read_gene_file).transpose()?,
                model: Some(model),
            };
            let progress = StderrProgress::new("gene set enrichment");
            let result = kb.enrich_pathways(&genes, &query, &filter.into(), &progress);
            progress.finish();
            JsonOutput::print_pathways(&result?).into_diagnostic()
        }
        GenesetsCommand::List { organism, local } => {
            let organism = organism
                .as_deref()
                .map(|organism| kb.resolve_taxid(organism))
                .transpose()?;
            let available = kb.genesets().list_all(
                kb.files(),
                organism.as_ref().map(|taxid| taxid.as_str()),
                local.then_some(true),
            )?;
            JsonOutput::print_availability(&available).into_diagnostic()
        }
        GenesetsCommand::Register {
            gmt,
            hierarchy,
            organism,
        } => {
            let contents = fs::read_to_string(gmt.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("read {gmt}: {err}")))?;
            let name = gmt.file_name().unwrap_or(gmt.as_str());
            let mut collection = kira_knowledge::genesets::parse_gmt(&contents, name);
            let path = split_hierarchy(&hierarchy);
            collection.set_hierarchy(&path.iter().map(String::as_str).collect::<Vec<_>>());
            if let Some(organism) = organism {
                let taxid = kb.resolve_taxid(&organism)?;
                collection = collection
                    .into_iter()
                    .map(|set| set.with_organism(taxid.as_str()))
                    .collect();
            }
            let filename = kb.genesets().register_local(&collection)?;
            println!("{filename}");
            Ok(())
        }
    }
}

fn run_files(kb: &KnowledgeBase<HttpRemoteFiles>, command: FilesCommand) -> miette::Result<()> {
    match command {
        FilesCommand::List { domain } => {
            JsonOutput::print_files(&kb.list_files(&domain)?).into_diagnostic()
        }
        FilesCommand::Ensure { domain, filename } => {
            let progress = StderrProgress::new(&filename);
            let result = kb.ensure_file(&domain, &filename, &progress);
            progress.finish();
            JsonOutput::print_ensure(&result?).into_diagnostic()
        }
        FilesCommand::Info { domain, filename } => {
            JsonOutput::print_file_info(&kb.file_info(&domain, &filename)?).into_diagnostic()
        }
    }
}

impl From<FilterArgs> for ResultFilter {
    fn from(args: FilterArgs) -> Self {
        ResultFilter {
            max_p: args.max_p,
            min_count: args.min_count,
            min_ref: args.min_ref,
        }
    }
}

fn read_genes(input: &GeneInput) -> Result<Vec<String>, KiraError> {
    let mut genes = input.genes.clone();
    if let Some(path) = &input.genes_file {
        genes.extend(read_gene_file(path)?);
    }
    Ok(genes)
}

fn read_gene_file(path: &Utf8PathBuf) -> Result<Vec<String>, KiraError> {
    let contents = fs::read_to_string(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
    Ok(contents.split_whitespace().map(str::to_string).collect())
}

fn parse_evidence(codes: &[String]) -> Result<Option<BTreeSet<EvidenceCode>>, KiraError> {
    if codes.is_empty() {
        return Ok(None);
    }
    codes
        .iter()
        .map(|code| code.parse())
        .collect::<Result<BTreeSet<_>, _>>()
        .map(Some)
}

fn split_hierarchy(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
