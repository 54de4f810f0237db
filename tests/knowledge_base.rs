mod common;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_knowledge::annotations::{self, TermEnrichmentOptions};
use kira_knowledge::app::{KnowledgeBase, PathwayQuery};
use kira_knowledge::config::ResolvedConfig;
use kira_knowledge::enrichment::ResultFilter;
use kira_knowledge::error::KiraError;
use kira_knowledge::fs_util;
use kira_knowledge::genesets::{self, GeneSet, GeneSetCollection};
use kira_knowledge::ontology;
use kira_knowledge::progress::NoProgress;
use kira_knowledge::stats::ProbabilityModel;
use kira_knowledge::taxonomy::{self, Taxonomy, parse_taxdump};

use common::{A, B, C, MemoryRemote, SMALL_OBO, gaf_line};

const NAMES: &str = "1\t|\troot\t|\t\t|\tscientific name\t|
2759\t|\tEukaryota\t|\t\t|\tscientific name\t|
9605\t|\tHomo\t|\t\t|\tscientific name\t|
9606\t|\tHomo sapiens\t|\t\t|\tscientific name\t|
9606\t|\thuman\t|\t\t|\tgenbank common name\t|
63221\t|\tHomo sapiens neanderthalensis\t|\t\t|\tscientific name\t|
";

const NODES: &str = "1\t|\t1\t|\tno rank\t|
2759\t|\t1\t|\tsuperkingdom\t|
9605\t|\t2759\t|\tgenus\t|
9606\t|\t9605\t|\tspecies\t|
63221\t|\t9606\t|\tsubspecies\t|
";

fn knowledge_base() -> (tempfile::TempDir, KnowledgeBase<MemoryRemote>) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = ResolvedConfig {
        schema_version: 1,
        server_url: "http://localhost/".to_string(),
        cache_root: root,
        result_cache_capacity: 4,
        http_timeout_secs: 5,
        username: None,
        password: None,
    };
    let remote = MemoryRemote::new();

    let obo = fs_util::tar_gz_bytes(&[(ontology::MEMBER, SMALL_OBO.as_bytes())]).unwrap();
    remote.publish(ontology::DOMAIN, ontology::FILENAME, &obo, "1");

    let gaf = [
        gaf_line("g1", C, "EXP", "P"),
        gaf_line("g2", C, "EXP", "P"),
        gaf_line("g3", B, "EXP", "P"),
        gaf_line("g4", A, "EXP", "P"),
    ]
    .join("\n");
    let association = fs_util::tar_gz_bytes(&[(annotations::MEMBER, gaf.as_bytes())]).unwrap();
    remote.publish(
        annotations::DOMAIN,
        &annotations::filename("goa_human"),
        &association,
        "1",
    );

    let taxonomy = Taxonomy::from_records(&parse_taxdump(NAMES, NODES));
    let archive = fs_util::tar_gz_bytes(&[
        (taxonomy::TEXT_MEMBER, taxonomy.text_bytes()),
        (taxonomy::INFO_MEMBER, taxonomy.info_bytes()),
    ])
    .unwrap();
    remote.publish(taxonomy::DOMAIN, taxonomy::FILENAME, &archive, "1");

    let pathways = GeneSetCollection::from_iter([
        GeneSet::new("P1", ["g1", "g2"])
            .with_name("first pathway")
            .with_hierarchy(&["KEGG", "pathways"])
            .with_organism("9606"),
        GeneSet::new("P2", ["g3", "g4", "g5"])
            .with_hierarchy(&["KEGG", "pathways"])
            .with_organism("9606"),
    ]);
    remote.publish(
        genesets::DOMAIN,
        &genesets::filename(&["KEGG", "pathways"], Some("9606")),
        &serde_json::to_vec(&pathways).unwrap(),
        "1",
    );

    (temp, KnowledgeBase::new(config, remote))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn term_enrichment_through_the_facade() {
    let (_temp, kb) = knowledge_base();
    let options = TermEnrichmentOptions {
        model: ProbabilityModel::Hypergeometric,
        use_fdr: false,
        ..TermEnrichmentOptions::default()
    };
    let result = kb
        .enrich_terms(
            "human",
            &strings(&["g1_alias", "G2"]),
            &options,
            &ResultFilter::default(),
            &NoProgress,
        )
        .unwrap();

    assert_eq!(result.organism, "goa_human");
    assert_eq!(result.ontology_version.as_deref(), Some("releases/2024-01-01"));
    let first = &result.terms[0];
    assert_eq!(first.term_id, C);
    assert_eq!(first.name, "gamma");
    assert_eq!(first.namespace.as_deref(), Some("biological_process"));
    assert_eq!(first.genes, strings(&["g1_alias", "G2"]));
    assert_eq!(first.count, 2);
    assert!((first.p_value - 1.0 / 6.0).abs() < 1e-9);
    assert!(result.terms.windows(2).all(|pair| pair[0].p_value <= pair[1].p_value));

    let filtered = kb
        .enrich_terms(
            "9606",
            &strings(&["g1", "g2"]),
            &options,
            &ResultFilter {
                max_p: Some(0.6),
                ..ResultFilter::default()
            },
            &NoProgress,
        )
        .unwrap();
    assert_eq!(
        filtered.terms.iter().map(|term| term.term_id.as_str()).collect::<Vec<_>>(),
        vec![C, B]
    );
}

#[test]
fn annotated_terms_through_the_facade() {
    let (_temp, kb) = knowledge_base();
    let result = kb
        .annotated_terms(
            "goa_human",
            &strings(&["g3"]),
            false,
            &TermEnrichmentOptions::default(),
            &NoProgress,
        )
        .unwrap();
    assert!(!result.direct_only);
    assert_eq!(
        result.terms.iter().map(|term| term.term_id.as_str()).collect::<Vec<_>>(),
        vec![A, B]
    );
    assert_eq!(result.terms[1].name, "beta");
    assert_eq!(result.terms[1].genes, strings(&["g3"]));
}

#[test]
fn organisms_resolve_through_tables_and_taxonomy() {
    let (_temp, kb) = knowledge_base();
    assert_eq!(kb.resolve_taxid("hsa").unwrap().as_str(), "9606");
    assert_eq!(
        kb.resolve_taxid("Homo sapiens neanderthalensis").unwrap().as_str(),
        "63221"
    );
    assert_matches!(
        kb.resolve_taxid("yeast"),
        Err(KiraError::MultipleSpecies(_))
    );
    assert_matches!(
        kb.resolve_taxid("unheard of"),
        Err(KiraError::UnknownSpecies(_))
    );
    assert_eq!(kb.go_code("9606").unwrap(), "goa_human");

    let hits = kb.search_taxonomy("  HOMO sapiens ", false, false).unwrap();
    assert_eq!(hits, kb.search_taxonomy("homo sapiens", false, false).unwrap());
    assert_eq!(hits.len(), 2);

    let info = kb.taxon_info("Homo sapiens neanderthalensis").unwrap();
    assert_eq!(info.rank, "subspecies");
    assert_eq!(info.parent.as_str(), "9606");
    assert_eq!(
        info.lineage
            .iter()
            .map(|taxon| taxon.scientific_name.as_str())
            .collect::<Vec<_>>(),
        vec!["root", "Eukaryota", "Homo", "Homo sapiens", "Homo sapiens neanderthalensis"]
    );
}

#[test]
fn pathway_enrichment_maps_input_names() {
    let (_temp, kb) = knowledge_base();
    let query = PathwayQuery {
        organism: Some("human".to_string()),
        hierarchies: vec![strings(&["KEGG"])],
        ..PathwayQuery::default()
    };
    let result = kb
        .enrich_pathways(
            &strings(&["G1", "g2_alias", "unknown"]),
            &query,
            &ResultFilter::default(),
            &NoProgress,
        )
        .unwrap();
    assert_eq!(result.organism.as_deref(), Some("9606"));
    assert_eq!(result.sets_tested, 2);
    assert_eq!(result.unmatched_genes, strings(&["unknown"]));
    assert_eq!(result.pathways.len(), 1);
    let hit = &result.pathways[0];
    assert_eq!(hit.id, "P1");
    assert_eq!(hit.name.as_deref(), Some("first pathway"));
    assert_eq!(hit.genes, strings(&["g1", "g2"]));
    assert_eq!(hit.ref_count, 2);
}

#[test]
fn pathway_enrichment_from_gmt_without_organism() {
    let (temp, kb) = knowledge_base();
    let gmt = Utf8PathBuf::from_path_buf(temp.path().join("mine.gmt")).unwrap();
    std::fs::write(gmt.as_std_path(), "S1\tsmall\tA1\tA2\nS2\tother\tB1\tB2\tB3\n").unwrap();

    let query = PathwayQuery {
        gmt_files: vec![gmt],
        reference: Some(strings(&["A1", "A2", "B1", "B2", "B3", "a1"])),
        model: Some(ProbabilityModel::Binomial),
        ..PathwayQuery::default()
    };
    let result = kb
        .enrich_pathways(
            &strings(&["A1", "A2", "a2"]),
            &query,
            &ResultFilter::default(),
            &NoProgress,
        )
        .unwrap();
    assert_eq!(result.organism, None);
    assert_eq!(result.unmatched_genes, strings(&["a2"]));
    assert_eq!(result.pathways[0].id, "S1");
    assert_eq!(result.pathways[0].hierarchy, strings(&["Custom", "mine.gmt"]));
    assert!((result.pathways[0].enrichment - 2.5).abs() < 1e-12);
}

#[test]
fn file_listing_and_ensure() {
    let (_temp, kb) = knowledge_base();
    let ensured = kb
        .ensure_file(ontology::DOMAIN, ontology::FILENAME, &NoProgress)
        .unwrap();
    assert!(ensured.path.as_std_path().is_file());
    assert_eq!(ensured.info.unwrap().version, "1");

    let listed = kb.list_files(ontology::DOMAIN).unwrap();
    assert_eq!(listed.local, strings(&[ontology::FILENAME]));
    assert_eq!(listed.remote.unwrap().len(), 2);
    assert_eq!(kb.file_info(taxonomy::DOMAIN, taxonomy::FILENAME).unwrap().version, "1");

    kb.files().remote().set_offline(true);
    let offline = kb.list_files(ontology::DOMAIN).unwrap();
    assert_eq!(offline.local, strings(&[ontology::FILENAME]));
    assert!(offline.remote.is_none());
    assert_matches!(
        kb.ensure_file("GO", "absent.obo", &NoProgress),
        Err(KiraError::Network(_))
    );
}

#[test]
fn pathway_enrichment_over_go_term_sets() {
    let (_temp, kb) = knowledge_base();
    let sets = kb.go_gene_sets("human", None, &NoProgress).unwrap();
    assert_eq!(sets.len(), 3);
    assert!(sets.iter().all(|set| set.organism.as_deref() == Some("9606")));

    let query = PathwayQuery {
        organism: Some("human".to_string()),
        go_terms: true,
        ..PathwayQuery::default()
    };
    let result = kb
        .enrich_pathways(&strings(&["g1", "g2"]), &query, &ResultFilter::default(), &NoProgress)
        .unwrap();
    assert_eq!(result.sets_tested, 3);
    assert_eq!(
        result.pathways.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>(),
        vec![C, B, A]
    );
    assert_eq!(result.pathways[0].key, C);
    assert_eq!(result.pathways[0].name.as_deref(), Some("gamma"));
    assert_eq!(result.pathways[0].hierarchy, strings(&["GO", "biological_process"]));
    assert!((result.pathways[0].p_value - 0.5).abs() < 1e-9);

    assert_matches!(
        kb.enrich_pathways(
            &strings(&["g1"]),
            &PathwayQuery {
                go_terms: true,
                ..PathwayQuery::default()
            },
            &ResultFilter::default(),
            &NoProgress,
        ),
        Err(KiraError::NoGeneSets { .. })
    );
}
