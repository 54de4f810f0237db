mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_knowledge::annotations::Annotations;
use kira_knowledge::domain::EvidenceCode;
use kira_knowledge::enrichment::{self, ResultFilter};
use kira_knowledge::error::KiraError;
use kira_knowledge::genesets::{
    self, Availability, CollectionSpec, GeneSet, GeneSetCollection, GeneSetRegistry,
};
use kira_knowledge::ontology::Ontology;
use kira_knowledge::progress::NoProgress;
use kira_knowledge::serverfiles::ServerFiles;
use kira_knowledge::stats::{self, ProbabilityModel};
use kira_knowledge::store::Store;

use common::{A, B, C, MemoryRemote, SMALL_OBO, gaf_line};

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    files: ServerFiles<MemoryRemote>,
    registry: GeneSetRegistry,
}

fn fixture() -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new_with_root(root.clone());
    let registry = GeneSetRegistry::new(&store);
    Fixture {
        _temp: temp,
        root,
        files: ServerFiles::new(store, MemoryRemote::new()),
        registry,
    }
}

fn genes(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn kegg_collection() -> GeneSetCollection {
    GeneSetCollection::from_iter([
        GeneSet::new("hsa00010", ["G1", "G2", "G3"])
            .with_name("Glycolysis")
            .with_hierarchy(&["KEGG", "pathways"])
            .with_organism("9606"),
        GeneSet::new("hsa00020", ["G4", "G5"])
            .with_name("TCA cycle")
            .with_hierarchy(&["KEGG", "pathways"])
            .with_organism("9606"),
    ])
}

fn publish(fixture: &Fixture, collection: &GeneSetCollection, hierarchy: &[&str], organism: &str) {
    let name = genesets::filename(hierarchy, Some(organism));
    let payload = serde_json::to_vec(collection).unwrap();
    fixture
        .files
        .remote()
        .publish(genesets::DOMAIN, &name, &payload, "1");
}

#[test]
fn filenames_round_trip() {
    let name = genesets::filename(&["GO", "biological_process"], Some("9606"));
    assert_eq!(name, "gs_GO_._biological_process_._9606.pck");
    assert!(genesets::is_genesets_file(&name));
    assert_eq!(
        genesets::parse_filename(&name).unwrap(),
        (vec!["GO".to_string(), "biological_process".to_string()], Some("9606".to_string()))
    );

    let no_organism = genesets::filename(&["Custom", "mine"], None);
    assert_eq!(genesets::parse_filename(&no_organism).unwrap().1, None);
    assert_matches!(
        genesets::parse_filename("pathways.gmt"),
        Err(KiraError::InvalidGeneSetFile(_))
    );
}

#[test]
fn gmt_sets_land_under_custom_hierarchy() {
    let collection = genesets::parse_gmt("s1\tdescription\tA\tB\ts2_dup\ns2\t\tC\n", "mine.gmt");
    assert_eq!(collection.len(), 2);
    assert_eq!(collection.get("s1").unwrap().genes, genes(&["A", "B", "s2_dup"]));
    assert!(collection.get("s2").unwrap().description.is_none());
    assert_eq!(
        collection.hierarchies().unwrap(),
        BTreeSet::from([vec!["Custom".to_string(), "mine.gmt".to_string()]])
    );
}

#[test]
fn collection_stats_and_organism() {
    let collection = kegg_collection();
    let stats = collection.stats();
    assert_eq!(stats.sets, 2);
    assert_eq!(stats.unique_genes, 5);
    assert!((stats.mean_size - 2.5).abs() < 1e-12);
    assert_eq!(collection.common_organism().unwrap().as_deref(), Some("9606"));
    assert_eq!(collection.common_hierarchy().unwrap(), vec!["KEGG", "pathways"]);

    let mut mixed = collection.clone();
    mixed.insert(GeneSet::new("m1", ["G9"]).with_organism("10090"));
    assert_matches!(mixed.common_organism(), Err(KiraError::GeneSetRegistration(_)));
    assert_matches!(
        GeneSetCollection::new().common_hierarchy(),
        Err(KiraError::GeneSetRegistration(_))
    );
}

#[test]
fn local_registration_list_and_remove() {
    let fixture = fixture();
    let name = fixture.registry.register_local(&kegg_collection()).unwrap();
    assert_eq!(name, "gs_KEGG_._pathways_._9606.pck");
    assert_eq!(
        fixture.registry.local_dir().to_path_buf(),
        fixture.root.join(genesets::LOCAL_DIR)
    );
    assert_eq!(
        fixture.registry.list_local().unwrap(),
        vec![(vec!["KEGG".to_string(), "pathways".to_string()], Some("9606".to_string()))]
    );

    let loaded = fixture
        .registry
        .load(&fixture.files, &["KEGG".to_string()], Some("hsa"))
        .unwrap();
    assert_eq!(loaded, kegg_collection());

    assert_eq!(fixture.registry.remove_local("KEGG").unwrap(), 1);
    assert!(fixture.registry.list_local().unwrap().is_empty());
}

#[test]
fn server_collections_are_listed_and_fetched() {
    let fixture = fixture();
    publish(&fixture, &kegg_collection(), &["KEGG", "pathways"], "9606");
    let go = GeneSetCollection::from_iter([GeneSet::new("GO:0000001", ["G1"])
        .with_hierarchy(&["GO", "biological_process"])
        .with_organism("9606")]);
    publish(&fixture, &go, &["GO", "biological_process"], "9606");

    let listed = fixture.registry.list_all(&fixture.files, Some("9606"), None).unwrap();
    assert_eq!(
        listed,
        vec![
            Availability {
                hierarchy: vec!["GO".to_string(), "biological_process".to_string()],
                organism: Some("9606".to_string()),
                local: false,
            },
            Availability {
                hierarchy: vec!["KEGG".to_string(), "pathways".to_string()],
                organism: Some("9606".to_string()),
                local: false,
            },
        ]
    );

    let loaded = fixture
        .registry
        .load(&fixture.files, &["KEGG".to_string()], Some("9606"))
        .unwrap();
    assert_eq!(loaded.len(), 2);
    let everything = fixture.registry.load(&fixture.files, &[], Some("9606")).unwrap();
    assert_eq!(everything.len(), 3);

    let downloaded = fixture
        .registry
        .list_all(&fixture.files, None, Some(true))
        .unwrap();
    assert_eq!(downloaded.len(), 2);
}

#[test]
fn missing_collections_are_reported() {
    let fixture = fixture();
    publish(&fixture, &kegg_collection(), &["KEGG", "pathways"], "9606");
    assert_matches!(
        fixture.registry.load(&fixture.files, &["Reactome".to_string()], Some("9606")),
        Err(KiraError::NoGeneSets { .. })
    );
    assert_matches!(
        fixture.registry.load(&fixture.files, &["KEGG".to_string()], Some("10090")),
        Err(KiraError::NoGeneSets { .. })
    );
}

#[test]
fn collections_merge_gmt_and_stored_sets() {
    let fixture = fixture();
    publish(&fixture, &kegg_collection(), &["KEGG", "pathways"], "9606");
    let gmt = fixture.root.join("extra.gmt");
    std::fs::write(gmt.as_std_path(), "extra1\tmine\tG1\tG7\n").unwrap();

    let merged = fixture
        .registry
        .collections(
            &fixture.files,
            vec![
                CollectionSpec::Gmt(gmt),
                CollectionSpec::Stored {
                    hierarchy: vec!["KEGG".to_string()],
                    organism: Some("9606".to_string()),
                },
                CollectionSpec::Collection(kegg_collection()),
            ],
        )
        .unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(merged.genes().len(), 6);

    let text = fixture.root.join("extra.txt");
    std::fs::write(text.as_std_path(), "x\ty\tz\n").unwrap();
    assert_matches!(
        fixture
            .registry
            .collections(&fixture.files, vec![CollectionSpec::Gmt(text)]),
        Err(KiraError::InvalidGeneSetFile(_))
    );
}

#[test]
fn identical_cluster_and_reference_is_not_enriched() {
    let collection = kegg_collection();
    let universe = genes(&["G1", "G2", "G3", "G4", "G5", "G6"]);
    let results = enrichment::pathway_enrichment(
        &collection,
        &universe,
        &universe,
        ProbabilityModel::Hypergeometric,
        &NoProgress,
    )
    .unwrap();
    assert_eq!(results.len(), 2);
    for entry in results.values() {
        assert!((entry.p_value - 1.0).abs() < 1e-12);
        assert!((entry.enrichment - 1.0).abs() < 1e-12);
    }
}

#[test]
fn pathway_scores_are_adjusted_probabilities() {
    let collection = GeneSetCollection::from_iter([
        GeneSet::new("s1", ["G1", "G2"]),
        GeneSet::new("s2", ["G3", "G4", "G5"]),
        GeneSet::new("s3", ["G6", "G7", "G8", "G1"]),
        GeneSet::new("s4", ["G9"]),
    ]);
    let reference = genes(&["G1", "G2", "G3", "G4", "G5", "G6", "G7", "G8", "G9", "G10"]);
    let cluster = genes(&["G1", "G2", "G3"]);
    let results = enrichment::pathway_enrichment(
        &collection,
        &cluster,
        &reference,
        ProbabilityModel::Hypergeometric,
        &NoProgress,
    )
    .unwrap();
    assert!(!results.contains_key("s4"));
    assert_eq!(results["s1"].genes, vec!["G1", "G2"]);
    assert_eq!(results["s3"].ref_count, 4);

    let mut by_p = results.values().map(|entry| entry.p_value).collect::<Vec<_>>();
    by_p.sort_by(f64::total_cmp);
    assert!(by_p.iter().all(|p| (0.0..=1.0).contains(p)));

    let strict = ResultFilter {
        min_count: Some(2),
        ..ResultFilter::default()
    }
    .apply(results);
    assert_eq!(strict.keys().collect::<Vec<_>>(), vec!["s1"]);
}

#[test]
fn fdr_is_monotone_in_raw_order() {
    let raw = [0.01, 0.02, 0.03, 0.04];
    for adjusted in stats::fdr(&raw) {
        assert!((adjusted - 0.04).abs() < 1e-12);
    }

    let raw = [0.2, 0.001, 0.05, 0.5, 0.01];
    let adjusted = stats::fdr(&raw);
    let mut order = (0..raw.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| raw[a].total_cmp(&raw[b]));
    for pair in order.windows(2) {
        assert!(adjusted[pair[0]] <= adjusted[pair[1]]);
    }
    for (adjusted, raw) in adjusted.iter().zip(raw) {
        assert!(*adjusted >= raw && *adjusted <= 1.0);
    }
}

fn go_annotations() -> Annotations {
    let lines = [
        gaf_line("g1", C, "EXP", "P"),
        gaf_line("g2", B, "IEA", "P"),
        gaf_line("g3", A, "EXP", "P"),
    ];
    Annotations::parse(
        &format!("!gaf-version: 2.0\n{}\n", lines.join("\n")),
        Arc::new(Ontology::parse(SMALL_OBO).unwrap()),
        &NoProgress,
    )
}

#[test]
fn go_terms_become_gene_sets() {
    let annotations = go_annotations();
    let collection = GeneSetCollection::from_annotations(&annotations, None);
    assert_eq!(collection.len(), 3);

    let c = collection.get(C).unwrap();
    assert_eq!(c.name.as_deref(), Some("gamma"));
    assert_eq!(c.hierarchy, vec!["GO", "biological_process"]);
    assert_eq!(c.genes, genes(&["g1"]));
    assert!(c.link.as_deref().unwrap().ends_with(C));
    assert_eq!(collection.get(B).unwrap().genes, genes(&["g1", "g2"]));
    assert_eq!(collection.get(A).unwrap().genes, genes(&["g1", "g2", "g3"]));

    let ontology = annotations.ontology();
    for set in collection.iter() {
        for (relation, child) in ontology.children(&set.id) {
            if !ontology.follows(relation) {
                continue;
            }
            if let Some(child_set) = collection.get(child) {
                assert!(set.genes.is_superset(&child_set.genes), "{} within {}", child, set.id);
            }
        }
    }

    let experimental = GeneSetCollection::from_annotations(
        &annotations,
        Some(&BTreeSet::from([EvidenceCode::Exp])),
    );
    assert_eq!(experimental.get(B).unwrap().genes, genes(&["g1"]));
}

#[test]
fn sets_sharing_an_id_are_scored_separately() {
    let collection = GeneSetCollection::from_iter([
        GeneSet::new("shared", ["G1", "G2"]).with_hierarchy(&["KEGG", "pathways"]),
        GeneSet::new("shared", ["G3", "G4"]).with_hierarchy(&["Reactome"]),
        GeneSet::new("solo", ["G1", "G5"]),
    ]);
    let keyed = collection.keyed().unwrap();
    assert_eq!(
        keyed.keys().collect::<Vec<_>>(),
        vec!["KEGG/pathways/shared", "Reactome/shared", "solo"]
    );

    let reference = genes(&["G1", "G2", "G3", "G4", "G5", "G6"]);
    let results = enrichment::pathway_enrichment(
        &collection,
        &genes(&["G1", "G3"]),
        &reference,
        ProbabilityModel::Hypergeometric,
        &NoProgress,
    )
    .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results["KEGG/pathways/shared"].genes, vec!["G1"]);
    assert_eq!(results["Reactome/shared"].genes, vec!["G3"]);

    let clash = GeneSetCollection::from_iter([
        GeneSet::new("twin", ["G1"]).with_hierarchy(&["KEGG"]),
        GeneSet::new("twin", ["G2"]).with_hierarchy(&["KEGG"]),
    ]);
    assert_matches!(clash.keyed(), Err(KiraError::GeneSetRegistration(_)));
}
