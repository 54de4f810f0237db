mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_knowledge::error::KiraError;
use kira_knowledge::matcher::{AliasMatcher, AliasSource, ComposeItem, Explanation, GeneMatcher};
use kira_knowledge::serverfiles::ServerFiles;
use kira_knowledge::store::Store;

use common::MemoryRemote;

fn group(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn aliases(groups: &[&[&str]]) -> GeneMatcher {
    GeneMatcher::aliases(Arc::new(AliasMatcher::new(
        groups.iter().map(|names| group(names)).collect(),
        true,
    )))
}

#[test]
fn direct_matching_ignores_case_when_asked() {
    let mut insensitive = GeneMatcher::direct(true);
    insensitive.set_targets(["BRCA1", "TP53"]);
    assert_eq!(insensitive.umatch("brca1").unwrap().as_deref(), Some("BRCA1"));
    assert_eq!(insensitive.umatch("EGFR").unwrap(), None);

    let mut sensitive = GeneMatcher::direct(false);
    sensitive.set_targets(["BRCA1"]);
    assert_eq!(sensitive.umatch("brca1").unwrap(), None);
}

#[test]
fn sequence_takes_first_non_empty_answer() {
    let mut matcher = GeneMatcher::sequence(vec![
        aliases(&[&["p53", "TP53"]]),
        aliases(&[&["p53", "TP63"]]),
    ]);
    matcher.set_targets(["TP53", "TP63"]);
    assert_eq!(matcher.match_name("p53").unwrap(), vec!["TP53"]);
    assert_eq!(matcher.match_name("TP63").unwrap(), vec!["TP63"]);
}

#[test]
fn consensus_keeps_agreed_targets() {
    let mut matcher = GeneMatcher::consensus(vec![
        aliases(&[&["x", "G1"], &["x", "G2"]]),
        aliases(&[&["x", "G2"]]),
    ]);
    matcher.set_targets(["G1", "G2"]);
    assert_eq!(matcher.match_name("x").unwrap(), vec!["G2"]);

    let mut disjoint = GeneMatcher::consensus(vec![aliases(&[&["y", "G1"]]), aliases(&[&["y", "G2"]])]);
    disjoint.set_targets(["G1", "G2"]);
    assert!(disjoint.match_name("y").unwrap().is_empty());
}

#[test]
fn ambiguous_names_have_no_unique_match() {
    let mut matcher = aliases(&[&["shared", "G1"], &["shared", "G2"]]);
    matcher.set_targets(["G1", "G2"]);
    assert_eq!(matcher.match_name("shared").unwrap(), vec!["G1", "G2"]);
    assert_eq!(matcher.umatch("shared").unwrap(), None);
    assert_eq!(matcher.umatch("g1").unwrap().as_deref(), Some("G1"));
}

#[test]
fn results_stay_within_targets() {
    let mut matcher = aliases(&[&["a", "G1", "G3"]]);
    matcher.set_targets(["G1"]);
    assert_eq!(matcher.match_name("a").unwrap(), vec!["G1"]);
    assert_eq!(matcher.match_name("G3").unwrap(), vec!["G1"]);
}

#[test]
fn matching_before_targets_is_an_error() {
    let matcher = GeneMatcher::compose(vec![ComposeItem::Single(aliases(&[&["a", "b"]]))], true);
    assert!(!matcher.has_targets());
    assert_matches!(matcher.umatch("a"), Err(KiraError::TargetsNotSet));
    assert_matches!(matcher.explain("a"), Err(KiraError::TargetsNotSet));
}

#[test]
fn compose_leads_with_direct_match() {
    let mut matcher = GeneMatcher::compose(
        vec![
            ComposeItem::Single(aliases(&[&["ENSG1", "G9"]])),
            ComposeItem::Agreeing(vec![aliases(&[&["z", "G1"]]), aliases(&[&["z", "G1"]])]),
        ],
        true,
    );
    matcher.set_targets(["G1", "G9"]);
    assert!(matcher.has_targets());
    assert_eq!(matcher.umatch("g1").unwrap().as_deref(), Some("G1"));
    assert_eq!(matcher.umatch("ensg1").unwrap().as_deref(), Some("G9"));
    assert_eq!(matcher.umatch("Z").unwrap().as_deref(), Some("G1"));
}

#[test]
fn explain_names_the_linking_group() {
    let mut matcher = GeneMatcher::sequence(vec![
        GeneMatcher::direct(true),
        aliases(&[&["p53", "TP53"]]),
    ]);
    matcher.set_targets(["TP53"]);
    assert_eq!(
        matcher.explain("p53").unwrap(),
        vec![Explanation {
            targets: vec!["TP53".to_string()],
            aliases: group(&["p53", "TP53"]),
        }]
    );
    assert_eq!(
        matcher.explain("tp53").unwrap(),
        vec![Explanation {
            targets: vec!["TP53".to_string()],
            aliases: group(&["tp53"]),
        }]
    );
    assert!(matcher.explain("nothing").unwrap().is_empty());
}

#[test]
fn joined_dictionaries_link_through_shared_aliases() {
    let kegg = AliasMatcher::new(vec![group(&["hsa:7157", "TP53"])], true);
    let ncbi = AliasMatcher::new(vec![group(&["7157", "tp53", "p53"])], true);
    let joined = AliasMatcher::joined(&[kegg, ncbi], true);
    assert_eq!(joined.groups().len(), 1);
    assert_eq!(joined.group_ids("HSA:7157"), joined.group_ids("p53"));

    let mut matcher = GeneMatcher::aliases(Arc::new(joined));
    matcher.set_targets(["hsa:7157"]);
    assert_eq!(matcher.umatch("7157").unwrap().as_deref(), Some("hsa:7157"));
}

#[test]
fn sources_follow_the_organism() {
    assert_eq!(
        AliasSource::for_taxid("9606"),
        vec![
            AliasSource::Go("goa_human".to_string()),
            AliasSource::Kegg("hsa".to_string()),
            AliasSource::Ncbi("9606".to_string()),
        ]
    );
    assert_eq!(
        AliasSource::for_taxid("3055"),
        vec![AliasSource::Ncbi("3055".to_string())]
    );
    assert!(AliasSource::for_taxid("4932").contains(&AliasSource::Ncbi("559292".to_string())));
    assert_eq!(AliasSource::Kegg("hsa".to_string()).filename(), "aliases.hsa.tab");
}

#[test]
fn alias_tables_load_through_server_files() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let files = ServerFiles::new(Store::new_with_root(root), MemoryRemote::new());
    let source = AliasSource::Kegg("hsa".to_string());
    files.remote().publish(
        source.domain(),
        &source.filename(),
        b"# kegg aliases\nhsa:7157\tTP53\tp53\nhsa:672\tBRCA1\n",
        "1",
    );

    let groups = source.load_groups(&files).unwrap();
    assert_eq!(
        groups,
        vec![group(&["hsa:7157", "TP53", "p53"]), group(&["hsa:672", "BRCA1"])]
    );
    assert_eq!(source.load_groups(&files).unwrap(), groups);
    assert_eq!(files.remote().download_count(), 1);

    let matcher = source.load_matcher(&files, true).unwrap();
    assert_eq!(matcher.group_ids("brca1"), [1]);
}
