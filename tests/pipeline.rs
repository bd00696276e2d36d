//! Segment a document, build and persist its index, then query it.

use std::sync::Arc;

use constino_lib::documents::{load_units, save_units};
use constino_lib::{
    count_tokens, HashingEmbedder, IndexStore, MatchSource, RetrieveOptions, Retriever, Segmenter,
};

const CONSTITUTION: &str = "\
PART III
FUNDAMENTAL RIGHTS
Article 14 Equality before law.
The State shall not deny to any person equality before the law or the equal protection of the laws within the territory of India.
Article 19 Protection of certain rights regarding freedom of speech, etc.
(1) All citizens shall have the right (a) to freedom of speech and expression; (b) to assemble peaceably and without arms;
(2) Nothing in sub-clause (a) of clause (1) shall affect the operation of any existing law.
Article 21 Protection of life and personal liberty.
No person shall be deprived of his life or personal liberty except according to procedure established by law.
PART IV
DIRECTIVE PRINCIPLES OF STATE POLICY
Article 39 Certain principles of policy to be followed by the State.
The State shall, in particular, direct its policy towards securing that the citizens, men and women equally, have the right to an adequate means of livelihood.
Article 48A Protection and improvement of environment and safeguarding of forests and wild life.
The State shall endeavour to protect and improve the environment and to safeguard the forests and wild life of the country.
PART V
THE UNION
CHAPTER I
THE EXECUTIVE
Article 52 The President of India.
There shall be a President of India.
Article 53 Executive power of the Union.
(1) The executive power of the Union shall be vested in the President.
(2) The supreme command of the Defence Forces of the Union shall be vested in the President.
";

fn build_retriever(dir: &std::path::Path) -> Retriever {
    let segmentation = Segmenter::default().segment(CONSTITUTION);
    let embedder = Arc::new(HashingEmbedder::new(128));
    let index = IndexStore::build(segmentation.units, &*embedder).unwrap();

    let path = dir.join("index.json");
    index.save(&path).unwrap();
    let loaded = IndexStore::load(&path).unwrap();
    Retriever::new(Arc::new(loaded), embedder).unwrap()
}

#[test]
fn test_segment_hierarchy_and_budget() {
    let segmentation = Segmenter::default().segment(CONSTITUTION);
    let units = &segmentation.units;
    assert_eq!(units.len(), 7);
    assert!(units.iter().all(|u| u.token_count <= 512 && !u.oversized));

    let art48a = units.iter().find(|u| u.article.as_deref() == Some("48A")).unwrap();
    assert_eq!(art48a.part.as_deref(), Some("PART IV"));

    let art53 = units.iter().find(|u| u.article.as_deref() == Some("53")).unwrap();
    assert_eq!(art53.chapter.as_deref(), Some("CHAPTER I"));
    assert_eq!(art53.clauses, vec!["1", "2"]);

    // "(a)" and the mid-sentence "(1)" are not clause markers.
    let art19 = units.iter().find(|u| u.article.as_deref() == Some("19")).unwrap();
    assert_eq!(art19.clauses, vec!["1", "2"]);
}

#[test]
fn test_units_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("units.json");
    let units = Segmenter::default().segment(CONSTITUTION).units;
    save_units(&path, &units).unwrap();
    assert_eq!(load_units(&path).unwrap(), units);
}

#[test]
fn test_oversized_clause_is_kept_whole() {
    let clause = vec!["word"; 600].join(" ");
    let doc = format!("PART I\nArticle 1\n(1) {clause}\n(2) A short clause.\n");
    let units = Segmenter::default().segment(&doc).units;

    assert_eq!(units.len(), 2);
    assert!(units[0].oversized);
    assert_eq!(units[0].clause.as_deref(), Some("1"));
    assert!(units[0].token_count > 512);
    assert_eq!(units[0].token_count, count_tokens(&units[0].text));
    assert!(!units[1].oversized);
}

#[test]
fn test_direct_reference_leads_results() {
    let dir = tempfile::tempdir().unwrap();
    let retriever = build_retriever(dir.path());

    let results = retriever
        .retrieve("What does Article 21 guarantee?", &RetrieveOptions::default())
        .unwrap();
    assert_eq!(results[0].unit.article.as_deref(), Some("21"));
    assert_eq!(results[0].score, 2.0);
    assert_eq!(results[0].source, MatchSource::DirectArticleMatch);
    assert!(results[1..].iter().all(|r| r.score < 2.0));
}

#[test]
fn test_semantic_query_respects_budget() {
    let dir = tempfile::tempdir().unwrap();
    let retriever = build_retriever(dir.path());

    let options = RetrieveOptions {
        max_chunks: 3,
        ..Default::default()
    };
    let results = retriever
        .retrieve("protect the environment and forests", &options)
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results.iter().all(|r| r.source != MatchSource::DirectArticleMatch));
}
