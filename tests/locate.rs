mod common;

use cavatica_tools::locate::locate;
use cavatica_tools::resolver::GenomicFileMatch;

use common::MockStore;

#[test]
fn listing_is_joined_with_matches() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("listing.tsv");
    let output = temp.path().join("located.csv");
    std::fs::write(
        &input,
        "5f1a\t'sample-1.cram'\tdelivery/sample-1.cram\n5f1b\tsample-2.cram\tdelivery/sample-2.cram\n",
    )
    .unwrap();

    let mut store = MockStore::default();
    store.by_name.insert(
        "sample-1.cram".to_string(),
        GenomicFileMatch {
            kf_id: "GF_AAAAAAAA".to_string(),
            external_id: "s3://bucket/harmonized/sample-1.cram".to_string(),
        },
    );

    let summary = locate(&mut store, &input, &output).unwrap();

    assert_eq!(summary.listed, 2);
    assert_eq!(summary.matched, 1);
    let written = std::fs::read_to_string(&output).unwrap();
    let lines = written.lines().collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec![
            "cavatica_id,file_name,cavatica_location,kf_id,external_id",
            "5f1a,sample-1.cram,delivery/sample-1.cram,GF_AAAAAAAA,s3://bucket/harmonized/sample-1.cram",
            "5f1b,sample-2.cram,delivery/sample-2.cram,,",
        ]
    );
}

#[test]
fn empty_file_name_stays_unmatched() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("listing.tsv");
    let output = temp.path().join("located.csv");
    std::fs::write(
        &input,
        "5f1a\t''\tdelivery/\n5f1b\tsample-2.cram\tdelivery/sample-2.cram\n",
    )
    .unwrap();

    let mut store = MockStore::default();
    store.by_name.insert(
        String::new(),
        GenomicFileMatch {
            kf_id: "GF_ZZZZZZZZ".to_string(),
            external_id: "s3://bucket/anything.cram".to_string(),
        },
    );

    let summary = locate(&mut store, &input, &output).unwrap();

    assert_eq!(summary.listed, 2);
    assert_eq!(summary.matched, 0);
    assert_eq!(store.name_queries, vec!["sample-2.cram".to_string()]);
}
