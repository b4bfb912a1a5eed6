//! End-to-end pipeline tests for the event indexer.
//!
//! Events go in as `UNPROC`, the coordinator promotes them, workers claim and
//! index them from the local object directory, and the search index is read
//! back.

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use e2e_tests::{batch_event, envelope, new_version, stop_loops, version_event, TestHarness};
use indexer_storage::EventStorage;
use indexer_types::{ProcessingState, StatusEventType};

fn write_genome_and_assembly(harness: &TestHarness) {
    harness.write_object(
        1,
        "10",
        1,
        &envelope("Assembly", "asm", json!({"name": "asm one", "contigs": ["c1", "c2"]})),
    );
    harness.write_object(
        1,
        "20",
        1,
        &envelope(
            "Genome",
            "ecoli",
            json!({
                "name": "E. coli K-12",
                "assembly_ref": "1/10",
                "features": [
                    {"id": "f1", "function": "kinase"},
                    {"id": "f2", "function": "transporter"}
                ]
            }),
        ),
    );
}

/// A genome event indexes the genome, its features and, on demand, the
/// assembly it references.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_version_indexes_object_subobjects_and_references() {
    let harness = TestHarness::new();
    write_genome_and_assembly(&harness);

    let event = version_event(1, "20", 1, "Genome").with_is_public(true).build();
    let id = harness.submit(event).await;

    let cancel = CancellationToken::new();
    let handles = harness.start_loops(&cancel, &[vec![]]);
    let stored = harness.wait_terminal(&id).await;
    stop_loops(cancel, handles).await;

    assert_eq!(stored.state, ProcessingState::Indx);
    assert_eq!(stored.updater.as_deref(), Some("e2e-worker-0"));

    let genome = harness.documents("FS:1/20/1").await;
    assert_eq!(genome.len(), 1);
    assert!(genome[0].is_public);
    assert_eq!(genome[0].object_name, "ecoli");
    assert_eq!(genome[0].keyword("assembly_guid"), Some(&[json!("FS:1/10/1")][..]));
    assert_eq!(genome[0].keyword("assembly_name"), Some(&[json!("asm one")][..]));

    let feature = harness.documents("FS:1/20/1:feature/f2").await;
    assert_eq!(feature.len(), 1);
    assert_eq!(feature[0].keyword("function"), Some(&[json!("transporter")][..]));
    assert_eq!(feature[0].keyword("genome_name"), Some(&[json!("E. coli K-12")][..]));
    assert!(feature[0].is_public);

    // Indexed on demand by the lookup, without the referrer's visibility.
    let assembly = harness.documents("FS:1/10/1").await;
    assert_eq!(assembly.len(), 1);
    assert!(!assembly[0].is_public);
    assert_eq!(
        assembly[0].keyword("contig_id"),
        Some(&[json!("c1"), json!("c2")][..])
    );
}

/// Every version of an object is indexed through one expanded event.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_all_versions_expands_to_each_version() {
    let harness = TestHarness::new();
    for version in 1..=3 {
        harness.write_object(
            1,
            "10",
            version,
            &envelope("Assembly", "asm", json!({"name": format!("asm v{}", version)})),
        );
    }
    let id = harness
        .submit(batch_event(StatusEventType::NewAllVersions, 1, Some("10")))
        .await;

    let cancel = CancellationToken::new();
    let handles = harness.start_loops(&cancel, &[vec![]]);
    let stored = harness.wait_terminal(&id).await;
    stop_loops(cancel, handles).await;

    assert_eq!(stored.state, ProcessingState::Indx);
    for version in 1..=3 {
        let docs = harness.documents(&format!("FS:1/10/{}", version)).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(
            docs[0].keyword("name"),
            Some(&[json!(format!("asm v{}", version))][..])
        );
    }
}

/// A broken object fails its own event and does not hold up the others.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broken_object_fails_alone() {
    let harness = TestHarness::new();
    write_genome_and_assembly(&harness);

    // No stored object behind this event.
    let broken = harness.submit(new_version(1, "30", 1, "Genome")).await;
    let good = harness.submit(new_version(1, "10", 1, "Assembly")).await;
    let unsupported = harness.submit(new_version(1, "40", 1, "Narrative")).await;

    let cancel = CancellationToken::new();
    let handles = harness.start_loops(&cancel, &[vec![]]);
    let broken = harness.wait_terminal(&broken).await;
    let good = harness.wait_terminal(&good).await;
    let unsupported = harness.wait_terminal(&unsupported).await;
    stop_loops(cancel, handles).await;

    assert_eq!(broken.state, ProcessingState::Fail);
    assert_eq!(good.state, ProcessingState::Indx);
    assert_eq!(unsupported.state, ProcessingState::Unindx);
    assert!(harness.documents("FS:1/30/1").await.is_empty());
}

/// Deleting an access group deletes every object it holds from the index.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_access_group() {
    let harness = TestHarness::new();
    write_genome_and_assembly(&harness);

    let cancel = CancellationToken::new();
    let handles = harness.start_loops(&cancel, &[vec![]]);

    let index = harness.submit(new_version(1, "20", 1, "Genome")).await;
    assert_eq!(harness.wait_terminal(&index).await.state, ProcessingState::Indx);
    assert_eq!(harness.documents("FS:1/20/1").await.len(), 1);
    assert_eq!(harness.documents("FS:1/10/1").await.len(), 1);

    let delete = harness
        .submit(batch_event(StatusEventType::DeleteAccessGroup, 1, None))
        .await;
    assert_eq!(harness.wait_terminal(&delete).await.state, ProcessingState::Indx);
    stop_loops(cancel, handles).await;

    assert!(harness.documents("FS:1/20/1").await.is_empty());
    assert!(harness.documents("FS:1/20/1:feature/f1").await.is_empty());
    assert!(harness.documents("FS:1/10/1").await.is_empty());
}

/// Events only reach workers that serve their worker code.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_codes_route_events() {
    let harness = TestHarness::new();
    write_genome_and_assembly(&harness);

    let bulk = harness
        .submit_with_code(new_version(1, "20", 1, "Genome"), "bulk")
        .await;
    let default = harness.submit(new_version(1, "10", 1, "Assembly")).await;

    let cancel = CancellationToken::new();
    let handles = harness.start_loops(&cancel, &[vec![]]);
    assert_eq!(harness.wait_terminal(&default).await.state, ProcessingState::Indx);
    // Promoted, but no worker claims it.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(harness.state(&bulk).await, ProcessingState::Ready);
    stop_loops(cancel, handles).await;

    let cancel = CancellationToken::new();
    let handles = harness.start_loops(&cancel, &[vec!["bulk".to_string()]]);
    let bulk = harness.wait_terminal(&bulk).await;
    stop_loops(cancel, handles).await;

    assert_eq!(bulk.state, ProcessingState::Indx);
    assert_eq!(bulk.worker_code, "bulk");
    let stats = harness.events.get_stats().unwrap();
    assert_eq!(stats.count(ProcessingState::Indx), 2);
    assert!(harness
        .events
        .get_by_state(ProcessingState::Ready, 10)
        .await
        .unwrap()
        .is_empty());
}
