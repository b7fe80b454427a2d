//! Integration tests for the SQLite metadata store.

mod common;

use common::{TestMetadata, chunk_record, upload_name};
use ferry_core::{BlockId, CommitTarget, CommittedObject, ObjectName, SequenceKey};
use ferry_metadata::{ChunkRepo, CommitRepo, CommitStatus, LeaseOutcome, PutOutcome};
use time::{Duration, OffsetDateTime};

fn block_ids(upload: &str, chunks: &[&[u8]]) -> Vec<BlockId> {
    chunks
        .iter()
        .enumerate()
        .map(|(seq, data)| chunk_record(upload, seq as u64, data, false).block_id)
        .collect()
}

fn committed_object(name: &str, final_sequence: u64) -> CommittedObject {
    CommittedObject {
        name: ObjectName::parse(name).unwrap(),
        content_type: "application/zip".to_string(),
        size_bytes: 6,
        block_count: final_sequence + 1,
        final_sequence: SequenceKey::new(final_sequence),
        committed_at: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn test_put_chunk_is_write_once() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;

    let first = chunk_record("report.zip", 0, b"AA", false);
    assert_eq!(store.put_chunk(&first).await.unwrap(), PutOutcome::Inserted);

    // Same key, different bytes: the original record wins.
    let conflicting = chunk_record("report.zip", 0, b"XX", false);
    match store.put_chunk(&conflicting).await.unwrap() {
        PutOutcome::Existing(existing) => {
            assert_eq!(existing.content_hash, first.content_hash);
            assert_eq!(existing.block_id, first.block_id);
        }
        other => panic!("expected Existing, got {other:?}"),
    }

    let stored = store
        .get_chunk(&upload_name("report.zip"), SequenceKey::new(0))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.same_chunk(&first));
}

#[tokio::test]
async fn test_second_final_chunk_is_rejected() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;

    let final_two = chunk_record("report.zip", 2, b"CC", true);
    assert_eq!(store.put_chunk(&final_two).await.unwrap(), PutOutcome::Inserted);

    let final_three = chunk_record("report.zip", 3, b"DD", true);
    match store.put_chunk(&final_three).await.unwrap() {
        PutOutcome::FinalConflict(existing) => assert_eq!(existing.sequence, SequenceKey::new(2)),
        other => panic!("expected FinalConflict, got {other:?}"),
    }

    let recorded = store
        .final_chunk(&upload_name("report.zip"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recorded.sequence, SequenceKey::new(2));
}

#[tokio::test]
async fn test_list_by_upload_orders_by_sequence() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;

    for (seq, data) in [(10u64, "k"), (2, "c"), (0, "a"), (1, "b")] {
        store
            .put_chunk(&chunk_record("big.bin", seq, data.as_bytes(), false))
            .await
            .unwrap();
    }
    store
        .put_chunk(&chunk_record("other.bin", 0, b"z", false))
        .await
        .unwrap();

    let records = store.list_by_upload(&upload_name("big.bin")).await.unwrap();
    let keys: Vec<u64> = records.iter().map(|r| r.sequence.get()).collect();
    assert_eq!(keys, vec![0, 1, 2, 10]);
    assert!(records.iter().all(|r| r.upload.as_str() == "big.bin"));
}

#[tokio::test]
async fn test_delete_upload_chunks_counts_rows() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;

    for seq in 0..3 {
        store
            .put_chunk(&chunk_record("gone.bin", seq, b"x", seq == 2))
            .await
            .unwrap();
    }

    let upload = upload_name("gone.bin");
    assert_eq!(store.delete_upload_chunks(&upload).await.unwrap(), 3);
    assert!(store.list_by_upload(&upload).await.unwrap().is_empty());
    assert!(store.final_chunk(&upload).await.unwrap().is_none());
    assert_eq!(store.delete_upload_chunks(&upload).await.unwrap(), 0);
}

#[tokio::test]
async fn test_commit_lease_lifecycle() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;
    let upload = upload_name("report.zip");
    let object = ObjectName::from(&upload);
    let now = OffsetDateTime::now_utc();

    let first = store
        .acquire_commit_lease(&upload, &object, "application/zip", "node-a", now, now + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(first, LeaseOutcome::Acquired);

    // Live lease held by someone else.
    match store
        .acquire_commit_lease(&upload, &object, "application/zip", "node-b", now, now + Duration::minutes(5))
        .await
        .unwrap()
    {
        LeaseOutcome::Held { owner, .. } => assert_eq!(owner, "node-a"),
        other => panic!("expected Held, got {other:?}"),
    }

    // The holder may renew.
    assert_eq!(
        store
            .acquire_commit_lease(&upload, &object, "application/zip", "node-a", now, now + Duration::minutes(10))
            .await
            .unwrap(),
        LeaseOutcome::Acquired
    );

    // Only the holder can write the marker.
    let committed = committed_object("report.zip", 2);
    let blocks = block_ids("report.zip", &[b"AA", b"BB", b"CC"]);
    assert!(!store.mark_committed(&upload, "node-b", &committed, &blocks).await.unwrap());
    assert!(store.mark_committed(&upload, "node-a", &committed, &blocks).await.unwrap());

    assert_eq!(
        store.committed_block(&upload, SequenceKey::new(1)).await.unwrap(),
        Some(blocks[1].clone())
    );
    assert!(store.committed_block(&upload, SequenceKey::new(3)).await.unwrap().is_none());

    match store.get_commit(&upload).await.unwrap() {
        Some(CommitStatus::Committed(object)) => {
            assert_eq!(object.final_sequence, SequenceKey::new(2));
            assert_eq!(object.content_type, "application/zip");
            assert_eq!(object.block_count, 3);
        }
        other => panic!("expected Committed, got {other:?}"),
    }

    // Once committed, every lease attempt reports the marker.
    match store
        .acquire_commit_lease(&upload, &object, "application/zip", "node-b", now, now + Duration::minutes(5))
        .await
        .unwrap()
    {
        LeaseOutcome::Committed(object) => assert_eq!(object.name.as_str(), "report.zip"),
        other => panic!("expected Committed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_expired_lease_can_be_taken_over() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;
    let upload = upload_name("crashed.bin");
    let object = ObjectName::from(&upload);
    let then = OffsetDateTime::now_utc() - Duration::minutes(30);
    let now = OffsetDateTime::now_utc();

    store
        .acquire_commit_lease(&upload, &object, "text/plain", "node-a", then, then + Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(
        store
            .acquire_commit_lease(&upload, &object, "text/plain", "node-b", now, now + Duration::minutes(5))
            .await
            .unwrap(),
        LeaseOutcome::Acquired
    );

    match store.get_commit(&upload).await.unwrap() {
        Some(CommitStatus::Committing { owner, .. }) => assert_eq!(owner, "node-b"),
        other => panic!("expected Committing, got {other:?}"),
    }

    // The previous holder can no longer finish.
    let committed = committed_object("crashed.bin", 0);
    assert!(!store.mark_committed(&upload, "node-a", &committed, &[]).await.unwrap());
}

#[tokio::test]
async fn test_release_and_clear_expired_lease() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;
    let upload = upload_name("retry.bin");
    let object = ObjectName::from(&upload);
    let now = OffsetDateTime::now_utc();

    store
        .acquire_commit_lease(&upload, &object, "text/plain", "node-a", now, now + Duration::minutes(5))
        .await
        .unwrap();

    // Releasing someone else's lease does nothing.
    store.release_commit_lease(&upload, "node-b").await.unwrap();
    assert!(store.get_commit(&upload).await.unwrap().is_some());

    // A live lease is not cleared.
    assert!(!store.clear_expired_lease(&upload, now).await.unwrap());

    store.release_commit_lease(&upload, "node-a").await.unwrap();
    assert!(store.get_commit(&upload).await.unwrap().is_none());

    store
        .acquire_commit_lease(&upload, &object, "text/plain", "node-a", now, now + Duration::seconds(1))
        .await
        .unwrap();
    assert!(
        store
            .clear_expired_lease(&upload, now + Duration::minutes(1))
            .await
            .unwrap()
    );
    assert!(store.get_commit(&upload).await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_stale_uploads_skips_committed_and_recent() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;

    for name in ["idle.bin", "done.bin", "fresh.bin"] {
        store
            .put_chunk(&chunk_record(name, 0, b"data", false))
            .await
            .unwrap();
    }

    // Commit "done.bin".
    let done = upload_name("done.bin");
    let now = OffsetDateTime::now_utc();
    store
        .acquire_commit_lease(&done, &ObjectName::from(&done), "text/plain", "node-a", now, now + Duration::minutes(5))
        .await
        .unwrap();
    assert!(
        store
            .mark_committed(&done, "node-a", &committed_object("done.bin", 0), &[])
            .await
            .unwrap()
    );

    // Everything so far is older than a cutoff in the future.
    let cutoff = OffsetDateTime::now_utc() + Duration::minutes(1);
    let stale = store.list_stale_uploads(cutoff, 10).await.unwrap();
    let names: Vec<&str> = stale.iter().map(|u| u.as_str()).collect();
    assert!(names.contains(&"idle.bin"));
    assert!(names.contains(&"fresh.bin"));
    assert!(!names.contains(&"done.bin"));

    // Nothing is older than a cutoff in the past.
    let past = OffsetDateTime::now_utc() - Duration::hours(1);
    assert!(store.list_stale_uploads(past, 10).await.unwrap().is_empty());

    // Batch limit is honored.
    assert_eq!(store.list_stale_uploads(cutoff, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_final_chunk_keeps_commit_target() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;

    let target = CommitTarget {
        object_name: Some(ObjectName::parse("greeting.txt").unwrap()),
        content_type: Some("text/plain".to_string()),
    };
    let last = chunk_record("upload-7", 1, b"world", true).with_target(target.clone());
    store.put_chunk(&last).await.unwrap();

    let recorded = store.final_chunk(&upload_name("upload-7")).await.unwrap().unwrap();
    assert_eq!(recorded.target, target);
}

#[tokio::test]
async fn test_object_name_belongs_to_one_upload() {
    let metadata = TestMetadata::new().await;
    let store = &metadata.store;
    let shared = ObjectName::parse("shared.bin").unwrap();
    let first = upload_name("upload-a");
    let second = upload_name("upload-b");
    let now = OffsetDateTime::now_utc();

    assert_eq!(
        store
            .acquire_commit_lease(&first, &shared, "text/plain", "node-a", now, now + Duration::minutes(5))
            .await
            .unwrap(),
        LeaseOutcome::Acquired
    );

    // Claimed by a live lease.
    match store
        .acquire_commit_lease(&second, &shared, "text/plain", "node-a", now, now + Duration::minutes(5))
        .await
        .unwrap()
    {
        LeaseOutcome::NameTaken { holder } => assert_eq!(holder, first),
        other => panic!("expected NameTaken, got {other:?}"),
    }

    // Still claimed once committed.
    let committed = committed_object("shared.bin", 0);
    assert!(store.mark_committed(&first, "node-a", &committed, &[]).await.unwrap());
    match store
        .acquire_commit_lease(&second, &shared, "text/plain", "node-b", now, now + Duration::minutes(5))
        .await
        .unwrap()
    {
        LeaseOutcome::NameTaken { holder } => assert_eq!(holder, first),
        other => panic!("expected NameTaken, got {other:?}"),
    }
    assert!(store.get_commit(&second).await.unwrap().is_none());

    // A released lease frees the name.
    let other = ObjectName::parse("other.bin").unwrap();
    store
        .acquire_commit_lease(&second, &other, "text/plain", "node-b", now, now + Duration::minutes(5))
        .await
        .unwrap();
    store.release_commit_lease(&second, "node-b").await.unwrap();
    let third = upload_name("upload-c");
    assert_eq!(
        store
            .acquire_commit_lease(&third, &other, "text/plain", "node-c", now, now + Duration::minutes(5))
            .await
            .unwrap(),
        LeaseOutcome::Acquired
    );
}
