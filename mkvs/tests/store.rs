//! Store lifecycle tests over the in-memory and RocksDB backends.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use mkvs::{
    ApplyOp, BackendKind, CancellationToken, Error, GetRequest, Hash, IterateRequest, LogEntry,
    MergeOp, Namespace, ProofVerifier, ReadSync, Root, RootType, Store, StoreConfig, WriteLog,
    EMPTY_HASH,
};
use mkvs_storage::{Column, Database, MemoryStorage};
use mkvs_tree::{NullSource, Tree};

const NS: Namespace = [0x11; 32];

fn memory_store() -> Store {
    let signer = SigningKey::generate(&mut rand::rngs::OsRng);
    Store::open(StoreConfig::memory(), signer).expect("store must open")
}

fn token() -> CancellationToken {
    CancellationToken::new()
}

/// Replays `logs` as successive `(write_log, round)` commits on a scratch
/// tree, returning each resulting root.
fn roots_after(logs: &[(WriteLog, u64)]) -> Vec<Hash> {
    let mut tree = Tree::empty(NullSource);
    let mut roots = Vec::new();
    for (log, round) in logs {
        tree.apply_write_log(log).expect("replay must succeed");
        let (root, _) = tree.commit(*round).expect("commit must succeed");
        roots.push(root);
    }
    roots
}

fn state_root(round: u64, hash: Hash) -> Root {
    Root {
        namespace: NS,
        version: round,
        root_type: RootType::State,
        hash,
    }
}

fn log_of(entries: &[(&[u8], &[u8])]) -> WriteLog {
    entries
        .iter()
        .map(|(k, v)| LogEntry::new(*k, *v))
        .collect()
}

#[test]
fn apply_publishes_root_and_signs_receipt() {
    let store = memory_store();
    let log = log_of(&[(b"k1", b"v1"), (b"k2", b"v2")]);
    let expected = roots_after(&[(log.clone(), 1)])[0];

    let receipt = store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, expected, log))
        .expect("apply must succeed");
    receipt.verify().expect("receipt must verify");
    assert_eq!(receipt.namespace, NS);
    assert_eq!(receipt.round, 1);
    assert_eq!(receipt.roots, vec![expected]);
    assert_eq!(receipt.public_key, store.public_key());

    assert!(store.has_root(&state_root(1, expected)).unwrap());

    let mut tree = store.open_tree(&token(), &state_root(1, expected)).unwrap();
    assert_eq!(tree.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(tree.get(b"k2").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn apply_rejects_wrong_destination_root() {
    let store = memory_store();
    let log = log_of(&[(b"k", b"v")]);
    let err = store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, [0xAA; 32], log))
        .unwrap_err();
    assert!(matches!(err, Error::HashMismatch { .. }));
    assert!(err.is_permanent());
    assert!(!store.has_root(&state_root(1, [0xAA; 32])).unwrap());
}

#[test]
fn deleting_through_a_write_log_collapses_to_the_remaining_key() {
    let store = memory_store();
    let log1 = log_of(&[(b"k1", b"v1"), (b"k2", b"v2")]);
    let log2: WriteLog = vec![LogEntry::delete(&b"k1"[..])];
    let roots = roots_after(&[(log1.clone(), 1), (log2.clone(), 2)]);

    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, roots[0], log1))
        .unwrap();
    store
        .apply(&token(), NS, ApplyOp::state(1, roots[0], 2, roots[1], log2))
        .unwrap();

    let mut tree = store.open_tree(&token(), &state_root(2, roots[1])).unwrap();
    assert_eq!(tree.get(b"k1").unwrap(), None);
    assert_eq!(tree.get(b"k2").unwrap(), Some(b"v2".to_vec()));

    // The collapsed tree is identical to inserting the surviving key
    // alone.
    let alone = roots_after(&[(log_of(&[(b"k2", b"v2")]), 1)])[0];
    assert_eq!(roots[1], alone);
}

#[test]
fn identical_applies_coalesce() {
    let store = memory_store();
    let log = log_of(&[(b"k", b"v")]);
    let expected = roots_after(&[(log.clone(), 1)])[0];

    let first = store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, expected, log.clone()))
        .unwrap();
    let second = store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, expected, log))
        .unwrap();
    assert_eq!(first.roots, second.roots);
}

#[test]
fn canceled_apply_publishes_nothing_and_retries_coalesce() {
    let store = memory_store();
    let log = log_of(&[(b"k1", b"v1"), (b"k2", b"v2")]);
    let expected = roots_after(&[(log.clone(), 1)])[0];

    let canceled = CancellationToken::new();
    canceled.cancel();
    let err = store
        .apply(
            &canceled,
            NS,
            ApplyOp::state(0, EMPTY_HASH, 1, expected, log.clone()),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert!(!err.is_permanent());
    assert!(!store.has_root(&state_root(1, expected)).unwrap());

    // The retry with an identical fingerprint succeeds and produces the
    // same root an uninterrupted apply would have.
    let receipt = store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, expected, log))
        .unwrap();
    assert_eq!(receipt.roots, vec![expected]);
}

#[test]
fn apply_batch_caps_and_signs_one_receipt() {
    let store = memory_store();
    let log_a = log_of(&[(b"a", b"1")]);
    let log_b = log_of(&[(b"b", b"2")]);
    let root_a = roots_after(&[(log_a.clone(), 1)])[0];
    let root_b = roots_after(&[(log_b.clone(), 1)])[0];

    let receipts = store
        .apply_batch(
            &token(),
            NS,
            1,
            vec![
                ApplyOp::state(0, EMPTY_HASH, 1, root_a, log_a),
                ApplyOp::state(0, EMPTY_HASH, 1, root_b, log_b),
            ],
        )
        .unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].roots, vec![root_a, root_b]);
    receipts[0].verify().unwrap();

    let too_many: Vec<ApplyOp> = (0..100)
        .map(|_| ApplyOp::state(0, EMPTY_HASH, 1, EMPTY_HASH, WriteLog::new()))
        .collect();
    assert!(matches!(
        store.apply_batch(&token(), NS, 1, too_many),
        Err(Error::LimitReached(_))
    ));
}

#[test]
fn finalize_is_idempotent_and_rejects_conflicts() {
    let store = memory_store();
    let log = log_of(&[(b"k", b"v")]);
    let root = roots_after(&[(log.clone(), 1)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, root, log))
        .unwrap();

    store.finalize(NS, 1, &[(RootType::State, root)]).unwrap();
    // Idempotent for the identical set.
    store.finalize(NS, 1, &[(RootType::State, root)]).unwrap();
    // Conflicting set fails.
    assert!(matches!(
        store.finalize(NS, 1, &[(RootType::State, [0xBB; 32])]),
        Err(Error::AlreadyFinalized(1))
    ));
    // Unknown roots cannot be finalized.
    assert!(matches!(
        store.finalize(NS, 2, &[(RootType::State, [0xCC; 32])]),
        Err(Error::RootNotFound(_))
    ));
}

#[test]
fn prune_keeps_finalized_roots_readable() {
    let store = memory_store();

    // Round 5 state, later superseded.
    let old_log = log_of(&[(b"old 1", b"x"), (b"old 2", b"y")]);
    let old_root = roots_after(&[(old_log.clone(), 5)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 5, old_root, old_log))
        .unwrap();
    store.finalize(NS, 5, &[(RootType::State, old_root)]).unwrap();

    // Round 10 state over a disjoint key set.
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..20)
        .map(|i| {
            (
                format!("key {i}").into_bytes(),
                format!("value {i}").into_bytes(),
            )
        })
        .collect();
    let log: WriteLog = entries
        .iter()
        .map(|(k, v)| LogEntry::new(k.clone(), v.clone()))
        .collect();
    let root = roots_after(&[(log.clone(), 10)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 10, root, log))
        .unwrap();
    store.finalize(NS, 10, &[(RootType::State, root)]).unwrap();

    // Pruning below the old round removes nothing of interest.
    store.prune(NS, 5).unwrap();
    let mut tree = store.open_tree(&token(), &state_root(10, root)).unwrap();
    assert_eq!(tree.get(b"key 3").unwrap(), Some(b"value 3".to_vec()));

    // Pruning the old round collects its nodes and forgets its root.
    let removed = store.prune(NS, 10).unwrap();
    assert!(removed > 0);
    assert!(!store.has_root(&state_root(5, old_root)).unwrap());

    // Every key of the surviving finalized root is still intact.
    let mut tree = store.open_tree(&token(), &state_root(10, root)).unwrap();
    for (key, value) in &entries {
        assert_eq!(tree.get(key).unwrap().as_ref(), Some(value));
    }

    // Pruning beyond the finalization horizon is rejected.
    assert!(matches!(
        store.prune(NS, 11),
        Err(Error::VersionNotFound(11))
    ));
}

#[test]
fn sync_get_serves_a_verifiable_proof() {
    let store = memory_store();
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..32)
        .map(|i| {
            (
                format!("key {i}").into_bytes(),
                format!("value {i}").into_bytes(),
            )
        })
        .collect();
    let log: WriteLog = entries
        .iter()
        .map(|(k, v)| LogEntry::new(k.clone(), v.clone()))
        .collect();
    let root = roots_after(&[(log.clone(), 1)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, root, log))
        .unwrap();

    let response = store
        .sync_get(
            &token(),
            &GetRequest {
                tree: state_root(1, root),
                key: b"key 17".to_vec(),
            },
        )
        .unwrap();
    assert!(!response.partial);

    // An isolated verifier holding only the root hash reconstructs the
    // answer exclusively from the proof.
    let mut partial = ProofVerifier.verify(&response.proof, root).unwrap();
    assert_eq!(partial.get(b"key 17").unwrap(), Some(b"value 17".to_vec()));

    // Unknown roots are refused.
    assert!(matches!(
        store.sync_get(
            &token(),
            &GetRequest {
                tree: state_root(1, [0xEE; 32]),
                key: b"key 17".to_vec(),
            },
        ),
        Err(Error::RootNotFound(_))
    ));
}

#[test]
fn sync_iterate_windows_are_derivable_from_the_proof() {
    let store = memory_store();
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (10..40)
        .map(|i| {
            (
                format!("key {i}").into_bytes(),
                format!("value {i}").into_bytes(),
            )
        })
        .collect();
    let log: WriteLog = entries
        .iter()
        .map(|(k, v)| LogEntry::new(k.clone(), v.clone()))
        .collect();
    let root = roots_after(&[(log.clone(), 1)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, root, log))
        .unwrap();

    let response = store
        .sync_iterate(
            &token(),
            &IterateRequest {
                tree: state_root(1, root),
                key: b"key 15".to_vec(),
                prefetch: 5,
            },
        )
        .unwrap();

    let mut partial = ProofVerifier.verify(&response.proof, root).unwrap();
    let mut window = Vec::new();
    partial
        .walk_from(b"key 15", &mut |key, value| {
            window.push((key.to_vec(), value.to_vec()));
            Ok(window.len() < 5)
        })
        .unwrap();
    let expected: Vec<_> = entries
        .iter()
        .filter(|(k, _)| k.as_slice() >= &b"key 15"[..])
        .take(5)
        .cloned()
        .collect();
    assert_eq!(window, expected);
}

#[test]
fn diff_is_cached_and_deterministic() {
    let store = memory_store();
    let log1 = log_of(&[(b"k1", b"v1"), (b"k2", b"v2")]);
    let log2: WriteLog = vec![LogEntry::delete(&b"k1"[..]), LogEntry::new(&b"k3"[..], &b"v3"[..])];
    let roots = roots_after(&[(log1.clone(), 1), (log2.clone(), 2)]);

    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, roots[0], log1))
        .unwrap();
    store
        .apply(&token(), NS, ApplyOp::state(1, roots[0], 2, roots[1], log2.clone()))
        .unwrap();

    // Served straight from the write-log cache populated by the apply.
    let diff = store
        .get_diff(&token(), &state_root(1, roots[0]), &state_root(2, roots[1]))
        .unwrap();
    assert_eq!(diff, log2);

    // Reconstructed diffs replay to the same destination root.
    let from_empty = store
        .get_diff(
            &token(),
            &Root::empty(NS, 2, RootType::State),
            &state_root(2, roots[1]),
        )
        .unwrap();
    let mut replay = Tree::empty(NullSource);
    replay.apply_write_log(&from_empty).unwrap();
    let (replayed, _) = replay.commit(2).unwrap();
    // k2 was written at round 1 and k3 at round 2, so a single-round
    // replay cannot reproduce the root hash, but the contents match.
    let mut original = store.open_tree(&token(), &state_root(2, roots[1])).unwrap();
    assert_eq!(
        from_empty
            .iter()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect::<Vec<_>>(),
        vec![
            (b"k2".to_vec(), b"v2".to_vec()),
            (b"k3".to_vec(), b"v3".to_vec()),
        ],
    );
    assert_eq!(original.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    let _ = replayed;
}

#[test]
fn merge_unions_divergent_write_logs() {
    let store = memory_store();
    let base_log = log_of(&[(b"a", b"1")]);
    let base = roots_after(&[(base_log.clone(), 1)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, base, base_log.clone()))
        .unwrap();

    let o1_log = log_of(&[(b"b", b"2")]);
    let o1 = roots_after(&[(base_log.clone(), 1), (o1_log.clone(), 1)])[1];
    store
        .apply(&token(), NS, ApplyOp::state(1, base, 1, o1, o1_log))
        .unwrap();

    let o2_log = log_of(&[(b"c", b"3")]);
    let o2 = roots_after(&[(base_log.clone(), 1), (o2_log.clone(), 1)])[1];
    store
        .apply(&token(), NS, ApplyOp::state(1, base, 1, o2, o2_log))
        .unwrap();

    let receipt = store
        .merge(
            &token(),
            NS,
            1,
            MergeOp {
                base,
                others: vec![o1, o2],
            },
        )
        .unwrap();
    receipt.verify().unwrap();

    let merged = state_root(1, receipt.roots[0]);
    let mut tree = store.open_tree(&token(), &merged).unwrap();
    assert_eq!(tree.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(tree.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(tree.get(b"c").unwrap(), Some(b"3".to_vec()));

    // Conflicting writes to one key fail the merge.
    let conflict_log = log_of(&[(b"b", b"9")]);
    let conflict = roots_after(&[(base_log.clone(), 1), (conflict_log.clone(), 1)])[1];
    store
        .apply(&token(), NS, ApplyOp::state(1, base, 1, conflict, conflict_log))
        .unwrap();
    assert!(store
        .merge(
            &token(),
            NS,
            1,
            MergeOp {
                base,
                others: vec![o1, conflict],
            },
        )
        .is_err());
}

#[test]
fn checkpoint_restores_into_a_fresh_store() {
    let source_store = memory_store();
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..50)
        .map(|i| {
            (
                format!("key {i}").into_bytes(),
                format!("value {i}").into_bytes(),
            )
        })
        .collect();
    let log: WriteLog = entries
        .iter()
        .map(|(k, v)| LogEntry::new(k.clone(), v.clone()))
        .collect();
    let root_hash = roots_after(&[(log.clone(), 1)])[0];
    let root = state_root(1, root_hash);
    source_store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, root_hash, log))
        .unwrap();

    let stream: Vec<LogEntry> = source_store
        .get_checkpoint(&token(), &root)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(stream.len(), entries.len());

    let target_store = memory_store();
    target_store
        .restore_checkpoint(&token(), &root, stream.clone())
        .unwrap();
    let mut tree = target_store.open_tree(&token(), &root).unwrap();
    for (key, value) in &entries {
        assert_eq!(tree.get(key).unwrap().as_ref(), Some(value));
    }

    // A corrupted stream is rejected.
    let other_store = memory_store();
    let mut corrupted = stream;
    corrupted[7].value = b"tampered".to_vec();
    assert!(matches!(
        other_store.restore_checkpoint(&token(), &root, corrupted),
        Err(Error::HashMismatch { .. })
    ));
}

#[test]
fn corruption_under_a_finalized_root_poisons_the_namespace() {
    let backend = Arc::new(MemoryStorage::new());
    let signer = SigningKey::generate(&mut rand::rngs::OsRng);
    let store = Store::new(backend.clone(), signer.clone(), StoreConfig::memory());

    let log = log_of(&[(b"k1", b"v1"), (b"k2", b"v2")]);
    let root = roots_after(&[(log.clone(), 1)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, root, log))
        .unwrap();
    store.finalize(NS, 1, &[(RootType::State, root)]).unwrap();

    // Damage the finalized root's node record on disk.
    backend.put(Column::Nodes, &root, &[0xFF, 0x00, 0x01]).unwrap();

    // A fresh store handle has no cached tree and must read the damaged
    // node back.
    let store = Store::new(backend, signer, StoreConfig::memory());
    let err = store
        .apply(
            &token(),
            NS,
            ApplyOp::state(1, root, 2, [0xAB; 32], log_of(&[(b"k3", b"v3")])),
        )
        .unwrap_err();
    assert!(matches!(err, Error::MalformedNode(_)));

    // The namespace is latched against any further writes.
    let fresh = log_of(&[(b"x", b"y")]);
    let fresh_root = roots_after(&[(fresh.clone(), 3)])[0];
    assert!(matches!(
        store.apply(
            &token(),
            NS,
            ApplyOp::state(0, EMPTY_HASH, 3, fresh_root, fresh.clone()),
        ),
        Err(Error::Internal(_))
    ));
    assert!(matches!(store.prune(NS, 1), Err(Error::Internal(_))));
    assert!(matches!(
        store.finalize(NS, 3, &[(RootType::State, fresh_root)]),
        Err(Error::Internal(_))
    ));

    // Other namespaces stay writable.
    let other_ns: Namespace = [0x22; 32];
    store
        .apply(
            &token(),
            other_ns,
            ApplyOp::state(0, EMPTY_HASH, 3, fresh_root, fresh),
        )
        .unwrap();
}

#[test]
fn corruption_under_a_speculative_root_does_not_poison() {
    let backend = Arc::new(MemoryStorage::new());
    let signer = SigningKey::generate(&mut rand::rngs::OsRng);
    let store = Store::new(backend.clone(), signer.clone(), StoreConfig::memory());

    // A recent root that was never finalized.
    let log = log_of(&[(b"k1", b"v1"), (b"k2", b"v2")]);
    let root = roots_after(&[(log.clone(), 1)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, root, log))
        .unwrap();

    backend.put(Column::Nodes, &root, &[0xFF, 0x00, 0x01]).unwrap();

    let store = Store::new(backend, signer, StoreConfig::memory());
    let err = store
        .apply(
            &token(),
            NS,
            ApplyOp::state(1, root, 2, [0xAB; 32], log_of(&[(b"k3", b"v3")])),
        )
        .unwrap_err();
    assert!(matches!(err, Error::MalformedNode(_)));

    // The failure stays with the speculative read; the namespace accepts
    // new work.
    let fresh = log_of(&[(b"x", b"y")]);
    let fresh_root = roots_after(&[(fresh.clone(), 2)])[0];
    store
        .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 2, fresh_root, fresh))
        .unwrap();
}

#[test]
fn rocksdb_backend_persists_across_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let signer = SigningKey::generate(&mut rand::rngs::OsRng);
    let cfg = StoreConfig::rocksdb(dir.path());
    assert_eq!(cfg.backend, BackendKind::RocksDb);

    let log = log_of(&[(b"durable", b"yes")]);
    let root = roots_after(&[(log.clone(), 1)])[0];
    {
        let store = Store::open(cfg.clone(), signer.clone()).unwrap();
        store
            .apply(&token(), NS, ApplyOp::state(0, EMPTY_HASH, 1, root, log))
            .unwrap();
    }

    let store = Store::open(cfg, signer).unwrap();
    assert!(store.has_root(&state_root(1, root)).unwrap());
    let mut tree = store.open_tree(&token(), &state_root(1, root)).unwrap();
    assert_eq!(tree.get(b"durable").unwrap(), Some(b"yes".to_vec()));
}
