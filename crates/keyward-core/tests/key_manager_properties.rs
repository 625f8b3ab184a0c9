//! Property-based tests for KeyManager
//!
//! These tests verify invariants that must hold for all inputs, using seeded
//! entropy for reproducibility:
//! - A pinned peer key never changes, whatever is presented afterwards
//! - Sender key lookup agrees with a linear-scan model
//! - Repeating a save is idempotent

use std::future::Future;

use keyward_core::{KeyError, KeyManager, MemoryStore, RoomId};
use keyward_crypto::{
    CryptoProvider, Ed25519Provider, IdentityId, PublicKey, SeededEntropy, SymmetricKey,
};
use proptest::prelude::*;

type TestManager = KeyManager<Ed25519Provider<SeededEntropy>, MemoryStore>;

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
}

fn manager(seed: u64) -> TestManager {
    KeyManager::new(Ed25519Provider::with_entropy(SeededEntropy::new(seed)), MemoryStore::new())
}

fn remote(seed: u64) -> (IdentityId, PublicKey) {
    let crypto = Ed25519Provider::with_entropy(SeededEntropy::new(seed));
    let key = crypto.generate_identity_key_pair().unwrap().public_key();
    (crypto.compute_identity_id(&key), key)
}

/// Reference model: newest activation at or before `t`, by linear scan.
fn model_lookup(entries: &[(u64, u8)], t: u64) -> Option<u8> {
    entries.iter().filter(|(at, _)| *at <= t).max_by_key(|(at, _)| *at).map(|(_, byte)| *byte)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: after the first ensure_peer, the pinned key is fixed and
    /// every mismatching call is a security violation
    #[test]
    fn prop_pinned_key_is_monotonic(
        seed in any::<u64>(),
        attempts in prop::collection::vec((0u64..8, prop::option::of("[a-z]{1,8}")), 1..20),
    ) {
        let km = manager(seed);
        let (id, pinned) = remote(1_000);

        block_on(async {
            km.ensure_peer(&id, &pinned, None).await.unwrap();

            for (key_seed, username) in &attempts {
                let (_, presented) = remote(*key_seed);
                let result = km.ensure_peer(&id, &presented, username.as_deref()).await;

                match result {
                    Ok(peer) => assert_eq!(peer.public_key(), &pinned),
                    Err(e) => assert!(e.is_security_violation(), "unexpected error: {e}"),
                }

                let stored = km.get_peer(&id).await.unwrap().unwrap();
                assert_eq!(stored.public_key(), &pinned);
            }
        });
    }

    /// Property: floor lookup matches the linear model for any insertion
    /// order and any query
    #[test]
    fn prop_sender_key_lookup_matches_model(
        activations in prop::collection::btree_map(0u64..10_000, any::<u8>(), 0..32),
        queries in prop::collection::vec(any::<u64>(), 1..32),
        shuffle_seed in any::<u64>(),
    ) {
        let km = manager(shuffle_seed);
        let (id, pk) = remote(7);
        let room = RoomId::from("room");

        let mut entries: Vec<(u64, u8)> = activations.into_iter().collect();
        // Deterministic reordering so inserts are not always ascending
        entries.sort_by_key(|(at, _)| at.wrapping_mul(shuffle_seed | 1));

        block_on(async {
            km.ensure_peer(&id, &pk, None).await.unwrap();
            for (at, byte) in &entries {
                km.save_peer_sender_key(&id, &room, &SymmetricKey::new([*byte; 32]), *at)
                    .await
                    .unwrap();
            }

            for t in queries.iter().copied().chain(entries.iter().map(|(at, _)| *at)) {
                let found = km.get_peer_sender_key(&id, &room, t).await.unwrap();
                let expected = model_lookup(&entries, t).map(|byte| SymmetricKey::new([byte; 32]));
                assert_eq!(found, expected, "lookup at {t}");
            }
        });
    }

    /// Property: saving the same sender key twice leaves one entry
    #[test]
    fn prop_duplicate_save_is_idempotent(at in any::<u64>(), byte in any::<u8>(), repeats in 1usize..5) {
        let km = manager(3);
        let (id, pk) = remote(9);
        let room = RoomId::from("r");
        let key = SymmetricKey::new([byte; 32]);

        block_on(async {
            km.ensure_peer(&id, &pk, None).await.unwrap();
            for _ in 0..repeats {
                km.save_peer_sender_key(&id, &room, &key, at).await.unwrap();
            }

            assert_eq!(km.sender_key_count(&id, &room).await.unwrap(), 1);

            let other = SymmetricKey::new([byte.wrapping_add(1); 32]);
            let err = km.save_peer_sender_key(&id, &room, &other, at).await.unwrap_err();
            assert!(matches!(err, KeyError::SenderKeyConflict { .. }));
        });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ensure_peer_never_replaces_pinned_key() {
    let km = std::sync::Arc::new(manager(11));
    let (id, pinned) = remote(1);
    km.ensure_peer(&id, &pinned, None).await.unwrap();

    let mut tasks = Vec::new();
    for seed in 0..32u64 {
        let km = std::sync::Arc::clone(&km);
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            let (_, presented) = remote(seed);
            km.ensure_peer(&id, &presented, Some("racer")).await
        }));
    }

    for task in tasks {
        match task.await.unwrap() {
            Ok(peer) => assert_eq!(peer.public_key(), &pinned),
            Err(e) => assert!(e.is_security_violation()),
        }
    }

    assert_eq!(km.get_peer(&id).await.unwrap().unwrap().public_key(), &pinned);
}
