//! Fuzz target for peer pinning and sender key lookup
//!
//! Drives a `KeyManager` over a `MemoryStore` with arbitrary operation
//! sequences and checks it against a plain model.
//!
//! # Strategy
//!
//! - A small pool of peers and rooms so operations collide
//! - Activation times and lookups clustered near boundaries (0, equal, MAX)
//! - Re-presenting peers with a different key
//! - Reopening the manager over the same store mid-sequence
//!
//! # Invariants
//!
//! - A pinned key is never replaced; a different key is a security violation
//! - Lookup returns the newest key activated at or before the timestamp
//! - Same key at the same activation time is idempotent; a different key
//!   there is a conflict and changes nothing
//! - State reloaded from the store matches state held in memory

#![no_main]

use std::collections::{BTreeMap, HashMap};

use arbitrary::Arbitrary;
use keyward_core::{KeyError, KeyManager, MemoryStore, RoomId};
use keyward_crypto::{
    CryptoProvider, Ed25519Provider, IdentityKeyPair, SeededEntropy, SymmetricKey,
};
use libfuzzer_sys::fuzz_target;

const PEERS: usize = 3;
const ROOMS: usize = 2;

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    EnsurePeer { peer: u8, rotated: bool },
    SaveKey { peer: u8, room: u8, key: u8, at: Timestamp },
    Lookup { peer: u8, room: u8, at: Timestamp },
    Reopen,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Timestamp {
    Zero,
    Small(u8),
    Max,
    Any(u64),
}

impl Timestamp {
    fn value(self) -> u64 {
        match self {
            Self::Zero => 0,
            Self::Small(n) => u64::from(n),
            Self::Max => u64::MAX,
            Self::Any(n) => n,
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    if ops.len() > 64 {
        return;
    }

    let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
    runtime.block_on(run(ops));
});

fn key_pair(index: usize, rotated: bool) -> IdentityKeyPair {
    let mut seed = [0u8; 32];
    seed[0] = index as u8;
    seed[1] = u8::from(rotated);
    IdentityKeyPair::from_seed(&seed)
}

async fn run(ops: Vec<Op>) {
    let crypto = Ed25519Provider::with_entropy(SeededEntropy::new(7));
    let store = MemoryStore::new();
    let mut manager = KeyManager::new(crypto.clone(), store.clone());
    manager.init().await.expect("init");

    let peers: Vec<_> = (0..PEERS)
        .map(|i| {
            let pair = key_pair(i, false);
            (crypto.compute_identity_id(&pair.public_key()), pair)
        })
        .collect();
    let rooms: Vec<_> = (0..ROOMS).map(|i| RoomId::new(format!("room-{i}"))).collect();

    let mut registered = [false; PEERS];
    let mut model: HashMap<(usize, usize), BTreeMap<u64, u8>> = HashMap::new();

    for op in ops {
        match op {
            Op::EnsurePeer { peer, rotated } => {
                let p = usize::from(peer) % PEERS;
                let (id, pair) = &peers[p];
                let presented = if rotated { key_pair(p, true).public_key() } else { pair.public_key() };

                let result = manager.ensure_peer(id, &presented, None).await;
                if rotated {
                    // Rotated key never matches the id derived from the original
                    assert!(result.is_err(), "rotated key accepted for {id}");
                } else {
                    let pinned = result.expect("original key must be accepted");
                    assert_eq!(pinned.public_key(), &pair.public_key());
                    registered[p] = true;
                }
            },
            Op::SaveKey { peer, room, key, at } => {
                let (p, r) = (usize::from(peer) % PEERS, usize::from(room) % ROOMS);
                let at = at.value();
                let result = manager
                    .save_peer_sender_key(&peers[p].0, &rooms[r], &SymmetricKey::new([key; 32]), at)
                    .await;

                if !registered[p] {
                    assert!(matches!(result, Err(KeyError::UnknownPeer { .. })), "{result:?}");
                    continue;
                }

                let log = model.entry((p, r)).or_default();
                match log.get(&at) {
                    Some(existing) if *existing != key => {
                        assert!(matches!(result, Err(KeyError::SenderKeyConflict { .. })));
                    },
                    _ => {
                        result.expect("save must succeed");
                        log.insert(at, key);
                    },
                }
            },
            Op::Lookup { peer, room, at } => {
                let (p, r) = (usize::from(peer) % PEERS, usize::from(room) % ROOMS);
                let at = at.value();
                let found = manager
                    .get_peer_sender_key(&peers[p].0, &rooms[r], at)
                    .await
                    .expect("lookup");

                let expected = model
                    .get(&(p, r))
                    .and_then(|log| log.range(..=at).next_back())
                    .map(|(_, key)| SymmetricKey::new([*key; 32]));
                assert_eq!(found, expected);
            },
            Op::Reopen => {
                manager = KeyManager::new(crypto.clone(), store.clone());
                manager.init().await.expect("reopen");
            },
        }
    }

    for (p, (id, _)) in peers.iter().enumerate() {
        for (r, room) in rooms.iter().enumerate() {
            let expected = model.get(&(p, r)).map_or(0, BTreeMap::len);
            let count = manager.sender_key_count(id, room).await.expect("count");
            assert_eq!(count, expected);
        }
    }
}
