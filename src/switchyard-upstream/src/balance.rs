use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use switchyard_core::{LoadBalance, Upstream};

use crate::pool::PoolSnapshot;

/// Picks one reachable member of `snapshot`.
///
/// `cursor` is the round-robin position of the pool key; `hash_key` feeds the
/// consistent-hash ring (an absent key hashes as the empty string).
pub fn select<'a>(
    strategy: LoadBalance,
    snapshot: &'a PoolSnapshot,
    cursor: &AtomicUsize,
    hash_key: Option<&str>,
) -> Option<&'a Upstream> {
    let reachable = snapshot.reachable_indexes();
    if reachable.is_empty() {
        return None;
    }
    let idx = match strategy {
        LoadBalance::Random => reachable[rand::rng().random_range(0..reachable.len())],
        LoadBalance::RoundRobin => {
            let n = cursor.fetch_add(1, Ordering::Relaxed) % reachable.len();
            reachable.get(n).copied().unwrap_or(reachable[0])
        }
        LoadBalance::Hash => snapshot
            .ring()
            .locate(hash_key.unwrap_or_default())
            .unwrap_or(reachable[0]),
    };
    snapshot.members().get(idx)
}
