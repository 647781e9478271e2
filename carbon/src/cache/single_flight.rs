use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use shared::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One fetch round for a key. Every clone resolves to the same result.
pub(crate) type Round<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T> {
    id: u64,
    round: Round<T>,
}

/// Registry of in-flight fetch rounds keyed by cache key
///
/// `claim` is the only way in: it either starts a new round or hands back the
/// one already running, under the map's per-shard lock, so two rounds for the
/// same key never overlap.
pub(crate) struct SingleFlight<T> {
    rounds: Arc<DashMap<String, InFlight<T>>>,
    next_id: Arc<AtomicU64>,
}

pub(crate) enum Claim<T> {
    Leader(Round<T>),
    Follower(Round<T>),
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            rounds: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Join the round for `key`, or start one built by `start`.
    ///
    /// `start` must only construct the future. The guard it receives removes
    /// this round from the registry when dropped.
    pub(crate) fn claim<F>(&self, key: &str, start: F) -> Claim<T>
    where
        F: FnOnce(RoundGuard<T>) -> BoxFuture<'static, Result<T>>,
    {
        match self.rounds.entry(key.to_owned()) {
            Entry::Occupied(occupied) => Claim::Follower(occupied.get().round.clone()),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let guard = RoundGuard {
                    rounds: Arc::clone(&self.rounds),
                    key: key.to_owned(),
                    id,
                };
                let round = start(guard).shared();
                vacant.insert(InFlight {
                    id,
                    round: round.clone(),
                });
                Claim::Leader(round)
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rounds.len()
    }
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            rounds: Arc::clone(&self.rounds),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

pub(crate) struct RoundGuard<T> {
    rounds: Arc<DashMap<String, InFlight<T>>>,
    key: String,
    id: u64,
}

impl<T> Drop for RoundGuard<T> {
    fn drop(&mut self) {
        // Only ever remove our own round, never a later one for the same key
        let id = self.id;
        self.rounds
            .remove_if(&self.key, |_, in_flight| in_flight.id == id);
    }
}
