use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::id::{IdGenerator, SessionId};

/// Tracks live sessions by identifier.
///
/// The registry owns every session handle it hands out. Identifiers are minted
/// and checked while the owning shard is write-locked, so two concurrent
/// inserts can never record the same id.
pub struct SessionRegistry<S> {
    sessions: DashMap<SessionId, Arc<S>, ahash::RandomState>,
    ids: IdGenerator,
}

impl<S> SessionRegistry<S> {
    pub fn new(ids: IdGenerator) -> Self {
        Self {
            sessions: DashMap::default(),
            ids,
        }
    }

    pub fn with_capacity(ids: IdGenerator, capacity: usize) -> Self {
        Self {
            sessions: DashMap::with_capacity_and_hasher(capacity, ahash::RandomState::new()),
            ids,
        }
    }

    /// Mint a fresh identifier, build the session with it and record it.
    ///
    /// Minting is retried until the id is absent from the registry.
    pub fn insert_with(&self, make: impl FnOnce(SessionId) -> S) -> Arc<S> {
        let slot = loop {
            match self.sessions.entry(self.ids.mint()) {
                Entry::Occupied(taken) => {
                    debug!(session_id = %taken.key(), "Session id collision, minting again");
                }
                Entry::Vacant(slot) => break slot,
            }
        };

        let session = Arc::new(make(*slot.key()));
        slot.insert(Arc::clone(&session));
        session
    }

    /// Get the session for `id`, if it is live.
    pub fn lookup(&self, id: SessionId) -> Option<Arc<S>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a session exists for the given id.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Remove a session. Removing an absent id does nothing.
    pub fn remove(&self, id: SessionId) -> Option<Arc<S>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Get the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }
}

impl<S> fmt::Debug for SessionRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("len", &self.sessions.len())
            .field("ids", &self.ids)
            .finish()
    }
}
