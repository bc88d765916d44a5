//! Session identifiers.
//!
//! A [`SessionId`] packs three fields into 64 bits:
//!
//! ```text
//! | node id (10) | unix seconds (22) | counter (22) |
//!   63 ..... 54    53 ......... 22     21 ....... 0
//! ```
//!
//! The node id can be recovered from any identifier with a single shift, so a
//! cluster can route a session id back to the process that owns it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

const COUNTER_BITS: u32 = 22;
const TIMESTAMP_BITS: u32 = 22;
const NODE_SHIFT: u32 = COUNTER_BITS + TIMESTAMP_BITS;

const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

/// Identity of this process within a cluster. Valid values fit in 10 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u16);

impl NodeId {
    /// Largest node id that fits in the identifier layout.
    pub const MAX: u16 = (1 << 10) - 1;

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 64-bit session identifier, unique among the live sessions of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The node that minted this identifier.
    pub const fn node(self) -> NodeId {
        node_of(self)
    }

    pub const fn timestamp_field(self) -> u64 {
        (self.0 >> COUNTER_BITS) & TIMESTAMP_MASK
    }

    pub const fn counter_field(self) -> u64 {
        self.0 & COUNTER_MASK
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Recover the originating node from an identifier.
pub const fn node_of(id: SessionId) -> NodeId {
    NodeId((id.0 >> NODE_SHIFT) as u16)
}

/// Source of wall-clock seconds used when minting identifiers.
pub trait Clock: Send + Sync + 'static {
    fn unix_seconds(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    seconds: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(seconds: u64) -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(seconds)),
        }
    }

    pub fn set(&self, seconds: u64) {
        self.seconds.store(seconds, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_seconds(&self) -> u64 {
        self.seconds.load(Ordering::SeqCst)
    }
}

/// Mints [`SessionId`]s for one node.
///
/// The counter is shared by every identifier minted through this generator
/// and wraps modulo 2^22. Two identifiers only collide when more than 2^22
/// are minted within one clock second, so callers that need uniqueness must
/// still check against the set of live ids.
pub struct IdGenerator {
    node: NodeId,
    clock: Box<dyn Clock>,
    counter: Mutex<u64>,
}

impl IdGenerator {
    /// Create a generator for `node` backed by the system clock.
    ///
    /// # Panics
    ///
    /// Panics if `node` does not fit in 10 bits. A node id out of range is a
    /// deployment defect and the process must not continue.
    pub fn new(node: NodeId) -> Self {
        Self::with_clock(node, SystemClock)
    }

    /// Create a generator with an explicit clock.
    ///
    /// # Panics
    ///
    /// Panics if `node` does not fit in 10 bits.
    pub fn with_clock(node: NodeId, clock: impl Clock) -> Self {
        assert!(
            node.get() <= NodeId::MAX,
            "node id {node} exceeds the maximum of {}",
            NodeId::MAX
        );
        Self {
            node,
            clock: Box::new(clock),
            counter: Mutex::new(0),
        }
    }

    /// Start the counter at `value` (masked to 22 bits). The next minted id
    /// carries `value + 1`.
    pub fn starting_at(self, value: u64) -> Self {
        self.rewind(value);
        self
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Mint the next identifier.
    pub fn mint(&self) -> SessionId {
        let counter = {
            let mut counter = self.counter.lock();
            *counter = (*counter + 1) & COUNTER_MASK;
            *counter
        };
        let seconds = self.clock.unix_seconds() & TIMESTAMP_MASK;

        SessionId((u64::from(self.node.get()) << NODE_SHIFT) | (seconds << COUNTER_BITS) | counter)
    }

    /// Move the counter of a shared generator back to `value`.
    pub(crate) fn rewind(&self, value: u64) {
        *self.counter.lock() = value & COUNTER_MASK;
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("node", &self.node)
            .field("counter", &*self.counter.lock())
            .finish()
    }
}
