use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one admitted unit of work. Assigned once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(u64);

impl Identity {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn table_name(self) -> TableName {
        TableName(format!("T{:09}", self.0))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog name of the table backing an identity, e.g. `T000000042`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of identities. Only the scheduler loop draws from it, but the
/// contract holds for concurrent callers too: values are unique and increase
/// in call-completion order.
pub trait IdentitySource: Send + Sync {
    fn next_identity(&self) -> Identity;

    /// Number of identities handed out so far, i.e. the next value to assign.
    fn issued(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct IdentityCounter {
    next: AtomicU64,
}

impl IdentityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdentitySource for IdentityCounter {
    fn next_identity(&self) -> Identity {
        Identity(self.next.fetch_add(1, Ordering::AcqRel))
    }

    fn issued(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}

/// The identities the scheduler intends to keep resident:
/// `[max(0, counter - limit), counter)`.
///
/// The window is never materialized. Retirement of the identity that falls
/// out of it is only scheduled, so the engine may briefly hold more than
/// `limit` tables until the matching retire task has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidentWindow {
    limit: u64,
}

impl ResidentWindow {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn range(&self, counter: u64) -> Range<u64> {
        counter.saturating_sub(self.limit)..counter
    }

    pub fn contains(&self, counter: u64, identity: Identity) -> bool {
        self.range(counter).contains(&identity.0)
    }

    /// The identity that leaves the window when `admitted` enters it.
    pub fn evicted_by(&self, admitted: Identity) -> Option<Identity> {
        admitted.0.checked_sub(self.limit).map(Identity)
    }
}
