//! Pooled entry abstraction.
//!
//! # Responsibilities
//! - Wrap a single connection with a ban flag
//! - Reference-count users of the connection (for draining)
//! - Close the connection exactly once, when the last reference goes away

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::net::{Address, Connection};

/// A connection owned by a datacenter pool.
///
/// The reference count starts at 1 for pool membership. Banning drops that
/// reference; every [`Lease`] holds one more.
#[derive(Debug)]
pub struct PooledEntry {
    connection: Connection,
    banned: AtomicBool,
    refs: AtomicUsize,
}

impl PooledEntry {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            banned: AtomicBool::new(false),
            refs: AtomicUsize::new(1),
        }
    }

    pub fn address(&self) -> &Address {
        self.connection.address()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_banned(&self) -> bool {
        self.banned.load(Ordering::Acquire)
    }

    /// Current number of references (membership + leases).
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Take a reference unless the entry already drained to zero.
    pub(crate) fn try_ref(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                if refs == 0 {
                    None
                } else {
                    Some(refs + 1)
                }
            })
            .is_ok()
    }

    /// Release a reference; the last one closes the connection.
    pub(crate) fn unref(&self) {
        match self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
        {
            Ok(1) => {
                self.connection.close();
            }
            Ok(_) => {}
            Err(_) => {
                tracing::error!(
                    address = %self.address(),
                    connection_id = %self.connection.id(),
                    "Unbalanced unref on pooled entry"
                );
            }
        }
    }

    /// Set the ban flag. Returns false if the entry was already banned.
    pub(crate) fn mark_banned(&self) -> bool {
        !self.banned.swap(true, Ordering::AcqRel)
    }

    /// Try to lease the connection. Fails for banned or drained entries.
    pub fn try_lease(self: &Arc<Self>) -> Option<Lease> {
        if self.is_banned() || !self.try_ref() {
            return None;
        }
        // A ban may have landed between the flag check and the increment.
        if self.is_banned() {
            self.unref();
            return None;
        }
        Some(Lease {
            entry: Arc::clone(self),
        })
    }
}

/// A RAII guard holding one reference on a pooled entry.
///
/// Dropping the lease releases the reference, which closes the connection
/// if the entry was banned and this was the last user.
#[derive(Debug)]
pub struct Lease {
    entry: Arc<PooledEntry>,
}

impl Lease {
    pub fn entry(&self) -> &Arc<PooledEntry> {
        &self.entry
    }
}

impl Deref for Lease {
    type Target = Connection;
    fn deref(&self) -> &Self::Target {
        self.entry.connection()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.entry.unref();
    }
}
