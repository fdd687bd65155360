//! Lock table.
//!
//! Pure state machine for resource locks: at most one exclusive holder
//! per resource, shared co-holders, FIFO wait queues with a capacity cap,
//! and queue drains on release/expiry/disconnect. The actor wraps this
//! with timers and message sends; nothing here is async.
//!
//! Granting to a waiter always allocates a fresh lock id and a fresh
//! holder record; the wait queue lives on the resource, so back-to-back
//! releases drain strictly in enqueue order.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::protocol::{IdKind, LockMode, LockResource, wire_id};

// ============================================================================
// TYPES
// ============================================================================

/// A current lock holder.
#[derive(Debug, Clone)]
pub struct LockHolder {
    /// Lock id, fresh per grant
    pub lock_id: String,
    /// Holding agent
    pub agent_id: String,
    /// Granted mode
    pub mode: LockMode,
    /// Grant instant
    pub acquired_at: DateTime<Utc>,
    /// Expiry instant; always after `acquired_at`
    pub expires_at: DateTime<Utc>,
}

/// A queued lock request.
#[derive(Debug, Clone)]
pub struct LockWaiter {
    /// Requesting agent
    pub agent_id: String,
    /// Envelope id of the original request, echoed as `correlationId`
    /// when the grant finally happens
    pub request_id: String,
    /// Enqueue instant
    pub requested_at: DateTime<Utc>,
    /// Requested mode
    pub mode: LockMode,
    /// Requested lifetime; the server default applies when `None`
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct ResourceState {
    holders: Vec<LockHolder>,
    wait_queue: VecDeque<LockWaiter>,
}

impl ResourceState {
    fn all_shared(&self) -> bool {
        self.holders.iter().all(|h| h.mode == LockMode::Shared)
    }

    fn admits(&self, mode: LockMode) -> bool {
        self.holders.is_empty() || (mode == LockMode::Shared && self.all_shared())
    }
}

/// Outcome of a lock request.
#[derive(Debug, Clone)]
pub enum LockRequestOutcome {
    /// Granted immediately
    Granted(LockHolder),
    /// Enqueued; position is 1-based
    Enqueued { position: usize },
    /// Queue at capacity; nothing was enqueued
    QueueFull,
}

/// Why a release was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// No such lock id
    NotFound,
    /// The caller does not hold the lock
    NotHolder,
}

// ============================================================================
// TABLE
// ============================================================================

/// The lock table.
pub struct LockTable {
    resources: HashMap<LockResource, ResourceState>,
    by_lock_id: HashMap<String, LockResource>,
    max_wait_queue: usize,
    default_expiry_ms: u64,
}

impl LockTable {
    /// A table with the given queue cap and default expiry.
    pub fn new(max_wait_queue: usize, default_expiry_ms: u64) -> Self {
        Self {
            resources: HashMap::new(),
            by_lock_id: HashMap::new(),
            max_wait_queue,
            default_expiry_ms,
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>, timeout_ms: Option<u64>) -> DateTime<Utc> {
        let ms = timeout_ms.unwrap_or(self.default_expiry_ms).max(1);
        now + Duration::milliseconds(ms as i64)
    }

    /// Handle a lock request per the grant table.
    pub fn request(
        &mut self,
        resource: LockResource,
        agent_id: &str,
        mode: LockMode,
        request_id: &str,
        timeout_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> LockRequestOutcome {
        let expires_at = self.expiry_from(now, timeout_ms);
        let state = self.resources.entry(resource.clone()).or_default();

        if state.admits(mode) {
            let holder = LockHolder {
                lock_id: wire_id(IdKind::Lock),
                agent_id: agent_id.to_string(),
                mode,
                acquired_at: now,
                expires_at,
            };
            state.holders.push(holder.clone());
            self.by_lock_id.insert(holder.lock_id.clone(), resource);
            return LockRequestOutcome::Granted(holder);
        }

        if state.wait_queue.len() >= self.max_wait_queue {
            return LockRequestOutcome::QueueFull;
        }
        state.wait_queue.push_back(LockWaiter {
            agent_id: agent_id.to_string(),
            request_id: request_id.to_string(),
            requested_at: now,
            mode,
            timeout_ms,
        });
        LockRequestOutcome::Enqueued {
            position: state.wait_queue.len(),
        }
    }

    /// Release a lock; only the holder may do so.
    ///
    /// Returns the affected resource on success. Call [`Self::drain`]
    /// afterwards to hand the lock to waiters.
    pub fn release(
        &mut self,
        lock_id: &str,
        agent_id: &str,
    ) -> Result<LockResource, ReleaseError> {
        let resource = self
            .by_lock_id
            .get(lock_id)
            .cloned()
            .ok_or(ReleaseError::NotFound)?;
        let state = self
            .resources
            .get_mut(&resource)
            .ok_or(ReleaseError::NotFound)?;

        let position = state
            .holders
            .iter()
            .position(|h| h.lock_id == lock_id)
            .ok_or(ReleaseError::NotFound)?;
        if state.holders[position].agent_id != agent_id {
            return Err(ReleaseError::NotHolder);
        }

        state.holders.remove(position);
        self.by_lock_id.remove(lock_id);
        Ok(resource)
    }

    /// Expire a lock: treated exactly as a release by its holder.
    pub fn expire(&mut self, lock_id: &str) -> Option<(LockResource, LockHolder)> {
        let resource = self.by_lock_id.remove(lock_id)?;
        let state = self.resources.get_mut(&resource)?;
        let position = state.holders.iter().position(|h| h.lock_id == lock_id)?;
        let holder = state.holders.remove(position);
        Some((resource, holder))
    }

    /// Drop everything an agent holds or waits for.
    ///
    /// Returns the resources whose holder set changed; each needs a
    /// [`Self::drain`] pass.
    pub fn remove_agent(&mut self, agent_id: &str) -> Vec<LockResource> {
        let mut affected = Vec::new();
        for (resource, state) in self.resources.iter_mut() {
            let before = state.holders.len();
            state.holders.retain(|h| {
                let keep = h.agent_id != agent_id;
                if !keep {
                    self.by_lock_id.remove(&h.lock_id);
                }
                keep
            });
            state.wait_queue.retain(|w| w.agent_id != agent_id);
            if state.holders.len() != before {
                affected.push(resource.clone());
            }
        }
        affected
    }

    /// Grant queued waiters that can now hold the resource, FIFO.
    ///
    /// Disconnected waiters are dropped and the next is considered.
    /// Consecutive shared waiters are granted together. When the queue
    /// drains with no holders left, the resource record is deleted.
    pub fn drain<F: Fn(&str) -> bool>(
        &mut self,
        resource: &LockResource,
        now: DateTime<Utc>,
        is_connected: F,
    ) -> Vec<(LockHolder, LockWaiter)> {
        let mut granted = Vec::new();
        let Some(state) = self.resources.get_mut(resource) else {
            return granted;
        };

        loop {
            let Some(head) = state.wait_queue.front() else {
                break;
            };
            if !state.admits(head.mode) {
                break;
            }
            let waiter = match state.wait_queue.pop_front() {
                Some(waiter) => waiter,
                None => break,
            };
            if !is_connected(&waiter.agent_id) {
                continue;
            }
            let ms = waiter.timeout_ms.unwrap_or(self.default_expiry_ms).max(1);
            let holder = LockHolder {
                lock_id: wire_id(IdKind::Lock),
                agent_id: waiter.agent_id.clone(),
                mode: waiter.mode,
                acquired_at: now,
                expires_at: now + Duration::milliseconds(ms as i64),
            };
            state.holders.push(holder.clone());
            self.by_lock_id
                .insert(holder.lock_id.clone(), resource.clone());
            granted.push((holder, waiter));
        }

        if state.holders.is_empty() && state.wait_queue.is_empty() {
            self.resources.remove(resource);
        }
        granted
    }

    /// Current holders of a resource.
    pub fn holders(&self, resource: &LockResource) -> Vec<LockHolder> {
        self.resources
            .get(resource)
            .map(|s| s.holders.clone())
            .unwrap_or_default()
    }

    /// Current wait-queue length of a resource.
    pub fn queue_len(&self, resource: &LockResource) -> usize {
        self.resources
            .get(resource)
            .map(|s| s.wait_queue.len())
            .unwrap_or(0)
    }

    /// All currently live lock ids.
    pub fn lock_ids(&self) -> Vec<String> {
        self.by_lock_id.keys().cloned().collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LockTable {
        LockTable::new(50, 60_000)
    }

    fn m1() -> LockResource {
        LockResource::Memory("M1".to_string())
    }

    #[test]
    fn test_exclusive_grant_and_deny() {
        let mut table = table();
        let now = Utc::now();

        let a = table.request(m1(), "A", LockMode::Exclusive, "req-a", None, now);
        let LockRequestOutcome::Granted(holder) = a else {
            panic!("A should be granted");
        };
        assert!(holder.expires_at > holder.acquired_at);

        let b = table.request(m1(), "B", LockMode::Exclusive, "req-b", None, now);
        let LockRequestOutcome::Enqueued { position } = b else {
            panic!("B should be enqueued");
        };
        assert_eq!(position, 1);
    }

    #[test]
    fn test_shared_coholders() {
        let mut table = table();
        let now = Utc::now();

        assert!(matches!(
            table.request(m1(), "A", LockMode::Shared, "r1", None, now),
            LockRequestOutcome::Granted(_)
        ));
        assert!(matches!(
            table.request(m1(), "B", LockMode::Shared, "r2", None, now),
            LockRequestOutcome::Granted(_)
        ));
        assert_eq!(table.holders(&m1()).len(), 2);

        // Exclusive must wait behind the shared co-holders
        assert!(matches!(
            table.request(m1(), "C", LockMode::Exclusive, "r3", None, now),
            LockRequestOutcome::Enqueued { position: 1 }
        ));
    }

    #[test]
    fn test_queue_full() {
        let mut table = LockTable::new(2, 60_000);
        let now = Utc::now();
        table.request(m1(), "A", LockMode::Exclusive, "r0", None, now);
        table.request(m1(), "B", LockMode::Exclusive, "r1", None, now);
        table.request(m1(), "C", LockMode::Exclusive, "r2", None, now);
        assert!(matches!(
            table.request(m1(), "D", LockMode::Exclusive, "r3", None, now),
            LockRequestOutcome::QueueFull
        ));
        // Nothing was enqueued for D
        assert_eq!(table.queue_len(&m1()), 2);
    }

    #[test]
    fn test_release_requires_holder() {
        let mut table = table();
        let now = Utc::now();
        let LockRequestOutcome::Granted(holder) =
            table.request(m1(), "A", LockMode::Exclusive, "r1", None, now)
        else {
            panic!();
        };

        assert_eq!(
            table.release(&holder.lock_id, "B"),
            Err(ReleaseError::NotHolder)
        );
        assert!(table.release(&holder.lock_id, "A").is_ok());
        assert_eq!(
            table.release(&holder.lock_id, "A"),
            Err(ReleaseError::NotFound)
        );
    }

    #[test]
    fn test_drain_grants_fifo_with_fresh_ids() {
        let mut table = table();
        let now = Utc::now();
        let LockRequestOutcome::Granted(first) =
            table.request(m1(), "A", LockMode::Exclusive, "req-a", None, now)
        else {
            panic!();
        };
        table.request(m1(), "B", LockMode::Exclusive, "req-b", None, now);
        table.request(m1(), "C", LockMode::Exclusive, "req-c", None, now);

        table.release(&first.lock_id, "A").unwrap();
        let granted = table.drain(&m1(), now, |_| true);
        assert_eq!(granted.len(), 1);
        let (holder, waiter) = &granted[0];
        assert_eq!(holder.agent_id, "B");
        assert_eq!(waiter.request_id, "req-b");
        assert_ne!(holder.lock_id, first.lock_id);

        // Back-to-back release: C is next, again under a fresh id
        table.release(&holder.lock_id, "B").unwrap();
        let granted = table.drain(&m1(), now, |_| true);
        assert_eq!(granted[0].0.agent_id, "C");
        assert_eq!(granted[0].1.request_id, "req-c");
    }

    #[test]
    fn test_drain_skips_disconnected_waiters() {
        let mut table = table();
        let now = Utc::now();
        let LockRequestOutcome::Granted(holder) =
            table.request(m1(), "A", LockMode::Exclusive, "r1", None, now)
        else {
            panic!();
        };
        table.request(m1(), "gone", LockMode::Exclusive, "r2", None, now);
        table.request(m1(), "C", LockMode::Exclusive, "r3", None, now);

        table.release(&holder.lock_id, "A").unwrap();
        let granted = table.drain(&m1(), now, |agent| agent != "gone");
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].0.agent_id, "C");
    }

    #[test]
    fn test_drain_grants_consecutive_shared() {
        let mut table = table();
        let now = Utc::now();
        let LockRequestOutcome::Granted(holder) =
            table.request(m1(), "A", LockMode::Exclusive, "r1", None, now)
        else {
            panic!();
        };
        table.request(m1(), "B", LockMode::Shared, "r2", None, now);
        table.request(m1(), "C", LockMode::Shared, "r3", None, now);
        table.request(m1(), "D", LockMode::Exclusive, "r4", None, now);

        table.release(&holder.lock_id, "A").unwrap();
        let granted = table.drain(&m1(), now, |_| true);
        // Both shared waiters are granted together; the exclusive waits
        assert_eq!(granted.len(), 2);
        assert_eq!(table.queue_len(&m1()), 1);
    }

    #[test]
    fn test_empty_resource_record_deleted() {
        let mut table = table();
        let now = Utc::now();
        let LockRequestOutcome::Granted(holder) =
            table.request(m1(), "A", LockMode::Exclusive, "r1", None, now)
        else {
            panic!();
        };
        table.release(&holder.lock_id, "A").unwrap();
        table.drain(&m1(), now, |_| true);
        assert!(table.resources.is_empty());
        assert!(table.lock_ids().is_empty());
    }

    #[test]
    fn test_remove_agent_releases_and_scrubs_queue() {
        let mut table = table();
        let now = Utc::now();
        table.request(m1(), "A", LockMode::Exclusive, "r1", None, now);
        table.request(m1(), "B", LockMode::Exclusive, "r2", None, now);
        table.request(m1(), "C", LockMode::Exclusive, "r3", None, now);

        // B disappears from the queue without a trace
        table.remove_agent("B");
        assert_eq!(table.queue_len(&m1()), 1);

        // A's disconnect releases the lock; drain hands it to C
        let affected = table.remove_agent("A");
        assert_eq!(affected, vec![m1()]);
        let granted = table.drain(&m1(), now, |_| true);
        assert_eq!(granted[0].0.agent_id, "C");
    }

    #[test]
    fn test_expire_behaves_like_release() {
        let mut table = table();
        let now = Utc::now();
        let LockRequestOutcome::Granted(holder) =
            table.request(m1(), "A", LockMode::Exclusive, "r1", None, now)
        else {
            panic!();
        };
        table.request(m1(), "B", LockMode::Exclusive, "r2", None, now);

        let (resource, expired) = table.expire(&holder.lock_id).unwrap();
        assert_eq!(resource, m1());
        assert_eq!(expired.agent_id, "A");
        assert!(table.expire(&holder.lock_id).is_none());

        let granted = table.drain(&m1(), now, |_| true);
        assert_eq!(granted[0].0.agent_id, "B");
    }
}
