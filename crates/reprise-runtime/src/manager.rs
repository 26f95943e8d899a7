//! The continuation registry.
//!
//! Every suspended chain lives here under its current identifier. An entry is
//! reachable until it expires or is removed, and at most one re-entry can hold
//! it at a time (see [`Lease`]).
//!
//! A chain that called another procedure waits, marked as awaiting an answer,
//! until the callee answers. Waiting entries never expire or get evicted on
//! their own; they go away together with the callee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as Slot;
use reprise_ir::ProcedureId;
use reprise_passes::{ProcedureDescriptor, ResumeIndex};

use crate::clock::{Clock, SystemClock};
use crate::config::ManagerConfig;
use crate::context::{Capture, ContinuationContext, ProcedureInstance};
use crate::error::ManagerError;
use crate::id::ContinuationId;

#[derive(Debug)]
struct Entry {
    context: Mutex<ContinuationContext>,
    in_use: AtomicBool,
    awaiting: AtomicBool,
}

impl Entry {
    fn new(context: ContinuationContext, awaiting: bool) -> Self {
        Self {
            context: Mutex::new(context),
            in_use: AtomicBool::new(false),
            awaiting: AtomicBool::new(awaiting),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContinuationContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::Acquire)
    }

    /// Neither leased nor waiting on a callee: subject to expiry and eviction.
    fn is_idle(&self) -> bool {
        !self.is_in_use() && !self.is_awaiting()
    }

    fn last_access(&self) -> Instant {
        self.lock().last_access
    }
}

/// Exclusive hold on a registry entry for one re-entry.
///
/// The entry is marked in use until the lease is dropped.
#[derive(Debug)]
pub struct Lease {
    id: ContinuationId,
    entry: Arc<Entry>,
}

impl Lease {
    pub fn id(&self) -> ContinuationId {
        self.id
    }

    /// A copy of the leased context.
    pub fn snapshot(&self) -> ContinuationContext {
        self.entry.lock().clone()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.entry.in_use.store(false, Ordering::Release);
    }
}

/// One row of [`ContinuationManager::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub id: ContinuationId,
    pub procedure: ProcedureId,
    pub resume_point: ResumeIndex,
    pub caller: Option<ContinuationId>,
    pub in_use: bool,
    pub awaiting_answer: bool,
}

#[derive(Debug)]
pub struct ContinuationManager {
    entries: DashMap<ContinuationId, Arc<Entry>>,
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    last_sweep: Mutex<Instant>,
}

impl ContinuationManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ManagerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            entries: DashMap::new(),
            config,
            clock,
            last_sweep: Mutex::new(now),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// A fresh identifier not currently registered.
    pub fn draw_id(&self) -> ContinuationId {
        loop {
            let id = ContinuationId::generate();
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a chain that has not run yet.
    pub fn create(
        &self,
        descriptor: Arc<ProcedureDescriptor>,
        instance: ProcedureInstance,
    ) -> Result<ContinuationId, ManagerError> {
        self.register(descriptor, instance, None)
    }

    /// Register a chain that answers to `caller`. `caller` waits for the
    /// answer from now on.
    pub fn create_child(
        &self,
        descriptor: Arc<ProcedureDescriptor>,
        instance: ProcedureInstance,
        caller: ContinuationId,
    ) -> Result<ContinuationId, ManagerError> {
        let waiting = self
            .entries
            .get(&caller)
            .map(|item| Arc::clone(item.value()))
            .ok_or(ManagerError::NotFound { id: caller })?;
        waiting.awaiting.store(true, Ordering::Release);
        self.register(descriptor, instance, Some(caller))
    }

    fn register(
        &self,
        descriptor: Arc<ProcedureDescriptor>,
        instance: ProcedureInstance,
        caller: Option<ContinuationId>,
    ) -> Result<ContinuationId, ManagerError> {
        let context =
            ContinuationContext::fresh(self.draw_id(), descriptor, instance, caller, self.clock.now());
        self.insert(context, false)
    }

    /// Replace the context of `id` with a new checkpoint under a fresh
    /// identifier. `id` never resolves again.
    pub fn update(
        &self,
        id: &ContinuationId,
        capture: Capture,
    ) -> Result<ContinuationId, ManagerError> {
        self.update_to(id, self.draw_id(), capture)
    }

    /// Like [`update`](Self::update), registering under `next`. Fails without
    /// touching `id` when `next` is already registered.
    pub fn update_to(
        &self,
        id: &ContinuationId,
        next: ContinuationId,
        capture: Capture,
    ) -> Result<ContinuationId, ManagerError> {
        if self.entries.contains_key(&next) {
            return Err(ManagerError::DuplicateId { id: next });
        }
        let (_, previous) = self
            .entries
            .remove(id)
            .ok_or(ManagerError::NotFound { id: *id })?;
        let previous = previous.lock().clone();

        let context = ContinuationContext {
            id: next,
            descriptor: previous.descriptor,
            resume_point: capture.resume_point,
            locals: capture.locals,
            instance: capture.instance,
            caller: previous.caller,
            created: previous.created,
            last_access: self.clock.now(),
        };
        tracing::trace!("continuation {id} -> {next} at {}", capture.resume_point);
        self.insert(context, false)
    }

    /// Snapshot of a context. Refreshes its last access.
    pub fn get(&self, id: &ContinuationId) -> Result<ContinuationContext, ManagerError> {
        self.sweep_if_due();
        let entry = self.live_entry(id)?;
        let mut context = entry.lock();
        context.last_access = self.clock.now();
        Ok(context.clone())
    }

    /// Hold `id` for one re-entry. A chain waiting on a callee can only be
    /// re-entered through [`checkout_answer`](Self::checkout_answer).
    pub fn checkout(&self, id: &ContinuationId) -> Result<Lease, ManagerError> {
        self.acquire(id, false)
    }

    /// Hold the waiting caller `id` to hand it its callee's answer.
    pub fn checkout_answer(&self, id: &ContinuationId) -> Result<Lease, ManagerError> {
        self.acquire(id, true)
    }

    fn acquire(&self, id: &ContinuationId, answering: bool) -> Result<Lease, ManagerError> {
        self.sweep_if_due();
        let entry = self.live_entry(id)?;
        if !answering && entry.is_awaiting() {
            return Err(ManagerError::AwaitingAnswer { id: *id });
        }
        if entry
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ManagerError::ConcurrentReentry { id: *id });
        }
        let lease = Lease {
            id: *id,
            entry: Arc::clone(&entry),
        };
        // The entry may have been removed between lookup and the flag swap.
        if !self
            .entries
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), &entry))
        {
            return Err(ManagerError::NotFound { id: *id });
        }
        if answering {
            entry.awaiting.store(false, Ordering::Release);
        }
        entry.lock().last_access = self.clock.now();
        tracing::trace!("checked out continuation {id}");
        Ok(lease)
    }

    /// Dispose of `id` alone. Returns whether it was registered.
    pub fn remove(&self, id: &ContinuationId) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            tracing::trace!("removed continuation {id}");
        }
        removed
    }

    /// Dispose of `id` and every chain waiting on it. Returns how many
    /// entries were removed.
    pub fn remove_chain(&self, id: &ContinuationId) -> usize {
        let mut removed = 0;
        let mut next = Some(*id);
        while let Some(current) = next {
            let Some((_, entry)) = self.entries.remove(&current) else {
                break;
            };
            next = entry.lock().caller;
            removed += 1;
        }
        if removed > 0 {
            tracing::trace!("removed continuation {id} and {} caller(s)", removed - 1);
        }
        removed
    }

    /// Duplicate `id` into an independent chain.
    ///
    /// Every caller waiting above `id` is duplicated too, so the copy answers
    /// into its own callers. All procedures on the chain must be cloneable.
    pub fn clone_continuation(&self, id: &ContinuationId) -> Result<ContinuationId, ManagerError> {
        let chain = self.chain(id)?;
        if let Some(plain) = chain.iter().find(|context| !context.descriptor.cloneable) {
            return Err(ManagerError::NotCloneable {
                procedure: plain.descriptor.id.clone(),
            });
        }

        let now = self.clock.now();
        let mut caller = None;
        let mut inserted = Vec::with_capacity(chain.len());
        // Outermost caller first, so each copy knows its caller's new id.
        for (depth, source) in chain.into_iter().enumerate().rev() {
            let copy = ContinuationContext {
                id: self.draw_id(),
                instance: source.instance.deep_copy(),
                caller,
                created: now,
                last_access: now,
                ..source
            };
            match self.insert(copy, depth > 0) {
                Ok(copy_id) => {
                    inserted.push(copy_id);
                    caller = Some(copy_id);
                }
                Err(error) => {
                    for copy_id in &inserted {
                        self.entries.remove(copy_id);
                    }
                    return Err(error);
                }
            }
        }
        let clone_id = caller.ok_or(ManagerError::NotFound { id: *id })?;
        tracing::trace!("cloned continuation {id} into {clone_id}");
        Ok(clone_id)
    }

    /// Remove idle entries not accessed within the expiration, together with
    /// the callers waiting on them. Returns how many entries were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        *self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner) = now;
        let expired: Vec<_> = self
            .entries
            .iter()
            .filter(|item| item.value().is_idle() && self.is_expired(item.value(), now))
            .map(|item| (*item.key(), Arc::clone(item.value())))
            .collect();
        let removed: usize = expired
            .iter()
            .map(|(id, entry)| self.discard_idle(id, entry))
            .sum();
        if removed > 0 {
            tracing::info!("swept {removed} expired continuation(s)");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summaries of every registered entry, ordered by identifier.
    pub fn entries(&self) -> Vec<EntrySummary> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .map(|item| {
                let context = item.value().lock();
                EntrySummary {
                    id: *item.key(),
                    procedure: context.descriptor.id.clone(),
                    resume_point: context.resume_point,
                    caller: context.caller,
                    in_use: item.value().is_in_use(),
                    awaiting_answer: item.value().is_awaiting(),
                }
            })
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_access()) > self.config.expiration
    }

    /// `id` followed by every caller waiting above it.
    fn chain(&self, id: &ContinuationId) -> Result<Vec<ContinuationContext>, ManagerError> {
        let mut chain = vec![self.get(id)?];
        while let Some(caller) = chain.last().and_then(|context| context.caller) {
            let entry = self
                .entries
                .get(&caller)
                .map(|item| Arc::clone(item.value()))
                .ok_or(ManagerError::NotFound { id: *id })?;
            let context = entry.lock().clone();
            chain.push(context);
        }
        Ok(chain)
    }

    /// Look up an entry, treating an idle expired one as already gone.
    fn live_entry(&self, id: &ContinuationId) -> Result<Arc<Entry>, ManagerError> {
        let entry = self
            .entries
            .get(id)
            .map(|item| Arc::clone(item.value()))
            .ok_or(ManagerError::NotFound { id: *id })?;
        if entry.is_idle() && self.is_expired(&entry, self.clock.now()) {
            self.discard_idle(id, &entry);
            return Err(ManagerError::NotFound { id: *id });
        }
        Ok(entry)
    }

    /// Remove `entry` if it is still registered under `id` and idle, along
    /// with the callers waiting on it. Returns how many entries went away.
    fn discard_idle(&self, id: &ContinuationId, entry: &Arc<Entry>) -> usize {
        if self
            .entries
            .remove_if(id, |_, current| Arc::ptr_eq(current, entry) && current.is_idle())
            .is_none()
        {
            return 0;
        }
        let caller = entry.lock().caller;
        1 + caller.map_or(0, |caller| self.remove_chain(&caller))
    }

    fn sweep_if_due(&self) {
        let now = self.clock.now();
        let due = {
            let last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            now.saturating_duration_since(*last) >= self.config.sweep_interval
        };
        if due {
            self.sweep();
        }
    }

    fn insert(
        &self,
        context: ContinuationContext,
        awaiting: bool,
    ) -> Result<ContinuationId, ManagerError> {
        if let Some(limit) = self.config.max_entries
            && self.entries.len() >= limit
        {
            self.sweep();
            if self.entries.len() >= limit {
                self.evict_one(limit)?;
            }
        }
        let id = context.id;
        match self.entries.entry(id) {
            Slot::Occupied(_) => return Err(ManagerError::DuplicateId { id }),
            Slot::Vacant(slot) => {
                slot.insert(Arc::new(Entry::new(context, awaiting)));
            }
        }
        tracing::trace!("registered continuation {id}");
        Ok(id)
    }

    /// Evict the least recently accessed idle chain.
    fn evict_one(&self, limit: usize) -> Result<(), ManagerError> {
        let victim = self
            .entries
            .iter()
            .filter(|item| item.value().is_idle())
            .map(|item| (item.value().last_access(), *item.key(), Arc::clone(item.value())))
            .min_by_key(|(last_access, id, _)| (*last_access, *id));
        let Some((_, id, entry)) = victim else {
            return Err(ManagerError::CapacityExceeded { limit });
        };
        let evicted = self.discard_idle(&id, &entry);
        if evicted == 0 {
            return Err(ManagerError::CapacityExceeded { limit });
        }
        tracing::warn!("registry full ({limit}), evicted continuation {id} ({evicted} entries)");
        Ok(())
    }
}
