//! Contexts: the live-record registry and the trial-deletion collector.

use std::any::Any;
use std::cell::Cell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::heap::{AllocError, RecordBox, WRITING};
use crate::list::{insert_before, unlink, List};
use crate::metrics::CollectMetrics;
use crate::ptr::Handle;
use crate::schema::{metadata_of, Managed};
use crate::tracing::internal as trace;

// ============================================================================
// Context and allocation
// ============================================================================

/// Owner of a set of managed records.
///
/// A context keeps every record it allocates on an intrusive registry list.
/// Dropping the last handle to an acyclic record frees it immediately;
/// [`collect`](Context::collect) reclaims records that are reachable only
/// through cycles among themselves. Dropping the context runs a final
/// collection.
///
/// A context and its records belong to one thread. Different contexts are
/// fully independent; the process-wide type metadata is the only state they
/// share.
pub struct Context {
    registry: List,
    collecting: Cell<bool>,
    collections: Cell<usize>,
    last_metrics: Cell<CollectMetrics>,
}

impl Context {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: List::new(),
            collecting: Cell::new(false),
            collections: Cell::new(0),
            last_metrics: Cell::new(CollectMetrics::new()),
        }
    }

    /// Allocate a record holding `value` and return the first handle to it.
    ///
    /// # Panics
    ///
    /// Panics if called from a destructor running inside
    /// [`collect`](Context::collect), and aborts allocation via
    /// [`std::alloc::handle_alloc_error`] when the heap is exhausted; use
    /// [`try_make`](Context::try_make) to observe allocation failure instead.
    pub fn make<T: Managed>(&self, value: T) -> Handle<T> {
        match self.try_make(value) {
            Ok(handle) => handle,
            Err(AllocError) => std::alloc::handle_alloc_error(metadata_of::<T>().block_layout),
        }
    }

    /// Allocate a record holding `value`, reporting heap exhaustion as an
    /// error. No handle exists for a failed allocation.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] when the process heap refuses the block.
    ///
    /// # Panics
    ///
    /// Panics if called from a destructor running inside
    /// [`collect`](Context::collect).
    pub fn try_make<T: Managed>(&self, value: T) -> Result<Handle<T>, AllocError> {
        assert!(
            !self.collecting.get(),
            "cannot allocate through a context that is mid-collection"
        );
        let record = RecordBox::allocate(value)?;
        // SAFETY: the fresh record is detached and nothing else references it.
        unsafe { self.registry.push_back(RecordBox::link_of(record)) };
        Ok(Handle::from_record(record))
    }
}

// ============================================================================
// Trial-deletion collection
// ============================================================================

impl Context {
    /// Reclaim every record that is unreachable from any handle living
    /// outside the registry, including records that keep each other alive in
    /// cycles.
    ///
    /// One pass of trial deletion over the whole registry: subtract the
    /// references records hold to one another, doom the records whose count
    /// reached zero, restore counts while rescuing everything reachable from
    /// a surviving record, then destroy and free the doomed set. Destructors
    /// of doomed records run before any doomed block is freed, so they may
    /// read the payloads of their doomed peers.
    ///
    /// Records reachable from a handle outside the registry always survive
    /// with their counts unchanged; calling `collect` twice in a row with no
    /// intervening mutation reclaims nothing the second time.
    ///
    /// If a reclamation destructor panics, the remaining destructors still
    /// run, every doomed block is still freed, and the first panic is then
    /// resumed.
    ///
    /// # Panics
    ///
    /// Panics if any record in the registry is mutably borrowed: the pass
    /// reads every record's slots.
    pub fn collect(&self) {
        if self.collecting.get() {
            return;
        }
        let head = self.registry.head();

        // The slot walks below read every payload; refuse if one of them is
        // exclusively borrowed.
        unsafe {
            let mut p = head.as_ref().next();
            while p != head {
                let record = RecordBox::from_link(p);
                assert!(
                    record.as_ref().borrow.get() != WRITING,
                    "collect called while a record is mutably borrowed"
                );
                p = p.as_ref().next();
            }
        }

        self.collecting.set(true);
        let _span = trace::collect_span();
        let start = Instant::now();
        let unused = List::new();
        let mut scanned = 0_usize;
        let mut rescued = 0_usize;

        // ====================================================================
        // Phase 1: subtract internal references
        // ====================================================================
        // Afterwards a record's count is exactly the number of handles to it
        // living outside the registry.
        unsafe {
            let mut p = head.as_ref().next();
            while p != head {
                scanned += 1;
                RecordBox::for_each_slot(RecordBox::from_link(p), |target| {
                    // SAFETY: slot targets are live records.
                    unsafe { target.as_ref() }.dec_count();
                });
                p = p.as_ref().next();
            }
        }

        // ====================================================================
        // Phase 2: partition
        // ====================================================================
        // Records with no external references move to the scratch list and
        // are marked doomed, which suppresses the unlink-and-free side of the
        // handle decrement rule for them.
        unsafe {
            let mut p = head.as_ref().next();
            while p != head {
                let next = p.as_ref().next();
                let record = RecordBox::from_link(p);
                if record.as_ref().count() == 0 {
                    unlink(p);
                    insert_before(p, unused.head());
                    record.as_ref().set_doomed(true);
                }
                p = next;
            }
        }

        // ====================================================================
        // Phase 3: restore and rescue
        // ====================================================================
        // Every record still on the registry is live, so everything it
        // references is live too. Rescued records are appended at the tail,
        // where this same walk picks them up and rescues their referents in
        // turn.
        unsafe {
            let mut p = head.as_ref().next();
            while p != head {
                RecordBox::for_each_slot(RecordBox::from_link(p), |target| {
                    // SAFETY: slot targets are live records; a doomed target
                    // sits on `unused` and moves back onto the registry.
                    let t = unsafe { target.as_ref() };
                    if t.is_doomed() {
                        t.set_doomed(false);
                        unsafe {
                            unlink(RecordBox::link_of(target));
                            insert_before(RecordBox::link_of(target), head);
                        }
                        rescued += 1;
                    }
                    t.inc_count();
                });
                p = p.as_ref().next();
            }
        }

        // ====================================================================
        // Phase 4: restore the doomed records' outgoing references
        // ====================================================================
        // Their destructors are about to drop those handles for real; without
        // this, a doomed record referencing a survivor would decrement the
        // survivor twice, once in the subtraction walk and once at
        // destruction, and could free it out from under a live handle.
        unsafe {
            let uhead = unused.head();
            let mut p = uhead.as_ref().next();
            while p != uhead {
                RecordBox::for_each_slot(RecordBox::from_link(p), |target| {
                    // SAFETY: slot targets are live records.
                    unsafe { target.as_ref() }.inc_count();
                });
                p = p.as_ref().next();
            }
        }

        // ====================================================================
        // Phase 5: reclaim in two passes
        // ====================================================================
        // Destructors may read their doomed peers, so no doomed block is
        // freed until every destructor has run.
        let mut reclaimed = 0_usize;
        let mut panic_payload: Option<Box<dyn Any + Send>> = None;
        unsafe {
            let uhead = unused.head();
            let mut p = uhead.as_ref().next();
            while p != uhead {
                reclaimed += 1;
                let record = RecordBox::from_link(p);
                // SAFETY: every record on `unused` is doomed, unborrowed, and
                // not yet destroyed.
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| unsafe { RecordBox::destroy_payload(record) }));
                if let Err(panic) = outcome {
                    panic_payload.get_or_insert(panic);
                }
                p = p.as_ref().next();
            }
        }
        while let Some(p) = unused.pop_front() {
            // SAFETY: the payload was destroyed above and pop_front detached
            // the node.
            unsafe { RecordBox::free(RecordBox::from_link(p)) };
        }
        drop(unused);

        self.collections.set(self.collections.get() + 1);
        let metrics = CollectMetrics {
            duration: start.elapsed(),
            records_scanned: scanned,
            records_reclaimed: reclaimed,
            records_surviving: scanned - reclaimed,
            records_rescued: rescued,
            total_collections: self.collections.get(),
        };
        trace::log_collect_end(&metrics);
        self.last_metrics.set(metrics);
        self.collecting.set(false);

        if let Some(panic) = panic_payload {
            resume_unwind(panic);
        }
    }
}

// ============================================================================
// Introspection
// ============================================================================

impl Context {
    /// Number of live records in the registry. O(n).
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Statistics from the most recent [`collect`](Context::collect) on this
    /// context.
    #[must_use]
    pub fn last_metrics(&self) -> CollectMetrics {
        self.last_metrics.get()
    }
}

// ============================================================================
// Default / Drop / Debug
// ============================================================================

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Context {
    /// Runs a final collection, then detaches any surviving records.
    ///
    /// Survivors are records still held by handles outside the context, which
    /// is a programmer error at this point. Detaching them from the dying registry
    /// keeps those handles sound: each record is freed when its last handle
    /// drops, exactly as if it had never been registered.
    fn drop(&mut self) {
        self.collect();
        let mut detached = 0_usize;
        while self.registry.pop_front().is_some() {
            detached += 1;
        }
        if detached > 0 {
            trace::log_detached(detached);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("records", &self.len())
            .field("collecting", &self.collecting.get())
            .finish()
    }
}

// ============================================================================
// The default context
// ============================================================================

thread_local! {
    /// The default context for this thread. Handles are not `Send`, so the
    /// process-wide default of the embeddable API is per-thread here.
    static DEFAULT_CONTEXT: Context = Context::new();
}

/// Allocate a record in the thread's default context.
///
/// # Panics
///
/// As [`Context::make`].
pub fn make<T: Managed>(value: T) -> Handle<T> {
    DEFAULT_CONTEXT.with(|context| context.make(value))
}

/// Run one collection on the thread's default context.
///
/// # Panics
///
/// As [`Context::collect`].
pub fn collect() {
    DEFAULT_CONTEXT.with(Context::collect);
}

/// Statistics from the most recent collection on the thread's default
/// context.
#[must_use]
pub fn last_collect_metrics() -> CollectMetrics {
    DEFAULT_CONTEXT.with(Context::last_metrics)
}
