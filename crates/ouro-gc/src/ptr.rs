//! The `Handle<T>` strong reference and its borrow guards.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use thiserror::Error;

use crate::heap::{RecordBox, UNUSED, WRITING};
use crate::list::unlink;
use crate::schema::{Managed, Slots};

// ============================================================================
// Handle - the strong reference
// ============================================================================

/// A strong reference to a managed record, possibly null.
///
/// A non-null handle contributes exactly one to its record's strong count for
/// its whole lifetime: cloning increments the target, dropping applies the
/// decrement rule, moving transfers the reference without touching counts.
/// When the last handle to an acyclic record drops, the record is freed on
/// the spot; records kept alive only by cycles among themselves are reclaimed
/// by [`Context::collect`](crate::Context::collect).
///
/// Payload access goes through [`borrow`](Handle::borrow) /
/// [`borrow_mut`](Handle::borrow_mut), which enforce the usual shared-xor-
/// mutable discipline at runtime. The guards are what make reference-graph
/// edits sound: writing a handle field drops the old edge, and the old edge
/// may have been the last reference to a record someone is reading.
///
/// A handle is exactly one pointer wide and is itself a managed slot, so
/// records embed handles (and arrays of handles) directly as fields.
///
/// Handles are not `Send`: a record belongs to the thread of its context.
#[repr(transparent)]
pub struct Handle<T: Managed> {
    ptr: Option<NonNull<RecordBox>>,
    _marker: PhantomData<T>,
}

// SAFETY: a handle is exactly one nullable record-pointer slot.
unsafe impl<T: Managed> Slots for Handle<T> {
    const COUNT: usize = 1;
}

impl<T: Managed> Handle<T> {
    /// The null handle.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ptr: None,
            _marker: PhantomData,
        }
    }

    /// Whether this handle references no record.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Whether two handles reference the same record. Two null handles are
    /// considered equal.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// The record's strong count, or 0 for a null handle.
    #[must_use]
    pub fn strong_count(this: &Self) -> usize {
        this.ptr.map_or(0, |record| unsafe { record.as_ref() }.count())
    }

    /// Bind a new handle to a record, incrementing its strong count.
    pub(crate) fn from_record(record: NonNull<RecordBox>) -> Self {
        unsafe { record.as_ref() }.inc_count();
        Self {
            ptr: Some(record),
            _marker: PhantomData,
        }
    }

    fn expect_record(&self) -> NonNull<RecordBox> {
        self.ptr.expect("null managed handle dereferenced")
    }
}

// ============================================================================
// Borrow operations
// ============================================================================

impl<T: Managed> Handle<T> {
    /// Immutably borrow the payload.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null or the payload is mutably borrowed.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.try_borrow()
            .expect("record is already mutably borrowed")
    }

    /// Immutably borrow the payload, failing instead of panicking on a
    /// borrow conflict.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null.
    pub fn try_borrow(&self) -> Result<Ref<'_, T>, BorrowError> {
        let record = self.expect_record();
        let r = unsafe { record.as_ref() };
        let flag = r.borrow.get();
        if flag < UNUSED {
            return Err(BorrowError(()));
        }
        r.borrow.set(flag + 1);
        Ok(Ref {
            record,
            _marker: PhantomData,
        })
    }

    /// Mutably borrow the payload.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null or the payload is already borrowed.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.try_borrow_mut().expect("record is already borrowed")
    }

    /// Mutably borrow the payload, failing instead of panicking on a borrow
    /// conflict.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null.
    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, T>, BorrowMutError> {
        let record = self.expect_record();
        let r = unsafe { record.as_ref() };
        if r.borrow.get() != UNUSED {
            return Err(BorrowMutError(()));
        }
        r.borrow.set(WRITING);
        Ok(RefMut {
            record,
            _marker: PhantomData,
        })
    }

}

// ============================================================================
// Clone / Default / Drop / Debug
// ============================================================================

impl<T: Managed> Clone for Handle<T> {
    fn clone(&self) -> Self {
        if let Some(record) = self.ptr {
            unsafe { record.as_ref() }.inc_count();
        }
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Managed> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Managed> Drop for Handle<T> {
    fn drop(&mut self) {
        if let Some(record) = self.ptr.take() {
            // SAFETY: a live handle keeps its record block live.
            unsafe { release(record) };
        }
    }
}

impl<T: Managed> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ptr {
            None => f.write_str("Handle(null)"),
            Some(record) => {
                let r = unsafe { record.as_ref() };
                write!(f, "Handle({} @ {:p})", r.meta.type_name, record.as_ptr())
            }
        }
    }
}

// ============================================================================
// The decrement rule
// ============================================================================

/// The decrement rule: drop one strong reference to `record`.
///
/// If the count reaches zero the record is unlinked from whatever list it is
/// on, destroyed, and freed. Doomed records are owned by the running
/// collector: their counts are decremented (saturating) but they are never
/// unlinked or freed here; the collector frees them after all reclamation
/// destructors have run.
///
/// # Safety
///
/// `record` must reference a live record block with at least one outstanding
/// strong reference (the one being dropped).
pub(crate) unsafe fn release(record: NonNull<RecordBox>) {
    let r = record.as_ref();
    if r.is_doomed() {
        r.dec_count_saturating();
        return;
    }
    r.dec_count();
    if r.count() == 0 {
        unlink(RecordBox::link_of(record));
        // Destroying the payload drops its own handles, which may cascade
        // into further releases; none of them can reach this record again,
        // or its count could not have been zero.
        RecordBox::destroy_payload(record);
        RecordBox::free(record);
    }
}

// ============================================================================
// Borrow guards
// ============================================================================

/// Shared borrow of a record payload. Releases the borrow on drop.
pub struct Ref<'b, T: Managed> {
    record: NonNull<RecordBox>,
    _marker: PhantomData<&'b T>,
}

impl<T: Managed> Deref for Ref<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the borrow flag holds a shared borrow; the handle behind
        // `'b` keeps the record alive.
        unsafe { &*RecordBox::payload_ptr(self.record).cast::<T>() }
    }
}

impl<T: Managed> Drop for Ref<'_, T> {
    fn drop(&mut self) {
        let r = unsafe { self.record.as_ref() };
        let flag = r.borrow.get();
        debug_assert!(flag > UNUSED);
        r.borrow.set(flag - 1);
    }
}

/// Exclusive borrow of a record payload. Releases the borrow on drop.
pub struct RefMut<'b, T: Managed> {
    record: NonNull<RecordBox>,
    _marker: PhantomData<&'b mut T>,
}

impl<T: Managed> Deref for RefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the borrow flag holds the exclusive borrow.
        unsafe { &*RecordBox::payload_ptr(self.record).cast::<T>() }
    }
}

impl<T: Managed> DerefMut for RefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the borrow flag holds the exclusive borrow.
        unsafe { &mut *RecordBox::payload_ptr(self.record).cast::<T>() }
    }
}

impl<T: Managed> Drop for RefMut<'_, T> {
    fn drop(&mut self) {
        let r = unsafe { self.record.as_ref() };
        debug_assert_eq!(r.borrow.get(), WRITING);
        r.borrow.set(UNUSED);
    }
}

// ============================================================================
// Borrow errors
// ============================================================================

/// The payload is already mutably borrowed.
#[derive(Debug, Error)]
#[error("record is already mutably borrowed")]
pub struct BorrowError(());

/// The payload is already borrowed.
#[derive(Debug, Error)]
#[error("record is already borrowed")]
pub struct BorrowMutError(());
