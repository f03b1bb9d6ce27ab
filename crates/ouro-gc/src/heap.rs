//! Record control blocks and raw block allocation.
//!
//! Every managed record is one heap block: a [`RecordBox`] header followed by
//! the inline payload. The header carries the intrusive list link (so the
//! record can change lists without a side table), the pointer to the type's
//! sealed metadata, the strong count, and the dynamic borrow flag.

use std::alloc::{alloc, dealloc};
use std::cell::Cell;
use std::ptr::NonNull;

use thiserror::Error;

use crate::list::Link;
use crate::schema::{metadata_of, Managed, TypeMetadata};

// ============================================================================
// Errors and borrow flags
// ============================================================================

/// Heap allocation for a record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("failed to allocate a managed record")]
pub struct AllocError;

/// Dynamic borrow state of a payload, RefCell style.
pub(crate) type BorrowFlag = isize;
/// No outstanding borrows.
pub(crate) const UNUSED: BorrowFlag = 0;
/// One outstanding mutable borrow. Positive values count shared borrows.
pub(crate) const WRITING: BorrowFlag = -1;

// ============================================================================
// The record control block
// ============================================================================

/// The control header at the start of every record block.
///
/// `repr(C)` with the link first: list cursors hold `Link` pointers and cast
/// them back to the containing block.
#[repr(C)]
pub(crate) struct RecordBox {
    pub(crate) link: Link,
    pub(crate) meta: &'static TypeMetadata,
    count: Cell<usize>,
    pub(crate) borrow: Cell<BorrowFlag>,
}

// ============================================================================
// Allocation and reclamation
// ============================================================================

impl RecordBox {
    /// Allocate a block for one `T`, moving `value` into the payload.
    ///
    /// The block starts detached with a strong count of zero; the caller
    /// links it into a registry and binds the first handle.
    pub(crate) fn allocate<T: Managed>(value: T) -> Result<NonNull<Self>, AllocError> {
        let meta = metadata_of::<T>();
        // SAFETY: the block layout is never zero-sized; the header precedes
        // the payload.
        let block = unsafe { alloc(meta.block_layout) }.cast::<Self>();
        let Some(record) = NonNull::new(block) else {
            return Err(AllocError);
        };
        // SAFETY: `block` is a fresh allocation of `meta.block_layout`, which
        // was built by extending the header layout with T's.
        unsafe {
            block.write(Self {
                link: Link::dangling(),
                meta,
                count: Cell::new(0),
                borrow: Cell::new(UNUSED),
            });
            (*block).link.detach();
            Self::payload_ptr(record).cast::<T>().write(value);
        }
        Ok(record)
    }

    /// Run the payload destructor in place. The block stays allocated.
    ///
    /// # Safety
    ///
    /// The payload must be live and not borrowed; it must not be destroyed
    /// twice.
    pub(crate) unsafe fn destroy_payload(this: NonNull<Self>) {
        let destroy = this.as_ref().meta.destroy;
        destroy(Self::payload_ptr(this));
    }

    /// Release the raw block.
    ///
    /// # Safety
    ///
    /// The payload must already be destroyed and the link detached; no
    /// pointer to the block may be used afterwards.
    pub(crate) unsafe fn free(this: NonNull<Self>) {
        let layout = this.as_ref().meta.block_layout;
        dealloc(this.as_ptr().cast::<u8>(), layout);
    }

    /// Pointer to the inline payload.
    ///
    /// # Safety
    ///
    /// `this` must reference a live record block.
    pub(crate) unsafe fn payload_ptr(this: NonNull<Self>) -> *mut u8 {
        this.as_ptr()
            .cast::<u8>()
            .add(this.as_ref().meta.payload_offset)
    }

    /// Recover the block from its embedded link.
    ///
    /// # Safety
    ///
    /// `link` must be the `link` field of a live `RecordBox`.
    pub(crate) unsafe fn from_link(link: NonNull<Link>) -> NonNull<Self> {
        // the link is the first field of the repr(C) header
        link.cast()
    }

    pub(crate) fn link_of(this: NonNull<Self>) -> NonNull<Link> {
        this.cast()
    }

    /// Visit every non-null managed slot in the payload, per the schema.
    ///
    /// # Safety
    ///
    /// The payload must be live, its slots must hold valid record pointers
    /// (or null), and no mutable borrow of the payload may be outstanding.
    pub(crate) unsafe fn for_each_slot(this: NonNull<Self>, mut f: impl FnMut(NonNull<Self>)) {
        let meta = this.as_ref().meta;
        let payload = Self::payload_ptr(this);
        for member in meta.members {
            let base = payload.add(member.offset).cast::<Option<NonNull<Self>>>();
            for i in 0..member.len {
                if let Some(target) = base.add(i).read() {
                    f(target);
                }
            }
        }
    }
}

// ============================================================================
// Count and flag accessors
// ============================================================================

impl RecordBox {
    /// Set while the record sits on the collector's scratch list. A doomed
    /// record is owned by the collector: handle decrements must not unlink or
    /// free it.
    const DOOMED: usize = 1 << (usize::BITS - 1);
    const COUNT_MASK: usize = !Self::DOOMED;

    pub(crate) fn count(&self) -> usize {
        self.count.get() & Self::COUNT_MASK
    }

    pub(crate) fn inc_count(&self) {
        debug_assert!(self.count() < Self::COUNT_MASK, "strong count overflow");
        self.count.set(self.count.get() + 1);
    }

    /// Decrement the strong count. The count must be positive.
    pub(crate) fn dec_count(&self) {
        debug_assert!(self.count() > 0, "strong count underflow");
        self.count.set(self.count.get() - 1);
    }

    /// Decrement, tolerating an already-zero count. Used for doomed records,
    /// whose counts stop meaning anything once reclamation starts.
    pub(crate) fn dec_count_saturating(&self) {
        if self.count() > 0 {
            self.count.set(self.count.get() - 1);
        }
    }

    pub(crate) fn is_doomed(&self) -> bool {
        self.count.get() & Self::DOOMED != 0
    }

    pub(crate) fn set_doomed(&self, doomed: bool) {
        if doomed {
            self.count.set(self.count.get() | Self::DOOMED);
        } else {
            self.count.set(self.count.get() & Self::COUNT_MASK);
        }
    }
}
