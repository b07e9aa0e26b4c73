//! Single-slot, last-write-wins mailbox.
//!
//! A [`Mailbox`] holds at most one pending value. [`Mailbox::post`] replaces
//! whatever is waiting and hands the superseded value back to the caller;
//! [`Mailbox::take`] empties the slot. It is deliberately not a queue: a
//! writer that posts twice before the reader looks loses the first value.
//!
//! # Example
//!
//! ```
//! use tether::sync::Mailbox;
//!
//! let mailbox = Mailbox::new();
//! assert_eq!(mailbox.post(1), None);
//! assert_eq!(mailbox.post(2), Some(1)); // superseded
//! assert_eq!(mailbox.take(), Some(2));
//! assert_eq!(mailbox.take(), None);
//! ```
//!
//! # Implementation
//!
//! The slot is an [`AtomicPtr`] that is either null or owns a `Box<T>`.
//! Both operations are a single atomic swap, so posting from one thread and
//! taking from another needs no lock.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A lock-free single-slot cell with last-write-wins semantics.
pub struct Mailbox<T> {
    slot: AtomicPtr<T>,
    _owns: PhantomData<Box<T>>,
}

// SAFETY: the mailbox moves `T` values between threads but never shares a
// `&T`, so `T: Send` is sufficient for both bounds.
unsafe impl<T: Send> Send for Mailbox<T> {}
// SAFETY: see above; every access to the pointee goes through an atomic swap
// that transfers exclusive ownership.
unsafe impl<T: Send> Sync for Mailbox<T> {}

impl<T> Mailbox<T> {
    /// Creates an empty mailbox.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    /// Stores `value`, returning the value it superseded, if any.
    pub fn post(&self, value: T) -> Option<T> {
        let fresh = Box::into_raw(Box::new(value));
        let old = self.slot.swap(fresh, Ordering::AcqRel);
        // SAFETY: non-null pointers in the slot always come from
        // `Box::into_raw`, and the swap gave us sole ownership of `old`.
        unsafe { Self::reclaim(old) }
    }

    /// Removes and returns the pending value.
    pub fn take(&self) -> Option<T> {
        let old = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
        // SAFETY: as in `post`.
        unsafe { Self::reclaim(old) }
    }

    /// Returns `true` if no value is pending.
    ///
    /// Only a snapshot: another thread may post right after this returns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.load(Ordering::Acquire).is_null()
    }

    /// # Safety
    ///
    /// `ptr` must be null or a pointer from `Box::into_raw` that no one else
    /// can reach.
    unsafe fn reclaim(ptr: *mut T) -> Option<T> {
        if ptr.is_null() {
            None
        } else {
            // SAFETY: guaranteed by the caller.
            Some(*unsafe { Box::from_raw(ptr) })
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Mailbox<T> {
    fn drop(&mut self) {
        let _ = self.take();
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("empty", &self.is_empty())
            .finish()
    }
}
