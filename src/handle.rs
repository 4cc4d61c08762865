use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::{BindingError, Result};

/// Single-owner slot for a pointer handed out by the native engine.
///
/// The slot is emptied exactly once by [`NativeHandle::take`], which is what
/// makes every release path idempotent: whoever takes the pointer is the one
/// who frees it, and later takes see nothing.
pub(crate) struct NativeHandle<T> {
    ptr: Option<NonNull<T>>,
    kind: &'static str,
}

// The pointer is only dereferenced by the native engine, and every access
// goes through the mutex of the owning component.
unsafe impl<T> Send for NativeHandle<T> {}

impl<T> NativeHandle<T> {
    /// Wraps `ptr`, or returns `None` when the native call reported failure
    /// with a null pointer.
    pub fn new(ptr: *mut T, kind: &'static str) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr: Some(ptr),
            kind,
        })
    }

    pub fn get(&self) -> Result<*mut T> {
        self.ptr
            .map(NonNull::as_ptr)
            .ok_or(BindingError::UseAfterDispose(self.kind))
    }

    pub fn is_live(&self) -> bool {
        self.ptr.is_some()
    }

    pub fn take(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }
}

/// Handle bookkeeping stays consistent even if a holder panicked, so a
/// poisoned lock is simply reclaimed.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
