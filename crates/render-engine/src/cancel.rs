//! One-way cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use vexport_common::error::{ExportError, ExportResult};

type Callback = Box<dyn FnOnce() + Send>;

/// A shared flag that moves from "running" to "canceled" exactly once.
///
/// Callbacks registered with [`CancelFlag::on_cancel`] run once, on the
/// thread that performs the first transition.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the call that
    /// actually flipped the flag.
    pub fn cancel(&self) -> bool {
        if self.inner.canceled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let callbacks = std::mem::take(
            &mut *self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for callback in callbacks {
            callback();
        }
        true
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// `Err(ExportError::Canceled)` once cancellation was requested.
    pub fn check(&self) -> ExportResult<()> {
        if self.is_canceled() {
            Err(ExportError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Run `callback` on the first transition to canceled, or immediately
    /// if that already happened.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_canceled() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }
}

impl fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelFlag")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
