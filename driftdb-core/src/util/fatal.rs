//! Table-wide fatal error and shutdown signal
//!
//! Every blocking wait in the engine selects on the signal channel owned by
//! this handler. The channel never carries a message; it is closed (its only
//! sender dropped) when the first unrecoverable error is recorded, which wakes
//! all waiters at once.

use crate::{DriftError, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// User hook run once, on the first fatal error of a table
#[derive(Clone)]
pub struct FatalCallback(Arc<dyn Fn(&DriftError) + Send + Sync>);

impl FatalCallback {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&DriftError) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn call(&self, err: &DriftError) {
        (self.0)(err)
    }
}

impl fmt::Debug for FatalCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FatalCallback")
    }
}

/// Records the first fatal error and fans it out to every blocked caller
pub struct FatalErrorHandler {
    cause: Mutex<Option<String>>,
    closing: AtomicBool,
    signal_tx: Mutex<Option<Sender<()>>>,
    signal_rx: Receiver<()>,
    callback: Option<FatalCallback>,
}

impl FatalErrorHandler {
    pub fn new() -> Self {
        Self::with_callback(None)
    }

    pub fn with_callback(callback: Option<FatalCallback>) -> Self {
        let (tx, rx) = bounded(0);
        Self {
            cause: Mutex::new(None),
            closing: AtomicBool::new(false),
            signal_tx: Mutex::new(Some(tx)),
            signal_rx: rx,
            callback,
        }
    }

    /// Trip the fatal flag. Only the first error is kept.
    pub fn panic(&self, err: DriftError) {
        {
            let mut cause = self.cause.lock();
            if let Some(first) = cause.as_ref() {
                warn!("Ignoring fatal error {} after earlier fatal error {}", err, first);
                return;
            }
            error!("Fatal error, table stops accepting work: {}", err);
            *cause = Some(err.to_string());
        }
        self.signal_tx.lock().take();
        if let Some(callback) = &self.callback {
            callback.call(&err);
        }
    }

    /// Whether a fatal error has been recorded
    pub fn is_tripped(&self) -> bool {
        self.cause.lock().is_some()
    }

    /// Text of the first fatal error, if any
    pub fn cause(&self) -> Option<String> {
        self.cause.lock().clone()
    }

    /// Mark the table as closing. Returns false if it was already closing.
    pub fn begin_shutdown(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Error to hand back to a caller that cannot proceed
    pub fn error(&self) -> DriftError {
        match self.cause() {
            Some(cause) => DriftError::Fatal(cause),
            None => DriftError::Closed,
        }
    }

    /// Fail if the table is in a fatal state or closing
    pub fn check(&self) -> Result<()> {
        if let Some(cause) = self.cause() {
            return Err(DriftError::Fatal(cause));
        }
        if self.is_closing() {
            return Err(DriftError::Closed);
        }
        Ok(())
    }

    /// Fail only if the table is in a fatal state
    pub fn check_fatal(&self) -> Result<()> {
        match self.cause() {
            Some(cause) => Err(DriftError::Fatal(cause)),
            None => Ok(()),
        }
    }

    /// Receiver that becomes ready (disconnected) when the table stops
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal_rx
    }

    /// Send on `tx`, giving up if the table stops before the queue accepts the message
    pub fn send<T>(&self, tx: &Sender<T>, msg: T) -> Result<()> {
        select! {
            send(tx, msg) -> res => res.map_err(|_| self.error()),
            recv(self.signal_rx) -> _ => Err(self.error()),
        }
    }

    /// Wait for a reply on `rx`, giving up if the table stops first
    pub fn await_reply<T>(&self, rx: &Receiver<T>) -> Result<T> {
        select! {
            recv(rx) -> res => res.map_err(|_| self.error()),
            recv(self.signal_rx) -> _ => rx.try_recv().map_err(|_| self.error()),
        }
    }
}

impl Default for FatalErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}
