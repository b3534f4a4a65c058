//! Single-fire completion contract shared by every transfer operation.
//!
//! A [`Deferred`] is lazy: its work runs once, either when it is awaited or
//! when a continuation is registered through [`Deferred::exec`]. Work written
//! in callback style receives a [`Done`] handle; only the first completion
//! counts and later attempts are dropped.

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{Omen, TransferError, TransferResult};

/// Completion handle for callback-style work.
///
/// Cloneable so several event sources can race to complete; the first call to
/// [`Done::complete`] wins and every later call is a silent no-op.
pub struct Done<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<TransferResult<T>>>>>,
}

impl<T> Clone for Done<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Done<T> {
    fn new(tx: oneshot::Sender<TransferResult<T>>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Complete the operation. Returns `false` if it had already completed.
    pub fn complete(&self, result: TransferResult<T>) -> bool {
        let tx = self.slot.lock().take();
        match tx {
            Some(tx) => {
                // The receiver may be gone if the caller dropped the operation.
                let _ = tx.send(result);
                true
            }
            None => {
                debug!("dropping duplicate completion");
                false
            }
        }
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, err: TransferError) -> bool {
        self.complete(Err(err))
    }

    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Run callback-style work and wait for its first completion.
///
/// A synchronous `Err` from `work` becomes the outcome unless the work already
/// completed. If every [`Done`] clone is dropped without completing, the
/// operation fails instead of hanging.
pub(crate) async fn run_callback<T, W>(work: W) -> TransferResult<T>
where
    W: FnOnce(Done<T>) -> TransferResult<()>,
{
    let (tx, rx) = oneshot::channel();
    let done = Done::new(tx);
    if let Err(err) = work(done.clone()) {
        done.fail(err);
    }
    drop(done);

    rx.await.map_err(|_| {
        TransferError::internal("The operation ended without ever triggering its completion callback.")
    })?
}

/// Lazily-started asynchronous operation with a single outcome.
#[must_use = "a Deferred does nothing until it is awaited or `exec`uted"]
pub struct Deferred<T> {
    omen: Option<Omen>,
    work: BoxFuture<'static, TransferResult<T>>,
}

impl<T> Deferred<T>
where
    T: Send + 'static,
{
    /// Wrap a future as a deferred operation
    pub fn new<F>(omen: Option<Omen>, work: F) -> Self
    where
        F: Future<Output = TransferResult<T>> + Send + 'static,
    {
        Self {
            omen,
            work: Box::pin(work),
        }
    }

    /// Wrap callback-style work; see [`Done`]
    pub fn from_callback<W>(omen: Option<Omen>, work: W) -> Self
    where
        W: FnOnce(Done<T>) -> TransferResult<()> + Send + 'static,
    {
        Self::new(omen, run_callback(work))
    }

    /// Already-failed operation, for misuse detected at the call site
    pub fn failed(omen: Option<Omen>, err: TransferError) -> Self {
        Self::new(omen, async move { Err(err) })
    }

    pub fn omen(&self) -> Option<&Omen> {
        self.omen.as_ref()
    }

    /// Run the work and return its outcome, tagging errors with the omen
    pub async fn result(self) -> TransferResult<T> {
        let omen = self.omen;
        self.work.await.map_err(|err| err.with_omen(omen))
    }

    /// Run the work on the tokio runtime and hand the outcome to `callback`.
    ///
    /// Must be called from within a runtime.
    pub fn exec<C>(self, callback: C) -> JoinHandle<()>
    where
        C: FnOnce(TransferResult<T>) + Send + 'static,
    {
        tokio::spawn(async move {
            let outcome = self.result().await;
            callback(outcome);
        })
    }
}

impl<T> IntoFuture for Deferred<T>
where
    T: Send + 'static,
{
    type Output = TransferResult<T>;
    type IntoFuture = BoxFuture<'static, TransferResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.result())
    }
}
