//! Handlers that record what they receive.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use census_stream::{DispatchContext, PayloadHandler};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::TestError;

/// Collects every payload it is handed.
///
/// Clones share the same record, so keep one and register the other.
pub struct RecordingHandler<P> {
    inner: Arc<Recorded<P>>,
}

struct Recorded<P> {
    payloads: Mutex<Vec<Arc<P>>>,
    count: watch::Sender<usize>,
}

impl<P> RecordingHandler<P>
where
    P: Send + Sync + 'static,
{
    /// An empty recorder.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Recorded {
                payloads: Mutex::new(Vec::new()),
                count: watch::Sender::new(0),
            }),
        }
    }

    /// Payloads received so far, in completion order.
    pub fn payloads(&self) -> Vec<Arc<P>> {
        self.inner.payloads.lock().clone()
    }

    /// Number of payloads received.
    pub fn count(&self) -> usize {
        *self.inner.count.borrow()
    }

    /// Wait until at least `count` payloads arrived, then return them all.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> Result<Vec<Arc<P>>, TestError> {
        let mut rx = self.inner.count.subscribe();
        let reached = tokio::time::timeout(limit, rx.wait_for(|seen| *seen >= count))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);
        if reached {
            Ok(self.payloads())
        } else {
            Err(TestError::timeout(limit, format!("{count} payloads")))
        }
    }
}

impl<P> Clone for RecordingHandler<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Default for RecordingHandler<P>
where
    P: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for RecordingHandler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("count", &*self.inner.count.borrow())
            .finish()
    }
}

impl<P> PayloadHandler<P> for RecordingHandler<P>
where
    P: Send + Sync + 'static,
{
    async fn handle(&self, _ctx: DispatchContext, payload: Arc<P>) -> anyhow::Result<()> {
        self.inner.payloads.lock().push(payload);
        self.inner.count.send_modify(|count| *count += 1);
        Ok(())
    }
}

/// Fails every invocation, by error or by panic.
pub struct FailingHandler<P> {
    message: String,
    panics: bool,
    calls: Arc<watch::Sender<usize>>,
    _payload: PhantomData<fn(P)>,
}

impl<P> FailingHandler<P>
where
    P: Send + Sync + 'static,
{
    /// Handler returning an error with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            panics: false,
            calls: Arc::new(watch::Sender::new(0)),
            _payload: PhantomData,
        }
    }

    /// Handler panicking with `message`.
    pub fn panicking(message: impl Into<String>) -> Self {
        Self {
            panics: true,
            ..Self::new(message)
        }
    }

    /// Number of invocations.
    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }
}

impl<P> Clone for FailingHandler<P> {
    fn clone(&self) -> Self {
        Self {
            message: self.message.clone(),
            panics: self.panics,
            calls: Arc::clone(&self.calls),
            _payload: PhantomData,
        }
    }
}

impl<P> fmt::Debug for FailingHandler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingHandler")
            .field("message", &self.message)
            .field("panics", &self.panics)
            .finish()
    }
}

impl<P> PayloadHandler<P> for FailingHandler<P>
where
    P: Send + Sync + 'static,
{
    async fn handle(&self, _ctx: DispatchContext, _payload: Arc<P>) -> anyhow::Result<()> {
        self.calls.send_modify(|calls| *calls += 1);
        if self.panics {
            panic!("{}", self.message);
        }
        anyhow::bail!("{}", self.message)
    }
}
