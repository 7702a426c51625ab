//! Pre-dispatch filters.

use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use parking_lot::Mutex;

use crate::handler::DispatchContext;
use crate::metrics;
use crate::payload::PayloadKind;
use crate::router::RoutedPayload;

/// Result of running a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Let the payload through.
    Accept,
    /// Drop the payload.
    Reject,
}

/// A check run before a payload reaches its handlers.
///
/// Filters run in registration order; the first rejection stops the chain.
pub trait PreDispatchFilter: Send + Sync + fmt::Debug + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decide whether `payload` is dispatched.
    fn check(&self, payload: &RoutedPayload, ctx: &DispatchContext) -> FilterVerdict;
}

/// Drops exact repeats of recent messages.
///
/// Keeps the content hashes of the last `window` accepted messages per
/// payload type. A message whose hash is still in that history is rejected.
/// By default only service messages are checked, so control messages that
/// legitimately repeat (such as connection state after a reconnect) always
/// pass.
#[derive(Debug)]
pub struct DuplicateFilter {
    window: usize,
    kinds: Vec<PayloadKind>,
    history: Mutex<HashMap<TypeId, RecentHashes>>,
}

#[derive(Debug, Default)]
struct RecentHashes {
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl RecentHashes {
    fn admit(&mut self, hash: u64, window: usize) -> bool {
        if self.seen.contains(&hash) {
            return false;
        }
        self.order.push_back(hash);
        self.seen.insert(hash);
        while self.order.len() > window {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

impl DuplicateFilter {
    /// Filter remembering the last `window` messages of each type.
    ///
    /// A window of zero disables the filter.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            kinds: vec![PayloadKind::ServiceMessage],
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Check these payload kinds instead of only service messages.
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = PayloadKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Size of the history per payload type.
    pub fn window(&self) -> usize {
        self.window
    }
}

impl PreDispatchFilter for DuplicateFilter {
    fn name(&self) -> &'static str {
        "duplicate"
    }

    fn check(&self, payload: &RoutedPayload, _ctx: &DispatchContext) -> FilterVerdict {
        if self.window == 0 || !self.kinds.contains(&payload.kind()) {
            return FilterVerdict::Accept;
        }
        let admitted = self
            .history
            .lock()
            .entry(payload.type_key())
            .or_default()
            .admit(payload.content_hash(), self.window);
        if admitted {
            FilterVerdict::Accept
        } else {
            metrics::record_duplicate(payload.type_name());
            FilterVerdict::Reject
        }
    }
}
