//! Service-id selection for connection attempts.
//!
//! The client asks a [`ServiceIdStrategy`] for the id to use on every
//! connection attempt, passing the number of consecutive failed attempts.
//! Rotation is a pure function of that count, so nothing shared is mutated
//! and a successful handshake simply resets the count to zero.

use std::fmt;

/// Chooses the service id for a connection attempt.
pub trait ServiceIdStrategy: Send + Sync + fmt::Debug + 'static {
    /// Service id to use after `consecutive_failures` failed attempts.
    fn service_id(&self, consecutive_failures: u32) -> &str;
}

/// Always uses the same service id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedServiceId(String);

impl FixedServiceId {
    /// Create a fixed strategy.
    pub fn new(service_id: impl Into<String>) -> Self {
        Self(service_id.into())
    }
}

impl ServiceIdStrategy for FixedServiceId {
    fn service_id(&self, _consecutive_failures: u32) -> &str {
        &self.0
    }
}

/// Cycles through a list of service ids, advancing after every
/// `rotate_after` consecutive failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatingServiceIds {
    ids: Vec<String>,
    rotate_after: u32,
}

impl RotatingServiceIds {
    /// Create a rotating strategy.
    ///
    /// Returns `None` when `ids` is empty. A `rotate_after` of zero is
    /// treated as one.
    pub fn new<I, S>(ids: I, rotate_after: u32) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return None;
        }
        Some(Self {
            ids,
            rotate_after: rotate_after.max(1),
        })
    }

    /// Number of ids in the rotation.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false; construction rejects an empty list.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl ServiceIdStrategy for RotatingServiceIds {
    fn service_id(&self, consecutive_failures: u32) -> &str {
        let index = (consecutive_failures / self.rotate_after) as usize % self.ids.len();
        &self.ids[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_ignores_failures() {
        let strategy = FixedServiceId::new("example");
        assert_eq!(strategy.service_id(0), "example");
        assert_eq!(strategy.service_id(17), "example");
    }

    #[test]
    fn test_rotating_requires_ids() {
        assert!(RotatingServiceIds::new(Vec::<String>::new(), 1).is_none());
    }

    #[test]
    fn test_rotating_advances_every_n_failures() {
        let strategy = RotatingServiceIds::new(["a", "b", "c"], 2).unwrap();
        let picked: Vec<&str> = (0..8).map(|n| strategy.service_id(n)).collect();
        assert_eq!(picked, ["a", "a", "b", "b", "c", "c", "a", "a"]);
    }

    #[test]
    fn test_rotating_zero_threshold_rotates_every_failure() {
        let strategy = RotatingServiceIds::new(["a", "b"], 0).unwrap();
        assert_eq!(strategy.service_id(0), "a");
        assert_eq!(strategy.service_id(1), "b");
        assert_eq!(strategy.service_id(2), "a");
    }

    #[test]
    fn test_rotating_is_pure() {
        let strategy = RotatingServiceIds::new(["a", "b"], 1).unwrap();
        assert_eq!(strategy.service_id(3), strategy.service_id(3));
        assert_eq!(strategy.len(), 2);
    }
}
