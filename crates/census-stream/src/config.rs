//! Event-stream client configuration.
//!
//! [`StreamOptions`] carries everything the client needs to open and keep
//! the push connection: the endpoint, the service id, and the tuning knobs
//! for reconnection, outbound framing, duplicate suppression and shutdown.

use std::time::Duration;

use url::{form_urlencoded, Url};

use crate::error::{StreamError, StreamResult};

/// Default push endpoint.
pub const DEFAULT_ROOT_ENDPOINT: &str = "wss://push.planetside2.com";

/// Default game environment.
pub const DEFAULT_ENVIRONMENT: &str = "ps2";

/// Configuration for an [`EventStreamClient`](crate::EventStreamClient).
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Root endpoint of the push service (default: `wss://push.planetside2.com`).
    pub root_endpoint: String,
    /// Service id issued by the service operator. Required.
    pub service_id: String,
    /// Game environment (default: `ps2`).
    pub environment: String,
    /// Fixed delay before every reconnection attempt (default: 5 seconds).
    pub reconnection_delay: Duration,
    /// Maximum size of an outbound frame in bytes (default: 4096).
    pub frame_size: usize,
    /// Upper bound on waiting for the command write lock (default: 5 seconds).
    pub send_lock_timeout: Duration,
    /// Initial capacity of the outbound serialization buffer (default: 4096).
    pub buffer_size: usize,
    /// Buffer capacity above which the buffer is reallocated after a send (default: 64 KB).
    pub buffer_shrink_threshold: usize,
    /// Number of recent service messages remembered per type for duplicate suppression (default: 100).
    pub duplicate_window: usize,
    /// Maximum number of dispatches in flight before the receive loop waits (default: 1024).
    pub max_outstanding_dispatches: usize,
    /// How long `stop` waits for in-flight dispatches (default: 10 seconds).
    pub shutdown_grace: Duration,
    /// Replay remembered subscriptions after a reconnect (default: true).
    pub resubscribe_on_reconnect: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            root_endpoint: DEFAULT_ROOT_ENDPOINT.to_string(),
            service_id: String::new(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            reconnection_delay: Duration::from_secs(5),
            frame_size: 4096,
            send_lock_timeout: Duration::from_secs(5),
            buffer_size: 4096,
            buffer_shrink_threshold: 64 * 1024, // 64 KB
            duplicate_window: 100,
            max_outstanding_dispatches: 1024,
            shutdown_grace: Duration::from_secs(10),
            resubscribe_on_reconnect: true,
        }
    }
}

impl StreamOptions {
    /// Create options for the given service id, everything else defaulted.
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            ..Self::default()
        }
    }

    /// Set the root endpoint.
    pub fn root_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.root_endpoint = endpoint.into();
        self
    }

    /// Set the service id.
    pub fn service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    /// Set the environment.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Set the reconnection delay.
    pub fn reconnection_delay(mut self, delay: Duration) -> Self {
        self.reconnection_delay = delay;
        self
    }

    /// Set the outbound frame size.
    pub fn frame_size(mut self, size: usize) -> Self {
        self.frame_size = size;
        self
    }

    /// Set the send lock timeout.
    pub fn send_lock_timeout(mut self, timeout: Duration) -> Self {
        self.send_lock_timeout = timeout;
        self
    }

    /// Set the serialization buffer size.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the buffer shrink threshold.
    pub fn buffer_shrink_threshold(mut self, threshold: usize) -> Self {
        self.buffer_shrink_threshold = threshold;
        self
    }

    /// Set the duplicate suppression window.
    pub fn duplicate_window(mut self, window: usize) -> Self {
        self.duplicate_window = window;
        self
    }

    /// Set the maximum number of outstanding dispatches.
    pub fn max_outstanding_dispatches(mut self, max: usize) -> Self {
        self.max_outstanding_dispatches = max;
        self
    }

    /// Set the shutdown grace period.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set whether subscriptions are replayed after a reconnect.
    pub fn resubscribe_on_reconnect(mut self, enabled: bool) -> Self {
        self.resubscribe_on_reconnect = enabled;
        self
    }

    /// Check the options for misconfiguration.
    pub fn validate(&self) -> StreamResult<()> {
        if self.service_id.trim().is_empty() {
            return Err(StreamError::invalid_options(
                "service_id",
                "a service id is required",
            ));
        }
        if self.environment.trim().is_empty() {
            return Err(StreamError::invalid_options(
                "environment",
                "must not be empty",
            ));
        }
        if self.reconnection_delay.is_zero() {
            return Err(StreamError::invalid_options(
                "reconnection_delay",
                "must be greater than zero",
            ));
        }
        if self.frame_size == 0 {
            return Err(StreamError::invalid_options(
                "frame_size",
                "must be greater than zero",
            ));
        }
        if self.max_outstanding_dispatches == 0 {
            return Err(StreamError::invalid_options(
                "max_outstanding_dispatches",
                "must be greater than zero",
            ));
        }
        self.connection_url(&self.service_id).map(|_| ())
    }

    /// Build the streaming URL for the given service id.
    ///
    /// The service id is passed in rather than read from the options so a
    /// [`ServiceIdStrategy`](crate::ServiceIdStrategy) can pick it per attempt.
    pub fn connection_url(&self, service_id: &str) -> StreamResult<Url> {
        let mut url = Url::parse(&self.root_endpoint)
            .map_err(|e| StreamError::invalid_options("root_endpoint", e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(StreamError::invalid_options(
                "root_endpoint",
                format!("unsupported scheme `{}`", url.scheme()),
            ));
        }
        let path = format!("{}/streaming", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(Some(&format!(
            "environment={}&service-id=s:{}",
            query_value(&self.environment),
            query_value(service_id)
        )));
        Ok(url)
    }
}

fn query_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_options_default() {
        let options = StreamOptions::default();
        assert_eq!(options.root_endpoint, "wss://push.planetside2.com");
        assert_eq!(options.environment, "ps2");
        assert_eq!(options.reconnection_delay, Duration::from_secs(5));
        assert_eq!(options.frame_size, 4096);
        assert_eq!(options.send_lock_timeout, Duration::from_secs(5));
        assert_eq!(options.duplicate_window, 100);
        assert!(options.resubscribe_on_reconnect);
    }

    #[test]
    fn test_stream_options_builder() {
        let options = StreamOptions::new("example")
            .environment("ps2ps4us")
            .reconnection_delay(Duration::from_millis(200))
            .frame_size(16)
            .duplicate_window(3)
            .resubscribe_on_reconnect(false);

        assert_eq!(options.service_id, "example");
        assert_eq!(options.environment, "ps2ps4us");
        assert_eq!(options.reconnection_delay, Duration::from_millis(200));
        assert_eq!(options.frame_size, 16);
        assert_eq!(options.duplicate_window, 3);
        assert!(!options.resubscribe_on_reconnect);
    }

    #[test]
    fn test_validate_requires_service_id() {
        let err = StreamOptions::default().validate().unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidOptions {
                field: "service_id",
                ..
            }
        ));

        let err = StreamOptions::new("   ").validate().unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidOptions {
                field: "service_id",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = StreamOptions::new("example")
            .reconnection_delay(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidOptions {
                field: "reconnection_delay",
                ..
            }
        ));

        let err = StreamOptions::new("example")
            .frame_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidOptions {
                field: "frame_size",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let err = StreamOptions::new("example")
            .root_endpoint("https://push.planetside2.com")
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidOptions {
                field: "root_endpoint",
                ..
            }
        ));

        assert!(StreamOptions::new("example")
            .root_endpoint("not a url")
            .validate()
            .is_err());
    }

    #[test]
    fn test_connection_url() {
        let options = StreamOptions::new("example");
        let url = options.connection_url("example").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://push.planetside2.com/streaming?environment=ps2&service-id=s:example"
        );
    }

    #[test]
    fn test_connection_url_with_path_and_other_id() {
        let options = StreamOptions::new("example")
            .root_endpoint("ws://127.0.0.1:9000/census/")
            .environment("ps2ps4eu");
        let url = options.connection_url("backup").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:9000/census/streaming?environment=ps2ps4eu&service-id=s:backup"
        );
    }

    #[test]
    fn test_connection_url_escapes_query_values() {
        let options = StreamOptions::new("example").environment("ps2&debug=1");
        let url = options.connection_url("key#1&x y").unwrap();
        assert_eq!(url.fragment(), None);

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("environment".to_owned(), "ps2&debug=1".to_owned()),
                ("service-id".to_owned(), "s:key#1&x y".to_owned()),
            ]
        );
    }
}
