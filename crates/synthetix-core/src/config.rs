// Engine configuration.
//
// Plain data — loading it from files or environment belongs to the
// front-end that owns the composition root.

use std::time::Duration;

use url::Url;

use synthetix_api::TransportConfig;

use crate::error::EngineError;

/// Configuration for one [`SyncEngine`](crate::SyncEngine) instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// API root, e.g. `https://hub.example.com/api`.
    pub base_url: Url,

    /// Whether to maintain the WebSocket push channel. When `false`,
    /// the engine falls back to polling `refresh()` on a timer — the
    /// degraded mode for environments without WebSocket support.
    pub push_enabled: bool,

    /// Explicit push endpoint. When `None` it is derived from
    /// `base_url` by swapping the scheme to `ws`/`wss` and appending
    /// `/ws/devices` (deployments may front the push endpoint on a
    /// different host).
    pub push_url: Option<Url>,

    /// Delay between push channel drop and reconnect attempt.
    pub reconnect_delay: Duration,

    /// Polling cadence when `push_enabled` is `false`.
    pub poll_interval: Duration,

    /// HTTP transport settings shared by all requests.
    pub transport: TransportConfig,
}

impl EngineConfig {
    /// Configuration with default timings for the given API root.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            push_enabled: true,
            push_url: None,
            reconnect_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            transport: TransportConfig::default(),
        }
    }

    /// Resolve the push endpoint (without credentials).
    pub(crate) fn resolve_push_url(&self) -> Result<Url, EngineError> {
        if let Some(ref url) = self.push_url {
            return Ok(url.clone());
        }

        let scheme = if self.base_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        let base = self.base_url.as_str().trim_end_matches('/');
        let derived = match base.split_once("://") {
            Some((_, rest)) => format!("{scheme}://{rest}/ws/devices"),
            None => return Err(EngineError::InvalidConfig(format!("bad base URL: {base}"))),
        };
        Url::parse(&derived).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let config = EngineConfig::new(Url::parse("http://localhost:8000/api").unwrap());
        assert!(config.push_enabled);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn push_url_derived_from_base() {
        let config = EngineConfig::new(Url::parse("http://localhost:8000/api").unwrap());
        let push = config.resolve_push_url().unwrap();
        assert_eq!(push.as_str(), "ws://localhost:8000/api/ws/devices");
    }

    #[test]
    fn push_url_uses_wss_for_https() {
        let config = EngineConfig::new(Url::parse("https://hub.example.com/api/").unwrap());
        let push = config.resolve_push_url().unwrap();
        assert_eq!(push.as_str(), "wss://hub.example.com/api/ws/devices");
    }

    #[test]
    fn push_url_derivation_rejects_hostless_base() {
        // `ws://` requires a host; a hostless base cannot yield a
        // usable push endpoint.
        let config = EngineConfig::new(Url::parse("file:///hub").unwrap());
        assert!(matches!(
            config.resolve_push_url(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn explicit_push_url_wins() {
        let mut config = EngineConfig::new(Url::parse("https://hub.example.com/api").unwrap());
        config.push_url = Some(Url::parse("wss://push.example.com/ws/devices").unwrap());
        let push = config.resolve_push_url().unwrap();
        assert_eq!(push.host_str(), Some("push.example.com"));
    }
}
