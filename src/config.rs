use crate::types::BackendKind;
use std::time::Duration;

pub const ENV_AUTO_RECONNECT: &str = "VIVE_TRACKER_AUTO_RECONNECT";
pub const ENV_RECONNECT_INTERVAL: &str = "VIVE_TRACKER_RECONNECT_INTERVAL";
pub const ENV_DISCOVERY_WINDOW: &str = "VIVE_TRACKER_DISCOVERY_WINDOW";
pub const ENV_BACKEND: &str = "VIVE_TRACKER_BACKEND";

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(2);
pub const DEFAULT_DISCOVERY_POLL: Duration = Duration::from_millis(100);

/// Reconnection policy and backend bring-up timing.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Retry connecting from `update()` while disconnected.
    pub auto_reconnect: bool,
    /// Minimum gap between two connect attempts.
    pub reconnect_interval: Duration,
    /// How long a fresh session of a backend with asynchronous discovery
    /// is scanned for a tracker before it is released.
    pub discovery_window: Duration,
    /// Gap between two scans of such a session.
    pub discovery_poll: Duration,
    /// Preferred backend when more than one is compiled in.
    pub backend: Option<BackendKind>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            discovery_poll: DEFAULT_DISCOVERY_POLL,
            backend: None,
        }
    }
}

impl TrackerConfig {
    /// Defaults overlaid with `VIVE_TRACKER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            auto_reconnect: read_env_bool(ENV_AUTO_RECONNECT, defaults.auto_reconnect),
            reconnect_interval: read_env_seconds(
                ENV_RECONNECT_INTERVAL,
                defaults.reconnect_interval,
            ),
            discovery_window: read_env_seconds(ENV_DISCOVERY_WINDOW, defaults.discovery_window),
            discovery_poll: defaults.discovery_poll,
            backend: match read_env_string(ENV_BACKEND, "").as_str() {
                "lighthouse" | "libsurvive" => Some(BackendKind::Lighthouse),
                "steamvr" | "openvr" => Some(BackendKind::SteamVr),
                "" => None,
                other => {
                    log::warn!(
                        "Unknown {}='{}', ignoring (supported: lighthouse|steamvr)",
                        ENV_BACKEND,
                        other
                    );
                    None
                }
            },
        };
        log::debug!("Tracker config: {:?}", config);
        config
    }
}

/// Seconds as a `Duration`; negative, NaN and infinite inputs become zero.
/// Values past what a `Duration` holds saturate to `Duration::MAX`.
pub fn seconds(value: f32) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f32(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    let v = value.trim().to_ascii_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_env_seconds(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .map(seconds)
        .unwrap_or(default)
}

fn read_env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
