use mstatus_core::{PluginError, PluginResult, Session};
use std::time::Duration;

pub const SCOPE: &str = "mpd";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6600;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Settings read from the `mpd` config scope.
#[derive(Debug, Clone, PartialEq)]
pub struct MpdConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Poll cadence; also how long a reconnect waits.
    pub interval: Duration,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            password: None,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl MpdConfig {
    pub fn from_session(session: &Session) -> PluginResult<Self> {
        let mut config = Self::default();

        let host = session.config_string(SCOPE, "host");
        if !host.trim().is_empty() {
            config.host = host.trim().to_owned();
        }

        let port = session.config_string(SCOPE, "port");
        if !port.trim().is_empty() {
            config.port = port
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| PluginError::config("mpd.port", format!("invalid port {port:?}")))?;
        }

        let password = session.config_string(SCOPE, "password");
        if !password.is_empty() {
            config.password = Some(password);
        }

        let interval = session.config_string(SCOPE, "interval");
        if !interval.trim().is_empty() {
            config.interval = interval
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|secs| *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| {
                    PluginError::config("mpd.interval", format!("invalid interval {interval:?}"))
                })?;
        }

        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mstatus_core::ConfigFile;

    fn session(pairs: &[(&str, &str)]) -> Session {
        Session::in_memory(ConfigFile::from_pairs(pairs.iter().copied()))
    }

    #[test]
    fn defaults_when_scope_is_missing() {
        let config = MpdConfig::from_session(&session(&[])).unwrap();
        assert_eq!(config, MpdConfig::default());
        assert_eq!(config.addr(), "localhost:6600");
    }

    #[test]
    fn reads_every_key() {
        let config = MpdConfig::from_session(&session(&[
            ("mpd.host", "media.lan"),
            ("mpd.port", "6601"),
            ("mpd.password", "hunter2"),
            ("mpd.interval", "2.5"),
        ]))
        .unwrap();
        assert_eq!(config.addr(), "media.lan:6601");
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert_eq!(config.interval, Duration::from_millis(2500));
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = MpdConfig::from_session(&session(&[("mpd.port", "99999")])).unwrap_err();
        assert!(matches!(err, PluginError::Config { ref key, .. } if key == "mpd.port"));

        let err = MpdConfig::from_session(&session(&[("mpd.interval", "-1")])).unwrap_err();
        assert!(matches!(err, PluginError::Config { ref key, .. } if key == "mpd.interval"));
    }
}
