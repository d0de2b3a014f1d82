//! Bridge configuration.
//!
//! ```toml
//! call_timeout_ms = 5000
//! render_timeout_ms = 10000
//!
//! [[component]]
//! tag = "login-button"
//! url = "https://provider.example/button.htm"
//! dimensions = { width = 200, height = 40 }
//!
//! [component.props.label]
//! type = "string"
//! required = true
//! query_param = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::spec::ComponentConfig;

const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_POPUP_POLL_MS: u64 = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Default timeout for `property-get`/`method-invoke` round trips.
    pub call_timeout_ms: u64,
    /// How long `render` waits for the child handshake.
    pub render_timeout_ms: u64,
    /// How often a popup is checked for having been closed by the user.
    pub popup_poll_interval_ms: u64,
    /// Components registered when the bridge starts.
    #[serde(rename = "component", skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
            popup_poll_interval_ms: DEFAULT_POPUP_POLL_MS,
            components: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, BridgeError> {
        let config: Self = toml::from_str(raw).map_err(|err| BridgeError::Config {
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| BridgeError::Config {
            reason: format!("{}: {err}", path.display()),
        })?;
        Self::from_toml_str(&raw)
    }

    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        for (name, value) in [
            ("call_timeout_ms", self.call_timeout_ms),
            ("render_timeout_ms", self.render_timeout_ms),
            ("popup_poll_interval_ms", self.popup_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(BridgeError::Config {
                    reason: format!("`{name}` must be greater than zero"),
                });
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn popup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.popup_poll_interval_ms)
    }
}
