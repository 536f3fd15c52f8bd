//! Engine configuration.
//!
//! Built programmatically through [`Config::builder`] or loaded from TOML.
//! The configuration covers exactly what the protocol lets a client choose:
//! the advertised pixel format, the encoding preference order, the ordered
//! security handler list with its password, and the shared-session flag.

use rfb_pixels::PixelFormat;
use rfb_wire::messages::{
    ENCODING_COPY_RECT, ENCODING_HEXTILE, ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZRLE,
};
use rfb_wire::{RfbError, Result, SecurityKind};
use serde::{Deserialize, Serialize};

/// Security handlers as they appear in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityHandler {
    /// No authentication.
    None,
    /// VNC password challenge/response.
    VncAuth,
}

impl From<SecurityHandler> for SecurityKind {
    fn from(handler: SecurityHandler) -> Self {
        match handler {
            SecurityHandler::None => SecurityKind::None,
            SecurityHandler::VncAuth => SecurityKind::VncAuth,
        }
    }
}

/// Named pixel formats a client can advertise via SetPixelFormat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredFormat {
    /// 32bpp little-endian RGB888 (depth 24).
    Rgb888,
    /// 16bpp RGB565.
    Rgb565,
}

impl PreferredFormat {
    /// The concrete format this name stands for.
    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            Self::Rgb888 => PixelFormat::rgb888(),
            Self::Rgb565 => PixelFormat::rgb565(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pixel format to advertise after init; `None` keeps the server's.
    pub preferred_format: Option<PreferredFormat>,

    /// Encoding tags to advertise, in preference order.
    pub encodings: Vec<i32>,

    /// Security handlers in preference order.
    pub security: Vec<SecurityHandler>,

    /// Password for the VNC authentication handler.
    pub password: Option<String>,

    /// Whether to request a shared session at ClientInit.
    pub shared: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_format: Some(PreferredFormat::Rgb888),
            encodings: default_encodings(),
            security: vec![SecurityHandler::VncAuth, SecurityHandler::None],
            password: None,
            shared: true,
        }
    }
}

fn default_encodings() -> Vec<i32> {
    vec![
        ENCODING_TIGHT,
        ENCODING_ZRLE,
        ENCODING_HEXTILE,
        ENCODING_COPY_RECT,
        ENCODING_RAW,
    ]
}

impl Config {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| RfbError::protocol(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.encodings.is_empty() {
            return Err(RfbError::protocol(
                "configuration must list at least one encoding",
            ));
        }
        if self.security.is_empty() {
            return Err(RfbError::protocol(
                "configuration must list at least one security handler",
            ));
        }
        Ok(())
    }

    /// The security handlers as wire-level kinds, in preference order.
    pub fn security_kinds(&self) -> Vec<SecurityKind> {
        self.security.iter().map(|&h| h.into()).collect()
    }

    /// Password bytes for the VNC security type.
    pub fn password_bytes(&self) -> Option<&[u8]> {
        self.password.as_deref().map(str::as_bytes)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the pixel format advertised after init.
    pub fn preferred_format(mut self, format: Option<PreferredFormat>) -> Self {
        self.config.preferred_format = format;
        self
    }

    /// Replace the encoding preference list.
    pub fn encodings(mut self, encodings: Vec<i32>) -> Self {
        self.config.encodings = encodings;
        self
    }

    /// Replace the security handler list.
    pub fn security(mut self, handlers: Vec<SecurityHandler>) -> Self {
        self.config.security = handlers;
        self
    }

    /// Set the VNC password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Request a shared (or exclusive) session.
    pub fn shared(mut self, shared: bool) -> Self {
        self.config.shared = shared;
        self
    }

    /// Validate and finish.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.encodings[0], ENCODING_TIGHT);
        assert!(config.shared);
    }

    #[test]
    fn builder() {
        let config = Config::builder()
            .encodings(vec![ENCODING_RAW])
            .security(vec![SecurityHandler::None])
            .password("sekrit")
            .shared(false)
            .build()
            .unwrap();

        assert_eq!(config.encodings, vec![ENCODING_RAW]);
        assert_eq!(config.security_kinds(), vec![SecurityKind::None]);
        assert_eq!(config.password_bytes(), Some(&b"sekrit"[..]));
        assert!(!config.shared);
    }

    #[test]
    fn empty_lists_rejected() {
        assert!(Config::builder().encodings(vec![]).build().is_err());
        assert!(Config::builder().security(vec![]).build().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let text = r#"
            preferred_format = "rgb565"
            encodings = [16, 1, 0]
            security = ["none"]
            shared = false
        "#;
        let config = Config::from_toml(text).unwrap();
        assert_eq!(config.preferred_format, Some(PreferredFormat::Rgb565));
        assert_eq!(config.encodings, vec![16, 1, 0]);
        assert_eq!(config.security, vec![SecurityHandler::None]);
        assert!(!config.shared);
        assert!(config.password.is_none());
    }

    #[test]
    fn toml_defaults_fill_gaps() {
        let config = Config::from_toml("password = \"pw\"").unwrap();
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert!(!config.encodings.is_empty());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(Config::from_toml("encodings = \"raw\"").is_err());
        assert!(Config::from_toml("encodings = []").is_err());
    }
}
