//! Softphone configuration
//!
//! [`EndpointIdentity`] carries everything the signaling engine needs to create the
//! local endpoint; it is supplied once per process run and never mutated afterwards.
//! [`SoftphoneConfig`] wraps the identity together with the controller tunables.
//!
//! # Examples
//!
//! ```rust
//! use softline_core::config::{EndpointIdentity, SoftphoneConfig};
//!
//! let identity = EndpointIdentity::new("3005", "wss://pbx.example.com:7443/ws")
//!     .with_display_name("Front Desk")
//!     .with_password("secret")
//!     .with_domain_list("pbx.example.com, backup.example.com");
//!
//! assert_eq!(identity.identity_uri(), Some("sip:3005@pbx.example.com".to_string()));
//! assert_eq!(identity.domains.len(), 2);
//!
//! let config = SoftphoneConfig::new(identity).with_reset_delay_ms(500);
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SoftphoneError, SoftphoneResult};

/// Default delay between reaching Terminated and returning to Idle
pub const DEFAULT_RESET_DELAY_MS: u64 = 1500;

/// Default capacity of the softphone event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Largest accepted event channel capacity
pub const MAX_EVENT_CAPACITY: usize = 65_536;

/// A STUN or TURN server handed to the engine for ICE gathering
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// `stun:`, `stuns:`, `turn:` or `turns:` URLs sharing the credentials below
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl fmt::Debug for IceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceServer")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field("credential", &self.credential.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    pub fn turn(url: impl Into<String>, username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    fn is_relay(url: &Url) -> bool {
        matches!(url.scheme(), "turn" | "turns")
    }

    /// Every URL uses a STUN/TURN scheme; TURN entries carry credentials
    pub fn validate(&self) -> SoftphoneResult<()> {
        if self.urls.is_empty() {
            return Err(SoftphoneError::config("ice_servers", "an ICE server needs at least one URL"));
        }
        for raw in &self.urls {
            let url = Url::parse(raw)
                .map_err(|e| SoftphoneError::config("ice_servers", format!("{raw:?} is not a URL: {e}")))?;
            if !matches!(url.scheme(), "stun" | "stuns" | "turn" | "turns") {
                return Err(SoftphoneError::config(
                    "ice_servers",
                    format!("{raw:?} must use the stun, stuns, turn or turns scheme"),
                ));
            }
            if Self::is_relay(&url) && (self.username.is_none() || self.credential.is_none()) {
                return Err(SoftphoneError::config(
                    "ice_servers",
                    format!("{raw:?} needs a username and credential"),
                ));
            }
        }
        Ok(())
    }
}

/// Local identity and signaling server details
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIdentity {
    /// User part of the identity URI (e.g. an extension such as "3005")
    pub username: String,
    /// Display name presented to remote parties
    pub display_name: Option<String>,
    /// Authorization password, if the registrar challenges
    pub password: Option<String>,
    /// SIP domains; the first one builds identity and target URIs
    pub domains: Vec<String>,
    /// Signaling server address (e.g. "wss://pbx.example.com:7443/ws")
    pub server_address: String,
    /// STUN/TURN servers for media negotiation
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

impl fmt::Debug for EndpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointIdentity")
            .field("username", &self.username)
            .field("display_name", &self.display_name)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("domains", &self.domains)
            .field("server_address", &self.server_address)
            .field("ice_servers", &self.ice_servers)
            .finish()
    }
}

impl EndpointIdentity {
    /// Create an identity with no domains, display name or credentials
    pub fn new(username: impl Into<String>, server_address: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            server_address: server_address.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Append a single domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    pub fn with_ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    /// Replace the domain list from a comma-separated string
    ///
    /// Blank entries are dropped and surrounding whitespace trimmed, so
    /// `"a.example.com, ,b.example.com"` yields two domains.
    pub fn with_domain_list(mut self, list: &str) -> Self {
        self.domains = list
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    /// First configured domain, used for identity and call targets
    pub fn primary_domain(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }

    /// `sip:{username}@{first domain}`, or `None` when either part is missing
    pub fn identity_uri(&self) -> Option<String> {
        let domain = self.primary_domain()?;
        if self.username.is_empty() {
            return None;
        }
        Some(format!("sip:{}@{}", self.username, domain))
    }

    /// Check the identity URI and server address are well formed
    pub fn validate(&self) -> SoftphoneResult<()> {
        if self.username.trim().is_empty() {
            return Err(SoftphoneError::config("username", "username is required"));
        }
        let identity_uri = self
            .identity_uri()
            .ok_or_else(|| SoftphoneError::config("domains", "at least one SIP domain is required"))?;
        validate_sip_uri(&identity_uri)
            .map_err(|reason| SoftphoneError::config("identity_uri", reason))?;

        if self.server_address.trim().is_empty() {
            return Err(SoftphoneError::config("server_address", "signaling server address is required"));
        }
        validate_server_address(&self.server_address)
            .map_err(|reason| SoftphoneError::config("server_address", reason))?;
        self.ice_servers.iter().try_for_each(IceServer::validate)
    }
}

/// Validate a `sip:`/`sips:` URI of the form `scheme:user@host`
pub(crate) fn validate_sip_uri(uri: &str) -> Result<(), String> {
    if uri.chars().any(char::is_whitespace) {
        return Err(format!("{uri:?} contains whitespace"));
    }
    let parsed = Url::parse(uri).map_err(|e| format!("{uri:?} is not a URI: {e}"))?;
    if !matches!(parsed.scheme(), "sip" | "sips") {
        return Err(format!("{uri:?} must use the sip or sips scheme"));
    }
    let (user, host) = parsed
        .path()
        .split_once('@')
        .ok_or_else(|| format!("{uri:?} must be of the form sip:user@host"))?;
    if user.is_empty() || host.is_empty() || host.contains('@') {
        return Err(format!("{uri:?} must be of the form sip:user@host"));
    }
    Ok(())
}

fn validate_server_address(address: &str) -> Result<(), String> {
    let parsed = Url::parse(address).map_err(|e| format!("{address:?} is not a URL: {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => {
            if parsed.host_str().map_or(true, str::is_empty) {
                return Err(format!("{address:?} has no host"));
            }
            Ok(())
        }
        "sip" | "sips" => {
            if parsed.path().is_empty() {
                return Err(format!("{address:?} has no host"));
            }
            Ok(())
        }
        other => Err(format!("unsupported server scheme {other:?}, expected ws, wss, sip or sips")),
    }
}

/// Softphone configuration
///
/// # Examples
///
/// ```rust
/// use softline_core::config::{EndpointIdentity, SoftphoneConfig};
/// use std::time::Duration;
///
/// let config = SoftphoneConfig::new(
///     EndpointIdentity::new("3005", "wss://pbx.example.com/ws").with_domain("pbx.example.com"),
/// );
/// assert_eq!(config.reset_delay(), Duration::from_millis(1500));
/// assert!(config.auto_register);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftphoneConfig {
    /// Endpoint identity handed to the signaling engine
    pub identity: EndpointIdentity,
    /// Grace delay between Terminated and Idle, in milliseconds
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Whether `Softphone::connect` registers after starting the endpoint
    #[serde(default = "default_auto_register")]
    pub auto_register: bool,
}

fn default_reset_delay_ms() -> u64 {
    DEFAULT_RESET_DELAY_MS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_auto_register() -> bool {
    true
}

impl SoftphoneConfig {
    pub fn new(identity: EndpointIdentity) -> Self {
        Self {
            identity,
            reset_delay_ms: DEFAULT_RESET_DELAY_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            auto_register: true,
        }
    }

    /// Load a configuration from JSON, applying defaults for omitted tunables
    pub fn from_json(json: &str) -> SoftphoneResult<Self> {
        serde_json::from_str(json).map_err(|e| SoftphoneError::config("json", e.to_string()))
    }

    pub fn with_reset_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reset_delay_ms = delay_ms;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_auto_register(mut self, auto_register: bool) -> Self {
        self.auto_register = auto_register;
        self
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }

    pub fn validate(&self) -> SoftphoneResult<()> {
        if self.event_capacity == 0 {
            return Err(SoftphoneError::config("event_capacity", "must be greater than zero"));
        }
        if self.event_capacity > MAX_EVENT_CAPACITY {
            return Err(SoftphoneError::config(
                "event_capacity",
                format!("must be at most {MAX_EVENT_CAPACITY}"),
            ));
        }
        self.identity.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> EndpointIdentity {
        EndpointIdentity::new("3005", "wss://pbx.example.com:7443/ws")
            .with_display_name("Front Desk")
            .with_password("1234")
            .with_domain("pbx.example.com")
    }

    #[test]
    fn test_valid_identity() {
        let id = identity();
        assert!(id.validate().is_ok());
        assert_eq!(id.identity_uri().as_deref(), Some("sip:3005@pbx.example.com"));
    }

    #[test]
    fn test_domain_list_parsing() {
        let id = identity().with_domain_list(" a.example.com, ,b.example.com ");
        assert_eq!(id.domains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(id.primary_domain(), Some("a.example.com"));
    }

    #[test]
    fn test_missing_domain_is_config_error() {
        let id = EndpointIdentity::new("3005", "wss://pbx.example.com/ws");
        assert!(matches!(
            id.validate(),
            Err(SoftphoneError::Config { ref field, .. }) if field == "domains"
        ));
    }

    #[test]
    fn test_missing_or_malformed_server_is_config_error() {
        let missing = EndpointIdentity { server_address: String::new(), ..identity() };
        assert!(matches!(
            missing.validate(),
            Err(SoftphoneError::Config { ref field, .. }) if field == "server_address"
        ));

        let malformed = EndpointIdentity { server_address: "pbx.example.com".to_string(), ..identity() };
        assert!(malformed.validate().is_err());

        let http = EndpointIdentity { server_address: "http://pbx.example.com".to_string(), ..identity() };
        assert!(http.validate().is_err());
    }

    #[test]
    fn test_malformed_identity_uri() {
        let id = EndpointIdentity { username: "30 05".to_string(), ..identity() };
        assert!(matches!(
            id.validate(),
            Err(SoftphoneError::Config { ref field, .. }) if field == "identity_uri"
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", identity());
        assert!(!rendered.contains("1234"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_event_capacity_bounds() {
        let base = SoftphoneConfig::new(identity());
        assert!(base.clone().with_event_capacity(MAX_EVENT_CAPACITY).validate().is_ok());

        for capacity in [0, MAX_EVENT_CAPACITY + 1, usize::MAX] {
            assert!(matches!(
                base.clone().with_event_capacity(capacity).validate(),
                Err(SoftphoneError::Config { ref field, .. }) if field == "event_capacity"
            ));
        }
    }

    #[test]
    fn test_ice_servers() {
        let id = identity()
            .with_ice_server(IceServer::stun("stun:stun.example.com:19302"))
            .with_ice_server(IceServer::turn("turns:turn.example.com:5349", "relay", "hunter2"));
        assert!(id.validate().is_ok());

        let rendered = format!("{id:?}");
        assert!(rendered.contains("turns:turn.example.com:5349"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_invalid_ice_servers() {
        let no_credentials = identity().with_ice_server(IceServer::stun("turn:turn.example.com:3478"));
        assert!(matches!(
            no_credentials.validate(),
            Err(SoftphoneError::Config { ref field, .. }) if field == "ice_servers"
        ));

        let wrong_scheme = identity().with_ice_server(IceServer::stun("https://stun.example.com"));
        assert!(wrong_scheme.validate().is_err());

        let empty = identity().with_ice_server(IceServer::default());
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_json_defaults() {
        let config = SoftphoneConfig::from_json(
            r#"{"identity":{"username":"3005","display_name":null,"password":null,
                "domains":["pbx.example.com"],"server_address":"wss://pbx.example.com/ws"}}"#,
        )
        .unwrap();
        assert_eq!(config.reset_delay_ms, DEFAULT_RESET_DELAY_MS);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert!(config.auto_register);
        assert!(config.identity.ice_servers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_ice_servers() {
        let config = SoftphoneConfig::from_json(
            r#"{"identity":{"username":"3005","display_name":null,"password":null,
                "domains":["pbx.example.com"],"server_address":"wss://pbx.example.com/ws",
                "ice_servers":[{"urls":["stun:stun.example.com:19302"]},
                    {"urls":["turn:turn.example.com:3478"],"username":"relay","credential":"hunter2"}]}}"#,
        )
        .unwrap();
        assert_eq!(config.identity.ice_servers.len(), 2);
        assert_eq!(config.identity.ice_servers[1].username.as_deref(), Some("relay"));
        assert!(config.validate().is_ok());
    }
}
