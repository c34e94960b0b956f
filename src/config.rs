use crate::error::Error;
use crate::retry::ReconnectPolicy;
use crate::tail::TailOptions;

const API_BASE_URL_ENV: &str = "SESSION_API_BASE_URL";

/// How the session token is attached to the tail websocket request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTransport {
    /// `Authorization: Bearer <token>` passed as an upgrade header.
    Header,
    /// `access_token=<token>` query parameter only.
    AccessToken,
    /// Resolved at connect time: `AccessToken` for the built-in `tokio-tungstenite`
    /// factory, `Header` when a custom factory is configured.
    Auto,
}

/// Client-wide configuration: endpoints, default reconnect policy, default tail
/// options, and the auth transport mode. Built through [`ClientBuilder`] and
/// validated before use.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: String,
    pub ws_base: String,
    pub auth_transport: AuthTransport,
    pub reconnect_policy: ReconnectPolicy,
    pub tail_options: TailOptions,
    pub max_events: Option<usize>,
    pub(crate) has_custom_factory: bool,
}

impl ClientConfig {
    /// Validate invariants: non-empty base URLs, and (if set) a positive `max_events`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.api_base.trim().is_empty() {
            return Err(Error::Config("api_base must not be empty".into()));
        }
        if self.ws_base.trim().is_empty() {
            return Err(Error::Config("ws_base must not be empty".into()));
        }
        if let Some(0) = self.max_events {
            return Err(Error::Config("max_events must be positive if set".into()));
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| Error::Config(format!("invalid api_base: {e}")))?;
        url::Url::parse(&self.ws_base)
            .map_err(|e| Error::Config(format!("invalid ws_base: {e}")))?;
        Ok(())
    }

    /// Resolve the effective auth transport, given whether a custom websocket
    /// factory was configured.
    pub fn resolved_auth_transport(&self) -> AuthTransport {
        match self.auth_transport {
            AuthTransport::Auto if self.has_custom_factory => AuthTransport::Header,
            AuthTransport::Auto => AuthTransport::AccessToken,
            other => other,
        }
    }
}

/// Fluent builder for [`ClientConfig`].
pub struct ClientBuilder {
    api_base: Option<String>,
    ws_base: Option<String>,
    auth_transport: AuthTransport,
    reconnect_policy: ReconnectPolicy,
    tail_options: TailOptions,
    max_events: Option<usize>,
    has_custom_factory: bool,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            api_base: None,
            ws_base: None,
            auth_transport: AuthTransport::Auto,
            reconnect_policy: ReconnectPolicy::default(),
            tail_options: TailOptions::default(),
            max_events: None,
            has_custom_factory: false,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    pub fn ws_base(mut self, url: impl Into<String>) -> Self {
        self.ws_base = Some(url.into());
        self
    }

    pub fn auth_transport(mut self, mode: AuthTransport) -> Self {
        self.auth_transport = mode;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn tail_options(mut self, options: TailOptions) -> Self {
        self.tail_options = options;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = Some(n);
        self
    }

    /// Mark that a custom websocket factory will be used, which affects how
    /// `AuthTransport::Auto` resolves.
    pub fn custom_factory(mut self, yes: bool) -> Self {
        self.has_custom_factory = yes;
        self
    }

    /// Consult `SESSION_API_BASE_URL` for the default API base URL when none was set
    /// explicitly, deriving a matching `ws://`/`wss://` base by swapping the scheme.
    pub fn from_env(mut self) -> Self {
        if self.api_base.is_none() {
            if let Ok(base) = std::env::var(API_BASE_URL_ENV) {
                if self.ws_base.is_none() {
                    self.ws_base = Some(derive_ws_base(&base));
                }
                self.api_base = Some(base);
            }
        }
        self
    }

    /// Build and validate the final [`ClientConfig`].
    pub fn build(self) -> Result<ClientConfig, Error> {
        let api_base = self
            .api_base
            .ok_or_else(|| Error::Config("api_base is required".into()))?;
        let ws_base = self.ws_base.unwrap_or_else(|| derive_ws_base(&api_base));

        let config = ClientConfig {
            api_base,
            ws_base,
            auth_transport: self.auth_transport,
            reconnect_policy: self.reconnect_policy,
            tail_options: self.tail_options,
            max_events: self.max_events,
            has_custom_factory: self.has_custom_factory,
        };
        config.validate()?;
        Ok(config)
    }
}

fn derive_ws_base(api_base: &str) -> String {
    if let Some(rest) = api_base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_derives_ws_base_from_api_base() {
        let config = ClientBuilder::new()
            .api_base("https://api.example.com")
            .build()
            .unwrap();
        assert_eq!(config.ws_base, "wss://api.example.com");
    }

    #[test]
    fn builder_rejects_empty_api_base() {
        let err = ClientBuilder::new().api_base("").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builder_rejects_missing_api_base() {
        let err = ClientBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builder_rejects_zero_max_events() {
        let err = ClientBuilder::new()
            .api_base("https://api.example.com")
            .max_events(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn auto_auth_resolves_by_factory_presence() {
        let with_custom = ClientBuilder::new()
            .api_base("https://api.example.com")
            .custom_factory(true)
            .build()
            .unwrap();
        assert_eq!(with_custom.resolved_auth_transport(), AuthTransport::Header);

        let without_custom = ClientBuilder::new()
            .api_base("https://api.example.com")
            .build()
            .unwrap();
        assert_eq!(
            without_custom.resolved_auth_transport(),
            AuthTransport::AccessToken
        );
    }
}
