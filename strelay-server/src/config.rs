//! Server configuration.

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable permissive CORS on the whole surface
    pub enable_cors: bool,
    /// Base URL of the external stream resolver service
    pub resolver_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8090,
            enable_cors: true,
            resolver_url: "http://127.0.0.1:9100".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load server config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `API_PORT` (e.g. "8090")
    /// - `RESOLVER_URL` (e.g. "http://resolver.internal:9100")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("API_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("API_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        if let Ok(resolver_url) = std::env::var("RESOLVER_URL")
            && !resolver_url.trim().is_empty()
        {
            config.resolver_url = resolver_url;
        }

        config
    }
}
