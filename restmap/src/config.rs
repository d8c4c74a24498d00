// Copyright 2024 Oxide Computer Company

//! Configuration for the HTTP server adapter

use serde::Deserialize;
use serde::Serialize;
use std::net::SocketAddr;

/// Configuration for a restmap HTTP server.
///
/// This type implements [`serde::Deserialize`] and [`serde::Serialize`] and it
/// can be composed with the consumer's configuration (whatever format that's
/// in).  For example, consumers could define a custom `MyAppConfig` for an app
/// that contains a restmap server:
///
/// ```
/// use restmap::ConfigServer;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct MyAppConfig {
///     http_api_server: ConfigServer,
///     /* ... (other app-specific config) */
/// }
///
/// fn main() -> Result<(), String> {
///     let my_config: MyAppConfig = toml::from_str(
///         r##"
///             [http_api_server]
///             bind_address = "127.0.0.1:12345"
///             request_body_max_bytes = 1024
///             log_headers = [ "x-forwarded-for" ]
///
///             ## ... (other app-specific config)
///         "##
///     ).map_err(|error| format!("parsing config: {}", error))?;
///
///     let server_config: &ConfigServer = &my_config.http_api_server;
///     assert_eq!(server_config.bind_address.port(), 12345);
///     /* ... (use the config to create a server) */
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ConfigServer {
    /// IP address and TCP port to which to bind for accepting connections
    pub bind_address: SocketAddr,
    /// maximum allowed size of a request body, defaults to 1024
    pub request_body_max_bytes: usize,
    /// request headers whose values are included in the per-request log
    /// entries (case-insensitive)
    pub log_headers: Vec<String>,
}

impl Default for ConfigServer {
    fn default() -> Self {
        ConfigServer {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            request_body_max_bytes: 1024,
            log_headers: Vec::new(),
        }
    }
}
