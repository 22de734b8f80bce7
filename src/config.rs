//! Listener configuration.
//!
//! The core only ever consumes primitive values; whatever reads a
//! configuration file produces them before a service is built. `ServerConfig`
//! packages the listener knobs with a builder for ergonomic construction.

/// Options for creating a listening service.
///
/// - `port`: TCP port to bind; 0 asks the OS for an ephemeral port.
/// - `backlog`: pending-connection queue length.
/// - `reuse_addr`: set SO_REUSEADDR before binding so a restarted service
///   can rebind immediately.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub backlog: i32,
    pub reuse_addr: bool,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            backlog: 5,
            reuse_addr: true,
        }
    }
}

/// Builder for [`ServerConfig`]; unset fields take the defaults.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    port: Option<u16>,
    backlog: Option<i32>,
    reuse_addr: Option<bool>,
}

impl ServerConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = Some(backlog);
        self
    }

    pub fn reuse_addr(mut self, enabled: bool) -> Self {
        self.reuse_addr = Some(enabled);
        self
    }

    pub fn build(self) -> ServerConfig {
        let default = ServerConfig::default();
        ServerConfig {
            port: self.port.unwrap_or(default.port),
            backlog: self.backlog.unwrap_or(default.backlog),
            reuse_addr: self.reuse_addr.unwrap_or(default.reuse_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.backlog, 5);
        assert!(config.reuse_addr);
    }

    #[test]
    fn builder_overrides_only_what_is_set() {
        let config = ServerConfig::builder().port(7777).reuse_addr(false).build();
        assert_eq!(config.port, 7777);
        assert_eq!(config.backlog, 5);
        assert!(!config.reuse_addr);
    }
}
