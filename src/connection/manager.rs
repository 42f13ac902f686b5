use std::rc::Rc;

use hashbrown::HashMap;
use relq_core::{RelqError, Result};

use crate::config::DatabaseConfig;
use crate::driver::Connector;

use super::Connection;

/// Named connections, opened on first use.
pub struct ConnectionManager {
    config: DatabaseConfig,
    connector: Rc<dyn Connector>,
    connections: HashMap<String, Connection>,
}

impl ConnectionManager {
    pub fn new(config: DatabaseConfig, connector: Rc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            connections: HashMap::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn default_name(&self) -> &str {
        &self.config.default
    }

    /// The connection called `name`, opening it if needed.
    pub fn connection(&mut self, name: &str) -> Result<&mut Connection> {
        if !self.connections.contains_key(name) {
            let config = self
                .config
                .connection(name)
                .cloned()
                .ok_or_else(|| RelqError::Config(format!("connection [{name}] not configured")))?;
            let connection = Connection::open(name, config, self.connector.clone())?;
            self.connections.insert(name.to_string(), connection);
        }
        self.connections
            .get_mut(name)
            .ok_or_else(|| RelqError::Config(format!("connection [{name}] not configured")))
    }

    pub fn default_connection(&mut self) -> Result<&mut Connection> {
        let name = self.config.default.clone();
        self.connection(&name)
    }

    /// Disconnects and forgets a connection; the next lookup opens a new one.
    pub fn purge(&mut self, name: &str) {
        if let Some(mut connection) = self.connections.remove(name) {
            connection.disconnect();
        }
    }

    /// Names of the currently open connections.
    pub fn open_connections(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }
}
