use std::sync::Arc;

use dipc_transport::{Locator, SystemLocator};

use crate::connection::Connection;
use crate::dispatcher::EventHandler;
use crate::error::Result;
use crate::handshake::ClientConfig;

/// Connect to the local desktop client as `client_id` using the standard
/// endpoint locations.
pub fn connect(client_id: impl Into<String>) -> Result<Connection> {
    connect_with_config(ClientConfig::new(client_id), &SystemLocator::new(), None)
}

/// Connect with explicit configuration, endpoint locator and handler.
///
/// The handler is registered before the handshake so it observes `on_ready`.
pub fn connect_with_config(
    config: ClientConfig,
    locator: &dyn Locator,
    handler: Option<Arc<dyn EventHandler>>,
) -> Result<Connection> {
    let connection = Connection::new(config);
    if let Some(handler) = handler {
        connection.add_handler(handler);
    }
    connection.connect(locator)?;
    Ok(connection)
}
