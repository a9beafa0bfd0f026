//! MongoDB backend for Tidemark.
//!
//! Only drivers in the same process serialize on the lock; MongoDB offers no
//! advisory lock primitive.

pub mod command;
pub mod driver;

use mongodb::sync::Client;
use tidemark_common::{Error, Result};
use tidemark_config::{Config, ConnectionUrl};
use tidemark_driver::{Driver, Registry};
use tracing::info;

pub use command::parse_commands;
pub use driver::MongoDriver;
pub use mongodb::bson;

/// Connect with the `x-` parameters stripped. The database comes from the URL path.
pub fn open(url: &str) -> Result<MongoDriver> {
    let url = ConnectionUrl::parse(url)?;
    let config = Config::from_url(&url)?;
    if config.database_name.is_empty() {
        return Err(Error::NoDatabaseName);
    }

    info!(url = %url.redacted(), "connecting to mongodb");
    let client = Client::with_uri_str(url.filtered())
        .map_err(|e| Error::connection("failed to create mongodb client", e))?;

    MongoDriver::with_instance(client, config)
}

fn open_boxed(url: &str) -> Result<Box<dyn Driver>> {
    Ok(Box::new(open(url)?))
}

/// Register the `mongodb` scheme.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register("mongodb", open_boxed)
}
