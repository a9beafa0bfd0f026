pub mod connection;
pub mod loader;
pub mod model;

pub use connection::ConnectionUrl;
pub use loader::ConfigLoader;
pub use model::{
    Config, DEFAULT_MIGRATIONS_TABLE, MIGRATIONS_TABLE_PARAM, TRANSACTION_MODE_PARAM, TargetConfig,
};
