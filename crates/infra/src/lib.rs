//! Infrastructure layer: background worker engine, stores, geodata clients
//! and the shop validation scheduler built on them.

pub mod config;
pub mod geodata;
pub mod store;
pub mod validation;
pub mod workers;

mod runtime;

mod integration_tests;

pub use config::{ConfigError, ValidationConfig};
pub use validation::{ShopValidationScheduler, ValidationError};
