pub mod error;
pub mod gateway;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewayStats};
