use thiserror::Error;
use worksafe_lib::WsError;

/// Errors that stop the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] WsError),
}
