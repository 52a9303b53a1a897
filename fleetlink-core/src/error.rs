use thiserror::Error;

/// Errors produced anywhere in the fleetlink core.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("framer error: {0}")]
    Framer(String),

    #[error("transport timed out")]
    TransportTimeout,

    #[error("transport error: {0}")]
    TransportFatal(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("register {0} not accessible over this protocol")]
    ProtocolDenied(String),

    #[error("device rejected the operation")]
    BusNak,

    #[error("operation cancelled")]
    Cancelled,

    #[error("persistence file compat {found} does not match expected {expected}")]
    FileCompatError { found: u32, expected: u32 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;
