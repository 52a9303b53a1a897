//! The HTTP form-encoded protocol (HFP): a rolling-token-authenticated
//! REST-ish API reachable over plain HTTP.

pub mod token;
pub mod transport;

pub use token::TokenSync;
pub use transport::{HfpConfig, HfpTransport};
