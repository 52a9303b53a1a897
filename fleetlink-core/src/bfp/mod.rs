//! The binary framed protocol (BFP): an encrypted, checksummed, TCP-carried
//! register protocol.

pub mod buffer;
pub mod envelope;
pub mod frame;
pub mod reassembly;
pub mod transport;

pub use frame::{Body, Command, Frame, StartByte};
pub use transport::{BfpTransport, ScanEntry};
