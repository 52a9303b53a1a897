//! Discovery, identification, and dual-protocol (BFP/HFP) communication
//! with power-distribution and power-measurement devices.

pub mod bfp;
pub mod bulk;
pub mod cache;
pub mod codec;
pub mod communicator;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod hfp;
pub mod persistence;
pub mod progress;
pub mod registers;

pub use cache::Cache;
pub use codec::Value;
pub use communicator::Communicator;
pub use config::{Config, InterfaceConfig};
pub use device::{Device, Variant};
pub use discovery::DiscoveryOutcome;
pub use error::{FleetError, Result};
pub use persistence::PersistedFleet;
pub use progress::{ProgressNode, State as ProgressState, Status as ProgressStatus};
pub use registers::{table as register_table, RegisterDescriptor, RegisterTable};
