//! Duplicate-suppressing log-creation broker
//!
//! Sits between clients and a fleet of backend log servers, providing a
//! layer of indirection for log creation: every CREATE command is
//! admitted at most once per log name (enforced by a unique constraint
//! in a durable table), forwarded to one backend chosen uniformly at
//! random, and the eventual acknowledgement is spliced back to the
//! original requester with its original request id restored.
//!
//! The broker never terminates on a single bad request: malformed
//! input, duplicate admissions, garbled responses and transient
//! resource pressure all surface as NAK replies with distinct reason
//! codes.

pub mod address;
pub mod command;
pub mod dedup;
pub mod directory;
pub mod error;
pub mod pdu;
pub mod pool;
pub mod service;

pub use address::Address;
pub use command::CommandPayload;
pub use dedup::DedupStore;
pub use directory::NameDirectory;
pub use error::{BrokerError, BrokerResult};
pub use pdu::{Pdu, PduCodec};
pub use pool::{ConnectionPool, PoolConfig};
pub use service::{BrokerConfig, BrokerService, CreationBroker, SERVICE_NAME};
