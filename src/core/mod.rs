// src/core/mod.rs

//! The central module: connection model, handler abstraction, session
//! tracking, routing, event fan-out and error classification.

pub mod classifier;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;

pub use errors::UniconError;
pub use events::{Event, EventBroadcaster};
pub use model::{Connection, ConnectionStatus, ProtocolFamily, ProtocolType};
pub use router::{OperationRequest, OperationResponse, OperationRouter};
