// src/connection/mod.rs

//! Manages the lifecycle of a single front-door client: frame decoding,
//! request dispatch to the router, and event delivery for subscribers.

mod guard;
mod handler;
mod session;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::ClientSession;
