// tests/integration_test.rs

//! Integration tests for unicon
//!
//! These tests drive the router and the front door end to end with real
//! handlers, child processes and sockets.

mod integration {
    pub mod fixtures;
    pub mod front_door_test;
    pub mod log_stream_test;
    pub mod process_stream_test;
}
