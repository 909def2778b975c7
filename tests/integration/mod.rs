//! Integration test modules for metrosync
//!
//! - session: Join handshake, clock sync, transport and teardown across devices
//! - tempo: Tempo changes propagated from host to follower

pub mod session;
pub mod tempo;
