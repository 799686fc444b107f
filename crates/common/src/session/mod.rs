//! Connection lifecycle management
//!
//! Negotiates exactly one point-to-point session between a client and a
//! server role over a signaling rendezvous address and community
//! identifier. The session's readiness is a one-shot gate; negotiation
//! failures arrive on a separate event stream and reconnecting is the
//! caller's decision.

mod manager;
pub mod wire;

pub use manager::{
    ConnectionManager, ReadyGate, Role, Session, SessionError, SessionEvents, SessionHandle,
    SessionState,
};
