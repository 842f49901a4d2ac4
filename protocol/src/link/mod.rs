//! # Device Linking
//!
//! Lets a fresh identity (the Joiner) receive agent capabilities from an
//! existing one (the Initiator) over one direct byte stream, using a
//! short-lived secret shown out of band.
//!
//! - `session.rs`: the out-of-band session and its single-use secret
//! - `dial.rs`: address filtering, loopback-first ordering, dial events
//! - `handshake.rs`: the Initiator and Joiner conversations

pub mod dial;
pub mod handshake;
pub mod session;

pub use dial::{dial_candidates, is_directly_dialable, select_candidates, LinkEvent};
pub use handshake::{LinkInitiator, LinkJoiner, LinkOutcome};
pub use session::{generate_secret_token, AddrInfo, DeviceLinkSession, LinkSessionStatus};
