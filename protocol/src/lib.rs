// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Hypermedia Identity Protocol Core Library
//!
//! Self-sovereign accounts for a content-addressed hypermedia network. An
//! account *is* a public key; everything it says is a signed, DAG-CBOR
//! encoded blob addressed by its CID. No server decides who you are.
//!
//! P-256 is the default key type because that is what browsers can keep
//! non-extractable. Ed25519 is supported for native agents.
//!
//! ## Architecture
//!
//! - **identity**: Principal codec, local account creation and profiles.
//! - **crypto**: Keys, signatures, hashing and content addressing.
//! - **blob**: Signed record types and the sign/verify/encode pipeline.
//! - **chain**: Change chains, depth, refs and freshness checks.
//! - **ability**: Locally stored grants and how requests are matched.
//! - **delegate**: Cross-origin comment signing over message channels.
//! - **link**: Device linking over a direct byte stream.
//! - **transport**: Framed byte streams over TCP or in memory.
//! - **storage**: Key-value store and blockstore, over sled.
//! - **context**: The per-identity bundle every operation runs against.
//! - **config**: Protocol constants and tunables.
//!
//! ## Design Philosophy
//!
//! 1. Every record is verifiable by anyone holding its bytes.
//! 2. No module-level state. Two identities in one process just work.
//! 3. Failures that cross an origin boundary say as little as possible.

pub mod ability;
pub mod blob;
pub mod chain;
pub mod clock;
pub mod config;
pub mod context;
pub mod crypto;
pub mod delegate;
pub mod error;
pub mod identity;
pub mod link;
pub mod storage;
pub mod transport;

pub use context::Context;
pub use error::{Error, Result};
