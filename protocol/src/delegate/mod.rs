//! # Cross-Origin Signing
//!
//! A page on origin A (the *delegate*) needs a comment signed by a key that
//! lives on origin B (the *identity provider*). The two talk over a pair of
//! message channels opened by an [`EmbedHost`].
//!
//! ```text
//!   Delegate (A)                              Provider (B)
//!   ────────────                              ────────────
//!   open_embed(B) ───────────────────────────> serve(A)
//!                 <─────────────────────────── ready
//!   init          ───────────────────────────>
//!                 <─────────────────────────── abilities[]   (every tick)
//!   requestSignComment{id, comment} ─────────>
//!                 <─────────────────────────── resolveSignature{id, sig}
//!                                           or rejectSignature{id, error}
//! ```
//!
//! Requests are keyed by a random `signatureId`, answered in any order, and
//! resolved at most once. A rejection with `NoIdentity` makes the delegate
//! forget B as a delegation origin.

pub mod client;
pub mod host;
pub mod messages;
pub mod provider;

pub use client::{FrameState, SigningDelegate};
pub use host::{EmbedChannel, EmbedHost, InProcessHost, EMBED_SIGN_PATH};
pub use messages::{DelegateMessage, ProviderMessage, NO_IDENTITY, SIGNING_FAILED};
pub use provider::IdentityProvider;
