//! # Identity Module
//!
//! Who is signing.
//!
//! 1. **Principal**: the packed public key and its base58btc text form, the
//!    account identifier. Pure functions, no I/O.
//! 2. **Account**: the single local identity of a context: key
//!    persistence, account creation, profile updates, logout.
//!
//! Keys never leave the context that generated them. Linking a second
//! device hands it a capability, not a copy of the key.

pub mod account;
pub mod principal;

pub use account::{
    create_account, load_identity, logout, publish_profile, update_profile, CreatedAccount,
    HomeDocument, LocalIdentity, ProfileUpdate,
};
pub use principal::{compress_p256, Principal};
