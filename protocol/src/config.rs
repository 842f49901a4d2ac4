//! # Protocol Configuration & Constants
//!
//! Every magic number in the identity protocol lives here. Multicodec
//! prefixes, signature sizes, timeouts, store names. If two modules need to
//! agree on a value, it belongs in this file.
//!
//! Changing the codec or multicodec constants changes every content address
//! and every account identifier ever produced. Don't.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Protocol identifier negotiated on the device-link byte stream.
pub const DEVICE_LINK_PROTOCOL_ID: &str = "/hypermedia/device-link/0.1.0";

// ---------------------------------------------------------------------------
// Multicodec / Multiformats
// ---------------------------------------------------------------------------

/// Unsigned-varint encoding of the `p256-pub` multicodec (0x1200).
pub const P256_PUB_VARINT_PREFIX: [u8; 2] = [0x80, 0x24];

/// Unsigned-varint encoding of the `ed25519-pub` multicodec (0xed).
pub const ED25519_PUB_VARINT_PREFIX: [u8; 2] = [0xed, 0x01];

/// Compressed SEC1 P-256 point: parity byte plus X coordinate.
pub const P256_COMPRESSED_KEY_LENGTH: usize = 33;

/// Uncompressed SEC1 P-256 point: `0x04 || X || Y`.
pub const P256_UNCOMPRESSED_KEY_LENGTH: usize = 65;

/// Raw Ed25519 public key length.
pub const ED25519_PUBLIC_KEY_LENGTH: usize = 32;

/// DAG-CBOR multicodec. Every signed record is encoded with it.
pub const DAG_CBOR_CODEC: u64 = 0x71;

/// Raw bytes multicodec, used for opaque blocks such as profile icons.
pub const RAW_CODEC: u64 = 0x55;

/// sha2-256 multihash code.
pub const SHA2_256_CODE: u64 = 0x12;

/// Base58btc multibase prefix for principals in text form.
pub const BASE58BTC_MULTIBASE_PREFIX: char = 'z';

/// Base64 (no padding) multibase prefix for device-link secret tokens.
pub const BASE64_MULTIBASE_PREFIX: char = 'm';

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Signature length for both supported algorithms. P-256 signatures are
/// fixed-width `r || s`, Ed25519 signatures are 64 bytes by definition.
pub const SIGNATURE_LENGTH: usize = 64;

/// Random bytes in a device-link secret token.
pub const LINK_TOKEN_BYTES: usize = 16;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// How long a device-link session stays redeemable after creation.
pub const LINK_SESSION_TTL: Duration = Duration::from_secs(120);

/// How long an inbound device-link stream may take to name its protocol.
pub const LINK_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// How often an identity provider re-pushes the ability snapshot.
pub const ABILITY_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Oldest acceptable timestamp on a signed action, relative to now.
pub const FRESHNESS_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// How far into the future a signed action's timestamp may drift.
pub const FRESHNESS_FUTURE_SKEW: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Transport Limits
// ---------------------------------------------------------------------------

/// Largest frame accepted on a length-prefixed stream. Signed blobs are a
/// few hundred bytes; anything near this limit is garbage or hostile.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Capacity of in-process message channels between browsing contexts.
pub const MESSAGE_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Local Store Layout
// ---------------------------------------------------------------------------

/// Store holding the local keypair.
pub const KEYS_STORE: &str = "keys";

/// Key under [`KEYS_STORE`] for the single local identity.
pub const LOCAL_KEY_NAME: &str = "localKey";

/// Store holding approved abilities.
pub const ABILITIES_STORE: &str = "abilities";

/// Store holding origins known to host a delegated identity for us.
pub const DELEGATION_ORIGINS_STORE: &str = "delegationOrigins";

/// Default display name for an identity created only to link a device.
pub const DEFAULT_LINKED_ACCOUNT_NAME: &str = "Linked Device";

// ---------------------------------------------------------------------------
// Runtime Tunables
// ---------------------------------------------------------------------------

/// Tunables shared by every component, carried on the
/// [`Context`](crate::context::Context).
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Device-link session lifetime.
    pub link_session_ttl: Duration,
    /// Deadline for an inbound stream's protocol negotiation.
    pub negotiation_timeout: Duration,
    /// Interval between ability snapshots pushed to a delegate.
    pub ability_push_interval: Duration,
    /// Maximum accepted age of a signed action.
    pub freshness_max_age: Duration,
    /// Maximum accepted future skew of a signed action.
    pub freshness_future_skew: Duration,
    /// Maximum frame size on a device-link stream.
    pub max_frame_length: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            link_session_ttl: LINK_SESSION_TTL,
            negotiation_timeout: LINK_NEGOTIATION_TIMEOUT,
            ability_push_interval: ABILITY_PUSH_INTERVAL,
            freshness_max_age: FRESHNESS_MAX_AGE,
            freshness_future_skew: FRESHNESS_FUTURE_SKEW,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}
