//! Domain-level building blocks shared by the storage adapters and the
//! monitor binary.
//!
//! The crate stays free of network and database I/O: it owns the packed
//! identifier codec, the transfer model both legs are merged into, the storage
//! traits the reconciliation engine is written against, and the environment
//! contract every binary reads at startup.

pub mod codec;
pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use codec::{
    decode_for_token, decode_identifier, decode_transfer, encode_identifier, rescale_amount,
    DecodeError, DecodedTransfer, RawIdentifier, CANONICAL_DECIMALS,
};
pub use model::*;
pub use storage::*;
