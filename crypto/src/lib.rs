//! Post-quantum primitives consumed by the PQ Noise handshake.
//!
//! Every primitive sits behind a narrow capability trait (see [`traits`]) so the
//! protocol layer only ever asks to encapsulate, decapsulate, sign, verify,
//! derive, seal and open.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod aead;
pub mod deterministic;
pub mod error;
pub mod hashes;
pub mod kdf;
pub mod ml_dsa;
pub mod ml_kem;
pub mod traits;

pub use error::CryptoError;
