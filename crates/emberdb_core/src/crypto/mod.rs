//! Encryption at rest for log lines.
//!
//! Available with the `encryption` feature. [`EncryptedTransform`] plugs
//! AES-256-GCM into the line transform hook, so every stored line is an
//! independently encrypted, hex-encoded record.
//!
//! ## Security Model
//!
//! - AES-256-GCM authenticated encryption with a fresh nonce per line
//! - Keys are zeroized on drop
//! - Keys can be derived from high-entropy passphrases with HKDF-SHA256
//!
//! ## Usage
//!
//! ```ignore
//! use emberdb_core::crypto::{EncryptedTransform, EncryptionKey};
//! use emberdb_core::{Config, Datastore};
//! use std::sync::Arc;
//!
//! let key = EncryptionKey::derive_from_password(b"passphrase", b"people.db")?;
//! let config = Config::new()
//!     .filename("people.db")
//!     .transform(Arc::new(EncryptedTransform::new(key)));
//! let store = Datastore::open(config)?;
//! ```

mod cipher;
mod transform;

pub use cipher::{CryptoManager, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use transform::EncryptedTransform;
