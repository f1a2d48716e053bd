//! dek-core: shared vocabulary of the DEK subsystem
//!
//! Persona ids, DEK/KEK containers and their numeric type constants, the
//! error type every crate returns, the TOML config schema, and the
//! line-oriented control protocol spoken between `dek` and `dekd`.

pub mod config;
pub mod error;
pub mod proto;
pub mod types;

pub use error::{DekError, DekResult, ErrorKind};
pub use types::{Dek, DekType, Kek, KekType, PersonaId, PersonaInfo, PersonaState};

/// Length of a plain DEK in bytes (256-bit symmetric key)
pub const DEK_LEN: usize = 32;

/// Capacity of an encrypted DEK (2048-bit RSA ciphertext)
pub const DEK_MAXLEN: usize = 256;

/// Capacity of a KEK buffer (2048-bit RSA key material plus margin)
pub const KEK_MAXLEN: usize = 516;

/// Hard upper bound on concurrently known personas
pub const PERSONA_MAX: usize = 10;
