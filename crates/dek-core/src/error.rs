use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{KekType, PersonaId};

pub type DekResult<T> = Result<T, DekError>;

#[derive(Debug, Error)]
pub enum DekError {
    #[error("invalid persona: {0}")]
    InvalidPersona(PersonaId),

    #[error("persona table full ({0} entries)")]
    PersonaTableFull(usize),

    #[error("persona {0} already in use")]
    PersonaInUse(PersonaId),

    #[error("{kek_type} KEK not loaded for persona {persona}")]
    KeyNotLoaded { persona: PersonaId, kek_type: KekType },

    #[error("device locked for persona {0}")]
    DeviceLocked(PersonaId),

    #[error("crypto backend failure: {0}")]
    CryptoBackendFailure(String),

    #[error("buffer too small: {len} bytes exceed the {capacity}-byte capacity")]
    BufferTooSmall { len: usize, capacity: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("random source unavailable: {0}")]
    RandomUnavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, wire-visible classification of a [`DekError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPersona,
    PersonaTableFull,
    PersonaInUse,
    KeyNotLoaded,
    DeviceLocked,
    CryptoBackendFailure,
    BufferTooSmall,
    InvalidArgument,
    RandomUnavailable,
    Config,
    Io,
}

impl DekError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DekError::InvalidPersona(_) => ErrorKind::InvalidPersona,
            DekError::PersonaTableFull(_) => ErrorKind::PersonaTableFull,
            DekError::PersonaInUse(_) => ErrorKind::PersonaInUse,
            DekError::KeyNotLoaded { .. } => ErrorKind::KeyNotLoaded,
            DekError::DeviceLocked(_) => ErrorKind::DeviceLocked,
            DekError::CryptoBackendFailure(_) => ErrorKind::CryptoBackendFailure,
            DekError::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            DekError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DekError::RandomUnavailable(_) => ErrorKind::RandomUnavailable,
            DekError::Config(_) => ErrorKind::Config,
            DekError::Io(_) => ErrorKind::Io,
        }
    }
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidPersona => "invalid_persona",
            ErrorKind::PersonaTableFull => "persona_table_full",
            ErrorKind::PersonaInUse => "persona_in_use",
            ErrorKind::KeyNotLoaded => "key_not_loaded",
            ErrorKind::DeviceLocked => "device_locked",
            ErrorKind::CryptoBackendFailure => "crypto_backend_failure",
            ErrorKind::BufferTooSmall => "buffer_too_small",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::RandomUnavailable => "random_unavailable",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}
