//! dek-keystore: per-persona key material and the DEK lifecycle manager
//!
//! Persona state machine:
//! ```text
//! (unknown) ──boot / user added──▶ Locked ◀──lock── Unlocked
//!                                    │ ──unlock──▶     │
//!                                    └──user removed───┴──▶ (unknown, id reusable)
//! ```
//!
//! Public KEKs live for the lifetime of a persona. Private and master KEKs
//! exist only in memory while the persona is unlocked and are zeroized when
//! dropped on lock or removal.

pub mod manager;
pub mod registry;
pub mod store;

pub use manager::DekManager;
pub use registry::{PersonaRegistry, RegisteredPersona};
pub use store::{KeyStore, PersonaSlot};
