//! dek-crypto: the crypto back end of the DEK subsystem
//!
//! The key manager never touches a cipher. It sends one message per wrap or
//! unwrap to a [`CryptoBackend`] and reads back a status code:
//!
//! ```text
//! request  { opcode, key: KEK, input: DEK }
//! response { opcode, status, output: DEK }     status 0 = ok, 99 = failure
//!
//! OP_RSA_ENC (10)  public KEK  + plain DEK     → rsa_encrypted DEK
//! OP_RSA_DEC (11)  private KEK + rsa DEK       → plain DEK
//! OP_DH_DEC  (12)  master KEK  + aes DEK       → plain DEK
//! OP_DH_ENC  (13)  master KEK  + plain DEK     → aes_encrypted DEK
//! ```
//!
//! [`SoftwareEngine`] emulates the secure-world engine on ordinary hosts.

pub mod backend;
pub mod emul;

pub use backend::{
    BackendRequest, BackendResponse, CryptoBackend, Opcode, OP_DH_DEC, OP_DH_ENC, OP_RSA_DEC,
    OP_RSA_ENC, PUB_CRYPTO_ERROR, PUB_CRYPTO_OK,
};
pub use emul::{generate_keypair, generate_master_key, public_from_private, SoftwareEngine};

/// Size of an emulated private or master KEK (256-bit)
pub const EMUL_KEY_SIZE: usize = 32;
