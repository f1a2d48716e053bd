//! Backend message protocol and the capability trait behind it

use dek_core::{Dek, DekError, DekResult, DekType, Kek, KekType};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const OP_RSA_ENC: u32 = 10;
pub const OP_RSA_DEC: u32 = 11;
pub const OP_DH_DEC: u32 = 12;
pub const OP_DH_ENC: u32 = 13;

/// Status of a successful backend call
pub const PUB_CRYPTO_OK: i32 = 0;

/// Generic backend failure. Carries no detail; callers must not infer a
/// cause from it.
pub const PUB_CRYPTO_ERROR: i32 = 99;

/// Wrap/unwrap operation understood by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    RsaEncrypt,
    RsaDecrypt,
    DhEncrypt,
    DhDecrypt,
}

impl Opcode {
    pub const fn as_raw(self) -> u32 {
        match self {
            Opcode::RsaEncrypt => OP_RSA_ENC,
            Opcode::RsaDecrypt => OP_RSA_DEC,
            Opcode::DhDecrypt => OP_DH_DEC,
            Opcode::DhEncrypt => OP_DH_ENC,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            OP_RSA_ENC => Some(Opcode::RsaEncrypt),
            OP_RSA_DEC => Some(Opcode::RsaDecrypt),
            OP_DH_DEC => Some(Opcode::DhDecrypt),
            OP_DH_ENC => Some(Opcode::DhEncrypt),
            _ => None,
        }
    }

    /// Opcode that wraps a plain DEK into `enc_type`.
    pub fn wrapping(enc_type: DekType) -> DekResult<Self> {
        match enc_type {
            DekType::RsaEncrypted => Ok(Opcode::RsaEncrypt),
            DekType::AesEncrypted => Ok(Opcode::DhEncrypt),
            DekType::Plain => Err(DekError::InvalidArgument(
                "plain is not an encryption type".into(),
            )),
        }
    }

    /// Opcode that unwraps a DEK of `enc_type` back to plain.
    pub fn unwrapping(enc_type: DekType) -> DekResult<Self> {
        match enc_type {
            DekType::RsaEncrypted => Ok(Opcode::RsaDecrypt),
            DekType::AesEncrypted => Ok(Opcode::DhDecrypt),
            DekType::Plain => Err(DekError::InvalidArgument(
                "plain is not an encryption type".into(),
            )),
        }
    }

    /// KEK role the backend needs for this opcode.
    pub const fn key_type(self) -> KekType {
        match self {
            Opcode::RsaEncrypt => KekType::Public,
            Opcode::RsaDecrypt => KekType::Private,
            Opcode::DhEncrypt | Opcode::DhDecrypt => KekType::Master,
        }
    }

    pub const fn input_type(self) -> DekType {
        match self {
            Opcode::RsaEncrypt | Opcode::DhEncrypt => DekType::Plain,
            Opcode::RsaDecrypt => DekType::RsaEncrypted,
            Opcode::DhDecrypt => DekType::AesEncrypted,
        }
    }

    pub const fn output_type(self) -> DekType {
        match self {
            Opcode::RsaEncrypt => DekType::RsaEncrypted,
            Opcode::DhEncrypt => DekType::AesEncrypted,
            Opcode::RsaDecrypt | Opcode::DhDecrypt => DekType::Plain,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Opcode::RsaEncrypt => "rsa_encrypt",
            Opcode::RsaDecrypt => "rsa_decrypt",
            Opcode::DhEncrypt => "dh_encrypt",
            Opcode::DhDecrypt => "dh_decrypt",
        })
    }
}

/// Message sent to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    pub opcode: u32,
    pub key: Kek,
    pub input: Dek,
}

impl BackendRequest {
    pub fn new(opcode: Opcode, key: Kek, input: Dek) -> Self {
        Self {
            opcode: opcode.as_raw(),
            key,
            input,
        }
    }
}

/// Message returned by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    pub opcode: u32,
    pub status: i32,
    pub output: Option<Dek>,
}

impl BackendResponse {
    pub fn ok(opcode: u32, output: Dek) -> Self {
        Self {
            opcode,
            status: PUB_CRYPTO_OK,
            output: Some(output),
        }
    }

    pub fn failure(opcode: u32) -> Self {
        Self {
            opcode,
            status: PUB_CRYPTO_ERROR,
            output: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == PUB_CRYPTO_OK
    }
}

/// Public-key / shared-key engine the key manager delegates to.
///
/// Implementors provide the four primitives; [`CryptoBackend::handle`]
/// turns a protocol message into a call and the outcome into a status code.
pub trait CryptoBackend: Send + Sync {
    /// Wrap a plain DEK with a public KEK.
    fn rsa_encrypt(&self, public: &Kek, plain: &Dek) -> anyhow::Result<Dek>;

    /// Unwrap an RSA-class DEK with the matching private KEK.
    fn rsa_decrypt(&self, private: &Kek, wrapped: &Dek) -> anyhow::Result<Dek>;

    /// Wrap a plain DEK with the shared master KEK.
    fn dh_encrypt(&self, master: &Kek, plain: &Dek) -> anyhow::Result<Dek>;

    /// Unwrap an AES-class DEK with the shared master KEK.
    fn dh_decrypt(&self, master: &Kek, wrapped: &Dek) -> anyhow::Result<Dek>;

    /// Fill `out` from the backend's random source (default: OS RNG).
    fn fill_random(&self, out: &mut [u8]) -> anyhow::Result<()> {
        rand::rngs::OsRng
            .try_fill_bytes(out)
            .map_err(|e| anyhow::anyhow!("OS RNG: {e}"))
    }

    /// Process one request message.
    fn handle(&self, req: &BackendRequest) -> BackendResponse {
        let Some(opcode) = Opcode::from_raw(req.opcode) else {
            tracing::warn!(opcode = req.opcode, "backend: unknown opcode");
            return BackendResponse::failure(req.opcode);
        };

        if req.key.kek_type() != opcode.key_type() || req.input.dek_type() != opcode.input_type()
        {
            tracing::warn!(
                %opcode,
                key_type = %req.key.kek_type(),
                input_type = %req.input.dek_type(),
                "backend: operand types do not match opcode"
            );
            return BackendResponse::failure(req.opcode);
        }

        let result = match opcode {
            Opcode::RsaEncrypt => self.rsa_encrypt(&req.key, &req.input),
            Opcode::RsaDecrypt => self.rsa_decrypt(&req.key, &req.input),
            Opcode::DhEncrypt => self.dh_encrypt(&req.key, &req.input),
            Opcode::DhDecrypt => self.dh_decrypt(&req.key, &req.input),
        };

        match result {
            Ok(output) => BackendResponse::ok(req.opcode, output),
            Err(e) => {
                tracing::warn!(%opcode, "backend: {e}");
                BackendResponse::failure(req.opcode)
            }
        }
    }
}

impl<T: CryptoBackend + ?Sized> CryptoBackend for std::sync::Arc<T> {
    fn rsa_encrypt(&self, public: &Kek, plain: &Dek) -> anyhow::Result<Dek> {
        (**self).rsa_encrypt(public, plain)
    }

    fn rsa_decrypt(&self, private: &Kek, wrapped: &Dek) -> anyhow::Result<Dek> {
        (**self).rsa_decrypt(private, wrapped)
    }

    fn dh_encrypt(&self, master: &Kek, plain: &Dek) -> anyhow::Result<Dek> {
        (**self).dh_encrypt(master, plain)
    }

    fn dh_decrypt(&self, master: &Kek, wrapped: &Dek) -> anyhow::Result<Dek> {
        (**self).dh_decrypt(master, wrapped)
    }

    fn fill_random(&self, out: &mut [u8]) -> anyhow::Result<()> {
        (**self).fill_random(out)
    }

    fn handle(&self, req: &BackendRequest) -> BackendResponse {
        (**self).handle(req)
    }
}
