//! Software emulation of the public-key engine
//!
//! Stands in for the secure-world engine on hosts that lack one (tests,
//! developer machines, the default `dekd` build).
//!
//! RSA class:
//! ```text
//! private KEK  = 32 random bytes
//! public KEK   = HKDF-SHA256(private, "dek-emul-public")
//! wrap key     = HKDF-SHA256(public,  "dek-emul-rsa-wrap")
//! rsa DEK      = [24-byte nonce][XChaCha20-Poly1305(plain DEK) + 16-byte tag]
//! ```
//! The wrap key is derivable from the public half, so this scheme only
//! emulates the message flow. It offers no confidentiality against anyone
//! holding the public KEK.
//!
//! DH/AES class:
//! ```text
//! wrap key     = HKDF-SHA256(master, "dek-emul-dh-wrap")
//! aes DEK      = [12-byte nonce][AES-256-GCM(plain DEK) + 16-byte tag]
//! ```

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use dek_core::{Dek, DekType, Kek, KekType};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::backend::CryptoBackend;
use crate::EMUL_KEY_SIZE;

const XNONCE_SIZE: usize = 24;
const GCM_NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Emulated public-key / shared-key engine
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareEngine;

impl SoftwareEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoBackend for SoftwareEngine {
    fn rsa_encrypt(&self, public: &Kek, plain: &Dek) -> anyhow::Result<Dek> {
        let key = hkdf_derive(public.as_bytes(), b"dek-emul-rsa-wrap")?;
        let cipher = XChaCha20Poly1305::new((&*key).into());

        let mut nonce_bytes = [0u8; XNONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plain.as_bytes())
            .map_err(|e| anyhow::anyhow!("RSA-class wrap failed: {e}"))?;

        let mut wrapped = Vec::with_capacity(XNONCE_SIZE + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&ciphertext);
        Dek::new(DekType::RsaEncrypted, wrapped).map_err(anyhow::Error::from)
    }

    fn rsa_decrypt(&self, private: &Kek, wrapped: &Dek) -> anyhow::Result<Dek> {
        if wrapped.len() < XNONCE_SIZE + TAG_SIZE {
            anyhow::bail!(
                "RSA-class DEK too short: {} bytes (minimum {})",
                wrapped.len(),
                XNONCE_SIZE + TAG_SIZE
            );
        }

        let public = public_from_private(private)?;
        let key = hkdf_derive(public.as_bytes(), b"dek-emul-rsa-wrap")?;
        let cipher = XChaCha20Poly1305::new((&*key).into());

        let (nonce_bytes, ciphertext) = wrapped.as_bytes().split_at(XNONCE_SIZE);
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("RSA-class unwrap failed: wrong key or corrupted DEK"))?;

        Dek::plain(plaintext).map_err(anyhow::Error::from)
    }

    fn dh_encrypt(&self, master: &Kek, plain: &Dek) -> anyhow::Result<Dek> {
        let key = hkdf_derive(master.as_bytes(), b"dek-emul-dh-wrap")?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| anyhow::anyhow!("AES-256-GCM key: {e}"))?;

        let mut nonce_bytes = [0u8; GCM_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = aes_gcm::Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plain.as_bytes())
            .map_err(|e| anyhow::anyhow!("DH-class wrap failed: {e}"))?;

        let mut wrapped = Vec::with_capacity(GCM_NONCE_SIZE + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&ciphertext);
        Dek::new(DekType::AesEncrypted, wrapped).map_err(anyhow::Error::from)
    }

    fn dh_decrypt(&self, master: &Kek, wrapped: &Dek) -> anyhow::Result<Dek> {
        if wrapped.len() < GCM_NONCE_SIZE + TAG_SIZE {
            anyhow::bail!(
                "DH-class DEK too short: {} bytes (minimum {})",
                wrapped.len(),
                GCM_NONCE_SIZE + TAG_SIZE
            );
        }

        let key = hkdf_derive(master.as_bytes(), b"dek-emul-dh-wrap")?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| anyhow::anyhow!("AES-256-GCM key: {e}"))?;

        let (nonce_bytes, ciphertext) = wrapped.as_bytes().split_at(GCM_NONCE_SIZE);
        let plaintext = cipher
            .decrypt(aes_gcm::Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("DH-class unwrap failed: wrong key or corrupted DEK"))?;

        Dek::plain(plaintext).map_err(anyhow::Error::from)
    }
}

/// Derive the emulated public KEK belonging to a private KEK.
pub fn public_from_private(private: &Kek) -> anyhow::Result<Kek> {
    if private.kek_type() != KekType::Private {
        anyhow::bail!("expected private KEK, got {}", private.kek_type());
    }
    let public = hkdf_derive(private.as_bytes(), b"dek-emul-public")?;
    Kek::new(KekType::Public, public.to_vec()).map_err(anyhow::Error::from)
}

/// Generate an emulated `(public, private)` KEK pair.
pub fn generate_keypair() -> anyhow::Result<(Kek, Kek)> {
    let mut bytes = Zeroizing::new([0u8; EMUL_KEY_SIZE]);
    rand::thread_rng().fill_bytes(&mut bytes[..]);
    let private = Kek::new(KekType::Private, bytes.to_vec())?;
    let public = public_from_private(&private)?;
    Ok((public, private))
}

/// Generate a random 256-bit master KEK.
pub fn generate_master_key() -> anyhow::Result<Kek> {
    let mut bytes = Zeroizing::new([0u8; EMUL_KEY_SIZE]);
    rand::thread_rng().fill_bytes(&mut bytes[..]);
    Kek::new(KekType::Master, bytes.to_vec()).map_err(anyhow::Error::from)
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> anyhow::Result<Zeroizing<[u8; EMUL_KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; EMUL_KEY_SIZE]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(okm)
}
