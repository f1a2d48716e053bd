//! DEK lifecycle manager
//!
//! Validates persona and key state, picks the KEK an operation needs and
//! forwards the wrap/unwrap to the injected [`CryptoBackend`]. The manager
//! itself never runs a cipher.
//!
//! Locking: one mutex guards the whole persona table. Lifecycle events
//! mutate the table under it. Crypto operations copy the KEK they need while
//! holding it, release it, and talk to the backend with that copy, so a
//! decrypt racing `on_device_locked` either finishes with the key it took or
//! fails with `KeyNotLoaded`.

use std::sync::{Mutex, MutexGuard};

use dek_core::proto::{DekRequest, DekResponse};
use dek_core::{
    Dek, DekError, DekResult, DekType, Kek, KekType, PersonaId, PersonaInfo, PersonaState, DEK_LEN,
};
use dek_crypto::{BackendRequest, CryptoBackend, Opcode};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::store::KeyStore;

pub struct DekManager<B> {
    store: Mutex<KeyStore>,
    backend: B,
}

impl<B: CryptoBackend> DekManager<B> {
    pub fn new(store: KeyStore, backend: B) -> Self {
        Self {
            store: Mutex::new(store),
            backend,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn store(&self) -> MutexGuard<'_, KeyStore> {
        // Table mutations happen only after every check has passed, so a
        // poisoned guard still holds a consistent table.
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Lifecycle events ──────────────────────────────────────────────────

    /// Restore a persona known to the system with its public KEK.
    pub fn on_boot(&self, persona: PersonaId, public: Kek) -> DekResult<()> {
        public.expect_type(KekType::Public)?;
        let kek_fp = public.fingerprint();
        let created = self.store().insert_or_reset(persona, public)?;
        info!(%persona, %kek_fp, created, "persona booted");
        Ok(())
    }

    pub fn on_user_added(&self, persona: PersonaId, public: Kek) -> DekResult<()> {
        public.expect_type(KekType::Public)?;
        let kek_fp = public.fingerprint();
        self.store().insert(persona, public)?;
        info!(%persona, %kek_fp, "persona added");
        Ok(())
    }

    /// Purge all key material of a persona and free its id.
    pub fn on_user_removed(&self, persona: PersonaId) -> DekResult<()> {
        self.store().remove(persona)?;
        info!(%persona, "persona removed");
        Ok(())
    }

    /// Load the private and master KEKs of a persona.
    pub fn on_device_unlocked(
        &self,
        persona: PersonaId,
        private: Kek,
        master: Kek,
    ) -> DekResult<()> {
        private.expect_type(KekType::Private)?;
        master.expect_type(KekType::Master)?;
        self.store().get_mut(persona)?.load_unlock_keys(private, master);
        info!(%persona, "persona unlocked");
        Ok(())
    }

    /// Drop the private and master KEKs of a persona.
    pub fn on_device_locked(&self, persona: PersonaId) -> DekResult<()> {
        let had_keys = self.store().get_mut(persona)?.clear_unlock_keys();
        info!(%persona, had_keys, "persona locked");
        Ok(())
    }

    /// Replace the private and master KEKs after a credential change.
    ///
    /// Only an unlocked persona can change its password; the public KEK is
    /// kept.
    pub fn on_password_changed(
        &self,
        persona: PersonaId,
        private: Kek,
        master: Kek,
    ) -> DekResult<()> {
        private.expect_type(KekType::Private)?;
        master.expect_type(KekType::Master)?;
        let mut store = self.store();
        let slot = store.get_mut(persona)?;
        if slot.state() != PersonaState::Unlocked {
            return Err(DekError::DeviceLocked(persona));
        }
        slot.load_unlock_keys(private, master);
        drop(store);
        info!(%persona, "persona credentials rotated");
        Ok(())
    }

    pub fn list_personas(&self) -> Vec<PersonaInfo> {
        self.store().personas()
    }

    // ── DEK operations ────────────────────────────────────────────────────

    /// Generate a fresh plain DEK for a persona.
    pub fn generate_dek(&self, persona: PersonaId) -> DekResult<Dek> {
        self.store().get(persona)?;

        let mut bytes = Zeroizing::new([0u8; DEK_LEN]);
        self.backend
            .fill_random(&mut bytes[..])
            .map_err(|e| DekError::RandomUnavailable(e.to_string()))?;

        debug!(%persona, "DEK generated");
        Dek::plain(bytes.to_vec())
    }

    /// Wrap a plain DEK into `enc_type` with the persona's KEK of that class.
    pub fn encrypt_dek(&self, persona: PersonaId, dek: &Dek, enc_type: DekType) -> DekResult<Dek> {
        if dek.dek_type() != DekType::Plain {
            return Err(DekError::InvalidArgument(format!(
                "encrypt expects a plain DEK, got {}",
                dek.dek_type()
            )));
        }
        let opcode = Opcode::wrapping(enc_type)?;
        let key = self.capture_key(persona, opcode.key_type())?;
        let wrapped = self.call_backend(opcode, key, dek)?;
        debug!(%persona, %enc_type, len = wrapped.len(), "DEK encrypted");
        Ok(wrapped)
    }

    /// Unwrap a DEK of `enc_type` with the persona's private or master KEK.
    pub fn decrypt_dek(&self, persona: PersonaId, dek: &Dek, enc_type: DekType) -> DekResult<Dek> {
        let opcode = Opcode::unwrapping(enc_type)?;
        if dek.dek_type() != enc_type {
            return Err(DekError::InvalidArgument(format!(
                "decrypt of {enc_type} given a {} DEK",
                dek.dek_type()
            )));
        }
        let key = self.capture_key(persona, opcode.key_type())?;
        let plain = self.call_backend(opcode, key, dek)?;
        debug!(%persona, %enc_type, "DEK decrypted");
        Ok(plain)
    }

    /// Return a KEK usable for wrapping: public or master.
    pub fn get_encryption_kek(&self, persona: PersonaId, kek_type: KekType) -> DekResult<Kek> {
        match kek_type {
            KekType::Public | KekType::Master => self.capture_key(persona, kek_type),
            KekType::Private => Err(DekError::InvalidArgument(
                "private KEK is not an encryption key".into(),
            )),
        }
    }

    /// Return a KEK usable for unwrapping: private or master.
    pub fn get_decryption_kek(&self, persona: PersonaId, kek_type: KekType) -> DekResult<Kek> {
        match kek_type {
            KekType::Private | KekType::Master => self.capture_key(persona, kek_type),
            KekType::Public => Err(DekError::InvalidArgument(
                "public KEK is not a decryption key".into(),
            )),
        }
    }

    /// Copy a loaded KEK out of the table. The copy zeroizes on drop.
    fn capture_key(&self, persona: PersonaId, kek_type: KekType) -> DekResult<Kek> {
        let store = self.store();
        store
            .get(persona)?
            .key(kek_type)
            .cloned()
            .ok_or(DekError::KeyNotLoaded { persona, kek_type })
    }

    fn call_backend(&self, opcode: Opcode, key: Kek, input: &Dek) -> DekResult<Dek> {
        let req = BackendRequest::new(opcode, key, input.clone());
        let resp = self.backend.handle(&req);

        if !resp.is_ok() {
            warn!(%opcode, status = resp.status, "crypto backend returned failure");
            return Err(DekError::CryptoBackendFailure(format!(
                "{opcode} returned status {}",
                resp.status
            )));
        }
        if resp.opcode != req.opcode {
            return Err(DekError::CryptoBackendFailure(format!(
                "{opcode} answered with opcode {}",
                resp.opcode
            )));
        }
        match resp.output {
            Some(out) if out.dek_type() == opcode.output_type() => Ok(out),
            Some(out) => Err(DekError::CryptoBackendFailure(format!(
                "{opcode} returned a {} DEK",
                out.dek_type()
            ))),
            None => Err(DekError::CryptoBackendFailure(format!(
                "{opcode} returned no DEK"
            ))),
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    /// Run one control request.
    pub fn dispatch(&self, req: DekRequest) -> DekResult<DekResponse> {
        match req {
            DekRequest::OnBoot {
                persona_id,
                public_kek,
            } => self.on_boot(persona_id, public_kek).map(|()| DekResponse::Ok),
            DekRequest::GenerateDek { persona_id } => self
                .generate_dek(persona_id)
                .map(|dek| DekResponse::Dek { dek }),
            DekRequest::EncryptDek {
                persona_id,
                dek,
                enc_type,
            } => self
                .encrypt_dek(persona_id, &dek, enc_type)
                .map(|dek| DekResponse::Dek { dek }),
            DekRequest::DecryptDek {
                persona_id,
                dek,
                enc_type,
            } => self
                .decrypt_dek(persona_id, &dek, enc_type)
                .map(|dek| DekResponse::Dek { dek }),
            DekRequest::OnDeviceLocked { persona_id } => self
                .on_device_locked(persona_id)
                .map(|()| DekResponse::Ok),
            DekRequest::OnDeviceUnlocked {
                persona_id,
                private_kek,
                master_kek,
            } => self
                .on_device_unlocked(persona_id, private_kek, master_kek)
                .map(|()| DekResponse::Ok),
            DekRequest::OnUserAdded {
                persona_id,
                public_kek,
            } => self
                .on_user_added(persona_id, public_kek)
                .map(|()| DekResponse::Ok),
            DekRequest::OnUserRemoved { persona_id } => self
                .on_user_removed(persona_id)
                .map(|()| DekResponse::Ok),
            DekRequest::OnPasswordChanged {
                persona_id,
                private_kek,
                master_kek,
            } => self
                .on_password_changed(persona_id, private_kek, master_kek)
                .map(|()| DekResponse::Ok),
            DekRequest::GetEncryptionKek {
                persona_id,
                kek_type,
            } => self
                .get_encryption_kek(persona_id, kek_type)
                .map(|kek| DekResponse::Kek { kek }),
            DekRequest::GetDecryptionKek {
                persona_id,
                kek_type,
            } => self
                .get_decryption_kek(persona_id, kek_type)
                .map(|kek| DekResponse::Kek { kek }),
            DekRequest::ListPersonas => Ok(DekResponse::Personas {
                personas: self.list_personas(),
            }),
        }
    }
}
