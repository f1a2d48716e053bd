//! Persona registry: the public half of the key table, persisted across boots
//!
//! Only persona ids and public KEKs are written. Private and master KEKs
//! never leave memory.

use anyhow::{Context, Result};
use dek_core::{Kek, PersonaId};
use dek_crypto::CryptoBackend;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::manager::DekManager;

/// A persona known to the system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredPersona {
    pub persona_id: PersonaId,
    pub public_kek: Kek,
    /// Unix timestamp of the add (or first boot)
    pub added_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaRegistry {
    pub personas: Vec<RegisteredPersona>,
}

impl PersonaRegistry {
    /// Load the registry from a JSON file; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading persona registry: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing persona registry: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing persona registry")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing persona registry: {}", path.display()))
    }

    pub fn find(&self, persona_id: PersonaId) -> Option<&RegisteredPersona> {
        self.personas.iter().find(|p| p.persona_id == persona_id)
    }

    /// Record a persona, replacing the public KEK of an existing entry.
    pub fn upsert(&mut self, persona_id: PersonaId, public_kek: Kek) {
        if let Some(entry) = self.personas.iter_mut().find(|p| p.persona_id == persona_id) {
            entry.public_kek = public_kek;
            return;
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.personas.push(RegisteredPersona {
            persona_id,
            public_kek,
            added_at: now,
        });
    }

    pub fn remove(&mut self, persona_id: PersonaId) -> bool {
        let before = self.personas.len();
        self.personas.retain(|p| p.persona_id != persona_id);
        self.personas.len() != before
    }

    /// Boot every registered persona into `manager`. Entries that fail
    /// (out of range, table full) are logged and skipped.
    pub fn boot_into<B: CryptoBackend>(&self, manager: &DekManager<B>) -> usize {
        let mut booted = 0;
        for entry in &self.personas {
            match manager.on_boot(entry.persona_id, entry.public_kek.clone()) {
                Ok(()) => booted += 1,
                Err(e) => warn!(persona = %entry.persona_id, "boot from registry failed: {e}"),
            }
        }
        info!(booted, registered = self.personas.len(), "personas restored");
        booted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyStore;
    use dek_core::{DekError, KekType, PersonaState};
    use dek_crypto::SoftwareEngine;

    fn public_kek(seed: u8) -> Kek {
        Kek::new(KekType::Public, vec![seed; 32]).unwrap()
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut reg = PersonaRegistry::default();
        reg.upsert(PersonaId(3), public_kek(1));
        reg.upsert(PersonaId(3), public_kek(2));
        reg.upsert(PersonaId(4), public_kek(3));

        assert_eq!(reg.personas.len(), 2);
        assert_eq!(reg.find(PersonaId(3)).unwrap().public_kek, public_kek(2));

        assert!(reg.remove(PersonaId(3)));
        assert!(!reg.remove(PersonaId(3)));
        assert!(reg.find(PersonaId(3)).is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/personas.json");

        let mut reg = PersonaRegistry::default();
        reg.upsert(PersonaId(100), public_kek(7));
        reg.save(&path).unwrap();

        let loaded = PersonaRegistry::load(&path).unwrap();
        assert_eq!(loaded.personas.len(), 1);
        assert_eq!(loaded.personas[0].persona_id, PersonaId(100));
        assert_eq!(loaded.personas[0].public_kek, public_kek(7));
    }

    #[test]
    fn test_saved_file_holds_public_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personas.json");

        let mut reg = PersonaRegistry::default();
        reg.upsert(PersonaId(1), public_kek(1));
        reg.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"public\""));
        assert!(!content.contains("\"private\""));
        assert!(!content.contains("\"master\""));
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = PersonaRegistry::load(&dir.path().join("absent.json")).unwrap();
        assert!(reg.personas.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personas.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(PersonaRegistry::load(&path).is_err());
    }

    #[test]
    fn test_boot_into_skips_failures() {
        let manager = DekManager::new(KeyStore::new(2, 199), SoftwareEngine::new());
        let mut reg = PersonaRegistry::default();
        reg.upsert(PersonaId(1), public_kek(1));
        reg.upsert(PersonaId(500), public_kek(2)); // out of range
        reg.upsert(PersonaId(2), public_kek(3));
        reg.upsert(PersonaId(3), public_kek(4)); // table full

        assert_eq!(reg.boot_into(&manager), 2);

        let personas = manager.list_personas();
        assert_eq!(personas.len(), 2);
        assert!(personas.iter().all(|p| p.state == PersonaState::Locked));
        assert!(matches!(
            manager.get_encryption_kek(PersonaId(3), KekType::Public),
            Err(DekError::InvalidPersona(_))
        ));
    }
}
