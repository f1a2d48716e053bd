//! Fixed-capacity persona table
//!
//! Personas occupy slots of a preallocated arena. A slot is found by a
//! linear scan (the table holds at most `PERSONA_MAX` entries) and freed on
//! removal so its persona id can be reused.

use dek_core::config::KeystoreConfig;
use dek_core::{DekError, DekResult, Kek, KekType, PersonaId, PersonaInfo, PersonaState};

/// Key material held for one persona
#[derive(Debug)]
pub struct PersonaSlot {
    id: PersonaId,
    public: Kek,
    private: Option<Kek>,
    master: Option<Kek>,
}

impl PersonaSlot {
    fn new(id: PersonaId, public: Kek) -> Self {
        Self {
            id,
            public,
            private: None,
            master: None,
        }
    }

    pub fn id(&self) -> PersonaId {
        self.id
    }

    pub fn public(&self) -> &Kek {
        &self.public
    }

    pub fn state(&self) -> PersonaState {
        if self.private.is_some() && self.master.is_some() {
            PersonaState::Unlocked
        } else {
            PersonaState::Locked
        }
    }

    /// The loaded key with role `kek_type`, if any.
    pub fn key(&self, kek_type: KekType) -> Option<&Kek> {
        match kek_type {
            KekType::Public => Some(&self.public),
            KekType::Private => self.private.as_ref(),
            KekType::Master => self.master.as_ref(),
        }
    }

    pub(crate) fn set_public(&mut self, public: Kek) {
        self.public = public;
    }

    pub(crate) fn load_unlock_keys(&mut self, private: Kek, master: Kek) {
        self.private = Some(private);
        self.master = Some(master);
    }

    /// Drop private and master keys; returns whether any were loaded.
    pub(crate) fn clear_unlock_keys(&mut self) -> bool {
        let had_keys = self.private.is_some() || self.master.is_some();
        self.private = None;
        self.master = None;
        had_keys
    }

    fn info(&self) -> PersonaInfo {
        PersonaInfo {
            persona_id: self.id,
            state: self.state(),
        }
    }
}

/// Owned persona table
#[derive(Debug)]
pub struct KeyStore {
    slots: Vec<Option<PersonaSlot>>,
    max_persona_id: u32,
}

impl KeyStore {
    /// Create an empty table with `capacity` slots, accepting persona ids
    /// `0..=max_persona_id`.
    pub fn new(capacity: usize, max_persona_id: u32) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            max_persona_id,
        }
    }

    pub fn from_config(config: &KeystoreConfig) -> Self {
        Self::new(config.capacity(), config.max_persona_id)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject ids outside the accepted range.
    pub fn check_id(&self, id: PersonaId) -> DekResult<()> {
        if id.0 > self.max_persona_id {
            return Err(DekError::InvalidPersona(id));
        }
        Ok(())
    }

    fn index_of(&self, id: PersonaId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|slot| slot.id == id))
    }

    pub fn contains(&self, id: PersonaId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn get(&self, id: PersonaId) -> DekResult<&PersonaSlot> {
        self.check_id(id)?;
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.id == id)
            .ok_or(DekError::InvalidPersona(id))
    }

    pub fn get_mut(&mut self, id: PersonaId) -> DekResult<&mut PersonaSlot> {
        self.check_id(id)?;
        self.slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.id == id)
            .ok_or(DekError::InvalidPersona(id))
    }

    /// Register a new persona in the first free slot.
    pub fn insert(&mut self, id: PersonaId, public: Kek) -> DekResult<()> {
        self.check_id(id)?;
        if self.contains(id) {
            return Err(DekError::PersonaInUse(id));
        }
        let capacity = self.capacity();
        let free = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(DekError::PersonaTableFull(capacity))?;
        *free = Some(PersonaSlot::new(id, public));
        Ok(())
    }

    /// Insert a persona, or refresh the public KEK of a known one and reset
    /// it to locked. Returns `true` when a new slot was taken.
    pub fn insert_or_reset(&mut self, id: PersonaId, public: Kek) -> DekResult<bool> {
        if self.contains(id) {
            let slot = self.get_mut(id)?;
            slot.set_public(public);
            slot.clear_unlock_keys();
            return Ok(false);
        }
        self.insert(id, public)?;
        Ok(true)
    }

    /// Free a persona's slot, dropping (and zeroizing) all of its keys.
    pub fn remove(&mut self, id: PersonaId) -> DekResult<()> {
        self.check_id(id)?;
        let idx = self.index_of(id).ok_or(DekError::InvalidPersona(id))?;
        self.slots[idx] = None;
        Ok(())
    }

    /// Known personas, in slot order.
    pub fn personas(&self) -> Vec<PersonaInfo> {
        self.slots.iter().flatten().map(PersonaSlot::info).collect()
    }
}
