//! End-to-end persona lifecycle scenarios against the software engine.

use std::sync::Arc;
use std::thread;

use dek_core::{
    Dek, DekError, DekType, Kek, KekType, PersonaId, PersonaState, DEK_MAXLEN, PERSONA_MAX,
};
use dek_crypto::{generate_keypair, generate_master_key, SoftwareEngine};
use dek_keystore::{DekManager, KeyStore};
use proptest::prelude::*;

struct Persona {
    id: PersonaId,
    public: Kek,
    private: Kek,
    master: Kek,
}

fn persona(id: u32) -> Persona {
    let (public, private) = generate_keypair().unwrap();
    Persona {
        id: PersonaId(id),
        public,
        private,
        master: generate_master_key().unwrap(),
    }
}

fn manager() -> DekManager<SoftwareEngine> {
    DekManager::new(KeyStore::new(PERSONA_MAX, 199), SoftwareEngine::new())
}

#[test]
fn add_generate_encrypt_unlock_decrypt() {
    let mgr = manager();
    let p = persona(3);

    mgr.on_user_added(p.id, p.public.clone()).unwrap();

    let d = mgr.generate_dek(p.id).unwrap();
    assert_eq!(d.len(), 32);

    let e = mgr.encrypt_dek(p.id, &d, DekType::RsaEncrypted).unwrap();
    assert_eq!(e.dek_type(), DekType::RsaEncrypted);
    assert!(e.len() <= DEK_MAXLEN);

    mgr.on_device_unlocked(p.id, p.private.clone(), p.master.clone())
        .unwrap();

    let decrypted = mgr.decrypt_dek(p.id, &e, DekType::RsaEncrypted).unwrap();
    assert_eq!(decrypted, d);
}

#[test]
fn lock_then_decrypt_is_key_not_loaded() {
    let mgr = manager();
    let p = persona(3);
    mgr.on_user_added(p.id, p.public.clone()).unwrap();
    mgr.on_device_unlocked(p.id, p.private.clone(), p.master.clone())
        .unwrap();

    let d = mgr.generate_dek(p.id).unwrap();
    let e = mgr.encrypt_dek(p.id, &d, DekType::RsaEncrypted).unwrap();
    assert_eq!(mgr.decrypt_dek(p.id, &e, DekType::RsaEncrypted).unwrap(), d);

    mgr.on_device_locked(p.id).unwrap();

    assert!(matches!(
        mgr.decrypt_dek(p.id, &e, DekType::RsaEncrypted),
        Err(DekError::KeyNotLoaded {
            kek_type: KekType::Private,
            ..
        })
    ));
    assert!(matches!(
        mgr.get_decryption_kek(p.id, KekType::Master),
        Err(DekError::KeyNotLoaded { .. })
    ));
}

#[test]
fn table_full_leaves_table_untouched() {
    let mgr = manager();
    for id in 0..PERSONA_MAX as u32 {
        mgr.on_user_added(PersonaId(id), persona(id).public).unwrap();
    }
    let before = mgr.list_personas();

    let extra = persona(150);
    assert!(matches!(
        mgr.on_user_added(extra.id, extra.public.clone()),
        Err(DekError::PersonaTableFull(n)) if n == PERSONA_MAX
    ));
    assert!(matches!(
        mgr.on_boot(extra.id, extra.public),
        Err(DekError::PersonaTableFull(_))
    ));

    assert_eq!(mgr.list_personas(), before);
}

#[test]
fn removal_purges_key_material() {
    let mgr = manager();
    let p = persona(7);
    mgr.on_user_added(p.id, p.public.clone()).unwrap();
    mgr.on_device_unlocked(p.id, p.private.clone(), p.master.clone())
        .unwrap();

    mgr.on_user_removed(p.id).unwrap();

    for kek_type in [KekType::Public, KekType::Master] {
        assert!(matches!(
            mgr.get_encryption_kek(p.id, kek_type),
            Err(DekError::InvalidPersona(_))
        ));
    }
    assert!(matches!(
        mgr.get_decryption_kek(p.id, KekType::Private),
        Err(DekError::InvalidPersona(_))
    ));
    assert!(matches!(
        mgr.on_user_removed(p.id),
        Err(DekError::InvalidPersona(_))
    ));

    // The id can be reused with fresh material
    let again = persona(7);
    mgr.on_user_added(again.id, again.public.clone()).unwrap();
    assert_eq!(
        mgr.get_encryption_kek(again.id, KekType::Public).unwrap(),
        again.public
    );
}

#[test]
fn cross_persona_keys_do_not_unwrap() {
    let mgr = manager();
    let a = persona(1);
    let b = persona(2);
    for p in [&a, &b] {
        mgr.on_user_added(p.id, p.public.clone()).unwrap();
        mgr.on_device_unlocked(p.id, p.private.clone(), p.master.clone())
            .unwrap();
    }

    let d = mgr.generate_dek(a.id).unwrap();
    let rsa = mgr.encrypt_dek(a.id, &d, DekType::RsaEncrypted).unwrap();
    let aes = mgr.encrypt_dek(a.id, &d, DekType::AesEncrypted).unwrap();

    assert!(matches!(
        mgr.decrypt_dek(b.id, &rsa, DekType::RsaEncrypted),
        Err(DekError::CryptoBackendFailure(_))
    ));
    assert!(matches!(
        mgr.decrypt_dek(b.id, &aes, DekType::AesEncrypted),
        Err(DekError::CryptoBackendFailure(_))
    ));
}

#[test]
fn failed_requests_leave_state_unchanged() {
    let mgr = manager();
    let p = persona(3);
    mgr.on_user_added(p.id, p.public.clone()).unwrap();

    // Wrong key roles: nothing loads
    assert!(mgr
        .on_device_unlocked(p.id, p.master.clone(), p.private.clone())
        .is_err());
    assert_eq!(mgr.list_personas()[0].state, PersonaState::Locked);

    // Unknown persona: the existing one is unaffected
    assert!(mgr
        .on_device_unlocked(PersonaId(4), p.private.clone(), p.master.clone())
        .is_err());
    assert_eq!(mgr.list_personas().len(), 1);
    assert_eq!(mgr.list_personas()[0].state, PersonaState::Locked);
}

#[test]
fn concurrent_lock_and_decrypt_never_mixes_keys() {
    let mgr = Arc::new(manager());
    let p = persona(3);
    mgr.on_user_added(p.id, p.public.clone()).unwrap();
    mgr.on_device_unlocked(p.id, p.private.clone(), p.master.clone())
        .unwrap();

    let d = mgr.generate_dek(p.id).unwrap();
    let e = mgr.encrypt_dek(p.id, &d, DekType::RsaEncrypted).unwrap();

    let toggler = {
        let mgr = Arc::clone(&mgr);
        let (id, private, master) = (p.id, p.private.clone(), p.master.clone());
        thread::spawn(move || {
            for _ in 0..200 {
                mgr.on_device_locked(id).unwrap();
                mgr.on_device_unlocked(id, private.clone(), master.clone())
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mgr = Arc::clone(&mgr);
            let (e, d, id) = (e.clone(), d.clone(), p.id);
            thread::spawn(move || {
                for _ in 0..200 {
                    match mgr.decrypt_dek(id, &e, DekType::RsaEncrypted) {
                        Ok(plain) => assert_eq!(plain, d),
                        Err(DekError::KeyNotLoaded { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            })
        })
        .collect();

    toggler.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn unlocked_roundtrip_any_dek(
        bytes in proptest::collection::vec(any::<u8>(), 1..=32),
        aes in any::<bool>(),
        id in 0u32..=199,
    ) {
        let mgr = manager();
        let p = persona(id);
        mgr.on_user_added(p.id, p.public.clone()).unwrap();
        mgr.on_device_unlocked(p.id, p.private.clone(), p.master.clone()).unwrap();

        let enc_type = if aes { DekType::AesEncrypted } else { DekType::RsaEncrypted };
        let dek = Dek::plain(bytes).unwrap();
        let wrapped = mgr.encrypt_dek(p.id, &dek, enc_type).unwrap();
        prop_assert_eq!(wrapped.dek_type(), enc_type);
        prop_assert_eq!(mgr.decrypt_dek(p.id, &wrapped, enc_type).unwrap(), dek);
    }
}
