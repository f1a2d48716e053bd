use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{DekError, DekResult};
use crate::{DEK_LEN, DEK_MAXLEN, KEK_MAXLEN};

/// Identifier of a persona (user profile) on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(pub u32);

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<u32> for PersonaId {
    fn from(id: u32) -> Self {
        PersonaId(id)
    }
}

/// Form a DEK is held in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DekType {
    /// Usable symmetric key
    Plain,
    /// Wrapped by a persona's public KEK
    RsaEncrypted,
    /// Wrapped by a persona's master KEK
    AesEncrypted,
}

impl DekType {
    pub const fn as_raw(self) -> u32 {
        match self {
            DekType::Plain => 0,
            DekType::RsaEncrypted => 1,
            DekType::AesEncrypted => 2,
        }
    }

    /// Largest payload a DEK of this type may carry.
    pub const fn capacity(self) -> usize {
        match self {
            DekType::Plain => DEK_LEN,
            DekType::RsaEncrypted | DekType::AesEncrypted => DEK_MAXLEN,
        }
    }
}

impl TryFrom<u32> for DekType {
    type Error = DekError;

    fn try_from(raw: u32) -> DekResult<Self> {
        match raw {
            0 => Ok(DekType::Plain),
            1 => Ok(DekType::RsaEncrypted),
            2 => Ok(DekType::AesEncrypted),
            other => Err(DekError::InvalidArgument(format!("unknown DEK type {other}"))),
        }
    }
}

impl std::fmt::Display for DekType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DekType::Plain => "plain",
            DekType::RsaEncrypted => "rsa_encrypted",
            DekType::AesEncrypted => "aes_encrypted",
        })
    }
}

/// Role of a KEK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KekType {
    Public,
    Private,
    Master,
}

impl KekType {
    pub const fn as_raw(self) -> u32 {
        match self {
            KekType::Public => 3,
            KekType::Private => 4,
            KekType::Master => 5,
        }
    }
}

impl TryFrom<u32> for KekType {
    type Error = DekError;

    fn try_from(raw: u32) -> DekResult<Self> {
        match raw {
            3 => Ok(KekType::Public),
            4 => Ok(KekType::Private),
            5 => Ok(KekType::Master),
            other => Err(DekError::InvalidArgument(format!("unknown KEK type {other}"))),
        }
    }
}

impl std::fmt::Display for KekType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            KekType::Public => "public",
            KekType::Private => "private",
            KekType::Master => "master",
        })
    }
}

/// A data encryption key, plain or wrapped. Zeroized on drop.
///
/// The payload length is checked against the capacity of the type at
/// construction, so a `Dek` in hand never exceeds its buffer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDek")]
pub struct Dek {
    #[serde(rename = "type")]
    dek_type: DekType,
    #[serde(with = "b64")]
    bytes: Vec<u8>,
}

impl Dek {
    pub fn new(dek_type: DekType, bytes: Vec<u8>) -> DekResult<Self> {
        check_payload(&bytes, dek_type.capacity(), "DEK")?;
        Ok(Self { dek_type, bytes })
    }

    pub fn plain(bytes: Vec<u8>) -> DekResult<Self> {
        Self::new(DekType::Plain, bytes)
    }

    pub fn dek_type(&self) -> DekType {
        self.dek_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for Dek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dek")
            .field("type", &self.dek_type)
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct RawDek {
    #[serde(rename = "type")]
    dek_type: DekType,
    #[serde(with = "b64")]
    bytes: Vec<u8>,
}

impl TryFrom<RawDek> for Dek {
    type Error = DekError;

    fn try_from(mut raw: RawDek) -> DekResult<Self> {
        Dek::new(raw.dek_type, std::mem::take(&mut raw.bytes))
    }
}

/// A key encryption key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawKek")]
pub struct Kek {
    #[serde(rename = "type")]
    kek_type: KekType,
    #[serde(with = "b64")]
    bytes: Vec<u8>,
}

impl Kek {
    pub fn new(kek_type: KekType, bytes: Vec<u8>) -> DekResult<Self> {
        check_payload(&bytes, KEK_MAXLEN, "KEK")?;
        Ok(Self { kek_type, bytes })
    }

    pub fn kek_type(&self) -> KekType {
        self.kek_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Short BLAKE3 fingerprint for log correlation.
    ///
    /// Only meant for public material; callers must not log fingerprints of
    /// private or master keys.
    pub fn fingerprint(&self) -> String {
        blake3::hash(&self.bytes).to_hex().as_str()[..16].to_string()
    }

    /// Fail with `InvalidArgument` unless this key has the `expected` role.
    pub fn expect_type(&self, expected: KekType) -> DekResult<()> {
        if self.kek_type == expected {
            Ok(())
        } else {
            Err(DekError::InvalidArgument(format!(
                "expected {expected} KEK, got {}",
                self.kek_type
            )))
        }
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek")
            .field("type", &self.kek_type)
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct RawKek {
    #[serde(rename = "type")]
    kek_type: KekType,
    #[serde(with = "b64")]
    bytes: Vec<u8>,
}

impl TryFrom<RawKek> for Kek {
    type Error = DekError;

    fn try_from(mut raw: RawKek) -> DekResult<Self> {
        Kek::new(raw.kek_type, std::mem::take(&mut raw.bytes))
    }
}

fn check_payload(bytes: &[u8], capacity: usize, what: &str) -> DekResult<()> {
    if bytes.is_empty() {
        return Err(DekError::InvalidArgument(format!("empty {what} payload")));
    }
    if bytes.len() > capacity {
        return Err(DekError::BufferTooSmall {
            len: bytes.len(),
            capacity,
        });
    }
    Ok(())
}

/// Key state of a known persona
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaState {
    /// Only the public KEK is held
    Locked,
    /// Private and master KEKs are loaded
    Unlocked,
}

/// Summary row returned by a persona listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaInfo {
    pub persona_id: PersonaId,
    pub state: PersonaState,
}

/// Base64 (standard alphabet) serde adapter for key payloads
pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: AsRef<[u8]>, S: Serializer>(bytes: T, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
