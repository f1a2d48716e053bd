//! Control protocol between `dek` and `dekd`
//!
//! One JSON object per line in each direction. Requests are tagged by `op`,
//! one variant per lifecycle or crypto command; responses are tagged by
//! `status`.
//!
//! ```text
//! → {"op":"generate_dek","persona_id":3}
//! ← {"status":"dek","dek":{"type":"plain","bytes":"…"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{DekError, ErrorKind};
use crate::types::{Dek, DekType, Kek, KekType, PersonaId, PersonaInfo};

/// A single addressed command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DekRequest {
    OnBoot {
        persona_id: PersonaId,
        public_kek: Kek,
    },
    GenerateDek {
        persona_id: PersonaId,
    },
    EncryptDek {
        persona_id: PersonaId,
        dek: Dek,
        enc_type: DekType,
    },
    DecryptDek {
        persona_id: PersonaId,
        dek: Dek,
        enc_type: DekType,
    },
    OnDeviceLocked {
        persona_id: PersonaId,
    },
    OnDeviceUnlocked {
        persona_id: PersonaId,
        private_kek: Kek,
        master_kek: Kek,
    },
    OnUserAdded {
        persona_id: PersonaId,
        public_kek: Kek,
    },
    OnUserRemoved {
        persona_id: PersonaId,
    },
    OnPasswordChanged {
        persona_id: PersonaId,
        private_kek: Kek,
        master_kek: Kek,
    },
    GetEncryptionKek {
        persona_id: PersonaId,
        kek_type: KekType,
    },
    GetDecryptionKek {
        persona_id: PersonaId,
        kek_type: KekType,
    },
    ListPersonas,
}

impl DekRequest {
    /// Operation name, used as a log field and metric label.
    pub fn name(&self) -> &'static str {
        match self {
            DekRequest::OnBoot { .. } => "on_boot",
            DekRequest::GenerateDek { .. } => "generate_dek",
            DekRequest::EncryptDek { .. } => "encrypt_dek",
            DekRequest::DecryptDek { .. } => "decrypt_dek",
            DekRequest::OnDeviceLocked { .. } => "on_device_locked",
            DekRequest::OnDeviceUnlocked { .. } => "on_device_unlocked",
            DekRequest::OnUserAdded { .. } => "on_user_added",
            DekRequest::OnUserRemoved { .. } => "on_user_removed",
            DekRequest::OnPasswordChanged { .. } => "on_password_changed",
            DekRequest::GetEncryptionKek { .. } => "get_encryption_kek",
            DekRequest::GetDecryptionKek { .. } => "get_decryption_kek",
            DekRequest::ListPersonas => "list_personas",
        }
    }

    pub fn persona_id(&self) -> Option<PersonaId> {
        match self {
            DekRequest::OnBoot { persona_id, .. }
            | DekRequest::GenerateDek { persona_id }
            | DekRequest::EncryptDek { persona_id, .. }
            | DekRequest::DecryptDek { persona_id, .. }
            | DekRequest::OnDeviceLocked { persona_id }
            | DekRequest::OnDeviceUnlocked { persona_id, .. }
            | DekRequest::OnUserAdded { persona_id, .. }
            | DekRequest::OnUserRemoved { persona_id }
            | DekRequest::OnPasswordChanged { persona_id, .. }
            | DekRequest::GetEncryptionKek { persona_id, .. }
            | DekRequest::GetDecryptionKek { persona_id, .. } => Some(*persona_id),
            DekRequest::ListPersonas => None,
        }
    }
}

/// Result of a command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DekResponse {
    Ok,
    Dek { dek: Dek },
    Kek { kek: Kek },
    Personas { personas: Vec<PersonaInfo> },
    Error { kind: ErrorKind, message: String },
}

impl From<&DekError> for DekResponse {
    fn from(e: &DekError) -> Self {
        DekResponse::Error {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Encode a message as one protocol line (newline-terminated).
pub fn encode_line<T: Serialize>(msg: &T) -> anyhow::Result<String> {
    let mut line =
        serde_json::to_string(msg).map_err(|e| anyhow::anyhow!("encoding message: {e}"))?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line.
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> anyhow::Result<T> {
    serde_json::from_str(line.trim_end()).map_err(|e| anyhow::anyhow!("decoding message: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagging() {
        let req = DekRequest::GenerateDek {
            persona_id: PersonaId(3),
        };
        let line = encode_line(&req).unwrap();
        assert_eq!(line, "{\"op\":\"generate_dek\",\"persona_id\":3}\n");

        let parsed: DekRequest = decode_line(&line).unwrap();
        assert_eq!(parsed.name(), "generate_dek");
        assert_eq!(parsed.persona_id(), Some(PersonaId(3)));
    }

    #[test]
    fn test_unit_request_has_no_persona() {
        let parsed: DekRequest = decode_line("{\"op\":\"list_personas\"}").unwrap();
        assert!(matches!(parsed, DekRequest::ListPersonas));
        assert_eq!(parsed.persona_id(), None);
    }

    #[test]
    fn test_decrypt_request_parses_payload() {
        let line = r#"{"op":"decrypt_dek","persona_id":7,"enc_type":"aes_encrypted","dek":{"type":"aes_encrypted","bytes":"AAECAw=="}}"#;
        let parsed: DekRequest = decode_line(line).unwrap();
        match parsed {
            DekRequest::DecryptDek {
                persona_id,
                dek,
                enc_type,
            } => {
                assert_eq!(persona_id, PersonaId(7));
                assert_eq!(enc_type, DekType::AesEncrypted);
                assert_eq!(dek.as_bytes(), &[0, 1, 2, 3]);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_op_rejected() {
        let result: anyhow::Result<DekRequest> = decode_line("{\"op\":\"format_disk\"}");
        assert!(result.is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let err = DekError::PersonaTableFull(10);
        let resp = DekResponse::from(&err);
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "persona_table_full");
        assert_eq!(json["message"], "persona table full (10 entries)");
    }
}
