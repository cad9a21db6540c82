//! Session establishment and the encrypted message channel.
//!
//! Both parties derive `SKReader` and `SKDevice` from an ECDH agreement between their
//! ephemeral keys, salted with the hash of the session transcript. Every message in either
//! direction is an AES-256-GCM ciphertext carried in `SessionEstablishment` (the reader's
//! first message) or `SessionData`.
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use ciborium::Value;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cbor;
use crate::definitions::cose_key::CoseKey;
use crate::definitions::keys::{self, EcPrivateKey, EcPublicKey};

/// Which end of the exchange a party plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Role {
    /// The holder presenting a document.
    Mdoc,
    MdocReader,
}

/// `SessionData.status` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    SessionEncryptionError,
    CborDecodingError,
    SessionTermination,
    Other(u64),
}

impl Status {
    pub fn code(&self) -> u64 {
        match self {
            Status::SessionEncryptionError => 10,
            Status::CborDecodingError => 11,
            Status::SessionTermination => 20,
            Status::Other(code) => *code,
        }
    }
}

impl From<u64> for Status {
    fn from(code: u64) -> Self {
        match code {
            10 => Status::SessionEncryptionError,
            11 => Status::CborDecodingError,
            20 => Status::SessionTermination,
            other => Status::Other(other),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::SessionEncryptionError => write!(f, "session encryption error (10)"),
            Status::CborDecodingError => write!(f, "CBOR decoding error (11)"),
            Status::SessionTermination => write!(f, "session termination (20)"),
            Status::Other(code) => write!(f, "status {code}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to decrypt session message")]
    DecryptionFailed,
    #[error("Failed to encrypt session message")]
    EncryptionFailed,
    #[error("Malformed session message: {0}")]
    Malformed(String),
    #[error("key agreement failed: {0}")]
    KeyAgreement(#[from] keys::Error),
    #[error("invalid reader key: {0}")]
    CoseKey(#[from] crate::definitions::cose_key::Error),
    #[error(transparent)]
    Cbor(#[from] cbor::CborError),
}

/// How the engagement reached the reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handover {
    /// QR code engagement; encoded as CBOR `null`.
    Qr,
    /// Negotiated NFC handover: the handover select message and, for negotiated
    /// handover, the handover request message.
    Nfc {
        handover_select: Vec<u8>,
        handover_request: Option<Vec<u8>>,
    },
}

impl From<&Handover> for Value {
    fn from(handover: &Handover) -> Value {
        match handover {
            Handover::Qr => Value::Null,
            Handover::Nfc {
                handover_select,
                handover_request,
            } => Value::Array(vec![
                Value::Bytes(handover_select.clone()),
                handover_request
                    .clone()
                    .map(Value::Bytes)
                    .unwrap_or(Value::Null),
            ]),
        }
    }
}

/// Encodes `SessionTranscript = [DeviceEngagementBytes, EReaderKeyBytes, Handover]`.
pub fn session_transcript_bytes(
    engagement_bytes: &[u8],
    e_reader_key: &EcPublicKey,
    handover: &Handover,
) -> Result<Vec<u8>, cbor::CborError> {
    let e_reader_key_bytes = CoseKey::from(e_reader_key).to_bytes()?;
    session_transcript_from_key_bytes(engagement_bytes, &e_reader_key_bytes, handover)
}

/// As [session_transcript_bytes], using the reader key's COSE_Key encoding as received.
pub fn session_transcript_from_key_bytes(
    engagement_bytes: &[u8],
    e_reader_key_bytes: &[u8],
    handover: &Handover,
) -> Result<Vec<u8>, cbor::CborError> {
    cbor::to_vec(&Value::Array(vec![
        cbor::tag24(engagement_bytes.to_vec()),
        cbor::tag24(e_reader_key_bytes.to_vec()),
        Value::from(handover),
    ]))
}

/// `SHA-256(#6.24(bstr .cbor SessionTranscript))`, the HKDF salt for session keys.
pub fn transcript_salt(transcript_bytes: &[u8]) -> Result<[u8; 32], cbor::CborError> {
    let tagged = cbor::to_vec(&cbor::tag24(transcript_bytes.to_vec()))?;
    Ok(Sha256::digest(tagged).into())
}

/// Derives a 32 byte key with HKDF-SHA256.
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut okm = Zeroizing::new([0u8; 32]);
    // 32 bytes is always a valid HKDF-SHA256 output length.
    let _ = Hkdf::<Sha256>::new(Some(salt), ikm).expand(info, &mut okm[..]);
    okm
}

/// Recovers `eReaderKey` from a `SessionEstablishment` message.
///
/// Returns the key together with its COSE_Key encoding as sent, which is what the
/// holder must put into the session transcript.
pub fn reader_key_from_establishment(message: &[u8]) -> Result<(EcPublicKey, Vec<u8>), Error> {
    let value: Value = cbor::from_slice(message)?;
    let map = cbor::as_map(&value)?;
    let tagged = cbor::lookup_text(map, "eReaderKey")
        .ok_or_else(|| Error::Malformed("not a SessionEstablishment message".into()))?;
    let key_bytes = cbor::untag24(tagged)?.to_vec();
    let key = CoseKey::try_from(cbor::from_slice::<Value>(&key_bytes)?)?.to_public_key()?;
    Ok((key, key_bytes))
}

/// A status-only `SessionData` message.
pub fn encode_status(status: Status) -> Vec<u8> {
    let map = Value::Map(vec![(
        Value::Text("status".into()),
        Value::Integer(status.code().into()),
    )]);
    // Encoding a small in-memory map into a Vec cannot fail.
    cbor::to_vec(&map).unwrap_or_default()
}

/// Stateful encryption for one side of a session.
pub struct SessionCipher {
    role: Role,
    e_self_key: EcPublicKey,
    sk_self: Zeroizing<[u8; 32]>,
    sk_peer: Zeroizing<[u8; 32]>,
    encrypted_counter: u32,
    decrypted_counter: u32,
    send_session_establishment: bool,
}

const READER_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0];
const DEVICE_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

impl SessionCipher {
    /// `transcript_bytes` is the encoded `SessionTranscript` (not the tagged form).
    pub fn new(
        role: Role,
        own_key: &EcPrivateKey,
        peer_key: &EcPublicKey,
        transcript_bytes: &[u8],
    ) -> Result<Self, Error> {
        let shared_secret = own_key.key_agreement(peer_key)?;
        let salt = transcript_salt(transcript_bytes)?;
        let sk_reader = derive_key(&shared_secret, &salt, b"SKReader");
        let sk_device = derive_key(&shared_secret, &salt, b"SKDevice");
        let (sk_self, sk_peer) = match role {
            Role::MdocReader => (sk_reader, sk_device),
            Role::Mdoc => (sk_device, sk_reader),
        };
        Ok(Self {
            role,
            e_self_key: own_key.public_key(),
            sk_self,
            sk_peer,
            encrypted_counter: 1,
            decrypted_counter: 1,
            send_session_establishment: role == Role::MdocReader,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn nonce(identifier: &[u8; 8], counter: u32) -> [u8; 12] {
        let mut iv = [0u8; 12];
        iv[..8].copy_from_slice(identifier);
        iv[8..].copy_from_slice(&counter.to_be_bytes());
        iv
    }

    fn identifiers(&self) -> (&'static [u8; 8], &'static [u8; 8]) {
        match self.role {
            Role::MdocReader => (&READER_IDENTIFIER, &DEVICE_IDENTIFIER),
            Role::Mdoc => (&DEVICE_IDENTIFIER, &READER_IDENTIFIER),
        }
    }

    /// Encrypts `plaintext` into the next outgoing message, optionally with a status.
    ///
    /// The reader's first message is a `SessionEstablishment` and cannot carry a status.
    pub fn encrypt_message(
        &mut self,
        plaintext: &[u8],
        status: Option<Status>,
    ) -> Result<Vec<u8>, Error> {
        let (own_identifier, _) = self.identifiers();
        let iv = Self::nonce(own_identifier, self.encrypted_counter);
        let ciphertext = Aes256Gcm::new_from_slice(&self.sk_self[..])
            .map_err(|_| Error::EncryptionFailed)?
            .encrypt(GenericArray::from_slice(&iv), plaintext)
            .map_err(|_| Error::EncryptionFailed)?;
        self.encrypted_counter += 1;

        let message = if self.send_session_establishment {
            if status.is_some() {
                return Err(Error::Malformed(
                    "SessionEstablishment cannot carry a status".into(),
                ));
            }
            self.send_session_establishment = false;
            let e_reader_key = cbor::tag24(CoseKey::from(&self.e_self_key).to_bytes()?);
            Value::Map(vec![
                (Value::Text("eReaderKey".into()), e_reader_key),
                (Value::Text("data".into()), Value::Bytes(ciphertext)),
            ])
        } else {
            let mut map = vec![(Value::Text("data".into()), Value::Bytes(ciphertext))];
            if let Some(status) = status {
                map.push((
                    Value::Text("status".into()),
                    Value::Integer(status.code().into()),
                ));
            }
            Value::Map(map)
        };
        Ok(cbor::to_vec(&message)?)
    }

    /// Decrypts an incoming `SessionEstablishment` or `SessionData` message.
    pub fn decrypt_message(
        &mut self,
        message: &[u8],
    ) -> Result<(Option<Vec<u8>>, Option<Status>), Error> {
        let value: Value = cbor::from_slice(message)?;
        let map = cbor::as_map(&value)?;
        let status = cbor::lookup_text(map, "status")
            .map(cbor::as_u64)
            .transpose()?
            .map(Status::from);
        let data = match cbor::lookup_text(map, "data") {
            Some(data) => {
                let (_, peer_identifier) = self.identifiers();
                let iv = Self::nonce(peer_identifier, self.decrypted_counter);
                let plaintext = Aes256Gcm::new_from_slice(&self.sk_peer[..])
                    .map_err(|_| Error::DecryptionFailed)?
                    .decrypt(GenericArray::from_slice(&iv), cbor::as_bytes(data)?)
                    .map_err(|_| Error::DecryptionFailed)?;
                self.decrypted_counter += 1;
                Some(plaintext)
            }
            None => None,
        };
        if data.is_none() && status.is_none() {
            return Err(Error::Malformed(
                "message carries neither data nor status".into(),
            ));
        }
        Ok((data, status))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::keys::EcCurve;

    fn pair(curve: EcCurve) -> (SessionCipher, SessionCipher, Vec<u8>) {
        let device_key = EcPrivateKey::generate(curve);
        let reader_key = EcPrivateKey::generate(curve);
        let transcript =
            session_transcript_bytes(b"engagement", &reader_key.public_key(), &Handover::Qr)
                .unwrap();
        let reader = SessionCipher::new(
            Role::MdocReader,
            &reader_key,
            &device_key.public_key(),
            &transcript,
        )
        .unwrap();
        let device =
            SessionCipher::new(Role::Mdoc, &device_key, &reader_key.public_key(), &transcript)
                .unwrap();
        (reader, device, transcript)
    }

    #[test]
    fn request_and_response_roundtrip() {
        for curve in [EcCurve::P256, EcCurve::P384] {
            let (mut reader, mut device, _) = pair(curve);

            let establishment = reader.encrypt_message(b"request", None).unwrap();
            let (reader_key, _) = reader_key_from_establishment(&establishment).unwrap();
            assert_eq!(reader_key.curve(), curve);
            assert_eq!(
                device.decrypt_message(&establishment).unwrap(),
                (Some(b"request".to_vec()), None)
            );

            let response = device
                .encrypt_message(b"response", Some(Status::SessionTermination))
                .unwrap();
            assert_eq!(
                reader.decrypt_message(&response).unwrap(),
                (Some(b"response".to_vec()), Some(Status::SessionTermination))
            );
        }
    }

    #[test]
    fn counters_advance_per_message() {
        let (mut reader, mut device, _) = pair(EcCurve::P256);
        let first = reader.encrypt_message(b"one", None).unwrap();
        let second = reader.encrypt_message(b"two", None).unwrap();
        // Out of order delivery fails authentication.
        assert!(matches!(
            device.decrypt_message(&second),
            Err(Error::DecryptionFailed)
        ));
        assert_eq!(device.decrypt_message(&first).unwrap().0, Some(b"one".to_vec()));
        assert_eq!(device.decrypt_message(&second).unwrap().0, Some(b"two".to_vec()));
    }

    #[test]
    fn mismatched_transcript_fails_to_decrypt() {
        let device_key = EcPrivateKey::generate(EcCurve::P256);
        let reader_key = EcPrivateKey::generate(EcCurve::P256);
        let mut reader = SessionCipher::new(
            Role::MdocReader,
            &reader_key,
            &device_key.public_key(),
            b"\x80",
        )
        .unwrap();
        let mut device =
            SessionCipher::new(Role::Mdoc, &device_key, &reader_key.public_key(), b"\xf6")
                .unwrap();
        let message = reader.encrypt_message(b"request", None).unwrap();
        assert!(matches!(
            device.decrypt_message(&message),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn status_only_message() {
        let (mut reader, _, _) = pair(EcCurve::P256);
        let message = encode_status(Status::SessionTermination);
        assert_eq!(hex::encode(&message), "a16673746174757314");
        assert_eq!(
            reader.decrypt_message(&message).unwrap(),
            (None, Some(Status::SessionTermination))
        );
    }

    #[test]
    fn transcript_layout() {
        let key = EcPrivateKey::generate(EcCurve::P256).public_key();
        let transcript = session_transcript_bytes(&[0xa0], &key, &Handover::Qr).unwrap();
        let value: Value = cbor::from_slice(&transcript).unwrap();
        let items = cbor::as_array(&value).unwrap();
        assert_eq!(cbor::untag24(&items[0]).unwrap(), &[0xa0]);
        assert_eq!(
            cbor::untag24(&items[1]).unwrap(),
            CoseKey::from(&key).to_bytes().unwrap()
        );
        assert_eq!(items[2], Value::Null);
    }
}
