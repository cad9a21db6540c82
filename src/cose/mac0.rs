use ciborium::Value;
use coset::{iana, AsCborValue, CoseMac0, CoseMac0Builder, HeaderBuilder, RegisteredLabelWithPrivate};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::Error;

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::InvalidTag)?;
    mac.update(data);
    Ok(mac)
}

/// Creates a detached HMAC 256/256 COSE_Mac0 over `payload`.
pub fn tag_detached(key: &[u8], payload: &[u8]) -> Result<Value, Error> {
    let protected = HeaderBuilder::new()
        .algorithm(iana::Algorithm::HMAC_256_256)
        .build();
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::InvalidTag)?;
    let mut mac0 = CoseMac0Builder::new()
        .protected(protected)
        .payload(payload.to_vec())
        .create_tag(b"", move |data| {
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        })
        .build();
    mac0.payload = None;
    mac0.to_cbor_value().map_err(Error::Encode)
}

pub fn parse(value: &Value) -> Result<CoseMac0, Error> {
    CoseMac0::from_cbor_value(value.clone()).map_err(Error::Decode)
}

pub fn verify_detached(mac0: &CoseMac0, key: &[u8], payload: &[u8]) -> Result<(), Error> {
    match &mac0.protected.header.alg {
        Some(RegisteredLabelWithPrivate::Assigned(iana::Algorithm::HMAC_256_256)) => {}
        other => return Err(Error::UnsupportedAlgorithm(other.clone())),
    }
    let mut attached = mac0.clone();
    attached.payload = Some(payload.to_vec());
    attached.verify_tag(b"", |tag, data| {
        hmac(key, data)?
            .verify_slice(tag)
            .map_err(|_| Error::InvalidTag)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detached_tag_roundtrip() {
        let key = [9u8; 32];
        let mac0 = parse(&tag_detached(&key, b"device authentication").unwrap()).unwrap();
        assert!(mac0.payload.is_none());
        assert!(verify_detached(&mac0, &key, b"device authentication").is_ok());
        assert!(verify_detached(&mac0, &[8u8; 32], b"device authentication").is_err());
        assert!(verify_detached(&mac0, &key, b"something else").is_err());
    }

    #[test]
    fn encoded_mac_has_no_payload() {
        let value = tag_detached(&[1u8; 32], b"payload").unwrap();
        let Value::Array(items) = value else {
            panic!("COSE_Mac0 is an array");
        };
        assert_eq!(items.len(), 4);
        assert_eq!(items[2], Value::Null);
        assert!(matches!(&items[3], Value::Bytes(tag) if tag.len() == 32));
    }
}
