use ciborium::Value;
use coset::{
    AsCborValue, CoseSign1, CoseSign1Builder, HeaderBuilder, Label, RegisteredLabelWithPrivate,
};

use super::{signature_algorithm, Error, X5CHAIN_HEADER_LABEL};
use crate::definitions::keys::{EcPrivateKey, EcPublicKey};
use crate::x509::Certificate;

/// Signs `payload` with `key`, embedding the payload in the structure.
pub fn sign(
    key: &EcPrivateKey,
    payload: Vec<u8>,
    x5chain: &[Certificate],
) -> Result<Value, Error> {
    builder(key, x5chain)
        .payload(payload)
        .create_signature(b"", |tbs| key.sign(tbs))
        .build()
        .to_cbor_value()
        .map_err(Error::Encode)
}

/// Signs `payload` with `key`, leaving the payload out of the structure (`nil`).
pub fn sign_detached(
    key: &EcPrivateKey,
    payload: &[u8],
    x5chain: &[Certificate],
) -> Result<Value, Error> {
    builder(key, x5chain)
        .create_detached_signature(payload, b"", |tbs| key.sign(tbs))
        .build()
        .to_cbor_value()
        .map_err(Error::Encode)
}

fn builder(key: &EcPrivateKey, x5chain: &[Certificate]) -> CoseSign1Builder {
    let protected = HeaderBuilder::new()
        .algorithm(signature_algorithm(key.curve()))
        .build();
    let mut unprotected = HeaderBuilder::new();
    match x5chain {
        [] => {}
        [single] => {
            unprotected =
                unprotected.value(X5CHAIN_HEADER_LABEL, Value::Bytes(single.to_der().to_vec()));
        }
        chain => {
            unprotected = unprotected.value(
                X5CHAIN_HEADER_LABEL,
                Value::Array(
                    chain
                        .iter()
                        .map(|c| Value::Bytes(c.to_der().to_vec()))
                        .collect(),
                ),
            );
        }
    }
    CoseSign1Builder::new()
        .protected(protected)
        .unprotected(unprotected.build())
}

pub fn parse(value: &Value) -> Result<CoseSign1, Error> {
    CoseSign1::from_cbor_value(value.clone()).map_err(Error::Decode)
}

/// Verifies `sign1` with `key`; `detached_payload` must be given when the payload is `nil`.
pub fn verify(
    sign1: &CoseSign1,
    key: &EcPublicKey,
    detached_payload: Option<&[u8]>,
) -> Result<(), Error> {
    let expected = signature_algorithm(key.curve());
    match &sign1.protected.header.alg {
        Some(RegisteredLabelWithPrivate::Assigned(alg)) if *alg == expected => {}
        other => return Err(Error::UnsupportedAlgorithm(other.clone())),
    }
    let check = |signature: &[u8], data: &[u8]| {
        if key.verify(data, signature) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    };
    match detached_payload {
        Some(payload) => sign1.verify_detached_signature(payload, b"", check),
        None => sign1.verify_signature(b"", check),
    }
}

/// The certificate chain from the `x5chain` header, leaf first.
///
/// Both the protected and unprotected buckets are searched.
pub fn x5chain(sign1: &CoseSign1) -> Result<Vec<Certificate>, Error> {
    let value = sign1
        .unprotected
        .rest
        .iter()
        .chain(sign1.protected.header.rest.iter())
        .find(|(label, _)| *label == Label::Int(X5CHAIN_HEADER_LABEL))
        .map(|(_, value)| value)
        .ok_or(Error::MissingX5Chain)?;
    let certificates = match value {
        Value::Bytes(der) => vec![der],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Bytes(der) => Ok(der),
                _ => Err(Error::InvalidX5Chain(
                    "expecting x509 certificates to be cbor encoded bytestrings".into(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(Error::InvalidX5Chain(
                "x5chain is neither a bytestring nor an array".into(),
            ))
        }
    };
    certificates
        .into_iter()
        .map(|der| Certificate::from_der(der).map_err(|e| Error::InvalidX5Chain(e.to_string())))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::keys::EcCurve;
    use crate::x509::test::root_and_leaf;

    #[test]
    fn detached_signature_verifies_only_with_payload() {
        let (_, root, leaf_key, leaf) = root_and_leaf();
        let value = sign_detached(&leaf_key, b"payload", &[leaf.clone(), root.clone()]).unwrap();
        let sign1 = parse(&value).unwrap();
        assert!(sign1.payload.is_none());
        assert!(verify(&sign1, &leaf_key.public_key(), Some(b"payload")).is_ok());
        assert!(verify(&sign1, &leaf_key.public_key(), Some(b"other")).is_err());
        assert_eq!(x5chain(&sign1).unwrap(), vec![leaf, root]);
    }

    #[test]
    fn attached_signature_and_wrong_key() {
        let key = EcPrivateKey::generate(EcCurve::P384);
        let sign1 = parse(&sign(&key, b"mso".to_vec(), &[]).unwrap()).unwrap();
        assert!(verify(&sign1, &key.public_key(), None).is_ok());
        let other = EcPrivateKey::generate(EcCurve::P384);
        assert!(matches!(
            verify(&sign1, &other.public_key(), None),
            Err(Error::InvalidSignature)
        ));
        assert!(matches!(x5chain(&sign1), Err(Error::MissingX5Chain)));
    }
}
