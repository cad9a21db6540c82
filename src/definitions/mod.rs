pub mod cose_key;
pub mod device_engagement;
pub mod device_request;
pub mod device_response;
pub mod issuer_signed;
pub mod keys;
pub mod mso;
pub mod session;
pub mod validity_info;

pub use cose_key::CoseKey;
pub use device_engagement::{BleOptions, ConnectionMethod, Engagement, NfcOptions, WifiOptions};
pub use device_request::{DocRequest, ItemsRequest};
pub use device_response::{DeviceResponseParser, ParsedDeviceResponse, ResponseDocument};
pub use issuer_signed::{IssuerSigned, IssuerSignedItem};
pub use keys::{EcCurve, EcPrivateKey, EcPublicKey};
pub use mso::{DigestAlgorithm, DigestId, DigestIds, Mso};
pub use session::{Handover, Role, SessionCipher, Status};
pub use validity_info::ValidityInfo;
