//! Issuance of signed mdocs and the demo issuer used by the CLI and tests.
//!
//! The [sample] module issues a driving licence from a throwaway IACA so that a holder has
//! something to present without a provisioning backend.
pub mod mdoc;
pub mod sample;

pub use mdoc::{Mdoc, Namespaces};
