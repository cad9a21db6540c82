//! Holder and reader flows on top of [crate::definitions] and [crate::transport].
//!
//! - [holder] and [presentment]: advertise, wait for a reader and answer its request
//! - [reader]: scan, connect, request and collect the response
//! - [trust] and [render]: turn a parsed response into something to display
pub mod holder;
pub mod presentment;
pub mod reader;
pub mod render;
pub mod trust;

pub use holder::{HolderPresentment, PresentmentMechanism, PresentmentState};
pub use presentment::{
    Credential, DeviceAuthMode, PresentmentOutcome, PresentmentSource, SimplePresentmentSource,
};
pub use reader::{run_reader_flow, ReaderContext, ReaderOutcome, ReaderSessionResult, Termination};
pub use render::{render_document, RenderedDocument};
pub use trust::{TrustManager, TrustPoint, TrustResult};
