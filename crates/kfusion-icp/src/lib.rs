#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod error;
pub use error::IcpError;

/// Normal equations and the per-correspondence residual terms.
pub mod ops;

mod params;
pub use params::{EntropyTermination, IcpParams};

mod projective;
pub use projective::*;
