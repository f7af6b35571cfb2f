//! dApp wire protocol

mod error;
mod types;

pub use error::{ErrorCode, WireError};
pub(crate) use types::base64_encode;
pub use types::*;
