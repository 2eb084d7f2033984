//! Types shared by the cookie broker crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
