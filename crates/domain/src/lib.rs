pub mod capability;
pub mod chat;
pub mod config;
pub mod entities;
pub mod error;
pub mod ids;
pub mod stream;

pub use error::{Error, ErrorKind, ProviderErrorKind, Result};
