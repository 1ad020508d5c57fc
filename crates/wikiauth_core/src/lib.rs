pub mod client;
pub mod config;
pub mod credentials;
pub mod database;
pub mod error;
pub mod login;
pub mod migrate;
pub mod oauth;
pub mod profile;
pub mod replica;
pub mod router;

pub use error::{Error, ErrorKind, Result};

use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

pub(crate) fn unix_timestamp() -> Result<i64, SystemTimeError> {
    let seconds = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(i64::try_from(seconds).unwrap_or(i64::MAX))
}
