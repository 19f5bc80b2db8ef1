// ABOUTME: Secure access token storage using the system keychain
// ABOUTME: Falls back to a clear error when built without the keychain feature

use crate::error::SnapError;

#[cfg(feature = "keychain")]
use keyring::Entry;

#[cfg(feature = "keychain")]
const SERVICE: &str = "snapsight";
#[cfg(feature = "keychain")]
const ACCOUNT: &str = "access-token";

#[cfg(feature = "keychain")]
fn entry(service: &str, account: &str) -> Result<Entry, SnapError> {
    Entry::new(service, account).map_err(|e| SnapError::Storage(e.to_string()))
}

#[cfg(feature = "keychain")]
pub fn store(token: &str) -> Result<(), SnapError> {
    store_in(SERVICE, ACCOUNT, token)
}

/// Write the token, then read it back through a fresh entry. Backends that
/// only keep credentials in memory fail the read-back.
#[cfg(feature = "keychain")]
fn store_in(service: &str, account: &str, token: &str) -> Result<(), SnapError> {
    entry(service, account)?
        .set_password(token)
        .map_err(|e| SnapError::Storage(e.to_string()))?;

    match entry(service, account)?.get_password() {
        Ok(stored) if stored == token => Ok(()),
        Ok(_) => Err(SnapError::Storage(
            "keychain returned a different token than was stored".to_string(),
        )),
        Err(e) => Err(SnapError::Storage(format!(
            "keychain did not keep the token: {}",
            e
        ))),
    }
}

#[cfg(feature = "keychain")]
pub fn load() -> Result<String, SnapError> {
    entry(SERVICE, ACCOUNT)?
        .get_password()
        .map_err(|e| match e {
            keyring::Error::NoEntry => SnapError::Auth,
            other => SnapError::Storage(other.to_string()),
        })
}

#[cfg(feature = "keychain")]
pub fn clear() -> Result<(), SnapError> {
    clear_in(SERVICE, ACCOUNT)
}

#[cfg(feature = "keychain")]
fn clear_in(service: &str, account: &str) -> Result<(), SnapError> {
    match entry(service, account)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(SnapError::Storage(e.to_string())),
    }
}

#[cfg(not(feature = "keychain"))]
pub fn store(_token: &str) -> Result<(), SnapError> {
    Err(disabled())
}

#[cfg(not(feature = "keychain"))]
pub fn load() -> Result<String, SnapError> {
    Err(disabled())
}

#[cfg(not(feature = "keychain"))]
pub fn clear() -> Result<(), SnapError> {
    Err(disabled())
}

#[cfg(not(feature = "keychain"))]
fn disabled() -> SnapError {
    SnapError::Storage("keychain support not enabled; set SNAPSIGHT_TOKEN instead".to_string())
}
