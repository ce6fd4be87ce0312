//! Owned secret buffers that are wiped when they leave scope.
//!
//! Whoever creates one of these buffers owns it; the wipe runs on every
//! exit path, including early returns on error.

use std::fmt;
use std::ops::Deref;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// The 64-byte master key produced by scrypt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(pub(crate) [u8; 64]);

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// The 32-byte per-site key produced by HMAC-SHA-256.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SiteKey(pub(crate) [u8; 32]);

impl SiteKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SiteKey(..)")
    }
}

/// An owned string holding secret content, such as a materialized
/// credential or the master password itself.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> SecretString {
        SecretString(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for SecretString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> SecretString {
        SecretString(s.to_owned())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SecretString(..)")
    }
}

/// An owned byte buffer holding secret content, such as plaintext about to
/// be encrypted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(pub(crate) Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> SecretBytes {
        SecretBytes(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SecretBytes(..)")
    }
}

#[test]
fn test_wipe_master_key() {
    let mut key = MasterKey([0xa5; 64]);
    key.zeroize();
    assert!(key.0.iter().all(|&b| b == 0));
}

#[test]
fn test_wipe_secret_string() {
    let mut s = SecretString::new("hunter2".to_string());
    s.zeroize();
    assert!(s.0.is_empty());
}

#[test]
fn test_debug_hides_content() {
    let key = SiteKey([7; 32]);
    assert_eq!(format!("{:?}", key), "SiteKey(..)");
    let s = SecretString::from("hunter2");
    assert_eq!(format!("{:?}", s), "SecretString(..)");
}
