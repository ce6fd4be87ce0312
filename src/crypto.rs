//! Thin wrappers over the cryptographic primitives the algorithm is built
//! from: SHA-256, HMAC-SHA-256, scrypt with the pinned cost parameters,
//! AES-128-CTR with a zero IV, and a constant-time compare.

use aes::Aes128;
use byteorder::{BigEndian, ByteOrder};
use ctr::cipher::{KeyIvInit, StreamCipher};
use lazy_static::lazy_static;
use ring::{constant_time, digest, hmac};
use scrypt::Params as ScryptParams;

use crate::error::{Error, Result};

/// Length of a derived master key.
pub const MASTER_KEY_LEN: usize = 64;
/// Length of a derived site key.
pub const SITE_KEY_LEN: usize = 32;
/// Length of the AES-128 key carved from the front of a site key.
pub const CONTENT_KEY_LEN: usize = 16;

lazy_static! {
    /// Scrypt parameters used by the Master Password algorithm:
    /// N = 2^15, r = 8, p = 2, 64-byte output.
    static ref SCRYPT_PARAMS: ScryptParams = ScryptParams::new(15, 8, 2, MASTER_KEY_LEN)
        .expect("hardcoded scrypt parameters are valid");
}

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// One-shot SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0; 32];
    out.copy_from_slice(digest::digest(&digest::SHA256, data).as_ref());
    out
}

/// One-shot HMAC-SHA-256.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let mut out = [0; 32];
    out.copy_from_slice(hmac::sign(&key, msg).as_ref());
    out
}

/// Run scrypt with the pinned cost parameters, filling `out`.
pub fn scrypt_fill(password: &[u8], salt: &[u8], out: &mut [u8; MASTER_KEY_LEN]) -> Result<()> {
    scrypt::scrypt(password, salt, &SCRYPT_PARAMS, out)
        .map_err(|_| Error::CryptoFailure("scrypt"))
}

/// Apply the AES-128-CTR keystream for `key` with a zero IV, in place.
///
/// CTR is its own inverse, so this both encrypts and decrypts. The single
/// application over a fixed-length buffer with counter block 0 is a wire
/// format constraint inherited from the flat and structured site stores.
pub fn aes128_ctr(key: &[u8; CONTENT_KEY_LEN], buf: &mut [u8]) {
    let iv = [0; 16];
    let mut cipher = Aes128Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(buf);
}

/// Constant-time equality of two byte slices.
pub fn verify_equal(a: &[u8], b: &[u8]) -> bool {
    constant_time::verify_slices_are_equal(a, b).is_ok()
}

/// Big-endian encoding of a 32-bit integer, as used for every length and
/// counter field in a derivation salt.
pub fn be32(n: u32) -> [u8; 4] {
    let mut out = [0; 4];
    BigEndian::write_u32(&mut out, n);
    out
}

#[test]
fn test_sha256_vector() {
    // FIPS 180-2 appendix B.1.
    let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    assert_eq!(data_encoding::HEXLOWER.encode(&sha256(b"abc")), expected);
}

#[test]
fn test_hmac_sha256_vector() {
    // RFC 4231 test case 2.
    let expected = "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843";
    assert_eq!(
        data_encoding::HEXLOWER.encode(&hmac_sha256(b"Jefe", b"what do ya want for nothing?")),
        expected
    );
}

#[test]
fn test_aes_ctr_round_trip() {
    let key = [0x2b; CONTENT_KEY_LEN];
    let mut buf = b"This is a secret.".to_vec();
    aes128_ctr(&key, &mut buf);
    assert_ne!(&buf, b"This is a secret.");
    aes128_ctr(&key, &mut buf);
    assert_eq!(&buf, b"This is a secret.");
}

#[test]
fn test_be32() {
    assert_eq!(be32(0x0102_0304), [1, 2, 3, 4]);
    assert_eq!(be32(1), [0, 0, 0, 1]);
}

#[test]
fn test_verify_equal() {
    assert!(verify_equal(b"abc", b"abc"));
    assert!(!verify_equal(b"abc", b"abd"));
    assert!(!verify_equal(b"abc", b"abcd"));
}
