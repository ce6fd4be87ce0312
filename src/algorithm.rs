//! This implements the Master Password algorithm.
//! See http://masterpasswordapp.com/algorithm.html.
//!
//! Derivation happens in two stages: a memory-hard master key from the
//! user's full name and master password, then a cheap per-site key from
//! the master key and the site parameters. Both stages are versioned and
//! bit-exact; all versions stay supported so existing sites keep their
//! passwords until migrated on explicit user intent.

use std::convert::TryFrom;

use data_encoding::{BASE64, HEXLOWER};
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroize;

use crate::crypto;
use crate::error::{Error, Result};
use crate::secret::{MasterKey, SecretBytes, SecretString, SiteKey};
use crate::templates;
use crate::types::{AlgorithmVersion, Purpose, ResultClass, ResultType};

/// Derive the master key for a user.
///
/// The salt is the authentication scope, the big-endian length of the
/// full name, and the full name itself; the key is scrypt of the master
/// password under that salt.
///
/// Version 0 counts the full name length in Unicode scalar values and
/// only accepts ASCII full names; versions 1 and up count UTF-8 bytes.
pub fn master_key(
    full_name: &str,
    master_password: &str,
    version: AlgorithmVersion,
) -> Result<MasterKey> {
    if full_name.is_empty() {
        return Err(Error::InvalidInput("full name must not be empty"));
    }
    if master_password.is_empty() {
        return Err(Error::InvalidInput("master password must not be empty"));
    }
    if version == AlgorithmVersion::V0 && !full_name.is_ascii() {
        return Err(Error::InvalidInput("version 0 only supports ASCII full names"));
    }

    let name_len = match version {
        AlgorithmVersion::V0 => full_name.chars().count(),
        _ => full_name.len(),
    };
    let name_len =
        u32::try_from(name_len).map_err(|_| Error::InvalidInput("full name too long"))?;

    let scope = Purpose::Authentication.scope().as_bytes();
    let mut salt = Vec::with_capacity(scope.len() + 4 + full_name.len());
    salt.extend_from_slice(scope);
    salt.extend_from_slice(&crypto::be32(name_len));
    salt.extend_from_slice(full_name.as_bytes());

    let mut key = MasterKey([0; crypto::MASTER_KEY_LEN]);
    crypto::scrypt_fill(master_password.as_bytes(), &salt, &mut key.0)?;
    Ok(key)
}

/// The key ID identifying a master key without revealing it: lowercase
/// hex of SHA-256 over the key bytes.
pub fn key_id(master_key: &MasterKey) -> String {
    HEXLOWER.encode(&crypto::sha256(master_key.as_bytes()))
}

/// Derive the key for one site under a master key.
///
/// The salt is the purpose scope, the big-endian length of the site name,
/// the site name, the big-endian counter, and optionally the length and
/// bytes of a purpose-specific context; the key is HMAC-SHA-256 of that
/// salt under the master key.
///
/// Version 0 counts the site name length in Unicode scalar values,
/// versions 1 and up in UTF-8 bytes. Versions 0 and 1 normalize the site
/// name NFKD, versions 2 and 3 NFC. Context bytes are used as given.
pub fn site_key(
    master_key: &MasterKey,
    site_name: &str,
    site_counter: u32,
    purpose: Purpose,
    context: Option<&str>,
    version: AlgorithmVersion,
) -> Result<SiteKey> {
    if site_name.is_empty() {
        return Err(Error::InvalidInput("site name must not be empty"));
    }

    let site_name: String = match version {
        AlgorithmVersion::V0 | AlgorithmVersion::V1 => site_name.nfkd().collect(),
        AlgorithmVersion::V2 | AlgorithmVersion::V3 => site_name.nfc().collect(),
    };
    let name_len = match version {
        AlgorithmVersion::V0 => site_name.chars().count(),
        _ => site_name.len(),
    };
    let name_len =
        u32::try_from(name_len).map_err(|_| Error::InvalidInput("site name too long"))?;

    let scope = purpose.scope().as_bytes();
    let mut salt = Vec::with_capacity(scope.len() + 12 + site_name.len());
    salt.extend_from_slice(scope);
    salt.extend_from_slice(&crypto::be32(name_len));
    salt.extend_from_slice(site_name.as_bytes());
    salt.extend_from_slice(&crypto::be32(site_counter));
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        let context_len =
            u32::try_from(context.len()).map_err(|_| Error::InvalidInput("context too long"))?;
        salt.extend_from_slice(&crypto::be32(context_len));
        salt.extend_from_slice(context.as_bytes());
    }

    let mut key = SiteKey([0; crypto::SITE_KEY_LEN]);
    let mut digest = crypto::hmac_sha256(master_key.as_bytes(), &salt);
    key.0.copy_from_slice(&digest);
    digest.zeroize();
    Ok(key)
}

/// Produce the result for a site: a templated credential, the decrypted
/// stored content, or derived key material, depending on the type class.
///
/// For stateful types `param` is the stored Base64 state; for the derive
/// type it is the key size in bits (128, 256 or 512, default 512).
#[allow(clippy::too_many_arguments)]
pub fn site_result(
    master_key: &MasterKey,
    site_name: &str,
    site_counter: u32,
    purpose: Purpose,
    context: Option<&str>,
    result_type: ResultType,
    param: Option<&str>,
    version: AlgorithmVersion,
) -> Result<SecretString> {
    let key = site_key(master_key, site_name, site_counter, purpose, context, version)?;
    match result_type.class() {
        ResultClass::Template => templates::materialize(result_type, &key),
        ResultClass::Stateful => match param {
            Some(state) => state_decrypt(&key, state),
            None => Err(Error::InvalidInput(
                "stored result types need their saved state as parameter",
            )),
        },
        ResultClass::Derive => derive_key(&key, param),
    }
}

/// Encrypt `plaintext` into the Base64 state persisted for a stateful
/// site, under the key for that site.
#[allow(clippy::too_many_arguments)]
pub fn site_state(
    master_key: &MasterKey,
    site_name: &str,
    site_counter: u32,
    purpose: Purpose,
    context: Option<&str>,
    result_type: ResultType,
    plaintext: &str,
    version: AlgorithmVersion,
) -> Result<String> {
    if result_type.class() != ResultClass::Stateful {
        return Err(Error::InvalidInput("only stored result types carry state"));
    }
    let key = site_key(master_key, site_name, site_counter, purpose, context, version)?;
    Ok(state_encrypt(&key, plaintext))
}

/// AES-128-CTR under the first 16 bytes of the site key, zero IV, then
/// Base64 without line breaks.
pub(crate) fn state_encrypt(site_key: &SiteKey, plaintext: &str) -> String {
    let mut content_key = [0; crypto::CONTENT_KEY_LEN];
    content_key.copy_from_slice(&site_key.as_bytes()[..crypto::CONTENT_KEY_LEN]);
    let mut buf = plaintext.as_bytes().to_vec();
    crypto::aes128_ctr(&content_key, &mut buf);
    content_key.zeroize();
    BASE64.encode(&buf)
}

/// Inverse of `state_encrypt`.
pub(crate) fn state_decrypt(site_key: &SiteKey, state: &str) -> Result<SecretString> {
    let mut buf = BASE64
        .decode(state.as_bytes())
        .map_err(|_| Error::InvalidInput("stored state is not valid Base64"))?;
    let mut content_key = [0; crypto::CONTENT_KEY_LEN];
    content_key.copy_from_slice(&site_key.as_bytes()[..crypto::CONTENT_KEY_LEN]);
    crypto::aes128_ctr(&content_key, &mut buf);
    content_key.zeroize();
    match String::from_utf8(buf) {
        Ok(plaintext) => Ok(SecretString::new(plaintext)),
        Err(err) => {
            let mut bytes = err.into_bytes();
            bytes.zeroize();
            Err(Error::InvalidInput("stored state does not decrypt to UTF-8"))
        }
    }
}

/// Derive raw key material of `param` bits (128, 256 or 512; default 512)
/// from the site key: successive HMAC-SHA-256 blocks keyed by the site
/// key over a big-endian block counter, truncated to the requested size
/// and returned as lowercase hex.
fn derive_key(site_key: &SiteKey, param: Option<&str>) -> Result<SecretString> {
    let bits = match param {
        None => 512,
        Some(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::InvalidInput("key size must be an integer"))?,
    };
    if !matches!(bits, 128 | 256 | 512) {
        return Err(Error::InvalidInput("key size must be 128, 256 or 512 bits"));
    }
    let key_len = bits as usize / 8;

    let mut okm = SecretBytes::new(Vec::with_capacity(key_len.next_multiple_of(32)));
    let mut block = 0u32;
    while okm.0.len() < key_len {
        let mut digest = crypto::hmac_sha256(site_key.as_bytes(), &crypto::be32(block));
        okm.0.extend_from_slice(&digest);
        digest.zeroize();
        block += 1;
    }
    okm.0.truncate(key_len);
    Ok(SecretString::new(HEXLOWER.encode(&okm.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_v3() {
        let master_key =
            master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        let expected: [u8; 64] = [
            27, 177, 181, 88, 106, 115, 177, 174, 150, 213, 214, 9, 53, 44, 141,
            132, 20, 254, 89, 228, 224, 58, 95, 52, 226, 174, 130, 64, 244, 84, 216,
            6, 136, 210, 95, 208, 201, 115, 81, 48, 112, 177, 183, 129, 50, 44, 115,
            10, 86, 114, 44, 225, 160, 170, 250, 210, 194, 87, 12, 220, 20, 36, 120,
            232,
        ];
        assert_eq!(&master_key.as_bytes()[..], &expected[..]);
    }

    #[test]
    fn test_site_result_v3() {
        let master_key =
            master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        let password = site_result(
            &master_key,
            "google.com",
            1,
            Purpose::Authentication,
            None,
            ResultType::TemplateLong,
            None,
            AlgorithmVersion::V3,
        )
        .unwrap();
        assert_eq!(&*password, "QubnJuvaMoke2~");
    }

    #[test]
    fn test_unicode_user_name() {
        let master_key =
            master_key("Max Müller", "passwort", AlgorithmVersion::V3).unwrap();
        let password = site_result(
            &master_key,
            "de.wikipedia.org",
            1,
            Purpose::Authentication,
            None,
            ResultType::TemplateLong,
            None,
            AlgorithmVersion::V3,
        )
        .unwrap();
        assert_eq!(&*password, "DaknJezb6,Zula");
    }

    #[test]
    fn test_unicode_site_name() {
        let master_key =
            master_key("Zhang Wei", "password", AlgorithmVersion::V3).unwrap();
        let password = site_result(
            &master_key,
            "山东大学.cn",
            1,
            Purpose::Authentication,
            None,
            ResultType::TemplateLong,
            None,
            AlgorithmVersion::V3,
        )
        .unwrap();
        assert_eq!(&*password, "ZajmGabl0~Zoza");
    }

    #[test]
    fn test_empty_inputs() {
        assert!(master_key("", "password", AlgorithmVersion::V3).is_err());
        assert!(master_key("John Doe", "", AlgorithmVersion::V3).is_err());

        let key = master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        assert!(
            site_key(&key, "", 1, Purpose::Authentication, None, AlgorithmVersion::V3).is_err()
        );
    }

    #[test]
    fn test_v0_rejects_non_ascii_name() {
        assert!(master_key("Max Müller", "passwort", AlgorithmVersion::V0).is_err());
        assert!(master_key("Max Muller", "passwort", AlgorithmVersion::V0).is_ok());
    }

    #[test]
    fn test_key_id_form() {
        let key = master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        let id = key_id(&key);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(id, key_id(&key));
    }

    #[test]
    fn test_site_key_length_semantics_differ_v0_v1() {
        // Both versions NFKD the site name; they differ only in whether its
        // length counts scalars or bytes, so a non-ASCII name splits them.
        let key = master_key("John Doe", "password", AlgorithmVersion::V0).unwrap();
        let v0 = site_key(
            &key,
            "Ångström.org",
            1,
            Purpose::Authentication,
            None,
            AlgorithmVersion::V0,
        )
        .unwrap();
        let v1 = site_key(
            &key,
            "Ångström.org",
            1,
            Purpose::Authentication,
            None,
            AlgorithmVersion::V1,
        )
        .unwrap();
        assert_ne!(v0.as_bytes(), v1.as_bytes());
    }

    #[test]
    fn test_site_name_normalization_differs_v1_v2() {
        // U+FB01 decomposes under NFKD ("fi") but is NFC-stable, so the two
        // normalization regimes disagree about this site name.
        let key = master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        let v1 = site_key(
            &key,
            "ﬁle.com",
            1,
            Purpose::Authentication,
            None,
            AlgorithmVersion::V1,
        )
        .unwrap();
        let v2 = site_key(
            &key,
            "ﬁle.com",
            1,
            Purpose::Authentication,
            None,
            AlgorithmVersion::V2,
        )
        .unwrap();
        let folded = site_key(
            &key,
            "file.com",
            1,
            Purpose::Authentication,
            None,
            AlgorithmVersion::V1,
        )
        .unwrap();
        assert_ne!(v1.as_bytes(), v2.as_bytes());
        assert_eq!(v1.as_bytes(), folded.as_bytes());
    }

    #[test]
    fn test_counter_purpose_context_separate_keys() {
        let key = master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        let base = site_key(
            &key,
            "example.com",
            1,
            Purpose::Authentication,
            None,
            AlgorithmVersion::V3,
        )
        .unwrap();
        let bumped = site_key(
            &key,
            "example.com",
            2,
            Purpose::Authentication,
            None,
            AlgorithmVersion::V3,
        )
        .unwrap();
        let recovery = site_key(
            &key,
            "example.com",
            1,
            Purpose::Recovery,
            None,
            AlgorithmVersion::V3,
        )
        .unwrap();
        let contextual = site_key(
            &key,
            "example.com",
            1,
            Purpose::Recovery,
            Some("mother"),
            AlgorithmVersion::V3,
        )
        .unwrap();
        assert_ne!(base.as_bytes(), bumped.as_bytes());
        assert_ne!(base.as_bytes(), recovery.as_bytes());
        assert_ne!(recovery.as_bytes(), contextual.as_bytes());
    }

    #[test]
    fn test_stateful_round_trip() {
        let key = master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        let state = site_state(
            &key,
            "example.com",
            1,
            Purpose::Authentication,
            None,
            ResultType::StoredPersonal,
            "correct horse battery staple",
            AlgorithmVersion::V3,
        )
        .unwrap();
        assert!(!state.contains('\n'));

        let plaintext = site_result(
            &key,
            "example.com",
            1,
            Purpose::Authentication,
            None,
            ResultType::StoredPersonal,
            Some(state.as_str()),
            AlgorithmVersion::V3,
        )
        .unwrap();
        assert_eq!(&*plaintext, "correct horse battery staple");
    }

    #[test]
    fn test_site_state_rejects_template_types() {
        let key = master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        assert!(site_state(
            &key,
            "example.com",
            1,
            Purpose::Authentication,
            None,
            ResultType::TemplateLong,
            "secret",
            AlgorithmVersion::V3,
        )
        .is_err());
    }

    #[test]
    fn test_derive_key_sizes() {
        let key = master_key("John Doe", "password", AlgorithmVersion::V3).unwrap();
        let derive = |param| {
            site_result(
                &key,
                "example.com",
                1,
                Purpose::Authentication,
                None,
                ResultType::DeriveKey,
                param,
                AlgorithmVersion::V3,
            )
        };

        // Hex doubles the byte count.
        assert_eq!(derive(None).unwrap().len(), 128);
        assert_eq!(derive(Some("128")).unwrap().len(), 32);
        assert_eq!(derive(Some("256")).unwrap().len(), 64);
        assert_eq!(derive(Some("512")).unwrap().len(), 128);
        assert!(derive(Some("192")).is_err());
        assert!(derive(Some("big")).is_err());

        // Longer keys extend shorter ones block by block.
        let short = derive(Some("256")).unwrap();
        let long = derive(Some("512")).unwrap();
        assert_eq!(&long.as_str()[..64], short.as_str());
    }
}
