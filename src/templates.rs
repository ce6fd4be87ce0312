//! The template engine: maps a 32-byte site key to a human-usable
//! credential through a fixed grammar of character classes.

use std::convert::TryFrom;

use crate::error::{Error, Result};
use crate::secret::{SecretString, SiteKey};
use crate::types::ResultType;

/// Return the templates that express the password shape of the given type.
///
/// Empty for types that are not template-class.
fn templates_for_type(ty: ResultType) -> &'static [&'static str] {
    match ty {
        ResultType::TemplateMaximum => &["anoxxxxxxxxxxxxxxxxx", "axxxxxxxxxxxxxxxxxno"],
        ResultType::TemplateLong => &[
            "CvcvnoCvcvCvcv", "CvcvCvcvnoCvcv", "CvcvCvcvCvcvno", "CvccnoCvcvCvcv",
            "CvccCvcvnoCvcv", "CvccCvcvCvcvno", "CvcvnoCvccCvcv", "CvcvCvccnoCvcv",
            "CvcvCvccCvcvno", "CvcvnoCvcvCvcc", "CvcvCvcvnoCvcc", "CvcvCvcvCvccno",
            "CvccnoCvccCvcv", "CvccCvccnoCvcv", "CvccCvccCvcvno", "CvcvnoCvccCvcc",
            "CvcvCvccnoCvcc", "CvcvCvccCvccno", "CvccnoCvcvCvcc", "CvccCvcvnoCvcc",
            "CvccCvcvCvccno",
        ],
        ResultType::TemplateMedium => &["CvcnoCvc", "CvcCvcno"],
        ResultType::TemplateBasic => &["aaanaaan", "aannaaan", "aaannaaa"],
        ResultType::TemplateShort => &["Cvcn"],
        ResultType::TemplatePin => &["nnnn"],
        ResultType::TemplateName => &["cvccvcvcv"],
        ResultType::TemplatePhrase => &[
            "cvcc cvc cvccvcv cvc", "cvc cvccvcvcv cvcv", "cv cvccv cvc cvcvccv",
        ],
        _ => &[],
    }
}

/// Return the characters occurring in the given class.
///
/// - 'V': uppercase vowel
/// - 'C': uppercase consonant
/// - 'v': lowercase vowel
/// - 'c': lowercase consonant
/// - 'A': upper case letter
/// - 'a': letter (any case)
/// - 'n': digit
/// - 'o': special symbol
/// - 'x': letter (any case) or digit or special symbol
/// - ' ': the phrase separator
fn characters_in_class(class: char) -> &'static str {
    match class {
        'V' => "AEIOU",
        'C' => "BCDFGHJKLMNPQRSTVWXYZ",
        'v' => "aeiou",
        'c' => "bcdfghjklmnpqrstvwxyz",
        'A' => "AEIOUBCDFGHJKLMNPQRSTVWXYZ",
        'a' => "AEIOUaeiouBCDFGHJKLMNPQRSTVWXYZbcdfghjklmnpqrstvwxyz",
        'n' => "0123456789",
        'o' => "@&%?,=[]_:-+*$#!'^~;()/.",
        'x' => "AEIOUaeiouBCDFGHJKLMNPQRSTVWXYZbcdfghjklmnpqrstvwxyz0123456789!@#$%^&*()",
        ' ' => " ",
        _ => "",
    }
}

/// Return a character from the given class that encodes the given byte.
fn character_from_class(class: char, seed_byte: u8) -> char {
    let class_chars = characters_in_class(class);
    let count = u8::try_from(class_chars.len()).unwrap();
    //^ This unwrap is safe, because the character classes are hardcoded and
    //  shorter than 256 characters. The table test covers every class.
    class_chars.chars().nth(usize::from(seed_byte % count)).unwrap()
}

/// Materialize a credential from a site key under the template grammar of
/// the given type.
///
/// Byte 0 of the key selects the template; byte i+1 selects the character
/// for template position i.
pub(crate) fn materialize(ty: ResultType, key: &SiteKey) -> Result<SecretString> {
    let templates = templates_for_type(ty);
    if templates.is_empty() {
        return Err(Error::InvalidInput("not a template result type"));
    }
    let seed = key.as_bytes();
    let count = u8::try_from(templates.len()).unwrap();
    //^ This unwrap is safe, because the template tables are hardcoded and
    //  much shorter than 256 entries.
    let template = templates[usize::from(seed[0] % count)];
    debug_assert!(template.len() < seed.len());

    let mut password = String::with_capacity(template.len());
    for (i, class) in template.chars().enumerate() {
        password.push(character_from_class(class, seed[i + 1]));
    }
    Ok(SecretString::new(password))
}

/// Whether every character of `credential` lies in the class at its
/// template position for some template of `ty`.
#[cfg(test)]
fn obeys_template(ty: ResultType, credential: &str) -> bool {
    templates_for_type(ty).iter().any(|template| {
        template.len() == credential.len()
            && template
                .chars()
                .zip(credential.chars())
                .all(|(class, c)| characters_in_class(class).contains(c))
    })
}

/// Calculate the bits of entropy of a given template.
#[cfg(test)]
fn entropy_of_template(template: &str) -> f64 {
    let mut bits = 0.;
    for class in template.chars() {
        bits += (characters_in_class(class).len() as f64).log2();
    }
    bits
}

#[cfg(test)]
const TEMPLATE_TYPES: [ResultType; 8] = [
    ResultType::TemplateMaximum,
    ResultType::TemplateLong,
    ResultType::TemplateMedium,
    ResultType::TemplateBasic,
    ResultType::TemplateShort,
    ResultType::TemplatePin,
    ResultType::TemplateName,
    ResultType::TemplatePhrase,
];

#[test]
fn test_template_table_bounds() {
    // Byte 0 selects the template, so a pattern may use at most the 31
    // remaining key bytes. The real tables stay well under that.
    for ty in TEMPLATE_TYPES {
        let templates = templates_for_type(ty);
        assert!(!templates.is_empty());
        for template in templates {
            assert!(template.len() <= 20, "{} template too long", ty);
            for class in template.chars() {
                assert!(!characters_in_class(class).is_empty());
            }
        }
    }
}

#[test]
fn test_template_entropy() {
    /// Calculate minimal bits of entropy over the templates of a type.
    fn bits(ty: ResultType) -> f64 {
        let mut min = f64::INFINITY;
        for t in templates_for_type(ty) {
            min = entropy_of_template(t).min(min);
        }
        min
    }

    assert!(bits(ResultType::TemplateMaximum) > 118.4);
    assert!(bits(ResultType::TemplateLong) > 48.1);
    assert!(bits(ResultType::TemplateMedium) > 30.1);
    assert!(bits(ResultType::TemplateBasic) > 38.4);
    assert!(bits(ResultType::TemplateShort) > 14.4);
    assert!(bits(ResultType::TemplatePin) > 13.2);
    assert!(bits(ResultType::TemplateName) > 31.2);
    assert!(bits(ResultType::TemplatePhrase) > 55.7);
}

#[test]
fn test_materialize_obeys_template() {
    let mut seed = [0u8; 32];
    for round in 0u8..16 {
        for (i, b) in seed.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(round.wrapping_mul(101));
        }
        let key = SiteKey(seed);
        for ty in TEMPLATE_TYPES {
            let credential = materialize(ty, &key).unwrap();
            assert!(obeys_template(ty, &credential), "{}: {}", ty, &*credential);
        }
    }
}

#[test]
fn test_materialize_rejects_non_template() {
    let key = SiteKey([1; 32]);
    assert!(materialize(ResultType::StoredPersonal, &key).is_err());
    assert!(materialize(ResultType::DeriveKey, &key).is_err());
}
