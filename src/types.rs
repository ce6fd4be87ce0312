//! Core domain vocabulary: algorithm versions, key purposes and result
//! types, including the numeric codes both wire formats use.

use std::fmt;

use crate::error::{Error, Result};

/// An algorithm generation. Each version pins bit-exact derivation
/// behavior; all versions are supported simultaneously and a site keeps
/// its version until the user migrates it explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlgorithmVersion {
    V0,
    V1,
    V2,
    V3,
}

impl AlgorithmVersion {
    pub const CURRENT: AlgorithmVersion = AlgorithmVersion::V3;
    pub const FIRST: u32 = 0;
    pub const LAST: u32 = 3;

    pub fn from_u32(v: u32) -> Result<AlgorithmVersion> {
        match v {
            0 => Ok(AlgorithmVersion::V0),
            1 => Ok(AlgorithmVersion::V1),
            2 => Ok(AlgorithmVersion::V2),
            3 => Ok(AlgorithmVersion::V3),
            _ => Err(Error::UnsupportedVersion(v)),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            AlgorithmVersion::V0 => 0,
            AlgorithmVersion::V1 => 1,
            AlgorithmVersion::V2 => 2,
            AlgorithmVersion::V3 => 3,
        }
    }
}

impl fmt::Display for AlgorithmVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// The default site counter.
pub const COUNTER_DEFAULT: u32 = 1;
/// The reserved time-based counter slot. Stable derivations use 1 and up.
pub const COUNTER_TIME_BASED: u32 = 0;

/// What the derived token is used for. Selects the domain-separation
/// scope of the site key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    /// An authentication token, such as a password.
    Authentication,
    /// An identification token, such as a login name.
    Identification,
    /// A recovery token, such as a security answer.
    Recovery,
}

impl Purpose {
    /// Try to construct a Purpose from a name.
    ///
    /// Returns None if the string does not correspond to a purpose.
    pub fn from_name(s: &str) -> Option<Purpose> {
        match s {
            "a" | "auth" | "authentication" => Some(Purpose::Authentication),
            "i" | "ident" | "identification" => Some(Purpose::Identification),
            "r" | "rec" | "recovery" => Some(Purpose::Recovery),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Purpose::Authentication => "authentication",
            Purpose::Identification => "identification",
            Purpose::Recovery => "recovery",
        }
    }

    /// The scope prefix of every site-key salt derived for this purpose.
    /// These byte strings are fixed across all algorithm versions.
    pub fn scope(self) -> &'static str {
        match self {
            Purpose::Authentication => "com.lyndir.masterpassword",
            Purpose::Identification => "com.lyndir.masterpassword.login",
            Purpose::Recovery => "com.lyndir.masterpassword.answer",
        }
    }
}

/// How a result type produces its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultClass {
    /// Deterministically materialized from the site key through a
    /// character-class template.
    Template,
    /// Encrypted content stored at rest alongside the site.
    Stateful,
    /// Raw key bytes derived from the site key.
    Derive,
}

const CLASS_TEMPLATE: u32 = 1 << 4;
const CLASS_STATEFUL: u32 = 1 << 5;
const CLASS_DERIVE: u32 = 1 << 6;

const FEATURE_EXPORT_CONTENT: u32 = 1 << 10;
const FEATURE_DEVICE_ONLY: u32 = 1 << 11;
const FEATURE_ALTERNATIVE: u32 = 1 << 12;

/// Type of the site result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultType {
    /// 20 characters, contains symbols.
    TemplateMaximum,
    /// Copy-friendly, 14 characters, contains symbols.
    TemplateLong,
    /// Copy-friendly, 8 characters, contains symbols.
    TemplateMedium,
    /// 8 characters, no symbols.
    TemplateBasic,
    /// Copy-friendly, 4 characters, no symbols.
    TemplateShort,
    /// 4 numbers.
    TemplatePin,
    /// 9 letter name.
    TemplateName,
    /// 20 character sentence.
    TemplatePhrase,
    /// A personal password stored encrypted alongside the site.
    StoredPersonal,
    /// A token stored for this device only; never exported.
    StoredDevice,
    /// Raw derived key material.
    DeriveKey,
}

impl ResultType {
    /// Try to construct a ResultType from a name.
    ///
    /// Returns None if the string does not correspond to a type.
    pub fn from_name(s: &str) -> Option<ResultType> {
        match s {
            "x" | "max" | "maximum" => Some(ResultType::TemplateMaximum),
            "l" | "long" => Some(ResultType::TemplateLong),
            "m" | "med" | "medium" => Some(ResultType::TemplateMedium),
            "b" | "basic" => Some(ResultType::TemplateBasic),
            "s" | "short" => Some(ResultType::TemplateShort),
            "i" | "pin" => Some(ResultType::TemplatePin),
            "n" | "name" => Some(ResultType::TemplateName),
            "p" | "phrase" => Some(ResultType::TemplatePhrase),
            "K" | "key" => Some(ResultType::DeriveKey),
            "P" | "personal" => Some(ResultType::StoredPersonal),
            "D" | "device" => Some(ResultType::StoredDevice),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResultType::TemplateMaximum => "maximum",
            ResultType::TemplateLong => "long",
            ResultType::TemplateMedium => "medium",
            ResultType::TemplateBasic => "basic",
            ResultType::TemplateShort => "short",
            ResultType::TemplatePin => "pin",
            ResultType::TemplateName => "name",
            ResultType::TemplatePhrase => "phrase",
            ResultType::StoredPersonal => "personal",
            ResultType::StoredDevice => "device",
            ResultType::DeriveKey => "key",
        }
    }

    /// The numeric code identifying this type in both wire formats, e.g.
    /// the `17` of a flat `17:3:1` site field.
    pub fn code(self) -> u32 {
        match self {
            ResultType::TemplateMaximum => CLASS_TEMPLATE,
            ResultType::TemplateLong => 0x1 | CLASS_TEMPLATE,
            ResultType::TemplateMedium => 0x2 | CLASS_TEMPLATE,
            ResultType::TemplateBasic => 0x3 | CLASS_TEMPLATE,
            ResultType::TemplateShort => 0x4 | CLASS_TEMPLATE,
            ResultType::TemplatePin => 0x5 | CLASS_TEMPLATE,
            ResultType::TemplateName => 0xE | CLASS_TEMPLATE,
            ResultType::TemplatePhrase => 0xF | CLASS_TEMPLATE,
            ResultType::StoredPersonal => CLASS_STATEFUL | FEATURE_EXPORT_CONTENT,
            ResultType::StoredDevice => 0x1 | CLASS_STATEFUL | FEATURE_DEVICE_ONLY,
            ResultType::DeriveKey => CLASS_DERIVE | FEATURE_ALTERNATIVE,
        }
    }

    /// Try to construct a ResultType from its numeric wire code.
    pub fn from_code(code: u32) -> Option<ResultType> {
        [
            ResultType::TemplateMaximum,
            ResultType::TemplateLong,
            ResultType::TemplateMedium,
            ResultType::TemplateBasic,
            ResultType::TemplateShort,
            ResultType::TemplatePin,
            ResultType::TemplateName,
            ResultType::TemplatePhrase,
            ResultType::StoredPersonal,
            ResultType::StoredDevice,
            ResultType::DeriveKey,
        ]
        .into_iter()
        .find(|t| t.code() == code)
    }

    pub fn class(self) -> ResultClass {
        match self {
            ResultType::TemplateMaximum
            | ResultType::TemplateLong
            | ResultType::TemplateMedium
            | ResultType::TemplateBasic
            | ResultType::TemplateShort
            | ResultType::TemplatePin
            | ResultType::TemplateName
            | ResultType::TemplatePhrase => ResultClass::Template,
            ResultType::StoredPersonal | ResultType::StoredDevice => ResultClass::Stateful,
            ResultType::DeriveKey => ResultClass::Derive,
        }
    }

    /// Whether the content may leave the device in an export.
    pub fn exports_content(self) -> bool {
        self.code() & FEATURE_EXPORT_CONTENT != 0
    }

    /// Whether the content must never leave the device of origin.
    pub fn device_only(self) -> bool {
        self.code() & FEATURE_DEVICE_ONLY != 0
    }

    /// Whether the type is an alternative to the site's usual credential
    /// and therefore does not update the persisted site entry.
    pub fn alternative(self) -> bool {
        self.code() & FEATURE_ALTERNATIVE != 0
    }

    /// The default type generated for a purpose when neither the site
    /// entry nor the caller picks one.
    pub fn default_for(purpose: Purpose) -> ResultType {
        match purpose {
            Purpose::Authentication => ResultType::TemplateLong,
            Purpose::Identification => ResultType::TemplateName,
            Purpose::Recovery => ResultType::TemplatePhrase,
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[test]
fn test_version_range() {
    assert!(AlgorithmVersion::from_u32(4).is_err());
    assert_eq!(AlgorithmVersion::from_u32(3).unwrap(), AlgorithmVersion::CURRENT);
    for v in AlgorithmVersion::FIRST..=AlgorithmVersion::LAST {
        assert_eq!(AlgorithmVersion::from_u32(v).unwrap().as_u32(), v);
    }
}

#[test]
fn test_type_codes() {
    assert_eq!(ResultType::TemplateMaximum.code(), 16);
    assert_eq!(ResultType::TemplateLong.code(), 17);
    assert_eq!(ResultType::TemplatePin.code(), 21);
    assert_eq!(ResultType::TemplateName.code(), 30);
    assert_eq!(ResultType::TemplatePhrase.code(), 31);
    assert_eq!(ResultType::StoredPersonal.code(), 1056);
    assert_eq!(ResultType::StoredDevice.code(), 2081);
    assert_eq!(ResultType::DeriveKey.code(), 4160);
}

#[test]
fn test_type_code_round_trip() {
    for code in [16, 17, 18, 19, 20, 21, 30, 31, 1056, 2081, 4160] {
        let t = ResultType::from_code(code).unwrap();
        assert_eq!(t.code(), code);
    }
    assert_eq!(ResultType::from_code(0), None);
    assert_eq!(ResultType::from_code(22), None);
}

#[test]
fn test_type_names() {
    for t in [
        ResultType::TemplateMaximum,
        ResultType::StoredPersonal,
        ResultType::DeriveKey,
    ] {
        assert_eq!(ResultType::from_name(t.name()), Some(t));
    }
    assert_eq!(ResultType::from_name("K"), Some(ResultType::DeriveKey));
    assert_eq!(ResultType::from_name("k"), None);
}

#[test]
fn test_purpose_defaults() {
    assert_eq!(
        ResultType::default_for(Purpose::Authentication),
        ResultType::TemplateLong
    );
    assert_eq!(
        ResultType::default_for(Purpose::Identification),
        ResultType::TemplateName
    );
    assert_eq!(
        ResultType::default_for(Purpose::Recovery),
        ResultType::TemplatePhrase
    );
}

#[test]
fn test_feature_bits() {
    assert!(ResultType::StoredPersonal.exports_content());
    assert!(!ResultType::StoredDevice.exports_content());
    assert!(ResultType::StoredDevice.device_only());
    assert!(ResultType::DeriveKey.alternative());
    assert!(!ResultType::TemplateLong.alternative());
}
