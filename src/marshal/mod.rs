//! Reading and writing persisted user configurations.
//!
//! Two wire formats share this one in-memory model: a line-oriented flat
//! format and a structured JSON format, each in a redacted and an
//! unredacted variant. The codecs work on byte buffers; file access
//! belongs to the caller.

mod flat;
mod json;

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use zeroize::Zeroize;

use crate::algorithm;
use crate::crypto;
use crate::error::{Error, Result};
use crate::secret::{MasterKey, SecretString};
use crate::types::{AlgorithmVersion, Purpose, ResultClass, ResultType};

/// A persisted representation of a user's sites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// The legacy line-oriented format.
    Flat,
    /// The structured key-value format.
    Json,
}

impl Format {
    /// Try to construct a Format from a name.
    pub fn from_name(s: &str) -> Option<Format> {
        match s {
            "f" | "flat" => Some(Format::Flat),
            "j" | "json" => Some(Format::Json),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Flat => "flat",
            Format::Json => "json",
        }
    }

    /// The file extension conventionally used for this format.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Flat => "mpsites",
            Format::Json => "mpsites.json",
        }
    }
}

/// Detect the format of serialized user data: `{` opens the structured
/// format, `# ` opens the flat header.
pub fn sniff(bytes: &[u8]) -> Result<Format> {
    let mut line = 1;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            line += 1;
            continue;
        }
        if b.is_ascii_whitespace() {
            continue;
        }
        return match b {
            b'{' => Ok(Format::Json),
            b'#' if bytes.get(i + 1) == Some(&b' ') => Ok(Format::Flat),
            _ => Err(Error::malformed(line, "unrecognized sites format")),
        };
    }
    Err(Error::malformed(line, "empty sites data"))
}

/// The authenticated master credentials attached to a loaded user.
#[derive(Debug)]
struct Credentials {
    password: SecretString,
    /// Master key at the user's own algorithm version.
    key: MasterKey,
}

/// A user and their sites, as carried by both wire formats.
#[derive(Debug)]
pub struct User {
    pub full_name: String,
    pub avatar: u32,
    /// Lowercase hex SHA-256 of the master key, once known.
    pub key_id: Option<String>,
    pub algorithm: AlgorithmVersion,
    pub default_type: ResultType,
    /// Whether stateful content is at rest as ciphertext.
    pub redacted: bool,
    /// Seconds since the epoch; 0 means never.
    pub last_used: i64,
    pub sites: Vec<Site>,
    pub(crate) extra: Map<String, Value>,
    pub(crate) document_extra: Map<String, Value>,
    master: Option<Credentials>,
}

/// One site entry owned by a user.
#[derive(Debug, PartialEq)]
pub struct Site {
    pub name: String,
    /// An explicit algorithm override; inherits the user's when None.
    pub algorithm: Option<AlgorithmVersion>,
    pub counter: u32,
    pub result_type: ResultType,
    /// For stateful types: ciphertext when the user is redacted,
    /// plaintext otherwise.
    pub content: Option<String>,
    pub login_name: Option<String>,
    pub login_generated: bool,
    pub url: Option<String>,
    pub uses: u32,
    pub last_used: i64,
    pub questions: Vec<Question>,
    pub(crate) extra: Map<String, Value>,
}

/// A security question under a site, keyed by its most significant word.
#[derive(Debug, PartialEq)]
pub struct Question {
    pub keyword: String,
    pub content: Option<String>,
    pub(crate) extra: Map<String, Value>,
}

impl Drop for Site {
    fn drop(&mut self) {
        if let Some(content) = &mut self.content {
            content.zeroize();
        }
    }
}

impl Drop for Question {
    fn drop(&mut self) {
        if let Some(content) = &mut self.content {
            content.zeroize();
        }
    }
}

impl User {
    /// A fresh user with default settings and no sites.
    pub fn new(full_name: impl Into<String>) -> User {
        User {
            full_name: full_name.into(),
            avatar: 0,
            key_id: None,
            algorithm: AlgorithmVersion::CURRENT,
            default_type: ResultType::TemplateLong,
            redacted: true,
            last_used: 0,
            sites: Vec::new(),
            extra: Map::new(),
            document_extra: Map::new(),
            master: None,
        }
    }

    /// Verify the master password against the stored key ID and attach
    /// the derived master key.
    ///
    /// When no key ID is stored yet, the computed one is adopted.
    pub fn authenticate(&mut self, master_password: &str) -> Result<()> {
        let key = algorithm::master_key(&self.full_name, master_password, self.algorithm)?;
        let computed = algorithm::key_id(&key);
        match &self.key_id {
            Some(stored) => {
                let stored = stored.to_lowercase();
                if !crypto::verify_equal(stored.as_bytes(), computed.as_bytes()) {
                    return Err(Error::WrongMasterPassword(format!(
                        "master password does not match key ID of user {}",
                        self.full_name
                    )));
                }
                self.key_id = Some(stored);
            }
            None => self.key_id = Some(computed),
        }
        self.master = Some(Credentials {
            password: master_password.into(),
            key,
        });
        Ok(())
    }

    /// The master key at the user's own algorithm version, if
    /// authenticated.
    pub fn master_key(&self) -> Option<&MasterKey> {
        self.master.as_ref().map(|m| &m.key)
    }

    /// The master key at an arbitrary algorithm version, re-derived from
    /// the attached master password when it differs from the user's own.
    pub fn master_key_for(&self, version: AlgorithmVersion) -> Result<MasterKey> {
        let master = self
            .master
            .as_ref()
            .ok_or(Error::InvalidInput("user is not authenticated"))?;
        if version == self.algorithm {
            return Ok(master.key.clone());
        }
        algorithm::master_key(&self.full_name, &master.password, version)
    }

    pub fn find_site(&self, name: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.name == name)
    }

    pub fn find_site_mut(&mut self, name: &str) -> Option<&mut Site> {
        self.sites.iter_mut().find(|s| s.name == name)
    }

    /// Add a new site with the given parameters and return it.
    pub fn add_site(
        &mut self,
        name: impl Into<String>,
        result_type: ResultType,
        counter: u32,
        algorithm: Option<AlgorithmVersion>,
    ) -> &mut Site {
        self.sites.push(Site {
            name: name.into(),
            algorithm,
            counter,
            result_type,
            content: None,
            login_name: None,
            login_generated: false,
            url: None,
            uses: 0,
            last_used: 0,
            questions: Vec::new(),
            extra: Map::new(),
        });
        self.sites.last_mut().unwrap()
        //^ This unwrap is safe, we just pushed the site.
    }

    /// Switch stateful content between its ciphertext and plaintext
    /// representations. Requires an authenticated user.
    pub fn set_redacted(&mut self, redacted: bool) -> Result<()> {
        if redacted == self.redacted {
            return Ok(());
        }

        let mut keys: BTreeMap<u32, MasterKey> = BTreeMap::new();
        for site in &self.sites {
            let version = site.algorithm.unwrap_or(self.algorithm);
            if !keys.contains_key(&version.as_u32()) {
                keys.insert(version.as_u32(), self.master_key_for(version)?);
            }
        }

        for site in &mut self.sites {
            let version = site.algorithm.unwrap_or(self.algorithm);
            let master_key = &keys[&version.as_u32()];
            if site.result_type.class() == ResultClass::Stateful {
                if let Some(content) = site.content.take() {
                    let recoded = if redacted {
                        algorithm::site_state(
                            master_key,
                            &site.name,
                            site.counter,
                            Purpose::Authentication,
                            None,
                            site.result_type,
                            &content,
                            version,
                        )?
                    } else {
                        algorithm::site_result(
                            master_key,
                            &site.name,
                            site.counter,
                            Purpose::Authentication,
                            None,
                            site.result_type,
                            Some(&content),
                            version,
                        )?
                        .as_str()
                        .to_owned()
                    };
                    site.content = Some(recoded);
                }
            }
            for question in &mut site.questions {
                if let Some(content) = question.content.take() {
                    let context = Some(question.keyword.as_str()).filter(|k| !k.is_empty());
                    let site_key = algorithm::site_key(
                        master_key,
                        &site.name,
                        site.counter,
                        Purpose::Recovery,
                        context,
                        version,
                    )?;
                    let recoded = if redacted {
                        algorithm::state_encrypt(&site_key, &content)
                    } else {
                        algorithm::state_decrypt(&site_key, &content)?.as_str().to_owned()
                    };
                    question.content = Some(recoded);
                }
            }
        }

        self.redacted = redacted;
        Ok(())
    }

    /// Adopt a new master password: re-encode stateful content, update
    /// the key ID and re-derive the master key.
    ///
    /// The user must be authenticated under the old master password.
    pub fn update_master_password(&mut self, new_password: &str) -> Result<()> {
        let was_redacted = self.redacted;
        if was_redacted {
            self.set_redacted(false)?;
        }
        let key = algorithm::master_key(&self.full_name, new_password, self.algorithm)?;
        self.key_id = Some(algorithm::key_id(&key));
        self.master = Some(Credentials {
            password: new_password.into(),
            key,
        });
        if was_redacted {
            self.set_redacted(true)?;
        }
        Ok(())
    }
}

impl Site {
    /// The question stored for a keyword, created on first use.
    pub fn ensure_question(&mut self, keyword: &str) -> &mut Question {
        if let Some(i) = self.questions.iter().position(|q| q.keyword == keyword) {
            return &mut self.questions[i];
        }
        self.questions.push(Question {
            keyword: keyword.to_owned(),
            content: None,
            extra: Map::new(),
        });
        self.questions.last_mut().unwrap()
        //^ This unwrap is safe, we just pushed the question.
    }
}

impl PartialEq for User {
    fn eq(&self, other: &User) -> bool {
        self.full_name == other.full_name
            && self.avatar == other.avatar
            && self.key_id == other.key_id
            && self.algorithm == other.algorithm
            && self.default_type == other.default_type
            && self.redacted == other.redacted
            && self.last_used == other.last_used
            && self.sites == other.sites
            && self.extra == other.extra
            && self.document_extra == other.document_extra
    }
}

/// Parse serialized user data, sniffing the format when not fixed, and
/// authenticate the result against the master password.
pub fn read_user(bytes: &[u8], format: Option<Format>, master_password: &str) -> Result<User> {
    let format = match format {
        Some(format) => format,
        None => sniff(bytes)?,
    };
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::malformed(1, "sites data is not valid UTF-8"))?;
    let mut user = match format {
        Format::Flat => flat::read(text)?,
        Format::Json => json::read(text)?,
    };
    if !user.full_name.is_empty() {
        user.authenticate(master_password)?;
    }
    Ok(user)
}

/// Serialize a user in the given format.
pub fn write_user(user: &User, format: Format) -> Result<String> {
    match format {
        Format::Flat => flat::write(user),
        Format::Json => json::write(user),
    }
}

/// RFC-3339 UTC with second precision; the input 0 has no date form and
/// is handled by the flat codec directly.
fn fmt_rfc3339(timestamp: i64) -> Result<String> {
    let date = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or(Error::InvalidInput("timestamp out of range"))?;
    Ok(date.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn parse_rfc3339(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated_user() -> User {
        let mut user = User::new("John Doe");
        user.authenticate("password").unwrap();
        user
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(b"{\"user\": {}}").unwrap(), Format::Json);
        assert_eq!(sniff(b"# Format: 1\n").unwrap(), Format::Flat);
        assert_eq!(sniff(b"\n\n  { }").unwrap(), Format::Json);
        assert_eq!(sniff(b"  \n# Date: x\n").unwrap(), Format::Flat);
        assert!(sniff(b"#Format: 1\n").is_err());
        assert!(sniff(b"hello").is_err());
        assert!(sniff(b"  \n ").is_err());
    }

    #[test]
    fn test_authenticate_adopts_key_id() {
        let user = authenticated_user();
        let key_id = user.key_id.clone().unwrap();
        assert_eq!(key_id.len(), 64);

        // A stored uppercase key ID is accepted and normalized.
        let mut user = User::new("John Doe");
        user.key_id = Some(key_id.to_uppercase());
        user.authenticate("password").unwrap();
        assert_eq!(user.key_id.unwrap(), key_id);
    }

    #[test]
    fn test_authenticate_rejects_wrong_password() {
        let key_id = authenticated_user().key_id.unwrap();
        let mut user = User::new("John Doe");
        user.key_id = Some(key_id);
        match user.authenticate("Password") {
            Err(Error::WrongMasterPassword(msg)) => assert!(!msg.contains("Password")),
            other => panic!("expected WrongMasterPassword, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_set_redacted_round_trip() {
        let mut user = authenticated_user();
        user.redacted = false;
        let site = user.add_site("example.com", ResultType::StoredPersonal, 1, None);
        site.content = Some("stored secret".to_owned());
        let question = site.ensure_question("mother");
        question.content = Some("her name".to_owned());

        user.set_redacted(true).unwrap();
        let site = user.find_site("example.com").unwrap();
        assert_ne!(site.content.as_deref(), Some("stored secret"));
        assert_ne!(site.questions[0].content.as_deref(), Some("her name"));

        user.set_redacted(false).unwrap();
        let site = user.find_site("example.com").unwrap();
        assert_eq!(site.content.as_deref(), Some("stored secret"));
        assert_eq!(site.questions[0].content.as_deref(), Some("her name"));
    }

    #[test]
    fn test_update_master_password() {
        let mut user = authenticated_user();
        let site = user.add_site("example.com", ResultType::StoredPersonal, 1, None);
        site.content = Some("stored secret".to_owned());
        user.set_redacted(true).unwrap();
        let old_key_id = user.key_id.clone();

        user.update_master_password("better password").unwrap();
        assert_ne!(user.key_id, old_key_id);

        // The re-encrypted state decrypts under the new master key.
        user.set_redacted(false).unwrap();
        assert_eq!(
            user.find_site("example.com").unwrap().content.as_deref(),
            Some("stored secret")
        );

        // And a fresh authentication succeeds only with the new password.
        let mut reloaded = User::new("John Doe");
        reloaded.key_id = user.key_id.clone();
        assert!(reloaded.authenticate("password").is_err());
        assert!(reloaded.authenticate("better password").is_ok());
    }

    #[test]
    fn test_master_key_for_other_version() {
        let user = authenticated_user();
        let own = user.master_key_for(user.algorithm).unwrap();
        assert_eq!(own.as_bytes(), user.master_key().unwrap().as_bytes());
        let v1 = user.master_key_for(AlgorithmVersion::V1).unwrap();
        // John Doe is ASCII, so only the scrypt inputs coincide across
        // versions; the keys must still be derivable.
        assert_eq!(v1.as_bytes(), own.as_bytes());
    }

    #[test]
    fn test_read_user_verifies_key_id() {
        let mut user = authenticated_user();
        user.default_type = ResultType::TemplateLong;
        let text = write_user(&user, Format::Json).unwrap();

        assert!(read_user(text.as_bytes(), None, "password").is_ok());
        match read_user(text.as_bytes(), None, "wrong") {
            Err(Error::WrongMasterPassword(_)) => {}
            other => panic!("expected WrongMasterPassword, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_round_trip_both_formats() {
        let mut user = authenticated_user();
        user.avatar = 3;
        user.last_used = 1420070400;
        let site = user.add_site("example.com", ResultType::TemplateMaximum, 4, None);
        site.login_name = Some("jdoe".to_owned());
        site.uses = 2;
        site.last_used = 1420070400;
        let site = user.add_site(
            "other.org",
            ResultType::TemplateLong,
            1,
            Some(AlgorithmVersion::V1),
        );
        site.url = Some("https://other.org/login".to_owned());

        for format in [Format::Flat, Format::Json] {
            let text = write_user(&user, format).unwrap();
            let reread = read_user(text.as_bytes(), Some(format), "password").unwrap();
            assert_eq!(reread, user, "{} round trip", format.name());
        }
    }
}
