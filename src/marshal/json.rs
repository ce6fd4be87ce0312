//! The structured key-value sites format.
//!
//! JSON with a `user` object, a `sites` object keyed by site name, and a
//! `questions` object per site keyed by question keyword. Keys the codec
//! does not know are kept on read and written back unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::{AlgorithmVersion, ResultType, COUNTER_DEFAULT};

use super::{Question, Site, User};

#[derive(Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserDoc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    sites: BTreeMap<String, SiteDoc>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Default)]
struct UserDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<DefaultsDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redacted: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Default)]
struct DefaultsDoc {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    type_: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<u32>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Default)]
struct SiteDoc {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    type_: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    counter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    login_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    login_generated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uses: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_used: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    questions: BTreeMap<String, QuestionDoc>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Default)]
struct QuestionDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

pub(super) fn read(text: &str) -> Result<User> {
    let doc: Document = serde_json::from_str(text)
        .map_err(|e| Error::malformed(e.line(), e.to_string()))?;
    let user_doc = doc.user.ok_or(Error::MissingField("user"))?;

    let mut user = User::new(user_doc.full_name.ok_or(Error::MissingField("full_name"))?);
    if let Some(format) = user_doc.format {
        if format != 1 {
            return Err(Error::malformed(1, format!("unsupported format {format}")));
        }
    }
    user.avatar = user_doc.avatar.unwrap_or(0);
    user.key_id = user_doc.key_id.map(|id| id.to_lowercase());
    if let Some(version) = user_doc.algorithm {
        user.algorithm = AlgorithmVersion::from_u32(version)?;
    }
    user.redacted = user_doc.redacted.unwrap_or(true);
    if let Some(last_used) = &user_doc.last_used {
        user.last_used = parse_timestamp(last_used)?;
    }

    let defaults = user_doc.default.unwrap_or_default();
    if let Some(version) = defaults.algorithm {
        user.algorithm = AlgorithmVersion::from_u32(version)?;
    }
    if let Some(code) = defaults.type_ {
        user.default_type = result_type(code)?;
    }
    user.extra = user_doc.extra;
    if !defaults.extra.is_empty() {
        user.extra.insert("default".to_owned(), Value::Object(defaults.extra));
    }
    user.document_extra = doc.extra;

    let default_type = user.default_type;
    for (name, site_doc) in doc.sites {
        user.sites.push(read_site(default_type, name, site_doc)?);
    }
    Ok(user)
}

fn read_site(default_type: ResultType, name: String, doc: SiteDoc) -> Result<Site> {
    let mut questions = Vec::with_capacity(doc.questions.len());
    for (keyword, question) in doc.questions {
        questions.push(Question {
            keyword,
            content: question.answer,
            extra: question.extra,
        });
    }

    Ok(Site {
        name,
        algorithm: match doc.algorithm {
            Some(version) => Some(AlgorithmVersion::from_u32(version)?),
            None => None,
        },
        counter: doc.counter.unwrap_or(COUNTER_DEFAULT),
        result_type: match doc.type_ {
            Some(code) => result_type(code)?,
            None => default_type,
        },
        content: doc.password,
        login_name: doc.login_name,
        login_generated: doc.login_generated.unwrap_or(false),
        url: doc.url,
        uses: doc.uses.unwrap_or(0),
        last_used: match &doc.last_used {
            Some(s) => parse_timestamp(s)?,
            None => 0,
        },
        questions,
        extra: doc.extra,
    })
}

pub(super) fn write(user: &User) -> Result<String> {
    let mut user_extra = user.extra.clone();
    let default_extra = match user_extra.remove("default") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let mut sites = BTreeMap::new();
    for site in &user.sites {
        let mut questions = BTreeMap::new();
        for question in &site.questions {
            questions.insert(
                question.keyword.clone(),
                QuestionDoc {
                    answer: question.content.clone(),
                    extra: question.extra.clone(),
                },
            );
        }
        sites.insert(
            site.name.clone(),
            SiteDoc {
                type_: Some(site.result_type.code()),
                counter: Some(site.counter),
                algorithm: site.algorithm.map(AlgorithmVersion::as_u32),
                password: site.content.clone(),
                login_name: site.login_name.clone(),
                login_generated: Some(true).filter(|_| site.login_generated),
                url: site.url.clone(),
                uses: Some(site.uses),
                last_used: fmt_timestamp(site.last_used)?,
                questions,
                extra: site.extra.clone(),
            },
        );
    }

    let doc = Document {
        user: Some(UserDoc {
            format: Some(1),
            avatar: Some(user.avatar),
            full_name: Some(user.full_name.clone()),
            last_used: fmt_timestamp(user.last_used)?,
            key_id: user.key_id.clone(),
            algorithm: Some(user.algorithm.as_u32()),
            default: Some(DefaultsDoc {
                type_: Some(user.default_type.code()),
                algorithm: Some(user.algorithm.as_u32()),
                extra: default_extra,
            }),
            redacted: Some(user.redacted),
            extra: user_extra,
        }),
        sites,
        extra: user.document_extra.clone(),
    };

    let mut out = serde_json::to_string_pretty(&doc)
        .map_err(|e| Error::malformed(e.line(), e.to_string()))?;
    out.push('\n');
    Ok(out)
}

fn result_type(code: u32) -> Result<ResultType> {
    ResultType::from_code(code)
        .ok_or_else(|| Error::malformed(0, format!("unknown result type {code}")))
}

fn parse_timestamp(s: &str) -> Result<i64> {
    super::parse_rfc3339(s).ok_or_else(|| Error::malformed(0, "unparseable timestamp"))
}

fn fmt_timestamp(timestamp: i64) -> Result<Option<String>> {
    if timestamp == 0 {
        return Ok(None);
    }
    super::fmt_rfc3339(timestamp).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_minimal() {
        let user = read(r#"{"user": {"full_name": "John Doe"}}"#).unwrap();
        assert_eq!(user.full_name, "John Doe");
        assert_eq!(user.avatar, 0);
        assert_eq!(user.algorithm, AlgorithmVersion::CURRENT);
        assert_eq!(user.default_type, ResultType::TemplateLong);
        assert!(user.redacted);
        assert!(user.sites.is_empty());
    }

    #[test]
    fn test_missing_landmarks() {
        assert!(matches!(read("{}"), Err(Error::MissingField("user"))));
        assert!(matches!(
            read(r#"{"user": {}}"#),
            Err(Error::MissingField("full_name"))
        ));
    }

    #[test]
    fn test_read_full() {
        let text = r#"{
  "user": {
    "format": 1,
    "avatar": 2,
    "full_name": "Robert Lee Mitchell",
    "last_used": "2015-01-01T00:00:00Z",
    "algorithm": 2,
    "default": { "type": 16, "algorithm": 3 },
    "redacted": false
  },
  "sites": {
    "masterpasswordapp.com": {
      "type": 17,
      "counter": 4,
      "algorithm": 1,
      "login_name": "robert",
      "login_generated": true,
      "url": "https://masterpasswordapp.com",
      "uses": 7,
      "last_used": "2015-01-01T00:00:00Z",
      "questions": { "mother": { "answer": "her name" } }
    }
  }
}"#;
        let user = read(text).unwrap();
        assert_eq!(user.full_name, "Robert Lee Mitchell");
        assert_eq!(user.avatar, 2);
        assert_eq!(user.last_used, 1420070400);
        // default.algorithm wins over the top-level value.
        assert_eq!(user.algorithm, AlgorithmVersion::V3);
        assert_eq!(user.default_type, ResultType::TemplateMaximum);
        assert!(!user.redacted);

        let site = &user.sites[0];
        assert_eq!(site.name, "masterpasswordapp.com");
        assert_eq!(site.result_type, ResultType::TemplateLong);
        assert_eq!(site.counter, 4);
        assert_eq!(site.algorithm, Some(AlgorithmVersion::V1));
        assert_eq!(site.login_name.as_deref(), Some("robert"));
        assert!(site.login_generated);
        assert_eq!(site.uses, 7);
        assert_eq!(site.questions.len(), 1);
        assert_eq!(site.questions[0].keyword, "mother");
        assert_eq!(site.questions[0].content.as_deref(), Some("her name"));
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let text = r#"{
  "user": { "full_name": "John Doe", "color_scheme": "dark" },
  "sites": {
    "example.com": {
      "type": 17,
      "notes": ["first", "second"],
      "questions": { "pet": { "answer": "rex", "hint": "barks" } }
    }
  },
  "sync": { "device": "laptop" }
}"#;
        let user = read(text).unwrap();
        assert_eq!(user.extra["color_scheme"], Value::String("dark".into()));

        let written = write(&user).unwrap();
        let reread = read(&written).unwrap();
        assert_eq!(reread, user);
        assert!(written.contains("color_scheme"));
        assert!(written.contains("\"notes\""));
        assert!(written.contains("\"hint\""));
        assert!(written.contains("\"sync\""));
    }

    #[test]
    fn test_unknown_type_code() {
        assert!(matches!(
            read(r#"{"user": {"full_name": "X", "default": {"type": 99}}}"#),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_syntax_error_location() {
        match read("{\n  \"user\": ?\n}") {
            Err(Error::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected Malformed, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_write_defaults_round_trip() {
        let mut user = User::new("John Doe");
        user.add_site("example.com", ResultType::StoredPersonal, 1, None);
        let written = write(&user).unwrap();
        let reread = read(&written).unwrap();
        assert_eq!(reread, user);
        // Absent values stay absent rather than becoming nulls.
        assert!(!written.contains("null"));
    }
}
