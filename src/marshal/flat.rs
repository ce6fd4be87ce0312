//! The legacy line-oriented sites format.
//!
//! A header block of `# key: value` lines, a blank line, then one site
//! per line. The first three site fields are single whitespace-delimited
//! tokens; the remaining fields are separated by runs of two or more
//! spaces, so site names may contain single spaces. `-` stands for an
//! absent optional value.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::types::{AlgorithmVersion, ResultType};

use super::{Site, User};

pub(super) fn read(text: &str) -> Result<User> {
    let mut user = User::new("");
    let mut in_header = true;

    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        // Trailing whitespace carries no meaning in this format.
        let line = raw.trim_end();

        if in_header {
            if line.is_empty() {
                in_header = false;
                continue;
            }
            if let Some(rest) = line.strip_prefix('#') {
                read_header_line(&mut user, rest.trim_start(), lineno)?;
                continue;
            }
            // A site line directly after the header counts as its end.
            in_header = false;
        }

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let site = read_site_line(&user, line, lineno)?;
        user.sites.push(site);
    }

    Ok(user)
}

fn read_header_line(user: &mut User, entry: &str, lineno: usize) -> Result<()> {
    let Some((key, value)) = entry.split_once(':') else {
        // Not a `key: value` entry; free-form comment.
        return Ok(());
    };
    let value = value.trim();

    match key.trim_end() {
        "Format" => {
            if value != "1" {
                return Err(Error::malformed(lineno, format!("unsupported format {value}")));
            }
        }
        "Date" => user.last_used = parse_timestamp(value, lineno)?,
        "User Name" => {
            if user.full_name.is_empty() {
                user.full_name = value.to_owned();
            }
        }
        "Full Name" => user.full_name = value.to_owned(),
        "Avatar" => {
            user.avatar = value
                .parse()
                .map_err(|_| Error::malformed(lineno, "avatar is not an integer"))?;
        }
        "Key ID" => user.key_id = Some(value.to_lowercase()),
        "Algorithm" => {
            let version = value
                .parse()
                .map_err(|_| Error::malformed(lineno, "algorithm is not an integer"))?;
            user.algorithm = AlgorithmVersion::from_u32(version)?;
        }
        "Default Type" => {
            let code = value
                .parse()
                .map_err(|_| Error::malformed(lineno, "default type is not an integer"))?;
            user.default_type = ResultType::from_code(code)
                .ok_or_else(|| Error::malformed(lineno, format!("unknown result type {code}")))?;
        }
        "Passwords" => {
            user.redacted = match value {
                "redacted" => true,
                "visible" => false,
                _ => {
                    return Err(Error::malformed(
                        lineno,
                        format!("passwords must be redacted or visible, not {value}"),
                    ))
                }
            };
        }
        _ => {}
    }
    Ok(())
}

fn read_site_line(user: &User, line: &str, lineno: usize) -> Result<Site> {
    let (last_used, rest) = token(line)
        .ok_or_else(|| Error::malformed(lineno, "missing last-used field"))?;
    let (uses, rest) =
        token(rest).ok_or_else(|| Error::malformed(lineno, "missing uses field"))?;
    let (type_field, rest) =
        token(rest).ok_or_else(|| Error::malformed(lineno, "missing type field"))?;

    let tail: Vec<&str> = rest
        .split("  ")
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .collect();
    if tail.len() < 2 {
        return Err(Error::malformed(lineno, "missing site name or content field"));
    }
    if tail.len() > 4 {
        return Err(Error::malformed(lineno, "too many fields"));
    }

    let mut parts = type_field.split(':');
    let (Some(type_code), Some(version), Some(counter), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::malformed(lineno, "type field is not type:algorithm:counter"));
    };
    let type_code: u32 = type_code
        .parse()
        .map_err(|_| Error::malformed(lineno, "result type is not an integer"))?;
    let result_type = ResultType::from_code(type_code)
        .ok_or_else(|| Error::malformed(lineno, format!("unknown result type {type_code}")))?;
    let version: u32 = version
        .parse()
        .map_err(|_| Error::malformed(lineno, "algorithm is not an integer"))?;
    let algorithm = AlgorithmVersion::from_u32(version)?;
    let counter: u32 = counter
        .parse()
        .map_err(|_| Error::malformed(lineno, "counter is not an integer"))?;

    Ok(Site {
        name: tail[0].to_owned(),
        // The flat format cannot express an inherited algorithm; reading
        // the user's own version back as inherited keeps writes stable.
        algorithm: Some(algorithm).filter(|&a| a != user.algorithm),
        counter,
        result_type,
        content: optional(tail[1]),
        login_name: tail.get(2).copied().and_then(optional),
        login_generated: false,
        url: tail.get(3).copied().and_then(optional),
        uses: uses
            .parse()
            .map_err(|_| Error::malformed(lineno, "uses is not an integer"))?,
        last_used: parse_timestamp(last_used, lineno)?,
        questions: Vec::new(),
        extra: serde_json::Map::new(),
    })
}

/// Split one whitespace-delimited token off the front.
fn token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(i) => Some((&s[..i], &s[i..])),
        None => Some((s, "")),
    }
}

fn optional(field: &str) -> Option<String> {
    if field == "-" {
        None
    } else {
        Some(field.to_owned())
    }
}

/// RFC-3339 or bare epoch seconds; 0 means never.
fn parse_timestamp(s: &str, lineno: usize) -> Result<i64> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse()
            .map_err(|_| Error::malformed(lineno, "timestamp out of range"));
    }
    super::parse_rfc3339(s).ok_or_else(|| Error::malformed(lineno, "unparseable timestamp"))
}

fn fmt_timestamp(timestamp: i64) -> Result<String> {
    if timestamp == 0 {
        return Ok("0".to_owned());
    }
    super::fmt_rfc3339(timestamp)
}

pub(super) fn write(user: &User) -> Result<String> {
    let mut out = String::new();
    out.push_str("# Format: 1\n");
    if user.last_used != 0 {
        let _ = writeln!(out, "# Date: {}", super::fmt_rfc3339(user.last_used)?);
    }
    if !user.full_name.is_empty() {
        let _ = writeln!(out, "# User Name: {}", user.full_name);
        let _ = writeln!(out, "# Full Name: {}", user.full_name);
    }
    let _ = writeln!(out, "# Avatar: {}", user.avatar);
    if let Some(key_id) = &user.key_id {
        let _ = writeln!(out, "# Key ID: {key_id}");
    }
    let _ = writeln!(out, "# Algorithm: {}", user.algorithm);
    let _ = writeln!(out, "# Default Type: {}", user.default_type.code());
    let _ = writeln!(
        out,
        "# Passwords: {}",
        if user.redacted { "redacted" } else { "visible" }
    );
    out.push('\n');

    let mut sites: Vec<&Site> = user.sites.iter().collect();
    sites.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    for site in sites {
        let _ = writeln!(
            out,
            "{} {}  {}:{}:{}  {}  {}  {}  {}",
            fmt_timestamp(site.last_used)?,
            site.uses,
            site.result_type.code(),
            site.algorithm.unwrap_or(user.algorithm),
            site.counter,
            site.name,
            site.content.as_deref().unwrap_or("-"),
            site.login_name.as_deref().unwrap_or("-"),
            site.url.as_deref().unwrap_or("-"),
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE_LINE: &str = "0 0  17:3:1  example.com  -  -  -";

    #[test]
    fn test_read_reference_file() {
        let text = format!("# Format: 1\n\n{REFERENCE_LINE}\n");
        let user = read(&text).unwrap();
        assert_eq!(user.full_name, "");
        assert_eq!(user.sites.len(), 1);
        let site = &user.sites[0];
        assert_eq!(site.name, "example.com");
        assert_eq!(site.result_type, ResultType::TemplateLong);
        assert_eq!(site.algorithm, None);
        assert_eq!(site.counter, 1);
        assert_eq!(site.content, None);
        assert_eq!(site.login_name, None);
        assert_eq!(site.url, None);
        assert_eq!(site.uses, 0);
        assert_eq!(site.last_used, 0);
    }

    #[test]
    fn test_reference_site_line_is_write_stable() {
        let text = format!("# Format: 1\n\n{REFERENCE_LINE}\n");
        let written = write(&read(&text).unwrap()).unwrap();
        assert_eq!(written.lines().last().unwrap(), REFERENCE_LINE);

        // And writing is a fixpoint from there on.
        let again = write(&read(&written).unwrap()).unwrap();
        assert_eq!(again, written);
    }

    #[test]
    fn test_trailing_whitespace_is_ignored() {
        let bare = format!("# Format: 1\n\n{REFERENCE_LINE}\n");
        let padded = format!("# Format: 1   \n   \n{REFERENCE_LINE}   \n");
        assert_eq!(read(&padded).unwrap(), read(&bare).unwrap());
    }

    #[test]
    fn test_header_fields() {
        let text = "\
# Format: 1
# Date: 2015-01-01T00:00:00Z
# User Name: Robert Lee Mitchell
# Full Name: Robert Lee Mitchell
# Avatar: 5
# Key ID: 98EEF4D1DF46D849574A82A03C3177056B15DFCE01D8D7EA865E059AD9658B01
# Algorithm: 2
# Default Type: 16
# Passwords: visible
# Left Handed: yes

";
        let user = read(text).unwrap();
        assert_eq!(user.full_name, "Robert Lee Mitchell");
        assert_eq!(user.last_used, 1420070400);
        assert_eq!(user.avatar, 5);
        assert_eq!(
            user.key_id.as_deref(),
            Some("98eef4d1df46d849574a82a03c3177056b15dfce01d8d7ea865e059ad9658b01")
        );
        assert_eq!(user.algorithm, AlgorithmVersion::V2);
        assert_eq!(user.default_type, ResultType::TemplateMaximum);
        assert!(!user.redacted);
    }

    #[test]
    fn test_site_name_with_space() {
        let text = "# Format: 1\n\n2015-01-01T00:00:00Z 3  17:3:2  my bank  -  robert  https://bank.example\n";
        let user = read(text).unwrap();
        let site = &user.sites[0];
        assert_eq!(site.name, "my bank");
        assert_eq!(site.last_used, 1420070400);
        assert_eq!(site.uses, 3);
        assert_eq!(site.counter, 2);
        assert_eq!(site.login_name.as_deref(), Some("robert"));
        assert_eq!(site.url.as_deref(), Some("https://bank.example"));
    }

    #[test]
    fn test_write_sorts_sites_by_name() {
        let mut user = User::new("John Doe");
        user.add_site("zebra.com", ResultType::TemplateLong, 1, None);
        user.add_site("Apple.com", ResultType::TemplateLong, 1, None);
        user.add_site("apple.com", ResultType::TemplateLong, 1, None);
        let written = write(&user).unwrap();
        let names: Vec<&str> = written
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| l.split("  ").nth(2).unwrap().trim())
            .collect();
        assert_eq!(names, ["Apple.com", "apple.com", "zebra.com"]);
    }

    #[test]
    fn test_explicit_site_algorithm_survives() {
        let text = "# Format: 1\n# Algorithm: 3\n\n0 0  17:1:1  example.com  -\n";
        let user = read(text).unwrap();
        assert_eq!(user.sites[0].algorithm, Some(AlgorithmVersion::V1));
        let written = write(&user).unwrap();
        assert!(written.contains("17:1:1"));
    }

    #[test]
    fn test_malformed_lines() {
        let read_site = |line: &str| read(&format!("# Format: 1\n\n{line}\n"));

        assert!(matches!(
            read_site("0 0  17:3  example.com  -"),
            Err(Error::Malformed { line: 3, .. })
        ));
        assert!(matches!(
            read_site("0 0  99:3:1  example.com  -"),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            read_site("0 0  17:9:1  example.com  -"),
            Err(Error::UnsupportedVersion(9))
        ));
        assert!(matches!(
            read_site("0 0  17:3:1  example.com"),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            read_site("yesterday 0  17:3:1  example.com  -"),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            read("# Format: 2\n\n"),
            Err(Error::Malformed { line: 1, .. })
        ));
    }
}
