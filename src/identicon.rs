//! The identicon: a short visual fingerprint of (full name, master
//! password), shown so users can tell a typo from the real thing before
//! any site result is revealed.

use std::convert::TryFrom;
use std::fmt;

use crate::crypto;

const LEFT_ARM: [&str; 4] = ["╔", "╚", "╰", "═"];
const RIGHT_ARM: [&str; 4] = ["╗", "╝", "╯", "═"];
const BODY: [&str; 6] = ["█", "░", "▒", "▓", "☺", "☻"];
const ACCESSORY: [&str; 57] = [
    "◈", "◎", "◐", "◑", "◒", "◓", "☀", "☁", "☂", "☃", "☄", "★", "☆", "☎",
    "☏", "⎈", "⌂", "☘", "☢", "☣", "☕", "⌚", "⌛", "⏰", "⚡", "⛄", "⛅", "☔",
    "♔", "♕", "♖", "♗", "♘", "♙", "♚", "♛", "♜", "♝", "♞", "♟", "♨", "♩",
    "♪", "♫", "⚐", "⚑", "⚔", "⚖", "⚙", "⚠", "⌘", "⏎", "✄", "✆", "✈", "✉", "✌",
];

/// Terminal color of a rendered identicon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

const COLORS: [Color; 7] = [
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::White,
];

impl Color {
    fn ansi_code(self) -> u8 {
        match self {
            Color::Red => 31,
            Color::Green => 32,
            Color::Yellow => 33,
            Color::Blue => 34,
            Color::Magenta => 35,
            Color::Cyan => 36,
            Color::White => 37,
        }
    }
}

/// A visual fingerprint for a user: four glyphs and a color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identicon {
    pub left_arm: &'static str,
    pub body: &'static str,
    pub right_arm: &'static str,
    pub accessory: &'static str,
    pub color: Color,
}

impl Identicon {
    /// The plain four-glyph form.
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(16);
        out.push_str(self.left_arm);
        out.push_str(self.body);
        out.push_str(self.right_arm);
        out.push_str(self.accessory);
        out
    }

    /// The four glyphs wrapped in ANSI color escapes for terminal display.
    pub fn ansi(&self) -> String {
        format!("\u{1b}[{}m{}\u{1b}[0m", self.color.ansi_code(), self.text())
    }
}

impl fmt::Display for Identicon {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text())
    }
}

fn part<T: Copy>(set: &[T], seed_byte: u8) -> T {
    set[usize::from(seed_byte % u8::try_from(set.len()).unwrap())]
    //^ This unwrap is safe, because the sets are short and hardcoded above.
}

/// Encode a visual fingerprint for a user.
///
/// Pure in its inputs; returns None when either input is empty.
pub fn identicon(full_name: &str, master_password: &str) -> Option<Identicon> {
    if full_name.is_empty() || master_password.is_empty() {
        return None;
    }

    let seed = crypto::hmac_sha256(master_password.as_bytes(), full_name.as_bytes());
    Some(Identicon {
        left_arm: part(&LEFT_ARM, seed[0]),
        body: part(&BODY, seed[1]),
        right_arm: part(&RIGHT_ARM, seed[2]),
        accessory: part(&ACCESSORY, seed[3]),
        color: part(&COLORS, seed[4]),
    })
}

#[test]
fn test_identicon() {
    let identicon = identicon("John Doe", "password").unwrap();
    assert_eq!(identicon.text(), "╔░╝⌚");
}

#[test]
fn test_identicon_unicode_name() {
    let identicon = identicon("Max Müller", "passwort").unwrap();
    assert_eq!(identicon.text(), "═▒╝♚");
}

#[test]
fn test_identicon_deterministic() {
    let a = identicon("Zhang Wei", "password").unwrap();
    let b = identicon("Zhang Wei", "password").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.text(), "╔░╗◒");
    assert!(COLORS.contains(&a.color));
}

#[test]
fn test_identicon_empty_inputs() {
    assert!(identicon("", "password").is_none());
    assert!(identicon("John Doe", "").is_none());
}

#[test]
fn test_identicon_ansi_wraps_text() {
    let identicon = identicon("John Doe", "password").unwrap();
    let ansi = identicon.ansi();
    assert!(ansi.contains(&identicon.text()));
    assert!(ansi.starts_with("\u{1b}["));
    assert!(ansi.ends_with("\u{1b}[0m"));
}
