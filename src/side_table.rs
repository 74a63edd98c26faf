//! Per-character fallbacks used when no dictionary entry matches.

use std::collections::HashMap;

/// How a single unmatched character is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback<'a> {
    Punctuation(&'a str),
    Reading(&'a str),
}

#[derive(Debug, Clone, Default)]
pub struct SideTables {
    readings: HashMap<char, String>,
    punctuations: HashMap<char, String>,
}

impl SideTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables seeded with the bundled punctuation map.
    pub fn builtin() -> Self {
        let mut tables = Self::new();
        tables.load_punctuation_file(include_str!("../data/punctuations.txt"));
        tables
    }

    pub fn insert_reading(&mut self, c: char, reading: impl Into<String>) {
        self.readings.insert(c, reading.into());
    }

    pub fn insert_punctuation(&mut self, c: char, replacement: impl Into<String>) {
        self.punctuations.insert(c, replacement.into());
    }

    pub fn reading(&self, c: char) -> Option<&str> {
        self.readings.get(&c).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.readings.len() + self.punctuations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty() && self.punctuations.is_empty()
    }

    /// Punctuation takes precedence over a reading for the same character.
    pub fn lookup(&self, c: char) -> Option<Fallback<'_>> {
        if let Some(replacement) = self.punctuations.get(&c) {
            return Some(Fallback::Punctuation(replacement));
        }
        self.readings
            .get(&c)
            .map(|reading| Fallback::Reading(reading))
    }

    /// Loads `<char><whitespace><replacement>` lines. Lines whose key is not a
    /// single character are skipped.
    fn load_punctuation_file(&mut self, file: &'static str) {
        for line in file.lines() {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            if let Some((key, replacement)) = line.split_once(char::is_whitespace)
                && let Some(c) = single_char(key)
            {
                self.insert_punctuation(c, replacement.trim());
            }
        }
    }
}

/// Returns the only character of `s`, if it has exactly one.
pub(crate) fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}
