//! Flat key/value text records
//!
//! Used for segment manifests and the index checkpoint. One `key=value`
//! entry per line; a key may repeat to form a list. Blank lines and lines
//! starting with `#` are ignored.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{GeodexError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: BTreeMap<String, Vec<String>>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every value of `key` with `value`
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), vec![value.to_string()]);
    }

    /// Append `value` to the list stored under `key`
    pub fn add(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries
            .entry(key.into())
            .or_default()
            .push(value.to_string());
    }

    /// First value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// Every value of `key`, in insertion order
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|v| {
                v.parse::<u64>().map_err(|e| {
                    GeodexError::Corrupt(format!("{} is not a number ({:?}): {}", key, v, e))
                })
            })
            .transpose()
    }

    /// Like `get_u64`, but the key must be present
    pub fn require_u64(&self, key: &str) -> Result<u64> {
        self.get_u64(key)?
            .ok_or_else(|| GeodexError::Corrupt(format!("missing key {}", key)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys starting with `prefix`, in sorted order
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .range(prefix.to_string()..)
            .map(|(k, _)| k.as_str())
            .take_while(move |k| k.starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as text, one line per value
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, values) in &self.entries {
            for value in values {
                out.push_str(key);
                out.push('=');
                escape_into(value, &mut out);
                out.push('\n');
            }
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut params = Parameters::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                GeodexError::Corrupt(format!("line {} has no '=': {:?}", number + 1, line))
            })?;
            params.add(key, unescape(value)?);
        }
        Ok(params)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Write to `path` through a synced temporary file and a rename
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_text().as_bytes())
    }
}

/// Write `data` to a sibling temporary file, sync it, then rename over `path`
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    let mut file = File::create(tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp, path)?;
    Ok(())
}

fn escape_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            other => {
                return Err(GeodexError::Corrupt(format!(
                    "invalid escape \\{:?} in {:?}",
                    other, value
                )))
            }
        }
    }
    Ok(out)
}
