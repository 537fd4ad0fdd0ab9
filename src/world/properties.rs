//! `server.properties` reader/writer.
//!
//! Lines are kept in file order with their own line endings; comments, blank
//! lines and keys we never touch are written back byte-for-byte.

use std::fs;
use std::io;
use std::path::Path;

pub const LEVEL_SEED_KEY: &str = "level-seed";

/// Whitespace the properties format allows around keys and separators.
const BLANK: [char; 3] = [' ', '\t', '\x0c'];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    /// Comment, blank or otherwise unparsed line
    Raw(String),
    Pair {
        key: String,
        value: String,
        /// Original text while the pair is unmodified
        original: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum LineEnding {
    #[default]
    Lf,
    CrLf,
    /// Last line of a file without a trailing newline
    Missing,
}

impl LineEnding {
    fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf | LineEnding::Missing => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    entry: Entry,
    ending: LineEnding,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerProperties {
    lines: Vec<Line>,
    /// Ending for new lines and for a final line that had none
    newline: LineEnding,
}

impl ServerProperties {
    /// Load from disk; a missing file is an empty mapping.
    pub fn load(path: &Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(Self::parse(&s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn parse(content: &str) -> Self {
        let lines: Vec<Line> = content
            .split_inclusive('\n')
            .map(|raw| {
                let (text, ending) = if let Some(text) = raw.strip_suffix("\r\n") {
                    (text, LineEnding::CrLf)
                } else if let Some(text) = raw.strip_suffix('\n') {
                    (text, LineEnding::Lf)
                } else {
                    (raw, LineEnding::Missing)
                };
                Line {
                    entry: parse_line(text),
                    ending,
                }
            })
            .collect();
        let newline = lines
            .iter()
            .map(|l| l.ending)
            .find(|e| *e != LineEnding::Missing)
            .unwrap_or_default();
        Self { lines, newline }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|l| match &l.entry {
            Entry::Pair { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Insert or replace `key`. Later duplicates of the key are dropped.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut seen = false;
        self.lines.retain_mut(|l| match &mut l.entry {
            Entry::Pair { key: k, value: v, original } if k == key => {
                if seen {
                    return false;
                }
                seen = true;
                *v = value.to_string();
                *original = None;
                true
            }
            _ => true,
        });
        if !seen {
            self.lines.push(Line {
                entry: Entry::Pair {
                    key: key.to_string(),
                    value: value.to_string(),
                    original: None,
                },
                ending: self.newline,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.lines.iter().filter(|l| matches!(l.entry, Entry::Pair { .. })).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match &line.entry {
                Entry::Raw(text) => out.push_str(text),
                Entry::Pair { original: Some(text), .. } => out.push_str(text),
                Entry::Pair { key, value, original: None } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&escape_value(value));
                }
            }
            let ending = match line.ending {
                LineEnding::Missing => self.newline,
                ending => ending,
            };
            out.push_str(ending.as_str());
        }
        out
    }

    /// Write the whole mapping back. The new content goes to a sibling temp
    /// file first and replaces `path` by rename.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, self.render())?;
        fs::rename(&tmp, path)
    }
}

fn parse_line(line: &str) -> Entry {
    let trimmed = line.trim_start_matches(BLANK);
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
        return Entry::Raw(line.to_string());
    }
    let (key, value) = split_pair(trimmed);
    Entry::Pair {
        key: key.to_string(),
        value: value.to_string(),
        original: Some(line.to_string()),
    }
}

/// Split `key<sep>value`, where the key ends at the first unescaped `=`, `:`
/// or whitespace, and whitespace around one optional `=`/`:` is skipped.
fn split_pair(line: &str) -> (&str, &str) {
    let mut key_end = line.len();
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }
    let rest = line[key_end..].trim_start_matches(BLANK);
    let value = match rest.strip_prefix(['=', ':']) {
        Some(after) => after.trim_start_matches(BLANK),
        None => rest,
    };
    (&line[..key_end], value)
}

/// Backslash is the only character the server's reader would reinterpret
/// inside a value.
fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\")
}
