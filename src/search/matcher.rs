//! Line matching over raw bytes and display decoding

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::bytes::Regex;

use super::{FileMatch, Needle};
use crate::core::CancelToken;
use crate::error::{Error, Result};

/// Compiled needles, ready to run against raw lines
#[derive(Debug, Clone)]
pub enum LineMatcher {
    Literal(Vec<Vec<u8>>),
    Regex(Vec<Regex>),
}

impl LineMatcher {
    /// Compile needles. Fails with `InvalidPattern` on a bad regex.
    pub fn new(needles: &[Needle], is_regex: bool) -> Result<Self> {
        if needles.is_empty() {
            return Err(Error::InvalidArgument("no search text given".to_string()));
        }
        if !is_regex {
            return Ok(LineMatcher::Literal(
                needles.iter().map(|n| n.bytes.clone()).collect(),
            ));
        }

        let mut regexes = Vec::with_capacity(needles.len());
        for needle in needles {
            let pattern = regex_source(needle)?;
            let regex = Regex::new(&pattern).map_err(|e| Error::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            regexes.push(regex);
        }
        Ok(LineMatcher::Regex(regexes))
    }

    /// Byte columns of every hit on `line`, ascending.
    ///
    /// The first needle that hits decides the matches for the line. Literal
    /// mode restarts the search one byte after each hit, regex mode reports
    /// the non-overlapping matches of the deciding regex.
    pub fn find_columns(&self, line: &[u8]) -> Vec<usize> {
        match self {
            LineMatcher::Literal(needles) => {
                let Some((needle, first)) = needles
                    .iter()
                    .find_map(|needle| find_bytes(line, needle, 0).map(|col| (needle, col)))
                else {
                    return Vec::new();
                };
                let mut columns = vec![first];
                let mut from = first + 1;
                while let Some(col) = find_bytes(line, needle, from) {
                    columns.push(col);
                    from = col + 1;
                }
                columns
            }
            LineMatcher::Regex(regexes) => regexes
                .iter()
                .find(|re| re.is_match(line))
                .map(|re| re.find_iter(line).map(|m| m.start()).collect())
                .unwrap_or_default(),
        }
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    if needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Regex source for a needle. Non UTF-8 needles run with Unicode disabled
/// and their non-ASCII characters spelled out as raw bytes.
fn regex_source(needle: &Needle) -> Result<String> {
    let text = needle.text().ok_or_else(|| Error::InvalidPattern {
        pattern: String::from_utf8_lossy(&needle.bytes).into_owned(),
        reason: format!("not valid {}", needle.encoding),
    })?;

    if needle.is_utf8() || text.is_ascii() {
        return Ok(text);
    }

    let mut source = String::from("(?-u)");
    for byte in &needle.bytes {
        if byte.is_ascii() {
            source.push(*byte as char);
        } else {
            source.push_str(&format!("\\x{:02X}", byte));
        }
    }
    Ok(source)
}

/// Strip a trailing `\n` or `\r\n`
fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Decode a line with the first encoding that accepts it, falling back to
/// lossy UTF-8. `raw` is taken as is, line terminator already removed.
pub fn decode_line(raw: &[u8], encodings: &[String]) -> String {
    for label in encodings {
        let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) else {
            continue;
        };
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(raw) {
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(raw).into_owned()
}

/// Scan one file, returning its matches in (line, column) order.
///
/// Returns early with what was found so far when `cancel` fires.
pub fn scan_file(
    path: &Path,
    matcher: &LineMatcher,
    encodings: &[String],
    cancel: &CancelToken,
) -> std::io::Result<Vec<FileMatch>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut matches = Vec::new();
    let mut buffer = Vec::new();
    let mut line_number = 0usize;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            break;
        }
        line_number += 1;

        let line = trim_line_end(&buffer);
        let columns = matcher.find_columns(line);
        if columns.is_empty() {
            continue;
        }

        let line_text = decode_line(line, encodings);
        for column in columns {
            matches.push(FileMatch {
                absolute_path: path.to_path_buf(),
                line_number,
                column,
                line_text: line_text.clone(),
            });
        }
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn literal(text: &str) -> LineMatcher {
        LineMatcher::new(&[Needle::new(text.as_bytes(), "utf-8")], false).unwrap()
    }

    fn encodings() -> Vec<String> {
        vec!["utf-8".to_string(), "latin1".to_string()]
    }

    #[test]
    fn test_literal_every_advance() {
        let matcher = literal("aa");
        assert_eq!(matcher.find_columns(b"aaa"), vec![0, 1]);
        assert_eq!(literal("foo").find_columns(b"foo bar foo"), vec![0, 8]);
        assert!(literal("foo").find_columns(b"bar").is_empty());
    }

    #[test]
    fn test_literal_first_needle_wins_each_step() {
        let matcher = LineMatcher::new(
            &[Needle::new(b"caf\xc3\xa9".to_vec(), "utf-8"), Needle::new(b"caf\xe9".to_vec(), "latin1")],
            false,
        )
        .unwrap();
        assert_eq!(matcher.find_columns(b"x caf\xe9"), vec![2]);
    }

    #[test]
    fn test_literal_deciding_needle_sticks_for_line() {
        let matcher = LineMatcher::new(
            &[Needle::new(b"\xc3\xa9".to_vec(), "utf-8"), Needle::new(b"\xe9".to_vec(), "latin1")],
            false,
        )
        .unwrap();
        // The latin1 byte after the space belongs to the losing needle
        assert_eq!(matcher.find_columns(b"\xc3\xa9 \xe9"), vec![0]);
        assert_eq!(matcher.find_columns(b"\xe9 \xe9"), vec![0, 2]);
    }

    #[test]
    fn test_regex_non_overlapping() {
        let matcher = LineMatcher::new(&[Needle::new(b"a+".to_vec(), "utf-8")], true).unwrap();
        assert_eq!(matcher.find_columns(b"aa b aaa"), vec![0, 5]);
    }

    #[test]
    fn test_regex_latin1_needle() {
        let matcher = LineMatcher::new(&[Needle::new(b"caf\xe9$".to_vec(), "latin1")], true).unwrap();
        assert_eq!(matcher.find_columns(b"un caf\xe9"), vec![3]);
    }

    #[test]
    fn test_invalid_regex() {
        let err = LineMatcher::new(&[Needle::new(b"(".to_vec(), "utf-8")], true).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_decode_line_fallbacks() {
        assert_eq!(decode_line(b"caf\xc3\xa9", &encodings()), "café");
        assert_eq!(decode_line(b"caf\xe9", &encodings()), "café");
        assert_eq!(decode_line(b"end\r", &encodings()), "end\r");
        assert_eq!(decode_line(b"caf\xe9", &["utf-8".to_string()]), "caf\u{fffd}");
    }

    #[test]
    fn test_scan_file_orders_hits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "foo\nfoo bar foo\nnothing\n").unwrap();

        let matches = scan_file(&path, &literal("foo"), &encodings(), &CancelToken::new()).unwrap();
        let positions: Vec<(usize, usize)> =
            matches.iter().map(|m| (m.line_number, m.column)).collect();
        assert_eq!(positions, vec![(1, 0), (2, 0), (2, 8)]);
        assert_eq!(matches[1].line_text, "foo bar foo");
    }

    #[test]
    fn test_scan_file_strips_one_line_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crlf.py");
        std::fs::write(&path, "foo\r\r\nfoo\r\n").unwrap();

        let matches = scan_file(&path, &literal("foo"), &encodings(), &CancelToken::new()).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line_text, "foo\r");
        assert_eq!(matches[1].line_text, "foo");
    }

    #[test]
    fn test_scan_file_stops_when_cancelled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "foo\nfoo\n").unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let matches = scan_file(&path, &literal("foo"), &encodings(), &cancel).unwrap();
        assert!(matches.is_empty());
    }
}
