//! Streaming JSONL decode with malformed-line tolerance.
//!
//! A log line that is not valid JSON, or not an object, is skipped and
//! reported as a diagnostic with a stable fingerprint; the read itself
//! never fails because of line content. Truncated tail lines (a crash
//! mid-append) surface the same way.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::{StoreError, StoreResult};

const REVERSE_CHUNK: usize = 64 * 1024;

/// One successfully decoded line.
#[derive(Clone, Debug)]
pub struct JsonlRecord {
    pub offset: u64,
    pub line_number: u64,
    pub digest: String,
    pub value: Map<String, Value>,
}

/// One skipped line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub file_path: String,
    pub line_number: u64,
    pub line_hash: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub records: Vec<JsonlRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn line_hash(line: &[u8]) -> String {
    let digest = Sha256::digest(line);
    let mut hex = String::with_capacity(64);
    for b in digest {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}

/// Decode every line of `path`. A missing file reads as empty.
pub fn read_objects(path: &Path) -> StoreResult<ReadOutcome> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ReadOutcome::default()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let file_path = path.to_string_lossy().into_owned();
    let mut reader = BufReader::new(file);
    let mut outcome = ReadOutcome::default();
    let mut offset = 0u64;
    let mut line_number = 0u64;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| StoreError::io(path, e))?;
        if read == 0 {
            break;
        }
        line_number += 1;
        let line_offset = offset;
        offset += read as u64;

        let line: &[u8] = if buf.last() == Some(&b'\n') {
            &buf[..buf.len() - 1]
        } else {
            &buf
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(map)) => outcome.records.push(JsonlRecord {
                offset: line_offset,
                line_number,
                digest: line_hash(line),
                value: map,
            }),
            Ok(_) => outcome.diagnostics.push(Diagnostic {
                file_path: file_path.clone(),
                line_number,
                line_hash: line_hash(line),
                reason: "not a JSON object".to_string(),
            }),
            Err(e) => outcome.diagnostics.push(Diagnostic {
                file_path: file_path.clone(),
                line_number,
                line_hash: line_hash(line),
                reason: format!("invalid JSON: {e}"),
            }),
        }
    }

    Ok(outcome)
}

/// Read the single record starting at `offset`. Used by indexed lookups;
/// any mismatch falls back to a full scan at the caller.
pub fn read_object_at(path: &Path, offset: u64) -> StoreResult<Option<Map<String, Value>>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| StoreError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    reader
        .read_until(b'\n', &mut buf)
        .map_err(|e| StoreError::io(path, e))?;
    let line: &[u8] = if buf.last() == Some(&b'\n') {
        &buf[..buf.len() - 1]
    } else {
        &buf
    };
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        _ => Ok(None),
    }
}

/// Newest-first iterator over a JSONL file, reading fixed-size chunks from
/// the end. Malformed lines are skipped silently here; the forward reader
/// owns diagnostic reporting.
pub struct ReverseJsonl {
    file: Option<File>,
    position: u64,
    carry: Vec<u8>,
    pending: Vec<Map<String, Value>>,
}

impl ReverseJsonl {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    file: None,
                    position: 0,
                    carry: Vec::new(),
                    pending: Vec::new(),
                });
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let position = file
            .metadata()
            .map_err(|e| StoreError::io(path, e))?
            .len();
        Ok(Self {
            file: Some(file),
            position,
            carry: Vec::new(),
            pending: Vec::new(),
        })
    }

    fn parse_line(line: &[u8]) -> Option<Map<String, Value>> {
        let trimmed: Vec<u8> = line
            .iter()
            .copied()
            .skip_while(u8::is_ascii_whitespace)
            .collect();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_slice::<Value>(&trimmed) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    fn refill(&mut self) -> bool {
        while self.pending.is_empty() {
            if self.file.is_none() {
                return false;
            }
            if self.position == 0 {
                // Whatever is carried is the first line of the file.
                if let Some(map) = Self::parse_line(&std::mem::take(&mut self.carry)) {
                    self.pending.push(map);
                }
                self.file = None;
                return !self.pending.is_empty();
            }

            let read_size = REVERSE_CHUNK.min(self.position as usize);
            self.position -= read_size as u64;
            let mut chunk = vec![0u8; read_size];
            {
                let Some(file) = self.file.as_mut() else {
                    return false;
                };
                if file.seek(SeekFrom::Start(self.position)).is_err()
                    || file.read_exact(&mut chunk).is_err()
                {
                    self.file = None;
                    return false;
                }
            }
            chunk.extend_from_slice(&self.carry);

            let mut parts: Vec<&[u8]> = chunk.split(|&b| b == b'\n').collect();
            self.carry = parts.remove(0).to_vec();
            for line in parts.iter().rev() {
                if let Some(map) = Self::parse_line(line) {
                    self.pending.push(map);
                }
            }
        }
        true
    }
}

impl Iterator for ReverseJsonl {
    type Item = Map<String, Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() && !self.refill() {
            return None;
        }
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }
}
