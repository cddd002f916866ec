//! Append-only encrypted audit log.
//!
//! One CSV row per record:
//! `sequence,date,time,actor_hex,description_hex,extra_hex,suspicious_hex`.
//! Sequence, date (DD-MM-YYYY) and time (HH:MM:SS) stay plaintext for
//! ordering and display; the remaining four fields are encrypted
//! independently. No column can contain a comma (fixed-format plaintext, hex
//! ciphertext), so the format needs no quoting layer.
//!
//! The log has a single state transition: append. Reads are projections.
//! Sequence numbers are count-based and only meaningful under a single
//! writer; concurrent processes appending to the same file can collide.

use crate::cipher::FieldCipher;
use crate::error::{Error, Result};
use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const RECORD_FIELDS: usize = 7;
pub const SUSPICIOUS_YES: &str = "Yes";
pub const SUSPICIOUS_NO: &str = "No";

pub const HEADERS: [&str; RECORD_FIELDS] = [
    "No.",
    "Date",
    "Time",
    "Actor",
    "Description",
    "Additional Information",
    "Suspicious",
];

/// A decrypted field, or a visible marker for one that would not decrypt.
///
/// Decryption failures are never flattened into empty strings; the original
/// ciphertext is preserved so the evidence stays inspectable.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Plain(String),
    Unreadable { cipher_hex: String, reason: String },
}

impl FieldValue {
    pub fn as_plain(&self) -> Option<&str> {
        match self {
            FieldValue::Plain(value) => Some(value),
            FieldValue::Unreadable { .. } => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Plain(value) => f.write_str(value),
            FieldValue::Unreadable { reason, .. } => write!(f, "<unreadable: {reason}>"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub date: String,
    pub time: String,
    pub actor: FieldValue,
    pub description: FieldValue,
    pub extra_info: FieldValue,
    pub suspicious: FieldValue,
}

impl LogEntry {
    /// Case-insensitive check of the decrypted flag. An unreadable flag never
    /// matches, but stays visible in the record.
    pub fn is_suspicious(&self) -> bool {
        self.suspicious
            .as_plain()
            .map(|flag| flag.eq_ignore_ascii_case(SUSPICIOUS_YES))
            .unwrap_or(false)
    }
}

/// One row of the persisted log: either a parsed entry, or a row whose shape
/// did not match and is passed through raw so a single corrupt line never
/// blocks audit visibility.
#[derive(Debug, Clone, Serialize)]
pub enum LogRecord {
    Entry(LogEntry),
    Malformed { line: usize, raw: String },
}

pub struct AuditLog {
    path: PathBuf,
    cipher: FieldCipher,
    append_lock: Mutex<()>,
}

impl AuditLog {
    /// The log file is created lazily on first append.
    pub fn new(path: impl Into<PathBuf>, cipher: FieldCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and returns its sequence number.
    ///
    /// The sequence is the current record count plus one, assigned under an
    /// in-process lock; the four sensitive fields are encrypted separately
    /// even when their plaintexts repeat.
    pub fn append(
        &self,
        actor: &str,
        description: &str,
        extra_info: &str,
        suspicious: bool,
    ) -> Result<u64> {
        let _guard = self.append_lock.lock();
        let sequence = self.record_count()? + 1;
        let now = Local::now();
        let flag = if suspicious {
            SUSPICIOUS_YES
        } else {
            SUSPICIOUS_NO
        };
        let row = [
            sequence.to_string(),
            now.format("%d-%m-%Y").to_string(),
            now.format("%H:%M:%S").to_string(),
            self.cipher.encrypt(actor)?,
            self.cipher.encrypt(description)?,
            self.cipher.encrypt(extra_info)?,
            self.cipher.encrypt(flag)?,
        ]
        .join(",");

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{row}")?;
        file.flush()?;
        Ok(sequence)
    }

    /// Records a failed or otherwise review-worthy action.
    pub fn append_suspicious(&self, actor: &str, description: &str, extra_info: &str) -> Result<u64> {
        self.append(actor, description, extra_info, true)
    }

    /// Reads and decrypts every record, in file order (== insertion order).
    ///
    /// Rows of the wrong width come back as [`LogRecord::Malformed`] with a
    /// logged anomaly; fields that fail decryption come back as
    /// [`FieldValue::Unreadable`]. Neither aborts the read.
    pub fn decrypt_all(&self) -> Result<Vec<LogRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            match self.parse_row(line_no, &line) {
                Ok(entry) => records.push(LogRecord::Entry(entry)),
                Err(Error::MalformedRecord { line: l, expected, got }) => {
                    warn!(line = l, expected, got, "audit row has unexpected shape, passing through raw");
                    records.push(LogRecord::Malformed {
                        line: line_no,
                        raw: line,
                    });
                }
                Err(other) => return Err(other),
            }
        }
        Ok(records)
    }

    /// Projection: the records whose decrypted flag equals "yes",
    /// case-insensitively.
    pub fn filter_suspicious(records: &[LogRecord]) -> Vec<&LogEntry> {
        records
            .iter()
            .filter_map(|record| match record {
                LogRecord::Entry(entry) if entry.is_suspicious() => Some(entry),
                _ => None,
            })
            .collect()
    }

    /// Column-aligned table with fixed headers, each column sized to its
    /// widest value. Malformed rows are rendered raw, in place.
    pub fn render(records: &[LogRecord]) -> String {
        let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.len()).collect();
        let cells: Vec<Option<[String; RECORD_FIELDS]>> = records
            .iter()
            .map(|record| match record {
                LogRecord::Entry(entry) => {
                    let row = [
                        entry.sequence.to_string(),
                        entry.date.clone(),
                        entry.time.clone(),
                        entry.actor.to_string(),
                        entry.description.to_string(),
                        entry.extra_info.to_string(),
                        entry.suspicious.to_string(),
                    ];
                    for (width, cell) in widths.iter_mut().zip(row.iter()) {
                        *width = (*width).max(cell.chars().count());
                    }
                    Some(row)
                }
                LogRecord::Malformed { .. } => None,
            })
            .collect();

        let header = HEADERS
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{:<width$}", h, width = widths[i]))
            .collect::<Vec<_>>()
            .join(" | ");
        let mut out = String::new();
        out.push_str(&header);
        out.push('\n');
        out.push_str(&"-".repeat(header.chars().count()));
        out.push('\n');

        for (record, row) in records.iter().zip(cells) {
            match (record, row) {
                (_, Some(row)) => {
                    let line = row
                        .iter()
                        .enumerate()
                        .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
                        .collect::<Vec<_>>()
                        .join(" | ");
                    out.push_str(line.trim_end());
                    out.push('\n');
                }
                (LogRecord::Malformed { line, raw }, None) => {
                    out.push_str(&format!("!! line {line} (unparsed): {raw}\n"));
                }
                _ => unreachable!(),
            }
        }
        out
    }

    fn record_count(&self) -> Result<u64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut count = 0;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn parse_row(&self, line_no: usize, line: &str) -> Result<LogEntry> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != RECORD_FIELDS {
            return Err(Error::MalformedRecord {
                line: line_no,
                expected: RECORD_FIELDS,
                got: fields.len(),
            });
        }
        let sequence = fields[0].parse::<u64>().map_err(|_| Error::MalformedRecord {
            line: line_no,
            expected: RECORD_FIELDS,
            got: fields.len(),
        })?;
        Ok(LogEntry {
            sequence,
            date: fields[1].to_string(),
            time: fields[2].to_string(),
            actor: self.decrypt_field(fields[3]),
            description: self.decrypt_field(fields[4]),
            extra_info: self.decrypt_field(fields[5]),
            suspicious: self.decrypt_field(fields[6]),
        })
    }

    fn decrypt_field(&self, cipher_hex: &str) -> FieldValue {
        match self.cipher.decrypt(cipher_hex) {
            Ok(value) => FieldValue::Plain(value),
            Err(e) => {
                warn!(error = %e, "audit field failed to decrypt");
                FieldValue::Unreadable {
                    cipher_hex: cipher_hex.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyStore;
    use std::sync::{Arc, OnceLock};
    use tempfile::tempdir;

    fn test_cipher() -> FieldCipher {
        static KEYS: OnceLock<Arc<KeyStore>> = OnceLock::new();
        let keys = KEYS
            .get_or_init(|| Arc::new(KeyStore::ephemeral().unwrap()))
            .clone();
        FieldCipher::new(keys)
    }

    fn entries(records: &[LogRecord]) -> Vec<&LogEntry> {
        records
            .iter()
            .filter_map(|r| match r {
                LogRecord::Entry(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sequence_numbers_are_exactly_one_to_n() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs.csv"), test_cipher());
        for i in 1..=5u64 {
            assert_eq!(log.append("admin", "action", "", false).unwrap(), i);
        }
        let records = log.decrypt_all().unwrap();
        let seqs: Vec<u64> = entries(&records).iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn three_appends_scenario() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs.csv"), test_cipher());
        log.append("alice", "logged in", "", false).unwrap();
        log.append_suspicious("mallory", "failed login", "3 attempts")
            .unwrap();
        log.append("bob", "viewed members", "", false).unwrap();

        let records = log.decrypt_all().unwrap();
        assert_eq!(records.len(), 3);
        let all = entries(&records);
        assert_eq!(all[0].actor.as_plain(), Some("alice"));
        assert_eq!(all[1].actor.as_plain(), Some("mallory"));
        assert_eq!(all[2].actor.as_plain(), Some("bob"));

        let suspicious = AuditLog::filter_suspicious(&records);
        assert_eq!(suspicious.len(), 1);
        assert_eq!(suspicious[0].sequence, 2);
        assert_eq!(suspicious[0].extra_info.as_plain(), Some("3 attempts"));
    }

    #[test]
    fn suspicious_filter_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let cipher = test_cipher();
        let path = dir.path().join("logs.csv");
        let log = AuditLog::new(&path, cipher.clone());

        // Write flags in mixed case directly, as a foreign writer might.
        let mut raw = String::new();
        for (i, flag) in ["Yes", "No", "yes", "NO"].iter().enumerate() {
            raw.push_str(&format!(
                "{},01-01-2026,12:00:00,{},{},{},{}\n",
                i + 1,
                cipher.encrypt("actor").unwrap(),
                cipher.encrypt("action").unwrap(),
                cipher.encrypt("").unwrap(),
                cipher.encrypt(flag).unwrap(),
            ));
        }
        std::fs::write(&path, raw).unwrap();

        let records = log.decrypt_all().unwrap();
        let suspicious = AuditLog::filter_suspicious(&records);
        let seqs: Vec<u64> = suspicious.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn malformed_row_passes_through_raw() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.csv");
        let log = AuditLog::new(&path, test_cipher());
        log.append("admin", "first", "", false).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "garbage,row").unwrap();
        }
        log.append("admin", "second", "", false).unwrap();

        let records = log.decrypt_all().unwrap();
        assert_eq!(records.len(), 3);
        match &records[1] {
            LogRecord::Malformed { line, raw } => {
                assert_eq!(*line, 2);
                assert_eq!(raw, "garbage,row");
            }
            other => panic!("expected malformed record, got {other:?}"),
        }
        // The corrupt line counts toward the sequence, matching file order.
        let rendered = AuditLog::render(&records);
        assert!(rendered.contains("unparsed"));
        assert!(rendered.contains("garbage,row"));
    }

    #[test]
    fn foreign_key_fields_become_unreadable_markers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.csv");
        let writer = AuditLog::new(&path, test_cipher());
        writer.append("admin", "action", "", true).unwrap();

        let foreign = FieldCipher::new(Arc::new(KeyStore::ephemeral().unwrap()));
        let reader = AuditLog::new(&path, foreign);
        let records = reader.decrypt_all().unwrap();
        assert_eq!(records.len(), 1);
        let all = entries(&records);
        assert!(matches!(all[0].actor, FieldValue::Unreadable { .. }));
        // An unreadable flag is visible but never counts as suspicious.
        assert!(AuditLog::filter_suspicious(&records).is_empty());
        assert!(AuditLog::render(&records).contains("<unreadable:"));
    }

    #[test]
    fn render_aligns_columns_to_widest_value() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs.csv"), test_cipher());
        log.append("a", "short", "", false).unwrap();
        log.append("a-much-longer-actor-name", "x", "", false).unwrap();

        let rendered = AuditLog::render(&log.decrypt_all().unwrap());
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with("No."));
        // Every actor cell is padded to the widest actor.
        let col = lines[0].find("Actor").unwrap();
        assert_eq!(&lines[2][col..col + 1], "a");
        assert!(lines[3][col..].starts_with("a-much-longer-actor-name"));
    }

    #[test]
    fn empty_log_reads_as_empty() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs.csv"), test_cipher());
        assert!(log.decrypt_all().unwrap().is_empty());
    }
}
