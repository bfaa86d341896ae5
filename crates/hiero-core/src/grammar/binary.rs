use std::fs::{self, File};
use std::path::Path;

use memmap2::Mmap;

use super::rule::RuleRecord;
use super::GrammarError;

pub const MAGIC: &[u8; 4] = b"HGRB";
pub const VERSION: u8 = 1;
// magic(4) + version(1) + rule_count(4)
const HEADER_SIZE: usize = 9;

/// Parse a text grammar into records, skipping blank and `#` lines.
pub fn records_from_text(text: &str) -> Result<Vec<RuleRecord>, GrammarError> {
    let mut records = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record = RuleRecord::parse(line).map_err(|reason| GrammarError::Parse {
            line: n + 1,
            reason,
        })?;
        records.push(record);
    }
    Ok(records)
}

pub(crate) fn to_bytes(records: &[RuleRecord]) -> Result<Vec<u8>, GrammarError> {
    let body = bincode::serialize(records).map_err(GrammarError::Serialize)?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Vec<RuleRecord>, GrammarError> {
    if bytes.len() < HEADER_SIZE {
        return Err(GrammarError::InvalidHeader);
    }
    if &bytes[..4] != MAGIC {
        return Err(GrammarError::InvalidMagic);
    }
    if bytes[4] != VERSION {
        return Err(GrammarError::UnsupportedVersion(bytes[4]));
    }
    let expected = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
    let records: Vec<RuleRecord> =
        bincode::deserialize(&bytes[HEADER_SIZE..]).map_err(GrammarError::Deserialize)?;
    if records.len() != expected {
        return Err(GrammarError::CountMismatch {
            expected,
            actual: records.len(),
        });
    }
    Ok(records)
}

/// Write a compiled grammar atomically (temp file + rename).
pub fn write_records(path: &Path, records: &[RuleRecord]) -> Result<(), GrammarError> {
    let bytes = to_bytes(records)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<RuleRecord>, GrammarError> {
    let file = File::open(path)?;
    // SAFETY: the file is opened read-only and the mapping does not outlive
    // this function; records are deserialized into owned values.
    let mmap = unsafe { Mmap::map(&file)? };
    from_bytes(&mmap)
}
