//! Write-logs: ordered value-level diffs between two roots.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ed::{Decode, Encode};

/// A single write-log entry; an empty value denotes deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The key being written.
    pub key: Vec<u8>,
    /// The new value; empty means the key is deleted.
    pub value: Vec<u8>,
}

impl LogEntry {
    /// Creates an entry.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a deletion entry.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
        }
    }

    /// True when this entry deletes its key.
    pub fn is_delete(&self) -> bool {
        self.value.is_empty()
    }
}

/// An ordered sequence of edits; replaying it against a source root
/// deterministically produces a destination root.
pub type WriteLog = Vec<LogEntry>;

impl Encode for LogEntry {
    fn encode_into<W: Write>(&self, dest: &mut W) -> ed::Result<()> {
        dest.write_u32::<BigEndian>(self.key.len() as u32)?;
        dest.write_all(&self.key)?;
        dest.write_u32::<BigEndian>(self.value.len() as u32)?;
        dest.write_all(&self.value)?;
        Ok(())
    }

    fn encoding_length(&self) -> ed::Result<usize> {
        Ok(4 + self.key.len() + 4 + self.value.len())
    }
}

impl Decode for LogEntry {
    fn decode<R: Read>(mut input: R) -> ed::Result<Self> {
        let key = read_chunk(&mut input)?;
        let value = read_chunk(&mut input)?;
        Ok(LogEntry { key, value })
    }
}

fn read_chunk<R: Read>(input: &mut R) -> ed::Result<Vec<u8>> {
    let len = input.read_u32::<BigEndian>()? as usize;
    let mut out = Vec::with_capacity(len.min(64 * 1024));
    input.take(len as u64).read_to_end(&mut out)?;
    if out.len() != len {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(out)
}

/// Encodes a whole write-log.
pub fn encode_write_log(log: &WriteLog) -> ed::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u32::<BigEndian>(log.len() as u32)?;
    for entry in log {
        entry.encode_into(&mut out)?;
    }
    Ok(out)
}

/// Decodes a whole write-log, rejecting trailing bytes.
pub fn decode_write_log(bytes: &[u8]) -> ed::Result<WriteLog> {
    let mut input = bytes;
    let count = input.read_u32::<BigEndian>()? as usize;
    let mut log = WriteLog::new();
    for _ in 0..count {
        log.push(LogEntry::decode(&mut input)?);
    }
    if !input.is_empty() {
        return Err(
            std::io::Error::new(std::io::ErrorKind::InvalidData, "trailing bytes").into(),
        );
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let log = vec![
            LogEntry::new(&b"k1"[..], &b"v1"[..]),
            LogEntry::delete(&b"k2"[..]),
            LogEntry::new(&b""[..], &b"empty key"[..]),
        ];
        let bytes = encode_write_log(&log).unwrap();
        assert_eq!(decode_write_log(&bytes).unwrap(), log);
        assert!(log[1].is_delete());
        assert!(!log[0].is_delete());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = encode_write_log(&vec![LogEntry::new(&b"k"[..], &b"v"[..])]).unwrap();
        bytes.push(7);
        assert!(decode_write_log(&bytes).is_err());
    }
}
