//! Edit journal: every accepted rota edit, in commit order.
//!
//! Frame layout: `[u32 LE payload length][bincode Event][u32 LE crc32 of payload]`.
//! Only a damaged tail is tolerated. Opening the journal for writing cuts the
//! file back to its last intact frame so later records stay reachable.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frames claiming a larger payload are treated as damage, not allocated.
const MAX_PAYLOAD: usize = 1 << 20;

/// Why replay stopped before the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailDamage {
    /// The last frame was cut short, typically by a crash mid-write.
    Torn,
    Checksum,
    /// Length prefix beyond [`MAX_PAYLOAD`].
    Oversized(usize),
    Undecodable,
}

impl fmt::Display for TailDamage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailDamage::Torn => write!(f, "torn frame"),
            TailDamage::Checksum => write!(f, "checksum mismatch"),
            TailDamage::Oversized(len) => write!(f, "frame length {len} exceeds {MAX_PAYLOAD}"),
            TailDamage::Undecodable => write!(f, "payload does not decode"),
        }
    }
}

/// Events recovered from a journal and where the intact prefix ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
    pub damage: Option<TailDamage>,
}

impl Replay {
    /// Decode frames from the start of `bytes` until the end or the first damaged frame.
    pub fn decode(bytes: &[u8]) -> Self {
        let mut events = Vec::new();
        let mut offset = 0;
        let damage = loop {
            if offset == bytes.len() {
                break None;
            }
            match next_frame(&bytes[offset..]) {
                Ok((event, used)) => {
                    events.push(event);
                    offset += used;
                }
                Err(damage) => break Some(damage),
            }
        };
        Replay {
            events,
            valid_len: offset as u64,
            damage,
        }
    }
}

fn le_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn next_frame(buf: &[u8]) -> Result<(Event, usize), TailDamage> {
    let len = le_u32(buf, 0).ok_or(TailDamage::Torn)? as usize;
    if len > MAX_PAYLOAD {
        return Err(TailDamage::Oversized(len));
    }
    let payload = buf.get(4..4 + len).ok_or(TailDamage::Torn)?;
    let crc = le_u32(buf, 4 + len).ok_or(TailDamage::Torn)?;
    if crc != crc32fast::hash(payload) {
        return Err(TailDamage::Checksum);
    }
    let event = bincode::deserialize(payload).map_err(|_| TailDamage::Undecodable)?;
    Ok((event, len + 8))
}

fn encode_into(buf: &mut Vec<u8>, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

fn encode_all(events: &[Event]) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    for event in events {
        encode_into(&mut buf, event)?;
    }
    Ok(buf)
}

/// Append handle on a journal file.
pub struct Journal {
    file: File,
    path: PathBuf,
    records_since_rewrite: u64,
}

impl Journal {
    /// Read the journal without opening it for writing. A missing file is empty.
    pub fn read(path: &Path) -> io::Result<Replay> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let replay = Replay::decode(&bytes);
        if let Some(damage) = replay.damage {
            tracing::warn!(
                "journal {}: {damage} after {} events, ignoring {} trailing bytes",
                path.display(),
                replay.events.len(),
                bytes.len() as u64 - replay.valid_len
            );
        }
        Ok(replay)
    }

    /// Open (or create) the journal at `path` for appending and return what it holds.
    pub fn open(path: &Path) -> io::Result<(Self, Replay)> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let replay = Self::read(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if replay.damage.is_some() {
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let journal = Self {
            file,
            path: path.to_path_buf(),
            records_since_rewrite: replay.events.len() as u64,
        };
        Ok((journal, replay))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events written since the file was last rewritten (or opened, counting replayed ones).
    pub fn records_since_rewrite(&self) -> u64 {
        self.records_since_rewrite
    }

    /// Write a batch of events with a single sync. Either the whole batch is
    /// handed to the OS or an error is returned.
    pub fn record(&mut self, events: &[Event]) -> io::Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let buf = encode_all(events)?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        self.records_since_rewrite += events.len() as u64;
        Ok(())
    }

    /// Replace the journal with `events`, e.g. the minimal history of the current rota.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp = self.path.with_extension("journal.tmp");
        let buf = encode_all(events)?;
        let mut out = File::create(&tmp)?;
        out.write_all(&buf)?;
        out.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        // The cursor sits at the end of the renamed file, so later records append.
        self.file = out;
        self.records_since_rewrite = events.len() as u64;
        Ok(())
    }
}
