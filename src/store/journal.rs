//! Write-ahead journal for the knowledge store.
//!
//! Every mutation is appended here before it is applied in memory. On
//! open the journal is replayed from the start; a frame that is cut short
//! or fails its checksum ends the replay and is truncated away, so a crash
//! mid-append loses at most that one change.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: JournalEntry]
//! [FRAME 2: JournalEntry]
//! ...
//! ```
//!
//! Compaction rewrites the file as a single `Snapshot` entry.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec::{self, HEADER_LEN};
use super::snapshot::KnowledgeSnapshot;
use super::state::ChangeSet;

/// A journaled mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    Changes(ChangeSet),
    /// Replaces the whole state; written by compaction.
    Snapshot(KnowledgeSnapshot),
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: StoreEvent,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventRef<'a> {
    Changes(&'a ChangeSet),
    Snapshot(&'a KnowledgeSnapshot),
}

#[derive(Serialize)]
struct EntryRef<'a> {
    sequence: u64,
    timestamp: DateTime<Utc>,
    event: EventRef<'a>,
}

/// What was recovered when the journal was opened.
#[derive(Debug, Default)]
pub struct Replay {
    pub entries: Vec<JournalEntry>,
    /// Bytes dropped from a torn or corrupt tail.
    pub discarded_bytes: u64,
    pub tail_error: Option<String>,
}

pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    sequence: u64,
    sync_on_write: bool,
}

impl Journal {
    /// Opens or creates a journal and reads back every intact entry.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Replay)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        let mut replay = Replay::default();

        if len < HEADER_LEN {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
        } else {
            let mut valid_len = HEADER_LEN;
            {
                let mut reader = BufReader::new(&file);
                codec::read_header(&mut reader)?;
                while valid_len < len {
                    match codec::decode::<JournalEntry>(&mut reader) {
                        Ok(entry) => {
                            valid_len = reader.stream_position()?;
                            replay.entries.push(entry);
                        }
                        Err(e)
                            if matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::InvalidData) =>
                        {
                            replay.tail_error = Some(e.to_string());
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            if valid_len < len {
                file.set_len(valid_len)?;
                if sync_on_write {
                    file.sync_all()?;
                }
                replay.discarded_bytes = len - valid_len;
            }
        }

        let sequence = replay.entries.last().map_or(0, |entry| entry.sequence);
        let file = OpenOptions::new().append(true).open(path)?;
        Ok((
            Self {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
                sequence,
                sync_on_write,
            },
            replay,
        ))
    }

    /// Appends a change set, returning its sequence number.
    pub fn append(&mut self, changes: &ChangeSet) -> IoResult<u64> {
        let sequence = self.sequence + 1;
        let frame = codec::encode(&EntryRef {
            sequence,
            timestamp: Utc::now(),
            event: EventRef::Changes(changes),
        })?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        if self.sync_on_write {
            self.writer.get_ref().sync_data()?;
        }
        self.sequence = sequence;
        Ok(sequence)
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered bytes and syncs the file.
    pub fn sync(&mut self) -> IoResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Replaces the journal with a single snapshot entry.
    ///
    /// The new file is written next to the old one and renamed over it, so
    /// a crash leaves either the old journal or the compacted one.
    pub fn compact(&mut self, snapshot: &KnowledgeSnapshot) -> IoResult<()> {
        self.writer.flush()?;
        let staging = self.path.with_extension("compacting");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&staging)?;
            codec::write_header(&mut file)?;
            let frame = codec::encode(&EntryRef {
                sequence: 1,
                timestamp: Utc::now(),
                event: EventRef::Snapshot(snapshot),
            })?;
            file.write_all(&frame)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.sequence = 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Concept;
    use tempfile::tempdir;

    fn concept_event(name: &str) -> ChangeSet {
        ChangeSet {
            concepts: vec![Concept::new(name, None)],
            ..ChangeSet::default()
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");

        {
            let (mut journal, replay) = Journal::open(&path, false).unwrap();
            assert!(replay.entries.is_empty());
            journal.append(&concept_event("container")).unwrap();
            journal.append(&concept_event("tool")).unwrap();
            assert_eq!(journal.sequence(), 2);
        }

        let (journal, replay) = Journal::open(&path, false).unwrap();
        assert_eq!(journal.sequence(), 2);
        assert_eq!(replay.entries.len(), 2);
        assert_eq!(replay.discarded_bytes, 0);
        assert!(matches!(replay.entries[0].event, StoreEvent::Changes(_)));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.journal");

        {
            let (mut journal, _) = Journal::open(&path, false).unwrap();
            journal.append(&concept_event("container")).unwrap();
            journal.append(&concept_event("tool")).unwrap();
        }
        let full = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 3).unwrap();
        drop(file);

        let (mut journal, replay) = Journal::open(&path, false).unwrap();
        assert_eq!(replay.entries.len(), 1);
        assert!(replay.discarded_bytes > 0);
        assert!(replay.tail_error.is_some());

        journal.append(&concept_event("vessel")).unwrap();
        drop(journal);
        let (_, replay) = Journal::open(&path, false).unwrap();
        assert_eq!(replay.entries.len(), 2);
        assert_eq!(replay.entries[1].sequence, 2);
    }

    #[test]
    fn test_compact_leaves_single_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("compact.journal");

        let (mut journal, _) = Journal::open(&path, false).unwrap();
        for name in ["a", "b", "c"] {
            journal.append(&concept_event(name)).unwrap();
        }
        journal.compact(&KnowledgeSnapshot::default()).unwrap();
        journal.append(&concept_event("d")).unwrap();
        drop(journal);

        let (_, replay) = Journal::open(&path, false).unwrap();
        assert_eq!(replay.entries.len(), 2);
        assert!(matches!(replay.entries[0].event, StoreEvent::Snapshot(_)));
        assert_eq!(replay.entries[1].sequence, 2);
    }
}
