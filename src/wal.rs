//! Write-ahead log for the durable store.
//!
//! Entry layout, little endian: `[u32 len][bincode Event][u32 crc32 of payload]`.
//! Replay stops at the first entry that is short, oversized, fails its CRC or
//! does not decode. Everything after that point is a torn tail from a crash
//! mid-write and is cut off when the log is reopened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};

/// A length prefix above this is corruption, not a real entry.
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;
const ENTRY_OVERHEAD: u64 = 8;

const WRITER_QUEUE: usize = 4096;
const MAX_GROUP: usize = 1024;

fn encode(event: &Event) -> io::Result<Vec<u8>> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut entry = Vec::with_capacity(payload.len() + ENTRY_OVERHEAD as usize);
    entry.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    entry.extend_from_slice(&payload);
    entry.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(entry)
}

/// `Ok(false)` when the reader ran dry before `buf` was full.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact entry and its size on disk, or `None` at the end of the
/// valid prefix.
fn read_entry(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !fill(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut payload)? || !fill(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|event| (event, len as u64 + ENTRY_OVERHEAD)))
}

/// Result of reading a log from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Bytes covered by `events`.
    pub valid_len: u64,
    pub file_len: u64,
}

impl Replay {
    pub fn is_torn(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// Read every intact entry of `path`. A missing file is an empty log.
pub fn replay(path: &Path) -> io::Result<Replay> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut replay = Replay {
        file_len,
        ..Replay::default()
    };
    while let Some((event, size)) = read_entry(&mut reader)? {
        replay.events.push(event);
        replay.valid_len += size;
    }
    Ok(replay)
}

/// The open log file. Owned by exactly one [`WalWriter`] task.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay `path`, truncate any torn tail so new entries follow the last
    /// good one, and open the file for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = replay(path)?;
        if replay.is_torn() {
            tracing::warn!(
                path = %path.display(),
                kept = replay.valid_len,
                dropped = replay.file_len - replay.valid_len,
                "truncating torn WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, replay.events))
    }

    /// Queue one entry in the write buffer. Not durable until [`Wal::sync`].
    pub fn buffer(&mut self, event: &Event) -> io::Result<()> {
        self.writer.write_all(&encode(event)?)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    /// Replace the whole log with `events`. They go to a sibling temp file
    /// first, which is fsynced and renamed over the log.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        self.sync()?;
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for event in events {
                out.write_all(&encode(event)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

enum Command {
    Append {
        event: Event,
        done: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<Event>,
        done: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        reply: oneshot::Sender<u64>,
    },
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "WAL writer stopped")
}

/// Cloneable handle to the background task that owns a [`Wal`].
#[derive(Clone)]
pub struct WalWriter {
    tx: mpsc::Sender<Command>,
}

impl WalWriter {
    /// Move `wal` onto its own task. Must run inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(WRITER_QUEUE);
        tokio::spawn(run_writer(wal, rx));
        Self { tx }
    }

    /// Resolves once `event` is on disk.
    pub async fn append(&self, event: Event) -> io::Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(Command::Append { event, done }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn rewrite(&self, events: Vec<Event>) -> io::Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(Command::Rewrite { events, done }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn appends_since_compact(&self) -> io::Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::AppendsSinceCompact { reply }).await?;
        rx.await.map_err(|_| writer_gone())
    }

    async fn request(&self, cmd: Command) -> io::Result<()> {
        self.tx.send(cmd).await.map_err(|_| writer_gone())
    }
}

/// Appends buffered since the last fsync, waiting on the same sync.
#[derive(Default)]
struct Group {
    waiters: Vec<oneshot::Sender<io::Result<()>>>,
    error: Option<io::Error>,
}

impl Group {
    fn add(&mut self, wal: &mut Wal, event: &Event, done: oneshot::Sender<io::Result<()>>) {
        if self.error.is_none()
            && let Err(e) = wal.buffer(event)
        {
            self.error = Some(e);
        }
        self.waiters.push(done);
    }

    /// One fsync for the whole group, then answer every waiter with its result.
    fn commit(&mut self, wal: &mut Wal) {
        if self.waiters.is_empty() {
            return;
        }
        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(self.waiters.len() as f64);
        let started = Instant::now();
        // Sync even after a buffer error so its bytes do not leak into the next group.
        let synced = wal.sync();
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let error = self.error.take().or(synced.err());
        for done in self.waiters.drain(..) {
            let result = match &error {
                None => Ok(()),
                Some(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = done.send(result);
        }
    }
}

/// Group commit: all appends already queued when the task wakes share one
/// fsync. A rewrite or counter read first commits the appends queued before it.
async fn run_writer(mut wal: Wal, mut rx: mpsc::Receiver<Command>) {
    let mut queued = Vec::with_capacity(MAX_GROUP);
    let mut group = Group::default();
    while rx.recv_many(&mut queued, MAX_GROUP).await > 0 {
        for cmd in queued.drain(..) {
            match cmd {
                Command::Append { event, done } => group.add(&mut wal, &event, done),
                Command::Rewrite { events, done } => {
                    group.commit(&mut wal);
                    let _ = done.send(wal.rewrite(&events));
                }
                Command::AppendsSinceCompact { reply } => {
                    group.commit(&mut wal);
                    let _ = reply.send(wal.appends_since_compact());
                }
            }
        }
        group.commit(&mut wal);
    }
    tracing::debug!(path = %wal.path.display(), "WAL writer stopped");
}
