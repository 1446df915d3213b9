//! Streaming ZIP archive reader.
//!
//! A ZIP archive keeps its central directory at the end, so decoding needs
//! random access. [`RangedObjectReader`] provides `Read + Seek` over an
//! object by issuing ranged reads of a fixed chunk size, keeping only one
//! chunk resident. The `zip` decoder runs on a blocking thread and hands
//! entries to async code through bounded channels:
//!
//! ```text
//! ObjectStore::get_range <- RangedObjectReader <- zip::ZipArchive (blocking thread)
//!                                                        |
//!                                    entries channel (capacity 1)
//!                                                        |
//!                                                        v
//!                                         ArchiveEntries::next (async)
//! ```
//!
//! Small entries are decoded fully and handed over as [`Bytes`]; large ones
//! are handed over as a chunk channel that the decoder fills while the
//! consumer uploads, so memory stays bounded by the chunk sizes regardless
//! of the archive or entry size.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::ArchiveError;
use crate::store::{ObjectBody, ObjectStore};

/// Size of the chunks a streamed entry is cut into.
const STREAM_CHUNK_SIZE: usize = 256 * 1024;

/// Number of streamed chunks buffered ahead of the consumer.
const STREAM_CHANNEL_DEPTH: usize = 4;

/// Content of an [`ArchiveEntry`].
#[derive(Debug)]
pub enum EntryContent {
    /// Fully decoded content.
    Inline(Bytes),
    /// Content decoded on demand; yields exactly the entry's size in bytes.
    Streamed(mpsc::Receiver<io::Result<Bytes>>),
}

/// One record of the archive.
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Path inside the archive, as stored.
    pub path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Whether the record is a directory.
    pub is_dir: bool,
    /// Entry content; empty for directories.
    pub content: EntryContent,
}

impl ArchiveEntry {
    /// Turn the entry content into an object body.
    #[must_use]
    pub fn into_body(self) -> ObjectBody {
        match self.content {
            EntryContent::Inline(data) => ObjectBody::Full(data),
            EntryContent::Streamed(chunks) => ObjectBody::Streaming {
                len: self.size,
                chunks,
            },
        }
    }
}

/// Lazy, single-pass sequence of archive entries.
///
/// Dropping it stops the decoder at the next entry boundary.
#[derive(Debug)]
pub struct ArchiveEntries {
    entries: mpsc::Receiver<Result<ArchiveEntry, ArchiveError>>,
    len: usize,
}

impl ArchiveEntries {
    /// Number of records in the central directory, directories included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the archive has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Next entry in archive order; `None` once all records were produced.
    pub async fn next(&mut self) -> Option<Result<ArchiveEntry, ArchiveError>> {
        self.entries.recv().await
    }
}

/// Opens source objects as ZIP archives.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    store: Arc<dyn ObjectStore>,
    read_chunk_size: u64,
    inline_threshold: u64,
}

impl ArchiveReader {
    /// Create a reader over `store`.
    ///
    /// `read_chunk_size` bounds each ranged read; entries up to
    /// `inline_threshold` bytes are decoded into memory at once.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, read_chunk_size: u64, inline_threshold: u64) -> Self {
        Self {
            store,
            read_chunk_size: read_chunk_size.max(1),
            inline_threshold,
        }
    }

    /// Open `s3://bucket/key`, at `version_id` when given.
    ///
    /// The version resolved here is pinned for every later read, so a
    /// concurrent overwrite of the source cannot mix two archives.
    pub async fn open(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ArchiveEntries, ArchiveError> {
        let info = self.store.head_object(bucket, key, version_id).await?;
        let pinned = version_id.map(ToOwned::to_owned).or(info.version_id);
        debug!(
            bucket,
            key,
            version_id = pinned.as_deref().unwrap_or("latest"),
            size = info.size,
            "opening archive"
        );

        let source = RangedObjectReader::new(
            Handle::current(),
            Arc::clone(&self.store),
            bucket.to_owned(),
            key.to_owned(),
            pinned,
            info.size,
            self.read_chunk_size,
        );
        let inline_threshold = self.inline_threshold;
        let (opened_tx, opened_rx) = oneshot::channel();
        let (entries_tx, entries_rx) = mpsc::channel(1);

        tokio::task::spawn_blocking(move || {
            decode_archive(source, inline_threshold, opened_tx, &entries_tx);
        });

        let len = opened_rx
            .await
            .map_err(|_| anyhow::anyhow!("archive decoder stopped before opening"))??;

        Ok(ArchiveEntries {
            entries: entries_rx,
            len,
        })
    }
}

/// Body of the decoder thread.
fn decode_archive(
    source: RangedObjectReader,
    inline_threshold: u64,
    opened: oneshot::Sender<Result<usize, ArchiveError>>,
    entries: &mpsc::Sender<Result<ArchiveEntry, ArchiveError>>,
) {
    let mut archive = match zip::ZipArchive::new(source) {
        Ok(archive) => archive,
        Err(e) => {
            let err = match e {
                zip::result::ZipError::Io(io_err) => source_read_error(io_err),
                other => ArchiveError::from(other),
            };
            let _ = opened.send(Err(err));
            return;
        }
    };
    if opened.send(Ok(archive.len())).is_err() {
        return;
    }

    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                let err = ArchiveError::Entry {
                    index,
                    path: String::new(),
                    message: e.to_string(),
                };
                if entries.blocking_send(Err(err)).is_err() {
                    return;
                }
                continue;
            }
        };

        let path = file.name().to_owned();
        let size = file.size();
        let is_dir = file.is_dir();

        if is_dir || size <= inline_threshold {
            let mut buf = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
            let item = match file.read_to_end(&mut buf) {
                Ok(_) => Ok(ArchiveEntry {
                    path,
                    size,
                    is_dir,
                    content: EntryContent::Inline(Bytes::from(buf)),
                }),
                Err(e) => Err(ArchiveError::Entry {
                    index,
                    path,
                    message: e.to_string(),
                }),
            };
            if entries.blocking_send(item).is_err() {
                return;
            }
            continue;
        }

        let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_CHANNEL_DEPTH);
        let entry = ArchiveEntry {
            path: path.clone(),
            size,
            is_dir,
            content: EntryContent::Streamed(chunk_rx),
        };
        if entries.blocking_send(Ok(entry)).is_err() {
            return;
        }
        trace!(path = %path, size, "streaming entry");
        stream_entry(&mut file, &path, &chunk_tx);
    }
}

/// Pump one entry into its chunk channel until EOF, error, or hang-up.
fn stream_entry(file: &mut impl Read, path: &str, chunks: &mpsc::Sender<io::Result<Bytes>>) {
    let mut buf = BytesMut::zeroed(STREAM_CHUNK_SIZE);
    loop {
        match file.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if chunks
                    .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                    .is_err()
                {
                    debug!(path, "consumer dropped streamed entry");
                    return;
                }
            }
            Err(e) => {
                warn!(path, error = %e, "failed to decode streamed entry");
                let _ = chunks.blocking_send(Err(e));
                return;
            }
        }
    }
}

/// Unwrap a store failure smuggled through `io::Error`.
fn source_read_error(err: io::Error) -> ArchiveError {
    match err.downcast::<crate::error::StoreError>() {
        Ok(store_err) => ArchiveError::from(store_err),
        Err(other) => ArchiveError::Format {
            message: other.to_string(),
        },
    }
}

/// `Read + Seek` view of a remote object built on ranged reads.
///
/// Must be used from a blocking thread: every cache miss blocks on the
/// runtime to fetch the chunk containing the current position.
#[derive(Debug)]
pub struct RangedObjectReader {
    handle: Handle,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    version_id: Option<String>,
    len: u64,
    pos: u64,
    chunk_size: u64,
    cache_start: u64,
    cache: Bytes,
}

impl RangedObjectReader {
    /// Create a reader over an object of `len` bytes.
    #[must_use]
    pub fn new(
        handle: Handle,
        store: Arc<dyn ObjectStore>,
        bucket: String,
        key: String,
        version_id: Option<String>,
        len: u64,
        chunk_size: u64,
    ) -> Self {
        Self {
            handle,
            store,
            bucket,
            key,
            version_id,
            len,
            pos: 0,
            chunk_size: chunk_size.max(1),
            cache_start: 0,
            cache: Bytes::new(),
        }
    }

    fn cached(&self, pos: u64) -> bool {
        pos >= self.cache_start && pos < self.cache_start + self.cache.len() as u64
    }

    /// Chunk-aligned window containing `pos`.
    fn window(&self, pos: u64) -> Range<u64> {
        let start = pos - pos % self.chunk_size;
        start..(start + self.chunk_size).min(self.len)
    }

    fn fill(&mut self) -> io::Result<()> {
        let range = self.window(self.pos);
        let data = self
            .handle
            .block_on(self.store.get_range(
                &self.bucket,
                &self.key,
                self.version_id.as_deref(),
                range.clone(),
            ))
            .map_err(io::Error::other)?;
        if (data.len() as u64) < range.end - range.start {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "short read of s3://{}/{}: wanted {} bytes at {}, got {}",
                    self.bucket,
                    self.key,
                    range.end - range.start,
                    range.start,
                    data.len()
                ),
            ));
        }
        self.cache_start = range.start;
        self.cache = data;
        Ok(())
    }
}

impl Read for RangedObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }
        if !self.cached(self.pos) {
            self.fill()?;
        }
        let offset = usize::try_from(self.pos - self.cache_start)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        let available = &self.cache[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RangedObjectReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.pos = target;
        Ok(target)
    }
}
