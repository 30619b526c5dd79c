//! Segment files: the buffered append writer and the read-only frame scanner.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::directory;
use crate::error::{Result, WalError};
use crate::record::{Record, FRAME_PREFIX_BYTES};

const WRITE_BUFFER_BYTES: usize = 4 * 1024;

/// Lifecycle of the writer side of a segment.
///
/// `Empty -> Writable` on the first append; `Writable -> RotatedOut` when the
/// engine rotates past it; `Empty | Writable -> Closed` when the log closes.
/// A `RotatedOut` or `Closed` segment accepts no further writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Empty,
    Writable,
    RotatedOut,
    Closed,
}

/// Append handle for one segment file.
///
/// Writes go through a user-space buffer; `flush` drains it to the OS and
/// `fsync` forces it to stable storage. The read paths never share this
/// handle, they open their own [`SegmentReader`].
pub struct SegmentFile {
    path: PathBuf,
    index: u64,
    writer: BufWriter<File>,
    state: SegmentState,
}

impl SegmentFile {
    /// Creates `segment-<index>`, failing if the file already exists.
    pub async fn create(dir: &Path, index: u64) -> Result<SegmentFile> {
        let path = directory::segment_path(dir, index);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .await?;

        debug!("created segment file {:?}", path);

        Ok(SegmentFile {
            path,
            index,
            writer: BufWriter::with_capacity(WRITE_BUFFER_BYTES, file),
            state: SegmentState::Empty,
        })
    }

    /// Reopens an existing segment for appending.
    pub async fn open_append(dir: &Path, index: u64) -> Result<SegmentFile> {
        let path = directory::segment_path(dir, index);
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;

        let state = if file.metadata().await?.len() == 0 {
            SegmentState::Empty
        } else {
            SegmentState::Writable
        };

        Ok(SegmentFile {
            path,
            index,
            writer: BufWriter::with_capacity(WRITE_BUFFER_BYTES, file),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub async fn append(&mut self, frame: &[u8]) -> Result<()> {
        match self.state {
            SegmentState::RotatedOut | SegmentState::Closed => return Err(WalError::Closed),
            SegmentState::Empty | SegmentState::Writable => {}
        }

        self.writer.write_all(frame).await?;
        self.state = SegmentState::Writable;

        Ok(())
    }

    /// Drains the user-space buffer to the OS.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Forces flushed bytes to stable storage.
    pub async fn fsync(&self) -> Result<()> {
        self.writer.get_ref().sync_all().await?;
        Ok(())
    }

    /// Flushed size from `stat`; bytes still in the user-space buffer are not
    /// counted.
    pub async fn size_on_disk(&self) -> Result<u64> {
        Ok(self.writer.get_ref().metadata().await?.len())
    }

    /// Marks the segment immutable after rotation. The buffer must already be
    /// flushed; the OS handle is released when the value drops.
    pub fn seal(&mut self) {
        self.state = SegmentState::RotatedOut;
    }

    pub async fn close(&mut self) -> Result<()> {
        self.writer.flush().await?;
        self.state = SegmentState::Closed;

        debug!("closed segment file {:?}", self.path);

        Ok(())
    }
}

/// Outcome of reading a 4-byte length prefix.
pub(crate) enum FramePrefix {
    /// Clean end of file at a frame boundary.
    Eof,
    /// Fewer than 4 bytes remained.
    Partial(usize),
    Len(i32),
}

/// Read-only streaming scanner over one segment's frames.
pub struct SegmentReader {
    file: File,
}

impl SegmentReader {
    pub async fn open(path: &Path) -> Result<SegmentReader> {
        let file = OpenOptions::new().read(true).open(path).await?;
        Ok(SegmentReader { file })
    }

    pub(crate) async fn read_prefix(&mut self) -> Result<FramePrefix> {
        let mut buf = [0u8; FRAME_PREFIX_BYTES];
        let mut filled = 0;

        while filled < FRAME_PREFIX_BYTES {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        match filled {
            0 => Ok(FramePrefix::Eof),
            FRAME_PREFIX_BYTES => Ok(FramePrefix::Len(i32::from_le_bytes(buf))),
            n => Ok(FramePrefix::Partial(n)),
        }
    }

    pub(crate) async fn read_body(&mut self, len: i32) -> Result<Vec<u8>> {
        if len < 0 {
            return Err(WalError::Corrupt(format!("negative frame length {len}")));
        }
        let len = len as usize;

        // A garbage prefix can claim an absurd length; reading up to EOF
        // instead of preallocating keeps that from ballooning memory.
        let mut body = Vec::new();
        let found = (&mut self.file).take(len as u64).read_to_end(&mut body).await?;
        if found < len {
            return Err(WalError::Truncated {
                expected: len,
                found,
            });
        }

        Ok(body)
    }

    /// Next record in the strict framing: a partial length prefix is a
    /// truncation error rather than an end of stream.
    pub async fn next_record(&mut self) -> Result<Option<Record>> {
        let len = match self.read_prefix().await? {
            FramePrefix::Eof => return Ok(None),
            FramePrefix::Partial(found) => {
                return Err(WalError::Truncated {
                    expected: FRAME_PREFIX_BYTES,
                    found,
                })
            }
            FramePrefix::Len(len) => len,
        };

        let body = self.read_body(len).await?;
        Ok(Some(Record::decode_verified(&body)?))
    }

    /// Sequence number of the last well-formed record, 0 for an empty file.
    ///
    /// Skip-scans the frames by length prefix, then seeks back and decodes
    /// only the final record.
    pub async fn last_sequence(&mut self) -> Result<u64> {
        let mut last_frame: Option<(u64, i32)> = None;

        loop {
            match self.read_prefix().await? {
                FramePrefix::Eof => break,
                FramePrefix::Partial(found) => {
                    return Err(WalError::Truncated {
                        expected: FRAME_PREFIX_BYTES,
                        found,
                    })
                }
                FramePrefix::Len(len) => {
                    if len < 0 {
                        return Err(WalError::Corrupt(format!("negative frame length {len}")));
                    }
                    let body_offset = self.file.stream_position().await?;
                    self.file.seek(SeekFrom::Current(len as i64)).await?;
                    last_frame = Some((body_offset, len));
                }
            }
        }

        let Some((offset, len)) = last_frame else {
            return Ok(0);
        };

        self.file.seek(SeekFrom::Start(offset)).await?;
        let body = self.read_body(len).await?;
        let record = Record::decode_verified(&body)?;

        Ok(record.seq)
    }
}
