//! The log engine: sequence numbering, rotation, retention, reads, repair.
//!
//! All mutation and all read paths serialize on one mutex; readers and
//! writers are mutually exclusive by contract. The only background task is
//! the periodic sync loop in [`crate::syncer`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::Options;
use crate::directory;
use crate::error::{ReadError, Result, WalError};
use crate::record::Record;
use crate::segment::{FramePrefix, SegmentFile, SegmentReader, SegmentState};
use crate::syncer::Syncer;

/// A durable, segmented, append-only log.
///
/// Cheap operations and disk I/O alike run under the engine mutex; clone the
/// surrounding handle (e.g. `Arc<Wal>`) to share it between tasks.
pub struct Wal {
    inner: Arc<Mutex<WalInner>>,
    syncer: Mutex<Option<Syncer>>,
}

pub(crate) struct WalInner {
    directory: PathBuf,
    enable_fsync: bool,
    max_segment_bytes: u64,
    max_segments: usize,

    active: SegmentFile,
    active_index: u64,
    last_seq: u64,

    rearm_tx: mpsc::Sender<()>,
}

impl Wal {
    /// Opens the log, creating the directory and `segment-0` if absent, and
    /// recovers `last_seq` from the newest segment. Starts the sync task.
    pub async fn open(opts: Options) -> Result<Wal> {
        opts.validate()?;

        tokio::fs::create_dir_all(&opts.directory).await?;

        let indexes = directory::list_segments(&opts.directory).await?;
        let active_index = match indexes.last() {
            Some(&max) => max,
            None => {
                let mut first = SegmentFile::create(&opts.directory, 0).await?;
                first.close().await?;
                0
            }
        };

        let active = SegmentFile::open_append(&opts.directory, active_index).await?;

        let mut reader = SegmentReader::open(active.path()).await?;
        let last_seq = reader.last_sequence().await?;

        info!(
            "opened log at {:?}: active segment {}, last sequence {}",
            opts.directory, active_index, last_seq
        );

        let (rearm_tx, rearm_rx) = mpsc::channel(1);

        let inner = Arc::new(Mutex::new(WalInner {
            directory: opts.directory.clone(),
            enable_fsync: opts.enable_fsync,
            max_segment_bytes: opts.max_segment_bytes,
            max_segments: opts.max_segments,
            active,
            active_index,
            last_seq,
            rearm_tx,
        }));

        let syncer = Syncer::start(inner.clone(), opts.sync_interval(), rearm_rx);

        Ok(Wal {
            inner,
            syncer: Mutex::new(Some(syncer)),
        })
    }

    /// Appends one record carrying `data`. The record is buffered on return;
    /// it becomes durable on the next sync.
    pub async fn write_entry(&self, data: &[u8]) -> Result<()> {
        self.inner.lock().await.append_record(data.to_vec(), false).await
    }

    /// Appends a checkpoint marker carrying `data` and syncs before
    /// returning, so the checkpoint is never lost to a buffered tail.
    /// Consumes one sequence number like any other record.
    pub async fn create_checkpoint(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.append_record(data.to_vec(), true).await?;
        inner.sync().await
    }

    /// Streams every record of the *active* segment. With `after_checkpoint`,
    /// returns the last checkpoint marker and everything after it (or all
    /// records if the segment has none). Older segments are reachable through
    /// [`Wal::read_all_from_offset`].
    pub async fn read_all(&self, after_checkpoint: bool) -> Result<Vec<Record>, ReadError> {
        let inner = self.inner.lock().await;
        inner.read_active(after_checkpoint).await
    }

    /// Streams all segments with index `>= segment_index` in ascending order;
    /// `-1` means from the lowest present. The checkpoint filter applies to
    /// the last checkpoint seen across the whole scan.
    pub async fn read_all_from_offset(
        &self,
        segment_index: i64,
        after_checkpoint: bool,
    ) -> Result<Vec<Record>, ReadError> {
        let inner = self.inner.lock().await;
        inner.read_from_offset(segment_index, after_checkpoint).await
    }

    /// Flushes the write buffer, fsyncs when enabled, and pushes the next
    /// periodic sync a full interval out.
    pub async fn sync(&self) -> Result<()> {
        self.inner.lock().await.sync().await
    }

    /// Scans the newest segment from the start and truncates it at the first
    /// torn or corrupt record, atomically replacing the file with the
    /// well-formed prefix. Returns that prefix.
    ///
    /// Reads its own handles, so it also works on a closed log; after a
    /// repair, reopen before writing again.
    pub async fn repair(&self) -> Result<Vec<Record>> {
        let inner = self.inner.lock().await;
        inner.repair_newest().await
    }

    /// Stops the sync task (joined, so no background sync survives this
    /// call), performs a final sync, and closes the active segment. Writes
    /// and syncs fail afterwards; reads and repair still work.
    pub async fn close(&self) -> Result<()> {
        let Some(syncer) = self.syncer.lock().await.take() else {
            return Err(WalError::Closed);
        };
        syncer.stop().await;

        let mut inner = self.inner.lock().await;
        inner.sync().await?;
        inner.active.close().await
    }
}

impl WalInner {
    async fn append_record(&mut self, data: Vec<u8>, checkpoint: bool) -> Result<()> {
        if self.active.state() == SegmentState::Closed {
            return Err(WalError::Closed);
        }

        self.rotate_if_needed().await?;

        // Incremented before the write lands; a failed write leaves the gap
        // and the instance is expected to be abandoned and reopened.
        self.last_seq += 1;

        let record = if checkpoint {
            Record::checkpoint(self.last_seq, data)
        } else {
            Record::new(self.last_seq, data)
        };

        self.active.append(&record.encode_framed()).await
    }

    async fn rotate_if_needed(&mut self) -> Result<()> {
        if self.active.size_on_disk().await? < self.max_segment_bytes {
            return Ok(());
        }
        self.rotate().await
    }

    /// Seals the active segment and opens `segment-<active_index + 1>`,
    /// evicting the oldest segment when the retention bound would overflow.
    /// The naming counter only grows; retention deletes from the low end.
    async fn rotate(&mut self) -> Result<()> {
        self.sync().await?;
        self.active.seal();

        self.active_index += 1;
        if self.active_index as usize >= self.max_segments {
            self.evict_oldest().await?;
        }

        self.active = SegmentFile::create(&self.directory, self.active_index).await?;

        debug!("rotated to segment {}", self.active_index);

        Ok(())
    }

    async fn evict_oldest(&mut self) -> Result<()> {
        let indexes = directory::list_segments(&self.directory).await?;
        let Some(&oldest) = indexes.first() else {
            return Ok(());
        };

        directory::remove_segment(&self.directory, oldest).await?;
        info!("evicted segment {}", oldest);

        Ok(())
    }

    pub(crate) async fn sync(&mut self) -> Result<()> {
        if self.active.state() == SegmentState::Closed {
            return Err(WalError::Closed);
        }

        self.active.flush().await?;
        if self.enable_fsync {
            self.active.fsync().await?;
        }

        // We just synced; the periodic tick can wait a full interval again.
        let _ = self.rearm_tx.try_send(());

        Ok(())
    }

    async fn read_active(&self, after_checkpoint: bool) -> Result<Vec<Record>, ReadError> {
        let mut records = Vec::new();
        let path = directory::segment_path(&self.directory, self.active_index);

        if let Err(source) = scan_segment(&path, after_checkpoint, &mut records).await {
            return Err(ReadError {
                recovered: records,
                source,
            });
        }

        Ok(records)
    }

    async fn read_from_offset(
        &self,
        segment_index: i64,
        after_checkpoint: bool,
    ) -> Result<Vec<Record>, ReadError> {
        let mut records = Vec::new();

        let indexes = match directory::list_segments(&self.directory).await {
            Ok(indexes) => indexes,
            Err(source) => {
                return Err(ReadError {
                    recovered: records,
                    source,
                })
            }
        };

        for index in indexes {
            if segment_index >= 0 && (index as i64) < segment_index {
                continue;
            }

            let path = directory::segment_path(&self.directory, index);
            if let Err(source) = scan_segment(&path, after_checkpoint, &mut records).await {
                return Err(ReadError {
                    recovered: records,
                    source,
                });
            }
        }

        Ok(records)
    }

    async fn repair_newest(&self) -> Result<Vec<Record>> {
        let indexes = directory::list_segments(&self.directory).await?;
        let Some(&newest) = indexes.last() else {
            return Err(WalError::Config("no segment files to repair".into()));
        };

        let path = directory::segment_path(&self.directory, newest);
        info!("repairing segment {:?}", path);

        let mut reader = SegmentReader::open(&path).await?;
        let mut records: Vec<Record> = Vec::new();

        loop {
            let len = match reader.read_prefix().await? {
                // A missing or partial prefix is a clean tail, not corruption.
                FramePrefix::Eof | FramePrefix::Partial(_) => return Ok(records),
                FramePrefix::Len(len) => len,
            };

            if len < 0 {
                warn!("negative frame length {len}, truncating");
                break;
            }

            let body = match reader.read_body(len).await {
                Ok(body) => body,
                Err(WalError::Truncated { expected, found }) => {
                    warn!("torn frame (expected {expected} bytes, found {found}), truncating");
                    break;
                }
                Err(e) => return Err(e),
            };

            match Record::decode_verified(&body) {
                Ok(record) => records.push(record),
                Err(WalError::Corrupt(reason)) => {
                    warn!("{reason}, truncating");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        replace_with_repaired(&path, &records).await?;

        Ok(records)
    }
}

/// Appends every record of one segment onto `records`, clearing the
/// accumulated scan at each checkpoint marker when `after_checkpoint` is set.
async fn scan_segment(
    path: &Path,
    after_checkpoint: bool,
    records: &mut Vec<Record>,
) -> Result<()> {
    let mut reader = SegmentReader::open(path).await?;

    while let Some(record) = reader.next_record().await? {
        if after_checkpoint && record.is_checkpoint() {
            records.clear();
        }
        records.push(record);
    }

    Ok(())
}

/// Rewrites `path` to hold exactly `records`, going through a `.tmp` file and
/// a rename so the replacement is atomic.
async fn replace_with_repaired(path: &Path, records: &[Record]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");

    let mut tmp = tokio::fs::File::create(&tmp_path).await?;
    for record in records {
        tmp.write_all(&record.encode_framed()).await?;
    }
    tmp.sync_all().await?;
    drop(tmp);

    tokio::fs::rename(&tmp_path, path).await?;

    info!("rewrote {:?} with {} records", path, records.len());

    Ok(())
}
