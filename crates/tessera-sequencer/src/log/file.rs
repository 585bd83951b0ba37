//! Append-only file event log
//!
//! The file is a sequence of frames, each a 4-byte big-endian length followed
//! by a DAG-CBOR [`LogFrame`]. Rows are appended as frames; invalidation is
//! recorded as its own frame and replayed on open. A torn final frame from a
//! crash mid-write is cut off when the log is opened; a write that fails while
//! the process keeps running is cut back straight away.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_common::{Datetime, Did};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{EventLog, Rows};
use crate::error::{Result, SequencerError};
use crate::events::{EventType, RepoSeqRow};

const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
enum LogFrame {
    Row(RepoSeqRow),
    Invalidate { did: Did },
}

#[derive(Debug)]
struct FileState {
    rows: Rows,
    file: File,
    /// Length of the file up to the last fully synced frame
    len: u64,
}

/// File-backed event log
///
/// All rows are kept in memory for reads; the file is the durable copy and is
/// synced after every write.
#[derive(Debug, Clone)]
pub struct FileEventLog {
    path: PathBuf,
    state: Arc<Mutex<FileState>>,
}

impl FileEventLog {
    /// Open `path`, replaying existing frames, or create it
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let (rows, valid_len) = replay(&data)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if valid_len < data.len() {
            tracing::warn!(
                path = %path.display(),
                dropped = data.len() - valid_len,
                "truncating torn frame at end of event log"
            );
            file.set_len(valid_len as u64).await?;
        }

        tracing::debug!(
            path = %path.display(),
            latest_seq = ?rows.latest_seq(),
            "opened event log"
        );

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(FileState {
                rows,
                file,
                len: valid_len as u64,
            })),
        })
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rebuild rows from file contents, returning them and the length of the
/// intact prefix
fn replay(data: &[u8]) -> Result<(Rows, usize)> {
    let mut rows = Rows::default();
    let mut offset = 0;
    while data.len() - offset >= FRAME_HEADER_LEN {
        let mut len_bytes = [0u8; FRAME_HEADER_LEN];
        len_bytes.copy_from_slice(&data[offset..offset + FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        let start = offset + FRAME_HEADER_LEN;
        let Some(body) = data.get(start..start + len) else {
            break;
        };

        let frame: LogFrame = serde_ipld_dagcbor::from_slice(body)
            .map_err(|e| SequencerError::CorruptLog(format!("frame at byte {}: {}", offset, e)))?;
        match frame {
            LogFrame::Row(row) => {
                if row.seq != rows.next_seq() {
                    return Err(SequencerError::CorruptLog(format!(
                        "expected seq {}, found {}",
                        rows.next_seq(),
                        row.seq
                    )));
                }
                rows.push(row);
            }
            LogFrame::Invalidate { did } => {
                rows.invalidate(&did);
            }
        }
        offset = start + len;
    }
    Ok((rows, offset))
}

fn encode_frame(frame: &LogFrame) -> Result<Vec<u8>> {
    let body = serde_ipld_dagcbor::to_vec(frame).map_err(SequencerError::serialization)?;
    let len = u32::try_from(body.len())
        .map_err(|_| SequencerError::CorruptLog(format!("frame of {} bytes", body.len())))?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

async fn write_synced(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}

impl FileState {
    /// Append a frame, cutting the file back to its previous length if any
    /// part of the write fails
    async fn write_frame(&mut self, frame: &LogFrame) -> Result<()> {
        let bytes = encode_frame(frame)?;
        match write_synced(&mut self.file, &bytes).await {
            Ok(()) => {
                self.len += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.rollback().await;
                Err(e.into())
            }
        }
    }

    async fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len).await {
            tracing::error!(len = self.len, error = %e, "failed to cut back partial frame");
        }
    }
}

impl EventLog for FileEventLog {
    async fn append(
        &self,
        did: &Did,
        event_type: EventType,
        event: Vec<u8>,
        sequenced_at: Datetime,
    ) -> Result<RepoSeqRow> {
        let mut state = self.state.lock().await;
        let row = RepoSeqRow {
            seq: state.rows.next_seq(),
            did: did.clone(),
            event_type,
            event,
            invalidated: false,
            sequenced_at: state.rows.monotonic(sequenced_at),
        };
        state.write_frame(&LogFrame::Row(row.clone())).await?;
        state.rows.push(row.clone());
        Ok(row)
    }

    async fn range(
        &self,
        after: Option<i64>,
        until: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RepoSeqRow>> {
        Ok(self.state.lock().await.rows.range(after, until, limit))
    }

    async fn latest_seq(&self) -> Result<Option<i64>> {
        Ok(self.state.lock().await.rows.latest_seq())
    }

    async fn earliest_seq_since(&self, time: &Datetime) -> Result<Option<i64>> {
        Ok(self.state.lock().await.rows.earliest_seq_since(time))
    }

    async fn invalidate(&self, did: &Did) -> Result<usize> {
        let mut state = self.state.lock().await;
        state
            .write_frame(&LogFrame::Invalidate { did: did.clone() })
            .await?;
        Ok(state.rows.invalidate(did))
    }
}
