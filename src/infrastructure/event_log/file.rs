//! File-backed event log
//!
//! One append-only file per market, named `<milestone>_<option>.log`.
//!
//! # Frame Format
//! ```text
//! [len: u32 BE]            // LengthDelimitedCodec header
//! [checksum: u32 LE]       // CRC32C over payload
//! [payload: bytes]         // bincode-encoded MarketEvent
//! ```
//!
//! Only the last frame may be damaged by a crash. When a market file is
//! opened, a final frame that is cut short or fails its checksum is
//! truncated away so later appends start from a clean tail. A bad frame
//! with more bytes after it is corruption: the file is left untouched and
//! the market reports `EventLogError::Corrupted` until it is repaired.
//!
//! The start offset of every frame is kept in memory, so `read_from` seeks
//! straight to the requested sequence instead of decoding the whole file.

use super::{check_batch, EventLog, EventLogError};
use crate::domain::entities::MarketKey;
use crate::domain::events::MarketEvent;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use crc32c::crc32c;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

const OFFSETS_FILE: &str = "offsets.json";

type FrameWriter = FramedWrite<File, LengthDelimitedCodec>;

struct MarketFile {
    market: MarketKey,
    path: PathBuf,
    loaded: bool,
    /// Bytes of valid frames on disk.
    len: u64,
    last_sequence: u64,
    /// `frames[i]` is where the frame of sequence `i + 1` starts.
    frames: Vec<u64>,
    writer: Option<FrameWriter>,
}

#[derive(Default)]
struct Scan {
    frames: Vec<u64>,
    last_sequence: u64,
    valid_len: u64,
    file_len: u64,
}

pub struct FileEventLog {
    dir: PathBuf,
    files: parking_lot::Mutex<HashMap<MarketKey, Arc<AsyncMutex<MarketFile>>>>,
    offsets: AsyncMutex<HashMap<String, u64>>,
}

impl FileEventLog {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let offsets = match fs::read(dir.join(OFFSETS_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| EventLogError::Decode(e.to_string()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(dir = %dir.display(), "event log opened");
        Ok(Self {
            dir,
            files: parking_lot::Mutex::new(HashMap::new()),
            offsets: AsyncMutex::new(offsets),
        })
    }

    fn file_name(market: MarketKey) -> String {
        format!("{}_{}.log", market.milestone_id, market.option_id)
    }

    fn parse_file_name(name: &str) -> Option<MarketKey> {
        let stem = name.strip_suffix(".log")?;
        let (milestone, option) = stem.split_once('_')?;
        Some(MarketKey::new(milestone.parse().ok()?, option.parse().ok()?))
    }

    fn market_file(&self, market: MarketKey) -> Arc<AsyncMutex<MarketFile>> {
        let mut files = self.files.lock();
        files
            .entry(market)
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(MarketFile {
                    market,
                    path: self.dir.join(Self::file_name(market)),
                    loaded: false,
                    len: 0,
                    last_sequence: 0,
                    frames: Vec::new(),
                    writer: None,
                }))
            })
            .clone()
    }

    /// Scans the file once and cuts off a torn tail.
    ///
    /// Corruption anywhere else is returned as an error and nothing on disk
    /// changes; the next access scans again.
    async fn ensure_loaded(file: &mut MarketFile) -> Result<(), EventLogError> {
        if file.loaded {
            return Ok(());
        }
        let scan = scan(file.market, &file.path).await?;
        if scan.valid_len < scan.file_len {
            tracing::warn!(
                path = %file.path.display(),
                valid = scan.valid_len,
                total = scan.file_len,
                "truncating torn event log tail"
            );
            let handle = OpenOptions::new().write(true).open(&file.path).await?;
            handle.set_len(scan.valid_len).await?;
            handle.sync_all().await?;
        }
        file.len = scan.valid_len;
        file.last_sequence = scan.last_sequence;
        file.frames = scan.frames;
        file.writer = None;
        file.loaded = true;
        Ok(())
    }

    async fn persist_offsets(&self, offsets: &HashMap<String, u64>) -> Result<(), EventLogError> {
        let bytes = serde_json::to_vec_pretty(offsets).map_err(|e| EventLogError::Encode(e.to_string()))?;
        let tmp = self.dir.join(format!("{OFFSETS_FILE}.tmp"));
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, self.dir.join(OFFSETS_FILE)).await?;
        Ok(())
    }
}

fn offset_key(consumer: &str, market: MarketKey) -> String {
    format!("{consumer}@{market}")
}

fn encode_frame(event: &MarketEvent) -> Result<Bytes, EventLogError> {
    let payload = bincode::serde::encode_to_vec(event, bincode::config::standard())
        .map_err(|e| EventLogError::Encode(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32_le(crc32c(&payload));
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

fn decode_frame(frame: &[u8]) -> Result<MarketEvent, EventLogError> {
    if frame.len() < 4 {
        return Err(EventLogError::Decode(format!("frame too short: {} bytes", frame.len())));
    }
    let (header, payload) = frame.split_at(4);
    let stored = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if stored != crc32c(payload) {
        return Err(EventLogError::Decode("checksum mismatch".into()));
    }
    let (event, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| EventLogError::Decode(e.to_string()))?;
    Ok(event)
}

/// Validates every frame and records where each one starts.
///
/// A torn tail stops the scan early and shows up as `valid_len < file_len`.
async fn scan(market: MarketKey, path: &Path) -> Result<Scan, EventLogError> {
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Scan::default()),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata().await?.len();
    let mut reader = FramedRead::new(file, LengthDelimitedCodec::new());
    let mut scan = Scan {
        file_len,
        ..Scan::default()
    };

    while let Some(frame) = reader.next().await {
        let offset = scan.valid_len;
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                if runs_past_eof(path, offset, file_len).await? {
                    tracing::warn!(path = %path.display(), offset, error = %e, "incomplete frame at end of event log");
                    break;
                }
                return Err(corrupted(market, offset, e.to_string()));
            }
        };
        let end = offset + 4 + frame.len() as u64;
        let event = match decode_frame(&frame) {
            Ok(event) => event,
            Err(e) if end == file_len => {
                tracing::warn!(path = %path.display(), offset, error = %e, "damaged final frame in event log");
                break;
            }
            Err(e) => return Err(corrupted(market, offset, e.to_string())),
        };
        let expected = scan.last_sequence + 1;
        if event.sequence != expected {
            return Err(corrupted(
                market,
                offset,
                format!("expected sequence {expected}, found {}", event.sequence),
            ));
        }
        scan.frames.push(offset);
        scan.last_sequence = event.sequence;
        scan.valid_len = end;
    }
    Ok(scan)
}

/// True when the frame starting at `offset` cannot be complete: its header
/// is short, or the length it declares runs past the end of the file.
async fn runs_past_eof(path: &Path, offset: u64, file_len: u64) -> Result<bool, EventLogError> {
    if file_len - offset < 4 {
        return Ok(true);
    }
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let declared = file.read_u32().await? as u64;
    Ok(offset + 4 + declared > file_len)
}

fn corrupted(market: MarketKey, offset: u64, reason: String) -> EventLogError {
    tracing::error!(market = %market, offset, reason = %reason, "event log corrupted");
    EventLogError::Corrupted { market, offset, reason }
}

async fn write_frames(writer: &mut FrameWriter, frames: Vec<Bytes>) -> Result<u64, EventLogError> {
    let mut written = 0u64;
    for frame in frames {
        written += 4 + frame.len() as u64;
        writer.feed(frame).await?;
    }
    SinkExt::<Bytes>::flush(writer).await?;
    writer.get_ref().sync_data().await?;
    Ok(written)
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, market: MarketKey, events: &[MarketEvent]) -> Result<u64, EventLogError> {
        let handle = self.market_file(market);
        let mut file = handle.lock().await;
        Self::ensure_loaded(&mut file).await?;
        check_batch(market, file.last_sequence, events)?;
        if events.is_empty() {
            return Ok(file.last_sequence);
        }

        let frames = events.iter().map(encode_frame).collect::<Result<Vec<_>, _>>()?;
        let mut next = file.len;
        let starts: Vec<u64> = frames
            .iter()
            .map(|frame| {
                let start = next;
                next += 4 + frame.len() as u64;
                start
            })
            .collect();
        if file.writer.is_none() {
            let raw = OpenOptions::new().create(true).append(true).open(&file.path).await?;
            file.writer = Some(FramedWrite::new(raw, LengthDelimitedCodec::new()));
        }
        let result = match file.writer.as_mut() {
            Some(writer) => write_frames(writer, frames).await,
            None => Err(EventLogError::Unavailable("writer not open".into())),
        };

        match result {
            Ok(written) => {
                file.len += written;
                file.frames.extend(starts);
                file.last_sequence = events.last().map_or(file.last_sequence, |e| e.sequence);
                Ok(file.last_sequence)
            }
            Err(e) => {
                // 回滚半写入的批次，下次访问时重新扫描
                file.writer = None;
                file.loaded = false;
                if let Ok(raw) = OpenOptions::new().write(true).open(&file.path).await {
                    if let Err(truncate_err) = raw.set_len(file.len).await {
                        tracing::error!(market = %market, error = %truncate_err, "failed to roll back partial batch");
                    }
                }
                Err(e)
            }
        }
    }

    async fn read_from(&self, market: MarketKey, from_sequence: u64) -> Result<Vec<MarketEvent>, EventLogError> {
        let handle = self.market_file(market);
        let mut file = handle.lock().await;
        Self::ensure_loaded(&mut file).await?;

        let first = from_sequence.max(1);
        if first > file.last_sequence {
            return Ok(Vec::new());
        }
        let offset = file.frames[(first - 1) as usize];
        let mut raw = File::open(&file.path).await?;
        raw.seek(SeekFrom::Start(offset)).await?;
        let mut reader = FramedRead::new(raw, LengthDelimitedCodec::new());

        let count = (file.last_sequence - first + 1) as usize;
        let mut events = Vec::with_capacity(count);
        for sequence in first..=file.last_sequence {
            let frame_offset = file.frames[(sequence - 1) as usize];
            let frame = match reader.next().await {
                Some(frame) => frame?,
                None => return Err(corrupted(market, frame_offset, "file shorter than its index".into())),
            };
            let event = decode_frame(&frame).map_err(|e| corrupted(market, frame_offset, e.to_string()))?;
            if event.sequence != sequence {
                return Err(corrupted(
                    market,
                    frame_offset,
                    format!("expected sequence {sequence}, found {}", event.sequence),
                ));
            }
            events.push(event);
        }
        Ok(events)
    }

    async fn last_sequence(&self, market: MarketKey) -> Result<u64, EventLogError> {
        let handle = self.market_file(market);
        let mut file = handle.lock().await;
        Self::ensure_loaded(&mut file).await?;
        Ok(file.last_sequence)
    }

    async fn markets(&self) -> Result<Vec<MarketKey>, EventLogError> {
        let mut markets = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(market) = name.to_str().and_then(Self::parse_file_name) else {
                continue;
            };
            if entry.metadata().await?.len() > 0 {
                markets.push(market);
            }
        }
        markets.sort();
        Ok(markets)
    }

    async fn commit_offset(&self, consumer: &str, market: MarketKey, sequence: u64) -> Result<(), EventLogError> {
        let mut offsets = self.offsets.lock().await;
        let entry = offsets.entry(offset_key(consumer, market)).or_insert(0);
        if sequence <= *entry {
            return Ok(());
        }
        *entry = sequence;
        self.persist_offsets(&offsets).await
    }

    async fn committed_offset(&self, consumer: &str, market: MarketKey) -> Result<u64, EventLogError> {
        let offsets = self.offsets.lock().await;
        Ok(offsets.get(&offset_key(consumer, market)).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::submitted;
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const MARKET: MarketKey = MarketKey::new(12, 3);

    #[tokio::test]
    async fn test_append_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileEventLog::open(dir.path()).await.unwrap();
            log.append(MARKET, &[submitted(MARKET, 1, 1), submitted(MARKET, 2, 2)])
                .await
                .unwrap();
            log.append(MARKET, &[submitted(MARKET, 3, 3)]).await.unwrap();
        }

        let log = FileEventLog::open(dir.path()).await.unwrap();
        assert_eq!(log.last_sequence(MARKET).await.unwrap(), 3);
        let events = log.read_from(MARKET, 1).await.unwrap();
        assert_eq!(events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(events[2], submitted(MARKET, 3, 3));
        assert_eq!(log.markets().await.unwrap(), vec![MARKET]);
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileEventLog::open(dir.path()).await.unwrap();
            log.append(MARKET, &[submitted(MARKET, 1, 1)]).await.unwrap();
        }
        // 模拟崩溃时写了一半的帧
        let path = dir.path().join("12_3.log");
        let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(&[0, 0, 0, 40, 1, 2, 3]).unwrap();
        drop(raw);

        let log = FileEventLog::open(dir.path()).await.unwrap();
        assert_eq!(log.last_sequence(MARKET).await.unwrap(), 1);
        log.append(MARKET, &[submitted(MARKET, 2, 2)]).await.unwrap();
        let events = log.read_from(MARKET, 1).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_damaged_final_frame_is_truncated() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileEventLog::open(dir.path()).await.unwrap();
            log.append(MARKET, &[submitted(MARKET, 1, 1), submitted(MARKET, 2, 2)])
                .await
                .unwrap();
        }
        let path = dir.path().join("12_3.log");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let log = FileEventLog::open(dir.path()).await.unwrap();
        assert_eq!(log.read_from(MARKET, 1).await.unwrap().len(), 1);
        assert_eq!(log.last_sequence(MARKET).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_middle_frame_is_left_alone() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileEventLog::open(dir.path()).await.unwrap();
            for seq in 1..=3 {
                log.append(MARKET, &[submitted(MARKET, seq, seq)]).await.unwrap();
            }
        }
        let path = dir.path().join("12_3.log");
        let mut bytes = std::fs::read(&path).unwrap();
        let original_len = bytes.len();
        let first_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let second = 4 + first_len;
        // 第二帧payload中的一个字节
        bytes[second + 4 + 4 + 1] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let log = FileEventLog::open(dir.path()).await.unwrap();
        let err = log.read_from(MARKET, 1).await.unwrap_err();
        assert!(matches!(err, EventLogError::Corrupted { offset, .. } if offset == second as u64));
        assert!(log.last_sequence(MARKET).await.is_err());
        assert!(log.append(MARKET, &[submitted(MARKET, 2, 9)]).await.is_err());
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, original_len);
    }

    #[tokio::test]
    async fn test_sequence_gap_on_disk_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut bytes = BytesMut::new();
        for seq in [1, 3] {
            let frame = encode_frame(&submitted(MARKET, seq, seq)).unwrap();
            bytes.put_u32(frame.len() as u32);
            bytes.extend_from_slice(&frame);
        }
        std::fs::write(dir.path().join("12_3.log"), &bytes).unwrap();

        let log = FileEventLog::open(dir.path()).await.unwrap();
        let err = log.last_sequence(MARKET).await.unwrap_err();
        assert!(matches!(err, EventLogError::Corrupted { .. }));
        assert_eq!(std::fs::metadata(dir.path().join("12_3.log")).unwrap().len() as usize, bytes.len());
    }

    #[tokio::test]
    async fn test_read_from_seeks_by_sequence() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileEventLog::open(dir.path()).await.unwrap();
            log.append(MARKET, &[submitted(MARKET, 1, 1), submitted(MARKET, 2, 2)])
                .await
                .unwrap();
            log.append(MARKET, &[submitted(MARKET, 3, 3), submitted(MARKET, 4, 4), submitted(MARKET, 5, 5)])
                .await
                .unwrap();
        }

        let log = FileEventLog::open(dir.path()).await.unwrap();
        let tail = log.read_from(MARKET, 4).await.unwrap();
        assert_eq!(tail, vec![submitted(MARKET, 4, 4), submitted(MARKET, 5, 5)]);
        assert!(log.read_from(MARKET, 6).await.unwrap().is_empty());
        assert_eq!(log.read_from(MARKET, 0).await.unwrap().len(), 5);

        log.append(MARKET, &[submitted(MARKET, 6, 6)]).await.unwrap();
        assert_eq!(log.read_from(MARKET, 6).await.unwrap(), vec![submitted(MARKET, 6, 6)]);
        assert_eq!(log.read_from(MARKET, 5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sequence_conflict() {
        let dir = TempDir::new().unwrap();
        let log = FileEventLog::open(dir.path()).await.unwrap();
        log.append(MARKET, &[submitted(MARKET, 1, 1)]).await.unwrap();
        let err = log.append(MARKET, &[submitted(MARKET, 1, 2)]).await.unwrap_err();
        assert!(matches!(err, EventLogError::SequenceConflict { expected: 2, got: 1, .. }));
    }

    #[tokio::test]
    async fn test_offsets_persist() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileEventLog::open(dir.path()).await.unwrap();
            log.commit_offset("settlement", MARKET, 7).await.unwrap();
        }
        let log = FileEventLog::open(dir.path()).await.unwrap();
        assert_eq!(log.committed_offset("settlement", MARKET).await.unwrap(), 7);
        assert!(log.markets().await.unwrap().is_empty());
    }

    #[test]
    fn test_file_name_round_trip() {
        let name = FileEventLog::file_name(MARKET);
        assert_eq!(FileEventLog::parse_file_name(&name), Some(MARKET));
        assert_eq!(FileEventLog::parse_file_name("offsets.json"), None);
    }
}
