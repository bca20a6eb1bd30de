//! File-backed span log.
//!
//! One directory per chunk with two append-only files, `points.log` and
//! `meta.log`. Every appended batch becomes one length-prefixed,
//! CRC32-checked frame; replay walks frames from the start of the file
//! and stops cleanly at end of stream.

use super::{SpanLog, SpanLogFactory};
use crate::error::{Result, StitchError};
use crate::span::{Point, SpanMeta};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Frames larger than this are treated as corruption rather than
/// allocated blindly.
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Configuration for file-backed logs.
#[derive(Debug, Clone)]
pub struct FileLogConfig {
    /// Root directory; each chunk gets a subdirectory beneath it.
    pub root: PathBuf,
    /// Buffer size for the stream writers.
    pub buffer_size: usize,
    /// Whether `sync` issues `sync_data` (disable for tests on slow disks).
    pub sync_on_request: bool,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/stitch/chunks"),
            buffer_size: 64 * 1024,
            sync_on_request: true,
        }
    }
}

impl FileLogConfig {
    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }
}

/// One append-only framed stream.
struct Stream {
    path: PathBuf,
    name: &'static str,
    writer: Mutex<Option<BufWriter<File>>>,
    reader: Mutex<ReaderState>,
}

#[derive(Default)]
struct ReaderState {
    file: Option<BufReader<File>>,
    offset: u64,
}

impl Stream {
    fn create(dir: &Path, name: &'static str, buffer_size: usize) -> Result<Self> {
        let path = dir.join(format!("{name}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StitchError::LogCreate {
                path: path.clone(),
                cause: e.to_string(),
            })?;

        file.try_lock_exclusive().map_err(|e| StitchError::LogCreate {
            path: path.clone(),
            cause: format!("failed to lock: {e}"),
        })?;

        Ok(Self {
            path,
            name,
            writer: Mutex::new(Some(BufWriter::with_capacity(buffer_size, file))),
            reader: Mutex::new(ReaderState::default()),
        })
    }

    fn append_frame(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| StitchError::LogAppend {
            stream: self.name,
            cause: "log is closed".to_string(),
        })?;

        let crc = crc32fast::hash(payload);
        writer
            .write_u32::<LittleEndian>(payload.len() as u32)
            .and_then(|()| writer.write_u32::<LittleEndian>(crc))
            .and_then(|()| writer.write_all(payload))
            .map_err(|e| StitchError::LogAppend {
                stream: self.name,
                cause: e.to_string(),
            })
    }

    /// Read the next frame, opening the reader (and flushing the writer)
    /// on first use.
    fn next_frame(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.reader.lock();

        if state.file.is_none() {
            // Writes buffered so far must be visible to the reader.
            if let Some(writer) = self.writer.lock().as_mut() {
                writer.flush().map_err(|e| StitchError::LogRead {
                    stream: self.name,
                    cause: format!("flush before replay: {e}"),
                })?;
            }
            let file = File::open(&self.path).map_err(|e| StitchError::LogRead {
                stream: self.name,
                cause: format!("open {}: {e}", self.path.display()),
            })?;
            state.file = Some(BufReader::new(file));
        }

        let offset = state.offset;
        let Some(reader) = state.file.as_mut() else {
            return Err(StitchError::LogRead {
                stream: self.name,
                cause: "replay cursor unavailable".to_string(),
            });
        };

        let len = match reader.read_u32::<LittleEndian>() {
            Ok(len) => len,
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(StitchError::LogRead {
                    stream: self.name,
                    cause: e.to_string(),
                });
            }
        };

        if len > MAX_FRAME_SIZE {
            return Err(StitchError::LogCorruption {
                offset,
                cause: format!("frame length {len} exceeds limit"),
            });
        }

        let stored_crc = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| StitchError::LogCorruption {
                offset,
                cause: format!("truncated frame header: {e}"),
            })?;

        let mut payload = vec![0u8; len as usize];
        reader
            .read_exact(&mut payload)
            .map_err(|e| StitchError::LogCorruption {
                offset,
                cause: format!("truncated frame payload: {e}"),
            })?;

        if crc32fast::hash(&payload) != stored_crc {
            return Err(StitchError::LogCorruption {
                offset,
                cause: "checksum mismatch".to_string(),
            });
        }

        state.offset = offset + 8 + u64::from(len);
        Ok(Some(payload))
    }

    fn sync(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(writer) = guard.as_mut() {
            writer.flush().map_err(|e| StitchError::LogAppend {
                stream: self.name,
                cause: e.to_string(),
            })?;
            writer
                .get_ref()
                .sync_data()
                .map_err(|e| StitchError::LogAppend {
                    stream: self.name,
                    cause: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn close(&self) {
        let mut guard = self.writer.lock();
        if let Some(mut writer) = guard.take() {
            let _ = writer.flush();
            let _ = fs2::FileExt::unlock(writer.get_ref());
        }
        self.reader.lock().file = None;
    }
}

/// File-backed implementation of [`SpanLog`].
pub struct FileSpanLog {
    dir: PathBuf,
    points: Stream,
    meta: Stream,
    sync_on_request: bool,
}

impl FileSpanLog {
    /// Create the log directory and both stream files.
    pub fn create(dir: impl Into<PathBuf>, config: &FileLogConfig) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StitchError::LogCreate {
            path: dir.clone(),
            cause: e.to_string(),
        })?;

        Ok(Self {
            points: Stream::create(&dir, "points", config.buffer_size)?,
            meta: Stream::create(&dir, "meta", config.buffer_size)?,
            dir,
            sync_on_request: config.sync_on_request,
        })
    }

    /// Path of the backing directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SpanLog for FileSpanLog {
    fn put(&self, pts: &[Point]) -> Result<()> {
        let payload =
            serde_json::to_vec(pts).map_err(|e| StitchError::Serialization(e.to_string()))?;
        self.points.append_frame(&payload)
    }

    fn get(&self) -> Result<Option<Vec<Point>>> {
        match self.points.next_frame()? {
            None => Ok(None),
            Some(payload) => serde_json::from_slice(&payload)
                .map(Some)
                .map_err(|e| StitchError::Serialization(e.to_string())),
        }
    }

    fn put_meta(&self, metas: &[SpanMeta]) -> Result<()> {
        let mut payload =
            Vec::with_capacity(4 + metas.len() * crate::span::META_ENCODED_SIZE);
        payload
            .write_u32::<LittleEndian>(metas.len() as u32)
            .and_then(|()| {
                for meta in metas {
                    meta.encode_to(&mut payload)?;
                }
                Ok(())
            })
            .map_err(|e| StitchError::Serialization(e.to_string()))?;
        self.meta.append_frame(&payload)
    }

    fn get_meta(&self) -> Result<Option<Vec<SpanMeta>>> {
        let payload = match self.meta.next_frame()? {
            None => return Ok(None),
            Some(payload) => payload,
        };

        let mut cursor = payload.as_slice();
        let count = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| StitchError::Serialization(e.to_string()))?;

        let mut metas = Vec::with_capacity(count as usize);
        for _ in 0..count {
            metas.push(
                SpanMeta::decode_from(&mut cursor)
                    .map_err(|e| StitchError::Serialization(e.to_string()))?,
            );
        }
        Ok(Some(metas))
    }

    fn sync(&self) -> Result<()> {
        if !self.sync_on_request {
            return Ok(());
        }
        self.points.sync()?;
        self.meta.sync()
    }

    fn close(&self) {
        self.points.close();
        self.meta.close();
    }

    fn destroy(&self) -> Result<()> {
        self.close();
        std::fs::remove_dir_all(&self.dir).map_err(|e| StitchError::LogDestroy {
            path: self.dir.clone(),
            cause: e.to_string(),
        })
    }
}

/// Factory creating one `chunk_<start>_<seq>` directory per window.
pub struct FileLogFactory {
    config: FileLogConfig,
    sequence: AtomicU64,
}

impl FileLogFactory {
    /// Create a factory rooted at `config.root`.
    #[must_use]
    pub fn new(config: FileLogConfig) -> Self {
        Self {
            config,
            sequence: AtomicU64::new(0),
        }
    }
}

impl SpanLogFactory for FileLogFactory {
    fn create(&self, window_start_ns: u64) -> Result<Box<dyn SpanLog>> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .config
            .root
            .join(format!("chunk_{window_start_ns:016x}_{seq:04}"));
        Ok(Box::new(FileSpanLog::create(dir, &self.config)?))
    }
}
