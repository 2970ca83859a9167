//! Sensor buffering, log archival and live display window
//!
//! A [`SensorArchive`] keeps one [`RowBuffer`] per sensor field. It runs in
//! one of two modes:
//!
//! - **Recording**: full fields are appended to per-field log files
//!   `log_<yymmddHHMMSS>_<field>.txt` on [`flush`](SensorArchive::flush),
//!   one tab-separated row per line. The prefix is the local time the
//!   archive was created, so every (re)connect starts a new set of logs.
//! - **Rolling**: no files; the display loop calls
//!   [`shift`](SensorArchive::shift) to drop the oldest row once full.
//!
//! Pushing into a full field is rejected before anything is modified, so
//! callers check [`is_full`](SensorArchive::is_full) and flush or shift
//! first.

mod buffer;

pub use buffer::RowBuffer;

use crate::error::{Error, Result};
use crate::protocol::sensor::{Block, SensorFrame};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Default rows per field before a flush
pub const DEFAULT_CAPACITY: usize = 500;

/// Default number of rows averaged by [`SensorArchive::filter`]
pub const DEFAULT_FILTER_SIZE: usize = 5;

/// One archived column group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorField {
    Forc,
    Disp,
    Foot,
    Imu,
    ForcTime,
    DispTime,
    FootTime,
    ImuTime,
}

impl SensorField {
    pub const ALL: [SensorField; 8] = [
        SensorField::Forc,
        SensorField::Disp,
        SensorField::Foot,
        SensorField::Imu,
        SensorField::ForcTime,
        SensorField::DispTime,
        SensorField::FootTime,
        SensorField::ImuTime,
    ];

    /// Name used in log file names
    pub const fn name(self) -> &'static str {
        match self {
            SensorField::Forc => "forc",
            SensorField::Disp => "disp",
            SensorField::Foot => "foot",
            SensorField::Imu => "imu",
            SensorField::ForcTime => "forc_time",
            SensorField::DispTime => "disp_time",
            SensorField::FootTime => "foot_time",
            SensorField::ImuTime => "imu_time",
        }
    }

    /// Frame block whose dirty flag governs this field
    pub const fn block(self) -> Block {
        match self {
            SensorField::Forc | SensorField::ForcTime => Block::Forc,
            SensorField::Disp | SensorField::DispTime => Block::Disp,
            SensorField::Foot | SensorField::FootTime => Block::Foot,
            SensorField::Imu | SensorField::ImuTime => Block::Imu,
        }
    }

    pub const fn is_time(self) -> bool {
        matches!(
            self,
            SensorField::ForcTime
                | SensorField::DispTime
                | SensorField::FootTime
                | SensorField::ImuTime
        )
    }

    /// Values per row
    pub const fn width(self) -> usize {
        if self.is_time() {
            1
        } else {
            self.block().value_count()
        }
    }

    const fn index(self) -> usize {
        self as usize
    }

    /// This field's values in `frame`
    pub fn read(self, frame: &SensorFrame) -> &[f32] {
        let block = self.block();
        match self {
            SensorField::ForcTime => std::slice::from_ref(&frame.forc_time),
            SensorField::DispTime => std::slice::from_ref(&frame.disp_time),
            SensorField::FootTime => std::slice::from_ref(&frame.foot_time),
            SensorField::ImuTime => std::slice::from_ref(&frame.imu_time),
            _ => frame.block(block).1,
        }
    }

    /// Overwrite this field's values in `frame`
    pub fn write(self, frame: &mut SensorFrame, row: &[f32]) {
        let (time, values) = frame.block_mut(self.block());
        if self.is_time() {
            *time = row[0];
        } else {
            values.copy_from_slice(row);
        }
    }
}

/// Where a recording archive writes
#[derive(Debug, Clone)]
struct LogSink {
    dir: PathBuf,
    prefix: String,
}

impl LogSink {
    fn path(&self, field: SensorField) -> PathBuf {
        self.dir
            .join(format!("log_{}_{}.txt", self.prefix, field.name()))
    }

    fn append(&self, field: SensorField, buffer: &RowBuffer) -> Result<()> {
        let path = self.path(field);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut out = BufWriter::new(file);
        for row in buffer.rows() {
            let mut first = true;
            for v in row {
                if !first {
                    out.write_all(b"\t")?;
                }
                write!(out, "{:.18e}", f64::from(*v))?;
                first = false;
            }
            out.write_all(b"\n")?;
        }
        out.flush()?;
        log::info!("{} updated", path.display());
        Ok(())
    }
}

/// Per-field sensor buffers with optional log archival
#[derive(Debug, Clone)]
pub struct SensorArchive {
    buffers: Vec<RowBuffer>,
    capacity: usize,
    sink: Option<LogSink>,
}

impl SensorArchive {
    fn with_sink(capacity: usize, sink: Option<LogSink>) -> Self {
        let buffers = SensorField::ALL
            .iter()
            .map(|field| RowBuffer::new(field.width(), capacity))
            .collect();
        Self {
            buffers,
            capacity,
            sink,
        }
    }

    /// Archive that logs to `dir`, named after the current local time
    pub fn recording<P: AsRef<Path>>(dir: P, capacity: usize) -> Result<Self> {
        let prefix = chrono::Local::now().format("%y%m%d%H%M%S").to_string();
        Self::recording_with_prefix(dir, capacity, prefix)
    }

    /// Archive that logs to `dir` under an explicit file prefix
    pub fn recording_with_prefix<P: AsRef<Path>>(
        dir: P,
        capacity: usize,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("archive capacity must be non-zero".to_string()));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let sink = LogSink {
            dir,
            prefix: prefix.into(),
        };
        log::debug!("Sensor logs: {}", sink.path(SensorField::Forc).display());
        Ok(Self::with_sink(capacity, Some(sink)))
    }

    /// In-memory window for live display
    pub fn rolling(capacity: usize) -> Self {
        Self::with_sink(capacity.max(1), None)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_recording(&self) -> bool {
        self.sink.is_some()
    }

    /// Log file for `field`, if recording
    pub fn log_path(&self, field: SensorField) -> Option<PathBuf> {
        self.sink.as_ref().map(|sink| sink.path(field))
    }

    pub fn buffer(&self, field: SensorField) -> &RowBuffer {
        &self.buffers[field.index()]
    }

    /// Stored rows of `field`, oldest first
    pub fn rows(&self, field: SensorField) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        self.buffer(field).rows()
    }

    pub fn len(&self, field: SensorField) -> usize {
        self.buffer(field).len()
    }

    /// True if any field is full; flush or shift before the next push
    pub fn is_full(&self) -> bool {
        self.buffers.iter().any(RowBuffer::is_full)
    }

    /// True if any field is empty; `filter` and `last` return `None`
    pub fn is_empty(&self) -> bool {
        self.buffers.iter().any(RowBuffer::is_empty)
    }

    /// Append the dirty blocks of `frame` and clear their flags
    pub fn push(&mut self, frame: &mut SensorFrame) -> Result<()> {
        let dirty = |field: &&SensorField| frame.is_dirty(field.block());

        if let Some(field) = SensorField::ALL
            .iter()
            .filter(dirty)
            .find(|field| self.buffers[field.index()].is_full())
        {
            return Err(Error::BufferFull(field.name()));
        }

        for field in SensorField::ALL.iter().filter(dirty) {
            self.buffers[field.index()].push(field.read(frame))?;
        }
        frame.clear_all_dirty();
        Ok(())
    }

    /// Write every full field to its log and reset it
    ///
    /// Fields that are not full are untouched. A rolling archive just
    /// resets. If a write fails the remaining fields are still handled and
    /// the first error is returned; the failed rows are dropped.
    pub fn flush(&mut self) -> Result<()> {
        let mut result = Ok(());
        for field in SensorField::ALL {
            let buffer = &mut self.buffers[field.index()];
            if !buffer.is_full() {
                continue;
            }
            if let Some(sink) = &self.sink {
                if let Err(e) = sink.append(field, buffer) {
                    log::warn!("Failed to write {} log: {}", field.name(), e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
            buffer.clear();
        }
        result
    }

    /// Drop the oldest row of every full field
    pub fn shift(&mut self) {
        for buffer in &mut self.buffers {
            if buffer.is_full() {
                buffer.shift();
            }
        }
    }

    /// Per-field mean of the newest `n` rows, as a fully dirty frame
    pub fn filter(&self, n: usize) -> Option<SensorFrame> {
        let mut frame = SensorFrame::new();
        for field in SensorField::ALL {
            let mean = self.buffer(field).mean_of_last(n)?;
            field.write(&mut frame, &mean);
        }
        frame.mark_all_dirty();
        Some(frame)
    }

    /// Newest row of every field, as a fully dirty frame
    pub fn last(&self) -> Option<SensorFrame> {
        let mut frame = SensorFrame::new();
        for field in SensorField::ALL {
            let row = self.buffer(field).last()?;
            field.write(&mut frame, row);
        }
        frame.mark_all_dirty();
        Some(frame)
    }
}
