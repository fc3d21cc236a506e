//! On-disk spool: an ordered list of segments plus a replay cursor
//!
//! The newest segment is the active one and receives appends. Replay only
//! ever reads sealed segments, so the flusher reads files without holding
//! the state lock and appends are never blocked by replay I/O.
//!
//! The cursor file (`replay.cursor`, `<seq> <offset>`) is advisory. On open
//! the segment list comes from a directory scan; a cursor that does not land
//! on a record boundary of a known segment is ignored and replay restarts at
//! the oldest segment.

use super::segment::{self, ReadOutcome, SegmentReader, SegmentWriter, HEADER_LEN};
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use crate::core::selflog;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCK_FILE: &str = "spool.lock";
const CURSOR_FILE: &str = "replay.cursor";
const CURSOR_TMP_FILE: &str = "replay.cursor.tmp";

#[derive(Debug, Clone)]
struct Segment {
    seq: u64,
    path: PathBuf,
    bytes: u64,
    records: u64,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    seq: u64,
    offset: u64,
    /// Records of `seq` already delivered
    consumed: u64,
}

impl Cursor {
    fn start(seq: u64) -> Self {
        Self {
            seq,
            offset: HEADER_LEN,
            consumed: 0,
        }
    }
}

struct Active {
    segment: Segment,
    writer: SegmentWriter,
}

struct State {
    sealed: VecDeque<Segment>,
    active: Option<Active>,
    next_seq: u64,
    total_bytes: u64,
    backlog: u64,
    cursor: Cursor,
}

/// What `open` found on disk
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub segments: usize,
    pub records: u64,
    /// Torn tails, corrupt records and stale cursors that were worked around
    pub problems: Vec<String>,
}

/// One record read for replay; `event` is `None` when the payload no longer decodes
pub(crate) struct BatchRecord {
    pub event: Option<Arc<LogEvent>>,
    pub end: u64,
}

pub(crate) struct Batch {
    pub seq: u64,
    pub records: Vec<BatchRecord>,
    /// The reader reached the end of the segment
    pub exhausted: bool,
}

pub(crate) struct Spool {
    dir: PathBuf,
    /// Held for the spool's lifetime; the OS lock is released when it closes
    _lock: File,
    segment_size: u64,
    max_bytes: u64,
    state: Mutex<State>,
}

fn io_error(operation: &str, path: &Path, source: io::Error) -> LoggerError {
    LoggerError::io_operation(operation, path.display().to_string(), source)
}

impl Spool {
    pub(crate) fn open(
        dir: &Path,
        segment_size: u64,
        max_bytes: u64,
    ) -> Result<(Self, RecoveryReport)> {
        fs::create_dir_all(dir).map_err(|e| io_error("creating spool directory", dir, e))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| io_error("opening spool lock", &lock_path, e))?;
        lock.try_lock_exclusive()
            .map_err(|_| LoggerError::spool_lock(dir.display().to_string()))?;

        let mut report = RecoveryReport::default();
        let listed = list_segments(dir)?;
        let next_seq = listed.last().map_or(1, |(seq, _)| seq + 1);

        let mut segments = VecDeque::new();
        for (seq, path) in listed {
            if let Some(segment) = recover_segment(seq, path, &mut report) {
                segments.push_back(segment);
            }
        }

        let cursor = resolve_cursor(dir, &mut segments, &mut report);
        let total_bytes = segments.iter().map(|s| s.bytes).sum();
        let backlog = segments
            .iter()
            .map(|s| s.records)
            .sum::<u64>()
            .saturating_sub(cursor.consumed);

        report.segments = segments.len();
        report.records = backlog;

        let spool = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            segment_size,
            max_bytes,
            state: Mutex::new(State {
                sealed: segments,
                active: None,
                next_seq,
                total_bytes,
                backlog,
                cursor,
            }),
        };
        Ok((spool, report))
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records written but not yet replayed
    pub(crate) fn backlog(&self) -> u64 {
        self.state.lock().backlog
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    /// Append one serialized event
    ///
    /// Fails with `SpoolFull` when the record would push the spool past its
    /// byte budget.
    pub(crate) fn append(&self, payload: &[u8]) -> Result<()> {
        let len = segment::record_len(payload);
        let mut state = self.state.lock();

        let rotate = match &state.active {
            Some(active) => {
                active.segment.records > 0 && active.writer.len() + len > self.segment_size
            }
            None => true,
        };
        let needed = len + if rotate { HEADER_LEN } else { 0 };
        if state.total_bytes + needed > self.max_bytes {
            return Err(LoggerError::spool_full(state.total_bytes + needed, self.max_bytes));
        }

        if rotate {
            self.rotate(&mut state)?;
        }
        let active = state
            .active
            .as_mut()
            .ok_or_else(|| LoggerError::other("spool has no active segment"))?;
        let written = active
            .writer
            .append(payload)
            .map_err(|e| io_error("appending to spool", &active.segment.path, e))?;
        active.segment.records += 1;
        active.segment.bytes += written;
        state.total_bytes += written;
        state.backlog += 1;
        Ok(())
    }

    fn rotate(&self, state: &mut State) -> Result<()> {
        self.seal_active(state);

        let seq = state.next_seq;
        let path = self.dir.join(segment::file_name(seq));
        let writer =
            SegmentWriter::create(&path).map_err(|e| io_error("creating spool segment", &path, e))?;
        state.next_seq += 1;
        state.total_bytes += HEADER_LEN;
        state.active = Some(Active {
            segment: Segment {
                seq,
                path,
                bytes: HEADER_LEN,
                records: 0,
            },
            writer,
        });
        Ok(())
    }

    /// Move the active segment to the sealed list (or delete it if empty)
    fn seal_active(&self, state: &mut State) {
        let Some(mut active) = state.active.take() else {
            return;
        };
        if let Err(e) = active.writer.sync() {
            selflog::report(
                "spool",
                format_args!("sync of {} failed: {}", active.segment.path.display(), e),
            );
        }
        if active.segment.records == 0 {
            state.total_bytes = state.total_bytes.saturating_sub(active.segment.bytes);
            remove_file(&active.segment.path);
        } else {
            state.sealed.push_back(active.segment);
        }
    }

    /// Read up to `max` records starting at the cursor
    ///
    /// Seals the active segment when it is the only one holding backlog.
    pub(crate) fn next_batch(&self, max: usize) -> Result<Option<Batch>> {
        let (segment, offset) = {
            let mut state = self.state.lock();
            if state.backlog == 0 {
                return Ok(None);
            }
            if state.sealed.is_empty() {
                self.seal_active(&mut state);
            }
            let Some(front) = state.sealed.front().cloned() else {
                state.backlog = 0;
                return Ok(None);
            };
            if state.cursor.seq != front.seq {
                state.cursor = Cursor::start(front.seq);
            }
            (front, state.cursor.offset)
        };

        let mut reader = SegmentReader::open_at(&segment.path, offset).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                LoggerError::spool_corrupt(segment.path.display().to_string(), e.to_string())
            } else {
                io_error("opening spool segment for replay", &segment.path, e)
            }
        })?;
        let mut records = Vec::with_capacity(max.min(segment.records as usize));
        let mut exhausted = false;
        while records.len() < max {
            let outcome = reader
                .next_record()
                .map_err(|e| io_error("reading spool segment", &segment.path, e))?;
            match outcome {
                ReadOutcome::Record { payload, end } => {
                    let event = match serde_json::from_slice::<LogEvent>(&payload) {
                        Ok(event) => Some(Arc::new(event)),
                        Err(e) => {
                            selflog::report(
                                "spool",
                                format_args!(
                                    "undecodable record in {} skipped: {}",
                                    segment.path.display(),
                                    e
                                ),
                            );
                            None
                        }
                    };
                    records.push(BatchRecord { event, end });
                }
                ReadOutcome::End => {
                    exhausted = true;
                    break;
                }
                ReadOutcome::Torn | ReadOutcome::Corrupt(_) => {
                    let problem = LoggerError::spool_corrupt(
                        segment.path.display().to_string(),
                        format!("unreadable record at offset {}, rest skipped", reader.offset()),
                    );
                    selflog::report("spool", format_args!("{}", problem));
                    exhausted = true;
                    break;
                }
            }
        }
        if !exhausted && reader.offset() >= segment.bytes {
            exhausted = true;
        }

        Ok(Some(Batch {
            seq: segment.seq,
            records,
            exhausted,
        }))
    }

    /// Record that the first `count` records of `batch` were handled
    ///
    /// Deletes the segment once it is fully handled. Returns how many
    /// records left the backlog; anything above `count` is an unreadable
    /// tail that was discarded with the segment.
    pub(crate) fn commit(&self, batch: &Batch, count: usize) -> u64 {
        let mut state = self.state.lock();
        let Some(front) = state.sealed.front().cloned() else {
            return 0;
        };
        if front.seq != batch.seq || state.cursor.seq != batch.seq {
            // segment was dropped for capacity while being replayed
            return 0;
        }

        let count = count.min(batch.records.len());
        if count > 0 {
            state.cursor.offset = batch.records[count - 1].end;
            state.cursor.consumed += count as u64;
        }
        let mut released = count as u64;

        let finished = (batch.exhausted && count == batch.records.len())
            || state.cursor.consumed >= front.records;
        if finished {
            released = front.records.saturating_sub(state.cursor.consumed - count as u64);
            state.sealed.pop_front();
            state.total_bytes = state.total_bytes.saturating_sub(front.bytes);
            remove_file(&front.path);
            let next = state.sealed.front().map_or(front.seq + 1, |s| s.seq);
            state.cursor = Cursor::start(next);
        }
        state.backlog = state.backlog.saturating_sub(released);

        let cursor = state.cursor;
        drop(state);
        self.store_cursor(cursor);
        released
    }

    /// Delete the oldest segment, returning how many undelivered records it held
    pub(crate) fn drop_oldest(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if state.sealed.is_empty() {
            self.seal_active(&mut state);
        }
        let oldest = state.sealed.pop_front()?;
        let consumed = if state.cursor.seq == oldest.seq {
            state.cursor.consumed
        } else {
            0
        };
        let dropped = oldest.records.saturating_sub(consumed);
        state.total_bytes = state.total_bytes.saturating_sub(oldest.bytes);
        state.backlog = state.backlog.saturating_sub(dropped);
        let next = state.sealed.front().map_or(oldest.seq + 1, |s| s.seq);
        state.cursor = Cursor::start(next);
        remove_file(&oldest.path);

        let cursor = state.cursor;
        drop(state);
        self.store_cursor(cursor);
        Some(dropped)
    }

    /// Push buffered segment data to disk
    pub(crate) fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(active) = state.active.as_mut() {
            active
                .writer
                .sync()
                .map_err(|e| io_error("syncing spool segment", &active.segment.path, e))?;
        }
        Ok(())
    }

    fn store_cursor(&self, cursor: Cursor) {
        let tmp = self.dir.join(CURSOR_TMP_FILE);
        let target = self.dir.join(CURSOR_FILE);
        let result = fs::write(&tmp, format!("{} {}", cursor.seq, cursor.offset))
            .and_then(|()| fs::rename(&tmp, &target));
        if let Err(e) = result {
            selflog::report("spool", format_args!("cursor update failed: {}", e));
        }
    }
}

fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            selflog::report(
                "spool",
                format_args!("failed to delete {}: {}", path.display(), e),
            );
        }
    }
}

/// Segment files in the directory, oldest first
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(|e| io_error("listing spool directory", dir, e))?;
    let mut segments: Vec<(u64, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            segment::parse_file_name(name.to_str()?).map(|seq| (seq, entry.path()))
        })
        .collect();
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// Validate a segment found on disk, cutting it back to its last good record
fn recover_segment(seq: u64, path: PathBuf, report: &mut RecoveryReport) -> Option<Segment> {
    let scan = match segment::scan(&path) {
        Ok(scan) => scan,
        Err(e) => {
            report
                .problems
                .push(format!("{}: unreadable segment set aside: {}", path.display(), e));
            let mut aside = path.clone().into_os_string();
            aside.push(".corrupt");
            if let Err(e) = fs::rename(&path, &aside) {
                selflog::report(
                    "spool",
                    format_args!("failed to set aside {}: {}", path.display(), e),
                );
            }
            return None;
        }
    };

    if let Some(problem) = scan.problem {
        report.problems.push(format!("{}: {}", path.display(), problem));
        let truncated = OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_len(scan.valid_len));
        if let Err(e) = truncated {
            selflog::report(
                "spool",
                format_args!("failed to truncate {}: {}", path.display(), e),
            );
        }
    }

    if scan.records == 0 {
        remove_file(&path);
        return None;
    }
    Some(Segment {
        seq,
        path,
        bytes: scan.valid_len,
        records: scan.records,
    })
}

fn load_cursor(dir: &Path) -> Option<(u64, u64)> {
    let text = fs::read_to_string(dir.join(CURSOR_FILE)).ok()?;
    let mut parts = text.split_whitespace();
    let seq = parts.next()?.parse().ok()?;
    let offset = parts.next()?.parse().ok()?;
    Some((seq, offset))
}

/// Number of records before `offset`, if `offset` is a record boundary
fn records_before(path: &Path, offset: u64) -> Option<u64> {
    let mut reader = SegmentReader::open_at(path, HEADER_LEN).ok()?;
    let mut count = 0;
    while reader.offset() < offset {
        match reader.next_record().ok()? {
            ReadOutcome::Record { .. } => count += 1,
            _ => return None,
        }
    }
    (reader.offset() == offset).then_some(count)
}

fn resolve_cursor(
    dir: &Path,
    segments: &mut VecDeque<Segment>,
    report: &mut RecoveryReport,
) -> Cursor {
    let oldest = segments.front().map_or(1, |s| s.seq);
    let Some((seq, offset)) = load_cursor(dir) else {
        return Cursor::start(oldest);
    };

    // the cursor only moves past a segment once it is fully delivered
    while segments.front().is_some_and(|s| s.seq < seq) {
        if let Some(drained) = segments.pop_front() {
            remove_file(&drained.path);
        }
    }

    match segments.front() {
        Some(front) if front.seq == seq => match records_before(&front.path, offset) {
            Some(consumed) => Cursor {
                seq,
                offset,
                consumed,
            },
            None => {
                report
                    .problems
                    .push(format!("stale replay cursor {} {}, replaying from start", seq, offset));
                Cursor::start(seq)
            }
        },
        Some(front) => Cursor::start(front.seq),
        None => Cursor::start(seq),
    }
}
