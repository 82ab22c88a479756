// src/profiler.rs
//! CPU block profiler.
//!
//! Named blocks nest; each closed block becomes a [`ProfileRecord`] while capture is on.
//! Blocks opened while capture is off are tracked for balance but never recorded.
//! [`Profiler::dump_to_file`] writes the capture as JSON and stops it.

use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logging::{LogOnce, CORE};

/// Records kept before the oldest are dropped.
const MAX_RECORDS: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    /// Nesting level; 0 for outermost blocks.
    pub depth: u32,
    /// Microseconds since the profiler was created.
    pub start_us: u64,
    pub duration_us: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProfileDump {
    pub records: Vec<ProfileRecord>,
    /// Records discarded because the capture outgrew its buffer.
    pub dropped: u64,
}

struct OpenBlock {
    name: String,
    start: Instant,
    captured: bool,
}

struct State {
    capturing: bool,
    stack: Vec<OpenBlock>,
    records: Vec<ProfileRecord>,
    dropped: u64,
}

pub struct Profiler {
    epoch: Instant,
    state: Mutex<State>,
    warned: LogOnce,
}

impl Profiler {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(State {
                capturing: false,
                stack: Vec::new(),
                records: Vec::new(),
                dropped: 0,
            }),
            warned: LogOnce::new(16),
        }
    }

    pub fn start_capture(&self) {
        self.state.lock().capturing = true;
    }

    pub fn stop_capture(&self) {
        self.state.lock().capturing = false;
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().capturing
    }

    pub fn begin_block(&self, name: &str) {
        let mut state = self.state.lock();
        let captured = state.capturing;
        state.stack.push(OpenBlock {
            name: name.to_string(),
            start: Instant::now(),
            captured,
        });
    }

    /// Closes the innermost open block.
    pub fn end_block(&self) {
        let end = Instant::now();
        let mut state = self.state.lock();
        let Some(block) = state.stack.pop() else {
            self.warned.warn(CORE, "unbalanced", "profiler end_block without a matching begin_block");
            return;
        };
        if !block.captured {
            return;
        }
        if state.records.len() >= MAX_RECORDS {
            state.records.remove(0);
            state.dropped += 1;
        }
        let record = ProfileRecord {
            name: block.name,
            depth: state.stack.len() as u32,
            start_us: block.start.duration_since(self.epoch).as_micros() as u64,
            duration_us: end.duration_since(block.start).as_micros() as u64,
        };
        state.records.push(record);
    }

    /// Opens a block that closes when the guard drops.
    pub fn scope(&self, name: &str) -> ProfileScope<'_> {
        self.begin_block(name);
        ProfileScope { profiler: self }
    }

    /// Closed records, oldest first.
    pub fn records(&self) -> Vec<ProfileRecord> {
        self.state.lock().records.clone()
    }

    /// Total captured microseconds per block name.
    pub fn total_us(&self, name: &str) -> u64 {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.duration_us)
            .sum()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.records.clear();
        state.dropped = 0;
    }

    /// Stops capturing and writes everything recorded so far to `path` as JSON.
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let dump = {
            let mut state = self.state.lock();
            state.capturing = false;
            ProfileDump {
                records: std::mem::take(&mut state.records),
                dropped: std::mem::take(&mut state.dropped),
            }
        };
        let text = serde_json::to_string_pretty(&dump)?;
        std::fs::write(path.as_ref(), text)?;
        log::info!(target: CORE, "profile with {} blocks written to {}", dump.records.len(), path.as_ref().display());
        Ok(())
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`Profiler::scope`].
pub struct ProfileScope<'a> {
    profiler: &'a Profiler,
}

impl Drop for ProfileScope<'_> {
    fn drop(&mut self) {
        self.profiler.end_block();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_is_recorded_until_capture_starts() {
        let profiler = Profiler::new();
        drop(profiler.scope("idle"));
        assert!(profiler.records().is_empty());

        profiler.start_capture();
        drop(profiler.scope("busy"));
        let records = profiler.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "busy");
    }

    #[test]
    fn nested_scopes_close_inner_first() {
        let profiler = Profiler::new();
        profiler.start_capture();
        {
            let _frame = profiler.scope("frame");
            {
                let _render = profiler.scope("render");
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        }
        let records = profiler.records();
        let names: Vec<_> = records.iter().map(|r| (r.name.as_str(), r.depth)).collect();
        assert_eq!(names, vec![("render", 1), ("frame", 0)]);
        assert!(records[1].duration_us >= records[0].duration_us);
        assert!(profiler.total_us("render") >= 2_000);
    }

    #[test]
    fn block_opened_before_capture_stays_unrecorded() {
        let profiler = Profiler::new();
        profiler.begin_block("early");
        profiler.start_capture();
        profiler.end_block();
        // an extra end is ignored
        profiler.end_block();
        assert!(profiler.records().is_empty());
    }

    #[test]
    fn dump_writes_json_and_stops_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let profiler = Profiler::new();
        profiler.start_capture();
        drop(profiler.scope("end_frame"));
        profiler.dump_to_file(&path).unwrap();

        assert!(!profiler.is_capturing());
        assert!(profiler.records().is_empty());
        let dump: ProfileDump = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(dump.records.len(), 1);
        assert_eq!(dump.records[0].name, "end_frame");
        assert_eq!(dump.dropped, 0);
    }
}
