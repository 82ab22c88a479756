// src/logging.rs
//! Logger setup and duplicate suppression.
//!
//! Targets double as categories: `slop2d::graphics`, `slop2d::shader`, `slop2d::resource`,
//! `slop2d::core`. Filter them with `RUST_LOG` as usual.

use std::fs::File;
use std::io::{self, Write};
use std::num::NonZeroUsize;

use log::{Level, LevelFilter};
use lru::LruCache;
use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::EngineConfig;
use crate::error::Result;

pub const GRAPHICS: &str = "slop2d::graphics";
pub const SHADER: &str = "slop2d::shader";
pub const RESOURCE: &str = "slop2d::resource";
pub const CORE: &str = "slop2d::core";

/// Installs `env_logger` according to the config. A second call is a no-op.
pub fn init(config: &EngineConfig) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format_timestamp_millis()
        .format_target(true)
        .parse_default_env();

    let file = if config.file_logging {
        Some(File::create(&config.log_file_name)?)
    } else {
        None
    };

    match (config.console_logging, file) {
        (true, Some(file)) => {
            builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
        }
        (false, Some(file)) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        (true, None) => {
            builder.target(env_logger::Target::Stderr);
        }
        (false, None) => {
            builder.filter_level(LevelFilter::Off);
        }
    }

    if builder.try_init().is_err() {
        log::debug!(target: CORE, "logger already installed");
    }
    Ok(())
}

/// Writes every record to stderr and the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Routes each distinct failure to the log exactly once.
///
/// Keys are hashed and kept in a bounded LRU, so a pathological stream of unique failures
/// cannot grow memory without limit.
pub struct LogOnce {
    seen: Mutex<LruCache<u64, ()>>,
}

impl LogOnce {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(cap)),
        }
    }

    /// `true` the first time `key` is seen.
    pub fn first(&self, key: &str) -> bool {
        self.seen.lock().put(xxh3_64(key.as_bytes()), ()).is_none()
    }

    /// Logs `message` at `level` unless `key` was already reported. Returns whether it logged.
    pub fn log(&self, target: &str, level: Level, key: &str, message: impl std::fmt::Display) -> bool {
        if !self.first(key) {
            return false;
        }
        log::log!(target: target, level, "{}", message);
        true
    }

    pub fn warn(&self, target: &str, key: &str, message: impl std::fmt::Display) -> bool {
        self.log(target, Level::Warn, key, message)
    }

    pub fn error(&self, target: &str, key: &str, message: impl std::fmt::Display) -> bool {
        self.log(target, Level::Error, key, message)
    }

    /// Forgets everything, e.g. after a reinitialization.
    pub fn reset(&self) {
        self.seen.lock().clear();
    }
}

impl Default for LogOnce {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_each_key_once() {
        let once = LogOnce::new(8);
        assert!(once.warn(RESOURCE, "missing:a.png", "a.png not found"));
        assert!(!once.warn(RESOURCE, "missing:a.png", "a.png not found"));
        assert!(once.warn(RESOURCE, "missing:b.png", "b.png not found"));
        once.reset();
        assert!(once.first("missing:a.png"));
    }

    #[test]
    fn capacity_bounds_memory() {
        let once = LogOnce::new(2);
        assert!(once.first("a"));
        assert!(once.first("b"));
        assert!(once.first("c"));
        // "a" was evicted by "c"
        assert!(once.first("a"));
    }

    #[test]
    fn file_logging_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let config = EngineConfig {
            console_logging: false,
            ..EngineConfig::default().with_file_logging(&path)
        };
        init(&config).unwrap();
        assert!(path.exists());
    }
}
