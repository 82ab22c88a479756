// src/config.rs
//! Engine configuration, persisted as JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fps_counter::FramerateMode;

/// Which `GraphicsDevice` backend to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceType {
    /// `Wgpu` when a window is available, `Software` otherwise.
    #[default]
    Default,
    Software,
    Wgpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub device_type: DeviceType,
    pub fullscreen: bool,
    pub resizable: bool,
    pub wait_vsync: bool,
    pub console_logging: bool,
    pub file_logging: bool,
    pub log_file_name: PathBuf,
    /// Input is not sampled; only the graphics stack is brought up.
    pub graphics_only: bool,
    /// Frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    pub fence_timeout_ms: u64,
    pub target_fps: u32,
    pub framerate_mode: FramerateMode,
    /// Directories searched for assets, in order.
    pub asset_roots: Vec<PathBuf>,
    /// Packed archives mounted over the asset roots.
    pub package_files: Vec<PathBuf>,
    /// Start profiler capture as soon as the engine is up.
    pub profiling: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "slop2d".to_string(),
            width: 1280,
            height: 720,
            device_type: DeviceType::Default,
            fullscreen: false,
            resizable: true,
            wait_vsync: true,
            console_logging: true,
            file_logging: false,
            log_file_name: PathBuf::from("slop2d.log"),
            graphics_only: false,
            frames_in_flight: 2,
            fence_timeout_ms: 5_000,
            target_fps: 60,
            framerate_mode: FramerateMode::Variable,
            asset_roots: vec![PathBuf::from(".")],
            package_files: Vec::new(),
            profiling: false,
        }
    }
}

impl EngineConfig {
    /// Config for tests and tools: software device, small screen, no console noise.
    pub fn headless(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            device_type: DeviceType::Software,
            wait_vsync: false,
            console_logging: false,
            graphics_only: true,
            ..Default::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        Ok(config.sanitized())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Clamps values the frame driver cannot work with.
    pub fn sanitized(mut self) -> Self {
        self.width = self.width.max(1);
        self.height = self.height.max(1);
        self.frames_in_flight = self.frames_in_flight.clamp(1, 4);
        self.target_fps = self.target_fps.max(1);
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_file_logging(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_logging = true;
        self.log_file_name = path.into();
        self
    }

    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_roots.push(root.into());
        self
    }

    pub fn with_package_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.package_files.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_with_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        EngineConfig::default().with_title("demo").save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().title, "demo");

        std::fs::write(&path, r#"{ "width": 0, "frames_in_flight": 9 }"#).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.width, 1);
        assert_eq!(loaded.frames_in_flight, 4);
        assert_eq!(loaded.height, 720);
    }

    #[test]
    fn bad_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(crate::error::Error::Json(_))));
    }
}
