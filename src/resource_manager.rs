// src/resource_manager.rs
//! Resource bookkeeping.
//! - Handles: `(index, generation)` pairs over a slab; a stale handle fails lookups
//! - Texture path cache: one live `Texture2D` per virtual path, held weakly
//! - Load failures are routed through `LogOnce`

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ResourceError;
use crate::file::{normalize_path, FileSystem};
use crate::font::Font;
use crate::gpu::GraphicsDevice;
use crate::logging::{LogOnce, RESOURCE};
use crate::texture::{Texture2D, TextureConfig, WeakTexture2D};

// ---------- Handle type ----------
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slab with generation-checked handles. Removing a value bumps its slot's generation, so every
/// outstanding handle to it stops resolving.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value.as_ref().map(|v| {
                (
                    Handle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    v,
                )
            })
        })
    }
}

// ---------- Texture cache ----------

/// Loads textures through the file system, sharing one instance per path while it is alive.
pub struct Resources {
    device: Arc<dyn GraphicsDevice>,
    files: Arc<FileSystem>,
    textures: Mutex<HashMap<String, WeakTexture2D>>,
    failures: LogOnce,
}

impl Resources {
    pub fn new(device: Arc<dyn GraphicsDevice>, files: Arc<FileSystem>) -> Self {
        Self {
            device,
            files,
            textures: Mutex::new(HashMap::new()),
            failures: LogOnce::default(),
        }
    }

    pub fn files(&self) -> &Arc<FileSystem> {
        &self.files
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    /// Returns the cached texture for `path` or loads it. Failures are logged once per path.
    pub fn load_texture(&self, path: &str) -> Result<Texture2D, ResourceError> {
        self.load_texture_with(path, TextureConfig::default())
    }

    pub fn load_texture_with(&self, path: &str, config: TextureConfig) -> Result<Texture2D, ResourceError> {
        let key = normalize_path(path);
        let mut cache = self.textures.lock();
        if let Some(texture) = cache.get(&key).and_then(WeakTexture2D::upgrade) {
            return Ok(texture);
        }
        match Texture2D::load(&self.device, &self.files, path, config) {
            Ok(texture) => {
                cache.insert(key, texture.downgrade());
                Ok(texture)
            }
            Err(err) => {
                self.log_failure("texture", path, &err);
                Err(err)
            }
        }
    }

    /// Loads a TrueType/OpenType font rasterized at `size` pixels. Failures are logged once per path.
    pub fn load_font_dynamic(&self, path: &str, size: i32) -> Result<Font, ResourceError> {
        Font::load_dynamic(&self.device, &self.files, path, size)
            .inspect_err(|err| self.log_failure("font", path, err))
    }

    /// Loads a pre-rasterized `SFNT` font. Failures are logged once per path.
    pub fn load_font_static(&self, path: &str) -> Result<Font, ResourceError> {
        Font::load_static(&self.device, &self.files, path).inspect_err(|err| self.log_failure("font", path, err))
    }

    fn log_failure(&self, kind: &str, path: &str, err: &ResourceError) {
        let key = format!("{kind}:{}", normalize_path(path));
        self.failures.error(RESOURCE, &key, format_args!("failed to load {kind} {path}: {err}"));
    }

    /// Reloads every live cached texture; returns how many changed.
    pub fn reload_all(&self) -> usize {
        let live: Vec<Texture2D> = {
            let mut cache = self.textures.lock();
            cache.retain(|_, weak| weak.upgrade().is_some());
            cache.values().filter_map(WeakTexture2D::upgrade).collect()
        };
        live.iter()
            .filter(|texture| match texture.reload(&self.files) {
                Ok(changed) => changed,
                Err(err) => {
                    log::warn!(target: RESOURCE, "reload of {:?} failed: {}", texture.path(), err);
                    false
                }
            })
            .count()
    }

    /// Number of paths whose texture is still alive.
    pub fn cached_texture_count(&self) -> usize {
        self.textures
            .lock()
            .values()
            .filter(|weak| weak.upgrade().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;
    use crate::texture::Texture;

    #[test]
    fn stale_handle_fails_lookup() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b");
        assert_eq!(a.index(), b.index());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn iter_skips_removed() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        let _b = arena.insert(2);
        arena.remove(a);
        let values: Vec<i32> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2]);
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([9, 9, 9, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn same_path_shares_instance_while_alive() {
        let files = Arc::new(FileSystem::new());
        let mut package = crate::file::Package::new("test");
        package.insert("img/a.png", png_bytes());
        files.add_package(package);
        let resources = Resources::new(Arc::new(SoftwareDevice::new(8, 8)), files);

        let first = resources.load_texture("img/a.png").unwrap();
        let second = resources.load_texture("./img\\a.png").unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(resources.cached_texture_count(), 1);

        let id = first.id();
        drop(first);
        drop(second);
        assert_eq!(resources.cached_texture_count(), 0);
        let third = resources.load_texture("img/a.png").unwrap();
        assert_ne!(third.id(), id);
    }

    #[test]
    fn missing_texture_reports_not_found() {
        let resources = Resources::new(Arc::new(SoftwareDevice::new(8, 8)), Arc::new(FileSystem::new()));
        assert!(matches!(resources.load_texture("nope.png"), Err(ResourceError::NotFound { .. })));
        assert!(!resources.failures.first("texture:nope.png"));
    }

    #[test]
    fn font_failures_are_logged_once_and_typed() {
        let files = Arc::new(FileSystem::new());
        let mut package = crate::file::Package::new("fonts");
        package.insert("fonts/junk.ttf", b"not a font".to_vec());
        files.add_package(package);
        let resources = Resources::new(Arc::new(SoftwareDevice::new(8, 8)), files);

        assert!(matches!(resources.load_font_static("missing.sfnt"), Err(ResourceError::NotFound { .. })));
        assert!(matches!(resources.load_font_static("missing.sfnt"), Err(ResourceError::NotFound { .. })));
        assert!(!resources.failures.first("font:missing.sfnt"));

        assert!(matches!(resources.load_font_dynamic("fonts/junk.ttf", 16), Err(ResourceError::Decode { .. })));
        assert!(!resources.failures.first("font:fonts/junk.ttf"));
        // a key nobody failed on is still fresh
        assert!(resources.failures.first("font:other.ttf"));
    }
}
