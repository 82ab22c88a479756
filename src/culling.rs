// src/culling.rs
//! # Culling system
//!
//! Tracks drawables by id together with a world-space AABB and answers "what intersects this
//! view rectangle" each frame.
//!
//! * AABBs come from the drawable's transform applied to its intrinsic extent: sprite source
//!   size, polygon vertex extents or the text's laid-out glyph run.
//! * Bounds are cached. Moving a drawable takes effect on the next [`CullingSystem::update_aabb`].
//! * The system holds weak references; drawables dropped everywhere else are pruned on update.
//! * Results keep registration order.

use std::collections::{HashMap, HashSet};

use crate::logging::GRAPHICS;
use crate::math::Aabb2;
use crate::rendered::{Rendered, RenderedId, WeakRendered};

// ---------------------------------------------------------------------------
// Public API Types
// ---------------------------------------------------------------------------

/// Counters from the last [`CullingSystem::cull`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CullingStats {
    pub tracked: usize,
    pub visible: usize,
    pub culled: usize,
    /// Drawables removed by the last `update_aabb` because nothing else held them.
    pub pruned: usize,
}

struct Entry {
    id: RenderedId,
    rendered: WeakRendered,
    aabb: Aabb2,
}

// ---------------------------------------------------------------------------
// Culling system
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CullingSystem {
    entries: Vec<Entry>,
    index: HashMap<RenderedId, usize>,
    drawing: Vec<RenderedId>,
    drawing_set: HashSet<RenderedId>,
    stats: CullingStats,
}

impl CullingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `rendered`. Registering twice is a no-op.
    pub fn register(&mut self, rendered: &Rendered) {
        let id = rendered.id();
        if self.index.contains_key(&id) {
            return;
        }
        self.index.insert(id, self.entries.len());
        self.entries.push(Entry {
            id,
            rendered: rendered.downgrade(),
            aabb: rendered.world_bounds(),
        });
    }

    pub fn unregister(&mut self, id: RenderedId) {
        if self.index.remove(&id).is_some() {
            self.entries.retain(|e| e.id != id);
            self.reindex();
        }
    }

    pub fn is_registered(&self, id: RenderedId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn registered_count(&self) -> usize {
        self.entries.len()
    }

    /// Recomputes every tracked AABB and drops drawables that no longer exist.
    pub fn update_aabb(&mut self) {
        let before = self.entries.len();
        self.entries.retain_mut(|entry| match entry.rendered.upgrade() {
            Some(rendered) => {
                entry.aabb = rendered.world_bounds();
                true
            }
            None => false,
        });
        let pruned = before - self.entries.len();
        if pruned > 0 {
            self.reindex();
            log::trace!(target: GRAPHICS, "culling pruned {} dropped drawables", pruned);
        }
        self.stats.pruned = pruned;
    }

    /// Selects the tracked drawables whose cached AABB intersects `view`.
    pub fn cull(&mut self, view: Aabb2) -> &[RenderedId] {
        self.drawing.clear();
        self.drawing_set.clear();
        for entry in &self.entries {
            if entry.aabb.intersects(&view) {
                self.drawing.push(entry.id);
                self.drawing_set.insert(entry.id);
            }
        }
        self.stats.tracked = self.entries.len();
        self.stats.visible = self.drawing.len();
        self.stats.culled = self.entries.len() - self.drawing.len();
        &self.drawing
    }

    /// Result of the last [`CullingSystem::cull`].
    pub fn drawing_rendered_ids(&self) -> &[RenderedId] {
        &self.drawing
    }

    pub fn drawing_rendered_count(&self) -> usize {
        self.drawing.len()
    }

    pub fn is_drawing(&self, id: RenderedId) -> bool {
        self.drawing_set.contains(&id)
    }

    pub fn aabb(&self, id: RenderedId) -> Option<Aabb2> {
        self.index.get(&id).map(|&i| self.entries[i].aabb)
    }

    pub fn stats(&self) -> CullingStats {
        self.stats
    }

    fn reindex(&mut self) {
        self.index = self.entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
    }
}
