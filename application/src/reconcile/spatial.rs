use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use domain::coords::Rect;
use domain::op::{AffectedArea, CompatRule, compatibility};

/// Decides whether two operations are concurrent (free to commute).
/// Rectangle intersections are memoized in an LRU keyed by both rect
/// hashes; affected areas repeat heavily during a stroke, so the cache
/// carries most of the load.
pub struct ConcurrencyChecker {
    rect_cache: LruCache<(u64, u64), bool>,
}

impl ConcurrencyChecker {
    #[must_use]
    pub fn new(cache_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            rect_cache: LruCache::new(capacity),
        }
    }

    /// Two ops are concurrent iff their areas cannot touch the same state:
    /// cross-domain compatibility first, then canvas-wide effects, then
    /// indirect layer sets, then the rectangle test.
    pub fn concurrent(&mut self, a: &AffectedArea, b: &AffectedArea) -> bool {
        let canvas_wide = |area: &AffectedArea| {
            area.indirect
                .as_ref()
                .is_some_and(|eff| eff.affects_canvas)
        };
        if canvas_wide(a) || canvas_wide(b) {
            return false;
        }

        match compatibility(a.domain, b.domain) {
            CompatRule::Always => true,
            CompatRule::SameLayer => !a.same_layer(b),
            CompatRule::Spatial => {
                if a.indirect_overlaps(b) {
                    return false;
                }
                !self.rects_intersect(&a.bounds, &b.bounds)
            }
        }
    }

    fn rects_intersect(&mut self, a: &Rect, b: &Rect) -> bool {
        let key = (rect_hash(a), rect_hash(b));
        if let Some(&hit) = self.rect_cache.get(&key) {
            return hit;
        }
        let result = a.intersects(b);
        self.rect_cache.put(key, result);
        result
    }
}

fn rect_hash(rect: &Rect) -> u64 {
    let mut hasher = DefaultHasher::new();
    rect.hash(&mut hasher);
    hasher.finish()
}
