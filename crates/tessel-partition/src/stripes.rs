//! Per-map state sharded across a fixed number of lock stripes.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;
use tessel_core::MapId;

/// `T` per map, with maps hashed onto `n` independent `RwLock`s.
///
/// Two maps on different stripes never contend. Poisoned locks are
/// recovered: a panicking task must not wedge every later tick.
#[derive(Debug)]
pub struct Striped<T> {
    stripes: Box<[RwLock<AHashMap<MapId, T>>]>,
}

impl<T> Striped<T> {
    /// `n` stripes, at least one.
    pub fn new(n: usize) -> Self {
        Self {
            stripes: (0..n.max(1)).map(|_| RwLock::new(AHashMap::new())).collect(),
        }
    }

    /// Number of stripes.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe(&self, map: MapId) -> &RwLock<AHashMap<MapId, T>> {
        &self.stripes[map.0 as usize % self.stripes.len()]
    }

    /// Shared access to the stripe holding `map`.
    pub fn read(&self, map: MapId) -> RwLockReadGuard<'_, AHashMap<MapId, T>> {
        self.stripe(map)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the stripe holding `map`.
    pub fn write(&self, map: MapId) -> RwLockWriteGuard<'_, AHashMap<MapId, T>> {
        self.stripe(map)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on `map`'s value, if present.
    pub fn with<R>(&self, map: MapId, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.read(map).get(&map).map(f)
    }

    /// Run `f` on `map`'s value, creating it with `T::default()` first.
    pub fn with_mut<R>(&self, map: MapId, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Default,
    {
        f(self.write(map).entry(map).or_default())
    }

    /// Run `f` on `map`'s value only if it exists.
    pub fn with_existing_mut<R>(&self, map: MapId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.write(map).get_mut(&map).map(f)
    }

    /// Drop `map`'s value.
    pub fn remove(&self, map: MapId) -> Option<T> {
        self.write(map).remove(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_are_isolated() {
        let s: Striped<Vec<u32>> = Striped::new(4);
        s.with_mut(MapId(1), |v| v.push(1));
        s.with_mut(MapId(5), |v| v.push(5));
        assert_eq!(s.with(MapId(1), |v| v.clone()), Some(vec![1]));
        assert_eq!(s.with(MapId(5), |v| v.clone()), Some(vec![5]));
        assert_eq!(s.with(MapId(2), |v| v.len()), None);
        assert_eq!(s.with_existing_mut(MapId(2), |v| v.len()), None);
        assert_eq!(s.remove(MapId(1)), Some(vec![1]));
    }

    #[test]
    fn zero_stripes_rounds_up() {
        let s: Striped<u8> = Striped::new(0);
        assert_eq!(s.stripe_count(), 1);
    }
}
