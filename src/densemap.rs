//! A map of dense integer key to value, used as the arena behind targets
//! and jobs.

use std::marker::PhantomData;

pub trait Index: From<usize> + Copy {
    fn index(&self) -> usize;
}

/// Declares a newtype handle usable as a DenseMap key.
macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);
        impl $crate::densemap::Index for $name {
            fn index(&self) -> usize {
                self.0
            }
        }
        impl From<usize> for $name {
            fn from(u: usize) -> $name {
                $name(u)
            }
        }
    };
}
pub(crate) use dense_id;

/// A map of a dense integer key to value, implemented as a vector.
/// Keys are handed out in order by push() and never reused, so a key whose
/// slot was cleared stays invalid rather than aliasing a newer value.
pub struct DenseMap<K, V> {
    vec: Vec<V>,
    key_type: PhantomData<K>,
}

impl<K, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap {
            vec: Vec::default(),
            key_type: PhantomData,
        }
    }
}

impl<K: Index, V> std::ops::Index<K> for DenseMap<K, V> {
    type Output = V;

    fn index(&self, k: K) -> &Self::Output {
        &self.vec[k.index()]
    }
}

impl<K: Index, V> std::ops::IndexMut<K> for DenseMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut Self::Output {
        &mut self.vec[k.index()]
    }
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn lookup(&self, k: K) -> Option<&V> {
        self.vec.get(k.index())
    }

    pub fn lookup_mut(&mut self, k: K) -> Option<&mut V> {
        self.vec.get_mut(k.index())
    }

    pub fn next_id(&self) -> K {
        K::from(self.vec.len())
    }

    pub fn push(&mut self, val: V) -> K {
        let id = self.next_id();
        self.vec.push(val);
        id
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    pub fn clear(&mut self) {
        self.vec.clear();
    }

    pub fn all_ids(&self) -> impl Iterator<Item = K> {
        (0..self.vec.len()).map(K::from)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.vec.iter()
    }
}

impl<K: Index, V> DenseMap<K, Option<V>> {
    /// Look up a slot that may have been vacated.
    pub fn get(&self, k: K) -> Option<&V> {
        self.vec.get(k.index()).and_then(|v| v.as_ref())
    }

    pub fn get_mut(&mut self, k: K) -> Option<&mut V> {
        self.vec.get_mut(k.index()).and_then(|v| v.as_mut())
    }

    /// Vacate a slot, returning what was there.
    pub fn take(&mut self, k: K) -> Option<V> {
        self.vec.get_mut(k.index()).and_then(|v| v.take())
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.vec.iter().filter(|v| v.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    dense_id!(TestId);

    #[test]
    fn take_leaves_hole() {
        let mut map: DenseMap<TestId, Option<&str>> = DenseMap::default();
        let a = map.push(Some("a"));
        let b = map.push(Some("b"));
        assert_eq!(map.take(a), Some("a"));
        assert_eq!(map.get(a), None);
        assert_eq!(map.get(b), Some(&"b"));
        assert_eq!(map.occupied(), 1);
        // Keys are not reused after a slot is vacated.
        let c = map.push(Some("c"));
        assert_ne!(c, a);
        assert_eq!(map.len(), 3);
    }
}
