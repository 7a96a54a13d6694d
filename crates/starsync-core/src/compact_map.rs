use hashbrown::hash_map::Entry;
use hashbrown::HashMap as HbHashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::hash::Hash;

/// hashbrown + Fx hasher map backing the identity and join indices.
/// Lower CPU overhead and slightly reduced metadata overhead vs std.
#[derive(Debug, Clone)]
pub struct CompactHashMap<K, V>(HbHashMap<K, V, BuildHasherDefault<FxHasher>>);

impl<K: Eq + Hash, V> Default for CompactHashMap<K, V> {
    fn default() -> Self {
        Self(HbHashMap::with_hasher(BuildHasherDefault::<FxHasher>::default()))
    }
}

impl<K: Eq + Hash, V> CompactHashMap<K, V> {
    pub fn with_capacity(n: usize) -> Self {
        Self(HbHashMap::with_capacity_and_hasher(n, BuildHasherDefault::<FxHasher>::default()))
    }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn clear(&mut self) { self.0.clear() }
    pub fn reserve(&mut self, additional: usize) { self.0.reserve(additional) }
    pub fn get<Q>(&self, k: &Q) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    { self.0.get(k) }
    pub fn get_mut<Q>(&mut self, k: &Q) -> Option<&mut V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    { self.0.get_mut(k) }
    pub fn contains_key<Q>(&self, k: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    { self.0.contains_key(k) }
    pub fn insert(&mut self, k: K, v: V) -> Option<V> { self.0.insert(k, v) }
    pub fn remove<Q>(&mut self, k: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    { self.0.remove(k) }
    pub fn entry(&mut self, k: K) -> Entry<'_, K, V, BuildHasherDefault<FxHasher>> { self.0.entry(k) }
    pub fn retain(&mut self, f: impl FnMut(&K, &mut V) -> bool) { self.0.retain(f) }
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> { self.0.iter() }
    pub fn keys(&self) -> impl Iterator<Item = &K> { self.0.keys() }
    pub fn values(&self) -> impl Iterator<Item = &V> { self.0.values() }
}
