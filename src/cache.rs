use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// In-memory snapshot of a domain's entities, keyed by a stable identity.
///
/// A refresh merges a fetched page into the stored map as a shallow union:
/// keys present in the page overwrite the stored record wholesale, keys
/// absent from the page are preserved. The upstream page may be partial or
/// ordered-limited, so absence never means deletion; records carry their
/// own status fields (`closed`, `denied`, challenge status) for that.
///
/// One synchronizer writes, API handlers read. Readers observe either the
/// pre-merge or post-merge state, never a partially applied merge.
pub struct SnapshotCache<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> SnapshotCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Shallow-union `batch` into the stored map. O(|batch|).
    pub fn merge(&self, batch: HashMap<K, V>) {
        if batch.is_empty() {
            return;
        }
        let mut guard = self.inner.write();
        guard.extend(batch);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<V> {
        self.inner.read().values().cloned().collect()
    }

    /// Clone of the full map, for mapping-style API views.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.inner.read().clone()
    }

    /// Group values by a derived key. Computed on every read; groupings
    /// are cheap relative to the refresh frequency and are never cached.
    pub fn group_by<G, F>(&self, selector: F) -> HashMap<G, Vec<V>>
    where
        G: Eq + Hash,
        F: Fn(&V) -> G,
    {
        let guard = self.inner.read();
        let mut groups: HashMap<G, Vec<V>> = HashMap::new();
        for value in guard.values() {
            groups.entry(selector(value)).or_default().push(value.clone());
        }
        groups
    }

    /// Values passing a filter, for status-based API views.
    pub fn filtered<F>(&self, predicate: F) -> Vec<V>
    where
        F: Fn(&V) -> bool,
    {
        self.inner
            .read()
            .values()
            .filter(|v| predicate(v))
            .cloned()
            .collect()
    }
}

impl<K, V> Default for SnapshotCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(entries: &[(&str, u32)]) -> HashMap<String, u32> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_merge_is_shallow_union() {
        let cache: SnapshotCache<String, u32> = SnapshotCache::new();
        cache.merge(batch(&[("a", 1), ("b", 2)]));

        // Page shrank: "a" missing, "b" overwritten, "c" new
        cache.merge(batch(&[("b", 20), ("c", 3)]));

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), Some(20));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let cache: SnapshotCache<String, u32> = SnapshotCache::new();
        let page = batch(&[("a", 1), ("b", 2)]);

        cache.merge(page.clone());
        let first = cache.snapshot();
        cache.merge(page);

        assert_eq!(cache.snapshot(), first);
    }

    #[test]
    fn test_empty_batch_is_a_noop() {
        let cache: SnapshotCache<String, u32> = SnapshotCache::new();
        cache.merge(batch(&[("a", 1)]));
        cache.merge(HashMap::new());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_group_by() {
        let cache: SnapshotCache<String, u32> = SnapshotCache::new();
        cache.merge(batch(&[("a", 1), ("b", 2), ("c", 4)]));

        let groups = cache.group_by(|v| v % 2);
        assert_eq!(groups[&1], vec![1]);
        let mut evens = groups[&0].clone();
        evens.sort();
        assert_eq!(evens, vec![2, 4]);
    }
}
