//! Cache entries and the invalidation propagator

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use super::{DependencyKey, HostId, MethodKey};
use crate::error::{Error, Result};
use crate::solver::RowHandles;

#[derive(Default)]
pub(crate) struct CacheEntry {
    pub invalidated: bool,
    pub result: Option<Rc<dyn Any>>,
    pub deps: BTreeSet<DependencyKey>,
    /// Constraint entries only.
    pub rows: Option<RowHandles>,
    pub recomputations: u64,
}

impl CacheEntry {
    fn is_valid(&self) -> bool {
        !self.invalidated && self.result.is_some()
    }
}

#[derive(Default)]
pub(crate) struct CacheStore {
    entries: HashMap<MethodKey, CacheEntry>,
}

impl CacheStore {
    /// Cached result of `key`, if the entry exists and is valid.
    pub fn lookup<T: Clone + 'static>(
        &self,
        key: &MethodKey,
        host_label: &str,
    ) -> Result<Option<T>> {
        let Some(entry) = self.entries.get(key).filter(|entry| entry.is_valid()) else {
            return Ok(None);
        };
        let result = entry.result.as_ref().and_then(|result| result.downcast_ref::<T>());
        match result {
            Some(value) => Ok(Some(value.clone())),
            None => Err(Error::ResultTypeMismatch {
                host: host_label.to_string(),
                method: key.name,
            }),
        }
    }

    pub fn rows(&self, key: &MethodKey) -> Option<RowHandles> {
        self.entries.get(key).and_then(|entry| entry.rows.clone())
    }

    pub fn is_valid(&self, key: &MethodKey) -> Option<bool> {
        self.entries.get(key).map(CacheEntry::is_valid)
    }

    pub fn recomputations(&self, key: &MethodKey) -> u64 {
        self.entries.get(key).map_or(0, |entry| entry.recomputations)
    }

    pub fn deps(&self, key: &MethodKey) -> Option<&BTreeSet<DependencyKey>> {
        self.entries.get(key).map(|entry| &entry.deps)
    }

    /// Stores a fresh result and the dependencies read while computing it.
    pub fn commit(&mut self, key: MethodKey, result: Rc<dyn Any>, deps: BTreeSet<DependencyKey>) {
        let entry = self.entries.entry(key).or_default();
        entry.result = Some(result);
        entry.deps = deps;
        entry.invalidated = false;
        entry.recomputations += 1;
    }

    pub fn set_rows(&mut self, key: &MethodKey, rows: Option<RowHandles>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.rows = rows;
        }
    }

    /// Marks every entry that transitively depends on `seed` as invalidated;
    /// returns their keys.
    ///
    /// Edges only exist where a computation actually read something, so the
    /// closure is computed by repeated scans until a round adds nothing.
    pub fn invalidate_from(&mut self, seed: DependencyKey) -> Vec<MethodKey> {
        self.invalidate_closure(BTreeSet::from([seed]))
    }

    fn invalidate_closure(&mut self, mut frontier: BTreeSet<DependencyKey>) -> Vec<MethodKey> {
        let mut invalidated = Vec::new();

        while !frontier.is_empty() {
            let mut next = BTreeSet::new();
            for (key, entry) in self.entries.iter_mut() {
                if !entry.invalidated && !entry.deps.is_disjoint(&frontier) {
                    entry.invalidated = true;
                    next.insert(DependencyKey::Method(*key));
                    invalidated.push(*key);
                }
            }
            frontier = next;
        }

        invalidated
    }

    /// Drops every entry of `host`. Entries of other hosts that read anything
    /// of `host` are invalidated first. Returns the invalidated keys and the
    /// rows the dropped entries owned.
    pub fn forget_host(&mut self, host: HostId) -> (Vec<MethodKey>, Vec<RowHandles>) {
        let seeds: BTreeSet<DependencyKey> = self
            .entries
            .iter()
            .flat_map(|(key, entry)| {
                entry
                    .deps
                    .iter()
                    .copied()
                    .chain(std::iter::once(DependencyKey::Method(*key)))
            })
            .filter(|dep| dep.host() == host)
            .collect();
        let invalidated = self
            .invalidate_closure(seeds)
            .into_iter()
            .filter(|key| key.host != host)
            .collect();

        let owned: Vec<MethodKey> = self
            .entries
            .keys()
            .filter(|key| key.host == host)
            .copied()
            .collect();
        let rows = owned
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).and_then(|entry| entry.rows))
            .collect();
        (invalidated, rows)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ParamKey;

    fn method(host: HostId, name: &'static str) -> MethodKey {
        MethodKey { host, name }
    }

    fn commit(store: &mut CacheStore, key: MethodKey, deps: &[DependencyKey]) {
        store.commit(key, Rc::new(0.0_f64), deps.iter().copied().collect());
    }

    #[test]
    fn test_lookup_type_mismatch() {
        let host = HostId::new();
        let key = method(host, "usable_window");
        let mut store = CacheStore::default();
        commit(&mut store, key, &[]);

        assert_eq!(store.lookup::<f64>(&key, "battery").unwrap(), Some(0.0));
        assert!(matches!(
            store.lookup::<bool>(&key, "battery"),
            Err(Error::ResultTypeMismatch { method: "usable_window", .. })
        ));
    }

    #[test]
    fn test_propagation_reaches_fixed_point() {
        let host = HostId::new();
        let price = DependencyKey::Param(ParamKey { host, name: "price" });
        let a = method(host, "a");
        let b = method(host, "b");
        let c = method(host, "c");
        let unrelated = method(host, "unrelated");

        let mut store = CacheStore::default();
        commit(&mut store, a, &[price]);
        commit(&mut store, b, &[a.into()]);
        commit(&mut store, c, &[b.into()]);
        commit(&mut store, unrelated, &[]);

        let mut invalidated = store.invalidate_from(price);
        invalidated.sort();
        assert_eq!(invalidated, vec![a, b, c]);
        assert_eq!(store.is_valid(&unrelated), Some(true));
        assert_eq!(store.is_valid(&c), Some(false));
    }

    #[test]
    fn test_already_invalid_entries_are_skipped() {
        let host = HostId::new();
        let price = DependencyKey::Param(ParamKey { host, name: "price" });
        let a = method(host, "a");

        let mut store = CacheStore::default();
        commit(&mut store, a, &[price]);
        assert_eq!(store.invalidate_from(price).len(), 1);
        assert!(store.invalidate_from(price).is_empty());
    }

    #[test]
    fn test_cycles_terminate() {
        let host = HostId::new();
        let price = DependencyKey::Param(ParamKey { host, name: "price" });
        let a = method(host, "a");
        let b = method(host, "b");

        let mut store = CacheStore::default();
        commit(&mut store, a, &[price, b.into()]);
        commit(&mut store, b, &[a.into()]);

        assert_eq!(store.invalidate_from(price).len(), 2);
    }

    #[test]
    fn test_forget_host_invalidates_readers_on_other_hosts() {
        let site = HostId::new();
        let load = HostId::new();
        let demand = DependencyKey::Param(ParamKey { host: load, name: "demand_kw" });
        let balance = method(site, "power_balance");
        let forecast = method(load, "forecast");

        let mut store = CacheStore::default();
        commit(&mut store, forecast, &[demand]);
        commit(&mut store, balance, &[demand]);

        let (invalidated, rows) = store.forget_host(load);
        assert_eq!(invalidated, vec![balance]);
        assert!(rows.is_empty());
        assert_eq!(store.is_valid(&forecast), None);
        assert_eq!(store.len(), 1);
    }
}
