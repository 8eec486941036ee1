use std::sync::Arc;
use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;

struct RegistryState<V> {
    closed: bool,
    entries: FxHashMap<u32, Arc<V>>,
}

impl<V> RegistryState<V> {
    fn with_entries(&self, entries: FxHashMap<u32, Arc<V>>) -> RegistryState<V> {
        RegistryState {
            closed: self.closed,
            entries,
        }
    }
}

#[derive(Debug)]
pub enum LoadOrCreate<V> {
    Loaded(Arc<V>),
    Created(Arc<V>),
    /// The registry was closed, nothing was created
    Closed,
}

/// Concurrent table of per-SSRC entries.
///
/// The table is copy-on-write: readers get a consistent snapshot without locking, writers build a
///  modified copy and compare-and-swap it in, retrying if another writer got there first. Writes
///  only happen when remote peers join or leave, reads on every datagram.
pub struct Registry<V> {
    state: ArcSwap<RegistryState<V>>,
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Registry<V> {
    pub fn new() -> Registry<V> {
        Registry {
            state: ArcSwap::from_pointee(RegistryState {
                closed: false,
                entries: FxHashMap::default(),
            }),
        }
    }

    pub fn load(&self, ssrc: u32) -> Option<Arc<V>> {
        self.state.load()
            .entries
            .get(&ssrc)
            .cloned()
    }

    /// Returns the existing entry or inserts a new one. If several threads race for the same
    ///  SSRC, exactly one of them gets `Created` and all get the same entry. `create` is called
    ///  at most once, and not at all if there is an entry already.
    pub fn load_or_create(&self, ssrc: u32, create: impl FnOnce() -> V) -> LoadOrCreate<V> {
        let mut create = Some(create);
        let mut created: Option<Arc<V>> = None;

        self.update(|state| {
            if state.closed {
                return (None, LoadOrCreate::Closed);
            }
            if let Some(existing) = state.entries.get(&ssrc) {
                return (None, LoadOrCreate::Loaded(existing.clone()));
            }

            let new_entry = match (&created, create.take()) {
                (Some(v), _) => v.clone(),
                (None, Some(f)) => created.insert(Arc::new(f())).clone(),
                (None, None) => unreachable!("factory is only consumed when creating the entry"),
            };

            let mut entries = state.entries.clone();
            entries.insert(ssrc, new_entry.clone());
            (Some(state.with_entries(entries)), LoadOrCreate::Created(new_entry))
        })
    }

    pub fn remove(&self, ssrc: u32) -> Option<Arc<V>> {
        self.update(|state| {
            if !state.entries.contains_key(&ssrc) {
                return (None, None);
            }
            let mut entries = state.entries.clone();
            let removed = entries.remove(&ssrc);
            (Some(state.with_entries(entries)), removed)
        })
    }

    /// All current entries. Later modifications of the registry do not affect the result.
    pub fn snapshot(&self) -> Vec<Arc<V>> {
        self.state.load()
            .entries
            .values()
            .cloned()
            .collect()
    }

    /// Removes and returns all entries and prevents new ones from being created
    pub fn close(&self) -> Vec<Arc<V>> {
        let previous = self.state.swap(Arc::new(RegistryState {
            closed: true,
            entries: FxHashMap::default(),
        }));
        previous.entries.values().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.load().closed
    }

    pub fn len(&self) -> usize {
        self.state.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `f` returns the new state (if any) and the result. It may be called several times if
    ///  there is contention.
    fn update<R>(&self, mut f: impl FnMut(&RegistryState<V>) -> (Option<RegistryState<V>>, R)) -> R {
        loop {
            let current = self.state.load();
            let (new_state, result) = f(&current);
            let Some(new_state) = new_state else {
                return result;
            };

            let prev = self.state.compare_and_swap(&*current, Arc::new(new_state));
            if Arc::ptr_eq(&*prev, &*current) {
                return result;
            }
        }
    }
}
