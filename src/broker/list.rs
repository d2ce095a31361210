//! Ordered containers backing every registry and subscriber set.
//!
//! Both containers keep insertion order, which is what list commands report
//! and what round-robin rotation advances through. Lookups are linear; the
//! sets they hold are small and mutated far less often than iterated.
//!
//! Iteration while mutating is done by taking a [`RotatingList::snapshot`]
//! (or collecting keys) first, then resolving each element against the
//! live structure.

use std::borrow::Borrow;
use std::collections::VecDeque;

/// An ordered set with cheap rotation, used for round-robin fan-out.
#[derive(Debug, Clone)]
pub struct RotatingList<T> {
    items: VecDeque<T>,
}

impl<T> Default for RotatingList<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> RotatingList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push_back(&mut self, item: T) {
        self.items.push_back(item);
    }

    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Moves the head to the tail.
    pub fn rotate(&mut self) {
        if let Some(head) = self.items.pop_front() {
            self.items.push_back(head);
        }
    }

    /// Returns the current head and rotates it to the back, so successive
    /// calls walk the whole list before repeating.
    pub fn next_round_robin(&mut self) -> Option<&T> {
        self.rotate();
        self.items.back()
    }

    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<&T> {
        self.items.iter().find(|item| pred(item))
    }

    /// Removes the first element matching `pred`.
    pub fn remove_where(&mut self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let pos = self.items.iter().position(pred)?;
        self.items.remove(pos)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }
}

impl<T: PartialEq> RotatingList<T> {
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Appends `item` unless already present; returns whether it was added.
    pub fn insert(&mut self, item: T) -> bool {
        if self.contains(&item) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn remove(&mut self, item: &T) -> bool {
        self.remove_where(|candidate| candidate == item).is_some()
    }
}

impl<T> FromIterator<T> for RotatingList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// An insertion-ordered key/value list.
///
/// Dropping a removed value is the entry's destructor; callers that need
/// extra teardown take the value out with [`KeyList::remove`] first.
#[derive(Debug, Clone)]
pub struct KeyList<K, V> {
    entries: Vec<(K, V)>,
}

impl<K, V> Default for KeyList<K, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K, V> KeyList<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.entries.iter_mut().map(|(k, v)| (&*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    /// Finds an entry with a caller-supplied predicate.
    pub fn find_by(&self, pred: impl Fn(&K, &V) -> bool) -> Option<(&K, &V)> {
        self.entries
            .iter()
            .find(|(k, v)| pred(k, v))
            .map(|(k, v)| (k, v))
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        self.entries.retain_mut(|(k, v)| keep(k, v));
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.entries.drain(..)
    }
}

impl<K: PartialEq, V> KeyList<K, V> {
    fn position<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries.iter().position(|(k, _)| k.borrow() == key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).is_some()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).map(|i| &mut self.entries[i].1)
    }

    /// Inserts or replaces; a replaced value keeps its position and is
    /// returned.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.position(&key) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        let index = match self.position(&key) {
            Some(i) => i,
            None => {
                self.entries.push((key, make()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let i = self.position(key)?;
        Some(self.entries.remove(i).1)
    }
}
