//! Ordered grouping of messages by Gmail thread id.

use std::collections::HashMap;

use serde::Serialize;

/// One thread and its messages, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadGroup<T> {
    pub thread_id: u64,
    pub messages: Vec<T>,
}

/// Map from thread id to messages that iterates in insertion order.
///
/// Threads appear in the order their first message (or explicit insertion)
/// was seen; messages keep the order they were pushed.
#[derive(Debug, Clone)]
pub struct Threads<T> {
    groups: Vec<ThreadGroup<T>>,
    index: HashMap<u64, usize>,
}

impl<T> Default for Threads<T> {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Threads<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its thread, creating the thread if needed.
    pub fn push(&mut self, thread_id: u64, message: T) {
        self.group_mut(thread_id).messages.push(message);
    }

    /// Add (or extend) a thread with a batch of messages. An empty batch still
    /// registers the thread.
    pub fn insert_thread(&mut self, thread_id: u64, messages: impl IntoIterator<Item = T>) {
        self.group_mut(thread_id).messages.extend(messages);
    }

    fn group_mut(&mut self, thread_id: u64) -> &mut ThreadGroup<T> {
        let idx = *self.index.entry(thread_id).or_insert_with(|| {
            self.groups.push(ThreadGroup {
                thread_id,
                messages: Vec::new(),
            });
            self.groups.len() - 1
        });
        &mut self.groups[idx]
    }

    pub fn get(&self, thread_id: u64) -> Option<&[T]> {
        self.index
            .get(&thread_id)
            .map(|&idx| self.groups[idx].messages.as_slice())
    }

    /// Number of threads, including empty ones.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of messages across all threads.
    pub fn message_count(&self) -> usize {
        self.groups.iter().map(|g| g.messages.len()).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ThreadGroup<T>> {
        self.groups.iter()
    }

    /// Reorder threads by ascending id; message order is untouched.
    pub fn sort_by_thread_id(&mut self) {
        self.groups.sort_by_key(|g| g.thread_id);
        self.reindex();
    }

    /// Convert every message, stopping at the first error.
    pub fn try_map<U, E>(self, mut f: impl FnMut(u64, T) -> Result<U, E>) -> Result<Threads<U>, E> {
        let mut out = Threads::new();
        for group in self.groups {
            let thread_id = group.thread_id;
            let messages = group
                .messages
                .into_iter()
                .map(|m| f(thread_id, m))
                .collect::<Result<Vec<U>, E>>()?;
            out.insert_thread(thread_id, messages);
        }
        Ok(out)
    }

    fn reindex(&mut self) {
        self.index = self
            .groups
            .iter()
            .enumerate()
            .map(|(idx, g)| (g.thread_id, idx))
            .collect();
    }
}

impl<T> IntoIterator for Threads<T> {
    type Item = ThreadGroup<T>;
    type IntoIter = std::vec::IntoIter<ThreadGroup<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Threads<T> {
    type Item = &'a ThreadGroup<T>;
    type IntoIter = std::slice::Iter<'a, ThreadGroup<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

impl<T> FromIterator<(u64, T)> for Threads<T> {
    fn from_iter<I: IntoIterator<Item = (u64, T)>>(iter: I) -> Self {
        let mut threads = Threads::new();
        for (thread_id, message) in iter {
            threads.push(thread_id, message);
        }
        threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_preserved() {
        let threads: Threads<&str> = [(30, "a"), (10, "b"), (30, "c"), (20, "d")]
            .into_iter()
            .collect();
        let ids: Vec<u64> = threads.iter().map(|g| g.thread_id).collect();
        assert_eq!(ids, vec![30, 10, 20]);
        assert_eq!(threads.get(30), Some(&["a", "c"][..]));
        assert_eq!(threads.message_count(), 4);
    }

    #[test]
    fn test_empty_thread_is_registered() {
        let mut threads: Threads<u8> = Threads::new();
        threads.insert_thread(7, Vec::new());
        assert_eq!(threads.len(), 1);
        assert_eq!(threads.message_count(), 0);
        assert_eq!(threads.get(7), Some(&[][..]));
    }

    #[test]
    fn test_sort_by_thread_id_reindexes() {
        let mut threads: Threads<u8> = [(3, 1), (1, 2), (2, 3)].into_iter().collect();
        threads.sort_by_thread_id();
        let ids: Vec<u64> = threads.iter().map(|g| g.thread_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        threads.push(3, 9);
        assert_eq!(threads.get(3), Some(&[1, 9][..]));
    }

    #[test]
    fn test_try_map_keeps_grouping() {
        let threads: Threads<u32> = [(1, 1), (2, 2), (2, 3)].into_iter().collect();
        let doubled: Threads<u32> = threads.try_map(|_, m| Ok::<_, ()>(m * 2)).unwrap();
        assert_eq!(doubled.get(2), Some(&[4, 6][..]));
        assert_eq!(doubled.get(1), Some(&[2][..]));

        let failed = doubled.try_map(|_, m| if m == 6 { Err("six") } else { Ok(m) });
        assert_eq!(failed.unwrap_err(), "six");
    }
}
