use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::QueueResult;

/// Key-value store with ordered indices, the primitives the durable backend is built on.
///
/// Index members are ordered by ascending score, then lexicographically by member, which
/// is how sorted sets order ties. Every method is a single atomic store operation.
#[async_trait]
pub trait OrderedStore: Send + Sync {
    async fn get(&self, key: &str) -> QueueResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> QueueResult<()>;

    /// Atomically increment and return a counter
    async fn next_sequence(&self, key: &str) -> QueueResult<u64>;

    /// Add (or re-score) a member
    async fn index_add(&self, index: &str, member: &str, score: i64) -> QueueResult<()>;

    /// Lowest-ordered member without removing it
    async fn index_head(&self, index: &str) -> QueueResult<Option<(String, i64)>>;

    /// Remove-if-present; `true` only for the caller that actually removed the member
    async fn index_remove(&self, index: &str, member: &str) -> QueueResult<bool>;

    async fn set_add(&self, key: &str, member: &str) -> QueueResult<()>;

    async fn set_members(&self, key: &str) -> QueueResult<Vec<String>>;
}

/// In-process [`OrderedStore`] with sorted-set semantics.
///
/// Lets the durable backend run without an external server: tests, single-node setups.
#[derive(Default)]
pub struct LocalStore {
    state: Mutex<LocalState>,
}

#[derive(Default)]
struct LocalState {
    values: HashMap<String, String>,
    counters: HashMap<String, u64>,
    indexes: HashMap<String, LocalIndex>,
    sets: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
struct LocalIndex {
    ordered: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members in an index
    pub fn index_len(&self, index: &str) -> usize {
        self.state
            .lock()
            .indexes
            .get(index)
            .map(|idx| idx.scores.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl OrderedStore for LocalStore {
    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        Ok(self.state.lock().values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> QueueResult<()> {
        self.state.lock().values.insert(key.to_string(), value);
        Ok(())
    }

    async fn next_sequence(&self, key: &str) -> QueueResult<u64> {
        let mut state = self.state.lock();
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn index_add(&self, index: &str, member: &str, score: i64) -> QueueResult<()> {
        let mut state = self.state.lock();
        let idx = state.indexes.entry(index.to_string()).or_default();

        if let Some(previous) = idx.scores.insert(member.to_string(), score) {
            idx.ordered.remove(&(previous, member.to_string()));
        }
        idx.ordered.insert((score, member.to_string()));
        Ok(())
    }

    async fn index_head(&self, index: &str) -> QueueResult<Option<(String, i64)>> {
        let state = self.state.lock();
        Ok(state
            .indexes
            .get(index)
            .and_then(|idx| idx.ordered.first())
            .map(|(score, member)| (member.clone(), *score)))
    }

    async fn index_remove(&self, index: &str, member: &str) -> QueueResult<bool> {
        let mut state = self.state.lock();
        let Some(idx) = state.indexes.get_mut(index) else {
            return Ok(false);
        };

        match idx.scores.remove(member) {
            Some(score) => {
                idx.ordered.remove(&(score, member.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> QueueResult<()> {
        self.state
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> QueueResult<Vec<String>> {
        let state = self.state.lock();
        let mut members: Vec<String> = state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_index_orders_by_score_then_member() {
        let store = LocalStore::new();
        store.index_add("q", "b", -1).await.unwrap();
        store.index_add("q", "a", -1).await.unwrap();
        store.index_add("q", "z", -5).await.unwrap();

        assert_eq!(store.index_head("q").await.unwrap(), Some(("z".to_string(), -5)));
        assert!(store.index_remove("q", "z").await.unwrap());
        assert_eq!(store.index_head("q").await.unwrap(), Some(("a".to_string(), -1)));
    }

    #[tokio::test]
    async fn test_remove_if_present_reports_only_once() {
        let store = LocalStore::new();
        store.index_add("q", "job", 0).await.unwrap();

        assert!(store.index_remove("q", "job").await.unwrap());
        assert!(!store.index_remove("q", "job").await.unwrap());
        assert!(!store.index_remove("missing", "job").await.unwrap());
        assert_eq!(store.index_len("q"), 0);
    }

    #[tokio::test]
    async fn test_re_adding_member_rescores_it() {
        let store = LocalStore::new();
        store.index_add("q", "job", 0).await.unwrap();
        store.index_add("q", "job", -3).await.unwrap();

        assert_eq!(store.index_len("q"), 1);
        assert_eq!(store.index_head("q").await.unwrap(), Some(("job".to_string(), -3)));
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let store = LocalStore::new();
        assert_eq!(store.next_sequence("seq").await.unwrap(), 1);
        assert_eq!(store.next_sequence("seq").await.unwrap(), 2);
        assert_eq!(store.next_sequence("other").await.unwrap(), 1);
    }
}
