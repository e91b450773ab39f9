use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// Single-sender election among local peers sharing a key (a multicast group): the first
///  registrant is elect, removal promotes the next registrant in arrival order. Owned by
///  the process-wide carrier context rather than hiding behind a static.
pub struct Election<K: Eq + Hash + Clone> {
    inner: Mutex<FxHashMap<K, Vec<u64>>>,
}

impl<K: Eq + Hash + Clone> Default for Election<K> {
    fn default() -> Election<K> {
        Election { inner: Mutex::new(FxHashMap::default()) }
    }
}

impl<K: Eq + Hash + Clone> Election<K> {
    pub fn add(&self, key: K, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        let peers = inner.entry(key).or_default();
        if !peers.contains(&id) {
            peers.push(id);
        }
    }

    pub fn remove(&self, key: &K, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(peers) = inner.get_mut(key) {
            peers.retain(|&p| p != id);
            if peers.is_empty() {
                inner.remove(key);
            }
        }
    }

    pub fn get_elect(&self, key: &K) -> Option<u64> {
        self.inner.lock().unwrap().get(key).and_then(|peers| peers.first().copied())
    }

    pub fn is_elect(&self, key: &K, id: u64) -> bool {
        self.get_elect(key) == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registrant_is_elect() {
        let election: Election<String> = Election::default();
        election.add("group".to_string(), 1);
        election.add("group".to_string(), 2);
        election.add("group".to_string(), 3);

        assert!(election.is_elect(&"group".to_string(), 1));
        assert!(!election.is_elect(&"group".to_string(), 2));
    }

    #[test]
    fn test_leadership_transfers_on_removal() {
        let election: Election<String> = Election::default();
        election.add("g".to_string(), 1);
        election.add("g".to_string(), 2);

        election.remove(&"g".to_string(), 1);
        assert!(election.is_elect(&"g".to_string(), 2));

        election.remove(&"g".to_string(), 2);
        assert_eq!(election.get_elect(&"g".to_string()), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let election: Election<String> = Election::default();
        election.add("a".to_string(), 1);
        election.add("b".to_string(), 2);
        assert!(election.is_elect(&"a".to_string(), 1));
        assert!(election.is_elect(&"b".to_string(), 2));
    }
}
