//! In-process store
//!
//! Used by tests and single-process deployments. Expired keys are dropped
//! lazily when touched. Blocking pops wait on a [`Notify`] that every list
//! write signals.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{normalize_index, normalize_range, KvStore, Result, StoreError};

#[derive(Debug)]
enum Value {
    List(VecDeque<String>),
    ZSet(BTreeMap<String, f64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
    written: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/* ===================== Entry access ===================== */

fn live<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let expired = data
        .get(key)
        .and_then(|e| e.expires_at)
        .map_or(false, |at| at <= Instant::now());
    if expired {
        data.remove(key);
    }
    data.get_mut(key)
}

fn list<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Result<Option<&'a mut VecDeque<String>>> {
    match live(data, key) {
        None => Ok(None),
        Some(Entry {
            value: Value::List(items),
            ..
        }) => Ok(Some(items)),
        Some(_) => Err(StoreError::WrongType(key.to_string())),
    }
}

fn list_or_new<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Result<&'a mut VecDeque<String>> {
    if live(data, key).is_none() {
        data.insert(
            key.to_string(),
            Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            },
        );
    }
    list(data, key)?.ok_or_else(|| StoreError::Backend(format!("list '{}' vanished", key)))
}

fn zset<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Result<Option<&'a mut BTreeMap<String, f64>>> {
    match live(data, key) {
        None => Ok(None),
        Some(Entry {
            value: Value::ZSet(members),
            ..
        }) => Ok(Some(members)),
        Some(_) => Err(StoreError::WrongType(key.to_string())),
    }
}

fn zset_or_new<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Result<&'a mut BTreeMap<String, f64>> {
    if live(data, key).is_none() {
        data.insert(
            key.to_string(),
            Entry {
                value: Value::ZSet(BTreeMap::new()),
                expires_at: None,
            },
        );
    }
    zset(data, key)?.ok_or_else(|| StoreError::Backend(format!("sorted set '{}' vanished", key)))
}

/// Remove a key whose collection became empty
fn drop_if_empty(data: &mut HashMap<String, Entry>, key: &str) {
    let empty = match data.get(key) {
        Some(Entry {
            value: Value::List(items),
            ..
        }) => items.is_empty(),
        Some(Entry {
            value: Value::ZSet(members),
            ..
        }) => members.is_empty(),
        None => false,
    };
    if empty {
        data.remove(key);
    }
}

/* ===================== Store ===================== */

#[async_trait]
impl KvStore for MemoryStore {
    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let len = {
            let mut data = self.data.lock().await;
            let items = list_or_new(&mut data, key)?;
            items.push_back(value.to_string());
            items.len()
        };
        self.written.notify_waiters();
        Ok(len)
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        let mut data = self.data.lock().await;
        let Some(items) = list(&mut data, key)? else {
            return Ok(None);
        };
        Ok(normalize_index(items.len(), index).and_then(|i| items.get(i).cloned()))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut data = self.data.lock().await;
        let Some(items) = list(&mut data, key)? else {
            return Ok(vec![]);
        };
        Ok(match normalize_range(items.len(), start, stop) {
            Some((start, stop)) => items.range(start..=stop).cloned().collect(),
            None => vec![],
        })
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut data = self.data.lock().await;
        let Some(items) = list(&mut data, key)? else {
            return Ok(());
        };
        match normalize_range(items.len(), start, stop) {
            Some((start, stop)) => {
                items.truncate(stop + 1);
                items.drain(..start);
            }
            None => items.clear(),
        }
        drop_if_empty(&mut data, key);
        Ok(())
    }

    async fn lset_if_exists(&self, key: &str, index: i64, value: &str) -> Result<bool> {
        let updated = {
            let mut data = self.data.lock().await;
            match list(&mut data, key)? {
                Some(items) => match normalize_index(items.len(), index) {
                    Some(i) => {
                        items[i] = value.to_string();
                        true
                    }
                    None => false,
                },
                None => false,
            }
        };
        if updated {
            self.written.notify_waiters();
        }
        Ok(updated)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut data = self.data.lock().await;
        match live(&mut data, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        zset_or_new(&mut data, key)?.insert(member.to_string(), score);
        Ok(())
    }

    async fn zincrby(&self, key: &str, increment: f64, member: &str) -> Result<f64> {
        let mut data = self.data.lock().await;
        let score = zset_or_new(&mut data, key)?
            .entry(member.to_string())
            .or_insert(0.0);
        *score += increment;
        Ok(*score)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        let mut data = self.data.lock().await;
        let Some(members) = zset(&mut data, key)? else {
            return Ok(vec![]);
        };
        let mut found: Vec<(String, f64)> = members
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(m, &s)| (m.clone(), s))
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(found)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut data = self.data.lock().await;
        let removed = match zset(&mut data, key)? {
            Some(members) => members.remove(member).is_some(),
            None => false,
        };
        drop_if_empty(&mut data, key);
        Ok(removed)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<usize> {
        let mut data = self.data.lock().await;
        let removed = match zset(&mut data, key)? {
            Some(members) => {
                let before = members.len();
                members.retain(|_, score| *score < min || *score > max);
                before - members.len()
            }
            None => 0,
        };
        drop_if_empty(&mut data, key);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut data = self.data.lock().await;
        Ok(live(&mut data, key).is_some())
    }

    async fn del(&self, keys: &[&str]) -> Result<usize> {
        let mut data = self.data.lock().await;
        let mut count = 0;
        for key in keys {
            if live(&mut data, key).is_some() {
                data.remove(*key);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn rpush_consume(&self, key: &str, value: &str, guard: &str) -> Result<bool> {
        {
            let mut data = self.data.lock().await;
            list(&mut data, key)?;
            if list(&mut data, guard)?.is_none() {
                return Ok(false);
            }
            data.remove(guard);
            list_or_new(&mut data, key)?.push_back(value.to_string());
        }
        self.written.notify_waiters();
        Ok(true)
    }

    async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            let written = self.written.notified();
            tokio::pin!(written);
            written.as_mut().enable();

            {
                let mut data = self.data.lock().await;
                if source == destination {
                    // Rotate in place so the key keeps its expiry
                    if let Some(items) = list(&mut data, source)? {
                        if let Some(value) = items.pop_back() {
                            items.push_front(value.clone());
                            return Ok(Some(value));
                        }
                    }
                } else {
                    let expires_at = live(&mut data, source).and_then(|e| e.expires_at);
                    let popped = match list(&mut data, source)? {
                        Some(items) => items.pop_back(),
                        None => None,
                    };
                    if let Some(value) = popped {
                        drop_if_empty(&mut data, source);
                        let created = live(&mut data, destination).is_none();
                        list_or_new(&mut data, destination)?.push_front(value.clone());
                        if created {
                            if let Some(entry) = data.get_mut(destination) {
                                entry.expires_at = expires_at;
                            }
                        }
                        return Ok(Some(value));
                    }
                }
            }

            if tokio::time::timeout_at(deadline, written).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.rpush("l", "a").await.unwrap(), 1);
        assert_eq!(store.rpush("l", "b").await.unwrap(), 2);
        assert_eq!(store.rpush("l", "c").await.unwrap(), 3);

        assert_eq!(store.lindex("l", -1).await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["a", "b", "c"]);

        store.ltrim("l", -1, -1).await.unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["c"]);

        assert!(store.lset_if_exists("l", -1, "d").await.unwrap());
        assert!(!store.lset_if_exists("missing", -1, "d").await.unwrap());
        assert_eq!(store.lindex("l", 0).await.unwrap().as_deref(), Some("d"));

        assert_eq!(store.del(&["l", "missing"]).await.unwrap(), 1);
        assert!(!store.exists("l").await.unwrap());
    }

    #[tokio::test]
    async fn test_rpush_consume() {
        let store = MemoryStore::new();
        assert!(!store.rpush_consume("done", "r", "live").await.unwrap());
        assert!(!store.exists("done").await.unwrap());

        store.rpush("live", "state").await.unwrap();
        assert!(store.rpush_consume("done", "r", "live").await.unwrap());
        assert!(!store.exists("live").await.unwrap());
        assert_eq!(store.lrange("done", 0, -1).await.unwrap(), vec!["r"]);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.zadd("z", 1.0, "a").await.unwrap();
        assert!(matches!(
            store.rpush("z", "x").await,
            Err(StoreError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_sorted_set_operations() {
        let store = MemoryStore::new();
        store.zadd("z", 3.0, "c").await.unwrap();
        store.zadd("z", 1.0, "a").await.unwrap();
        store.zadd("z", 2.0, "b").await.unwrap();
        assert_eq!(store.zincrby("z", 10.0, "a").await.unwrap(), 11.0);

        let all = store.zrange_by_score("z", f64::NEG_INFINITY, f64::INFINITY).await.unwrap();
        let members: Vec<_> = all.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["b", "c", "a"]);

        assert_eq!(store.zrem_range_by_score("z", 0.0, 2.5).await.unwrap(), 1);
        assert!(store.zrem("z", "c").await.unwrap());
        assert!(!store.zrem("z", "c").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let store = MemoryStore::new();
        store.rpush("l", "a").await.unwrap();
        assert!(store.expire("l", 10).await.unwrap());
        assert!(!store.expire("missing", 10).await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.exists("l").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!store.exists("l").await.unwrap());
        assert_eq!(store.lindex("l", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_brpoplpush_same_key_requeues() {
        let store = MemoryStore::new();
        store.rpush("done", "result").await.unwrap();

        let got = store
            .brpoplpush("done", "done", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("result"));
        assert_eq!(store.lrange("done", 0, -1).await.unwrap(), vec!["result"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_brpoplpush_keeps_expiry() {
        let store = MemoryStore::new();
        store.rpush("done", "result").await.unwrap();
        store.expire("done", 60).await.unwrap();
        store.rpush("src", "v").await.unwrap();
        store.expire("src", 60).await.unwrap();

        store
            .brpoplpush("done", "done", Duration::from_millis(10))
            .await
            .unwrap();
        store
            .brpoplpush("src", "dst", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(store.exists("done").await.unwrap());
        assert!(store.exists("dst").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.exists("done").await.unwrap());
        assert!(!store.exists("dst").await.unwrap());
    }

    #[tokio::test]
    async fn test_brpoplpush_times_out() {
        let store = MemoryStore::new();
        let got = store
            .brpoplpush("empty", "empty", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_brpoplpush_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .brpoplpush("src", "dst", Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.rpush("src", "v").await.unwrap();

        assert_eq!(waiter.await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.lrange("dst", 0, -1).await.unwrap(), vec!["v"]);
        assert!(!store.exists("src").await.unwrap());
    }
}
