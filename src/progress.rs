//! Durable "current run" record and the store that reads and writes it.
use crate::engine::Clock;
use crate::landmark::LandmarkId;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage read failed: {0}")]
    Read(String),
    #[error("storage write failed: {0}")]
    Write(String),
}

/// Key-value durable storage capability (localStorage in the browser).
pub trait KeyValueStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage. Clones share the same map. `set_available(false)`
/// makes every call fail, like a disabled or full localStorage.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    items: Rc<RefCell<HashMap<String, String>>>,
    available: Rc<RefCell<bool>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        MemoryStorage {
            items: Rc::default(),
            available: Rc::new(RefCell::new(true)),
        }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        *self.available.borrow_mut() = available;
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: &str) {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    fn check(&self) -> Result<(), StorageError> {
        if *self.available.borrow() {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory storage switched off".into()))
        }
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.raw(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.put_raw(key, value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Progress of the current run. Field names match the stored JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub player_position: Position,
    /// Visit order; never holds the same id twice.
    pub landmarks_visited: Vec<LandmarkId>,
    pub landmarks_completed: Vec<LandmarkId>,
    /// High-water mark, never decreases.
    pub total_distance: u32,
    /// Accumulated active milliseconds up to `last_save_time`.
    pub game_time: f64,
    pub last_save_time: f64,
}

impl ProgressRecord {
    pub fn new(spawn: Position, now: f64) -> Self {
        ProgressRecord {
            player_position: spawn,
            landmarks_visited: Vec::new(),
            landmarks_completed: Vec::new(),
            total_distance: 0,
            game_time: 0.0,
            last_save_time: now,
        }
    }

    /// Returns true when the id was not visited before.
    pub fn mark_visited(&mut self, id: &LandmarkId) -> bool {
        insert_once(&mut self.landmarks_visited, id)
    }

    /// Completing implies visiting, so an unvisited id is visited first.
    pub fn mark_completed(&mut self, id: &LandmarkId) -> bool {
        self.mark_visited(id);
        insert_once(&mut self.landmarks_completed, id)
    }

    pub fn is_visited(&self, id: &LandmarkId) -> bool {
        self.landmarks_visited.contains(id)
    }

    pub fn is_completed(&self, id: &LandmarkId) -> bool {
        self.landmarks_completed.contains(id)
    }

    pub fn record_distance(&mut self, distance: u32) {
        self.total_distance = self.total_distance.max(distance);
    }
}

fn insert_once(ids: &mut Vec<LandmarkId>, id: &LandmarkId) -> bool {
    if ids.contains(id) {
        false
    } else {
        ids.push(id.clone());
        true
    }
}

/// Loads, saves and resets the single progress record under one key.
/// Storage failures are logged and swallowed; the run continues in memory.
#[derive(Clone)]
pub struct ProgressStore {
    storage: Rc<dyn KeyValueStorage>,
    clock: Rc<dyn Clock>,
    key: String,
    spawn: Position,
}

impl ProgressStore {
    pub fn new(
        storage: Rc<dyn KeyValueStorage>,
        clock: Rc<dyn Clock>,
        key: impl Into<String>,
        spawn: Position,
    ) -> Self {
        ProgressStore {
            storage,
            clock,
            key: key.into(),
            spawn,
        }
    }

    pub fn defaults(&self) -> ProgressRecord {
        ProgressRecord::new(self.spawn, self.clock.now())
    }

    /// Never fails: missing or malformed data yields defaults. The time
    /// spent away from the game is not counted, so `last_save_time` is
    /// moved to now.
    pub fn load(&self) -> ProgressRecord {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::info!("no saved progress under {:?}, starting fresh", self.key);
                return self.defaults();
            }
            Err(err) => {
                log::warn!("could not read progress: {}", err);
                return self.defaults();
            }
        };
        match serde_json::from_str::<ProgressRecord>(&raw) {
            Ok(mut record) => {
                record.last_save_time = self.clock.now();
                sanitize(&mut record);
                log::info!(
                    "progress loaded: {} visited, {} completed",
                    record.landmarks_visited.len(),
                    record.landmarks_completed.len()
                );
                record
            }
            Err(err) => {
                log::warn!("discarding malformed progress: {}", err);
                self.defaults()
            }
        }
    }

    /// Folds the time since the previous save into `game_time`, then writes
    /// the whole record as one value. The in-memory record is updated even
    /// when the write fails, so nothing is lost for the next attempt.
    pub fn save(&self, record: &mut ProgressRecord) -> Result<(), StorageError> {
        let now = self.clock.now();
        record.game_time += (now - record.last_save_time).max(0.0);
        record.last_save_time = now;

        let json = serde_json::to_string(record)
            .map_err(|err| StorageError::Write(err.to_string()))?;
        match self.storage.set(&self.key, &json) {
            Ok(()) => {
                log::info!("progress saved ({} ms played)", record.game_time);
                Ok(())
            }
            Err(err) => {
                log::warn!("progress kept in memory only: {}", err);
                Err(err)
            }
        }
    }

    pub fn reset(&self) -> ProgressRecord {
        if let Err(err) = self.storage.remove(&self.key) {
            log::warn!("could not clear stored progress: {}", err);
        }
        log::info!("progress reset");
        self.defaults()
    }
}

// duplicate ids in hand-edited saves collapse to the first occurrence
fn sanitize(record: &mut ProgressRecord) {
    let mut seen = Vec::with_capacity(record.landmarks_visited.len());
    record.landmarks_visited.retain(|id| insert_once(&mut seen, id));
    let mut seen = Vec::with_capacity(record.landmarks_completed.len());
    record.landmarks_completed.retain(|id| insert_once(&mut seen, id));
    for id in record.landmarks_completed.clone() {
        record.mark_visited(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualClock;
    use approx::assert_relative_eq;

    const KEY: &str = "gameProgress";

    fn store() -> (ProgressStore, MemoryStorage, ManualClock) {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(10_000.0);
        let store = ProgressStore::new(
            Rc::new(storage.clone()),
            Rc::new(clock.clone()),
            KEY,
            Position { x: 512.0, y: 450.0 },
        );
        (store, storage, clock)
    }

    fn id(value: &str) -> LandmarkId {
        LandmarkId::from(value)
    }

    #[test]
    fn fresh_profile_loads_defaults() {
        let (store, _, _) = store();
        let record = store.load();
        assert!(record.landmarks_visited.is_empty());
        assert!(record.landmarks_completed.is_empty());
        assert_eq!(record.total_distance, 0);
        assert_eq!(record.player_position, Position { x: 512.0, y: 450.0 });
    }

    #[test]
    fn malformed_data_fails_open() {
        let (store, storage, _) = store();
        storage.put_raw(KEY, "{not json");
        assert_eq!(store.load().landmarks_visited.len(), 0);
    }

    #[test]
    fn save_then_load_keeps_every_field() {
        let (store, _, clock) = store();
        let mut record = store.load();
        record.mark_visited(&id("temple-literature"));
        record.mark_completed(&id("temple-literature"));
        record.record_distance(80);
        record.player_position = Position { x: 800.0, y: 475.0 };

        clock.advance(1_500.0);
        store.save(&mut record).unwrap();
        let loaded = store.load();

        assert_eq!(loaded.landmarks_visited, record.landmarks_visited);
        assert_eq!(loaded.landmarks_completed, record.landmarks_completed);
        assert_eq!(loaded.total_distance, 80);
        assert_eq!(loaded.player_position, record.player_position);
        assert_relative_eq!(loaded.game_time, 1_500.0);
        assert_relative_eq!(loaded.last_save_time, 11_500.0);
    }

    #[test]
    fn game_time_accumulates_across_saves() {
        let (store, _, clock) = store();
        let mut record = store.load();
        clock.advance(1_000.0);
        store.save(&mut record).unwrap();
        clock.advance(2_000.0);
        store.save(&mut record).unwrap();
        assert_relative_eq!(record.game_time, 3_000.0);
    }

    #[test]
    fn time_away_from_the_game_is_not_counted() {
        let (store, _, clock) = store();
        let mut record = store.load();
        clock.advance(1_000.0);
        store.save(&mut record).unwrap();

        clock.advance(60_000.0);
        let mut reloaded = store.load();
        clock.advance(500.0);
        store.save(&mut reloaded).unwrap();

        assert_relative_eq!(reloaded.game_time, 1_500.0);
    }

    #[test]
    fn failed_save_keeps_time_in_memory_and_retries() {
        let (store, storage, clock) = store();
        let mut record = store.load();
        storage.set_available(false);
        clock.advance(1_000.0);
        assert!(store.save(&mut record).is_err());

        storage.set_available(true);
        clock.advance(1_000.0);
        store.save(&mut record).unwrap();

        assert_relative_eq!(store.load().game_time, 2_000.0);
    }

    #[test]
    fn unavailable_storage_loads_defaults() {
        let (store, storage, _) = store();
        storage.set_available(false);
        assert!(store.load().landmarks_visited.is_empty());
    }

    #[test]
    fn reset_clears_storage() {
        let (store, storage, _) = store();
        let mut record = store.load();
        record.mark_visited(&id("hoan-kiem-lake"));
        store.save(&mut record).unwrap();

        let fresh = store.reset();

        assert!(fresh.landmarks_visited.is_empty());
        assert_eq!(storage.raw(KEY), None);
    }

    #[test]
    fn visiting_twice_keeps_one_entry_and_order() {
        let mut record = ProgressRecord::new(Position::default(), 0.0);
        assert!(record.mark_visited(&id("a")));
        assert!(record.mark_visited(&id("b")));
        assert!(!record.mark_visited(&id("a")));
        assert_eq!(record.landmarks_visited, vec![id("a"), id("b")]);
    }

    #[test]
    fn distance_is_a_high_water_mark() {
        let mut record = ProgressRecord::new(Position::default(), 0.0);
        record.record_distance(40);
        record.record_distance(12);
        assert_eq!(record.total_distance, 40);
    }

    #[test]
    fn loading_repairs_duplicate_and_orphan_ids() {
        let (store, storage, _) = store();
        storage.put_raw(
            KEY,
            r#"{"playerPosition":{"x":1,"y":2},"landmarksVisited":["a","a"],
               "landmarksCompleted":["b"],"totalDistance":3,"gameTime":4,"lastSaveTime":5}"#,
        );
        let record = store.load();
        assert_eq!(record.landmarks_visited, vec![id("a"), id("b")]);
        assert_eq!(record.landmarks_completed, vec![id("b")]);
    }
}
