//! Embedded object store
//!
//! A miniature control plane backing the integration suite and self-contained
//! deployments. It reproduces the store semantics the reconciler depends on:
//! uid assignment, generation bumps on spec changes, merge patches, watch
//! streams, and finalizer-aware deletion (an object with finalizers is only
//! marked with a deletion timestamp; it disappears when the last finalizer is
//! removed).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::StoreError;
use crate::meta::{GroupVersionKind, ResourceKey};
use crate::object::DynamicObject;
use crate::store::{ObjectStore, WatchEvent, WatchStream};

const WATCH_BUFFER: usize = 256;

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Default)]
struct Shelf {
    objects: BTreeMap<String, DynamicObject>,
}

/// In-memory [`ObjectStore`].
pub struct InMemoryStore {
    shelves: Mutex<BTreeMap<String, Shelf>>,
    watchers: Mutex<BTreeMap<String, broadcast::Sender<WatchEvent>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            shelves: Mutex::new(BTreeMap::new()),
            watchers: Mutex::new(BTreeMap::new()),
        }
    }

    fn gvk_key(gvk: &GroupVersionKind) -> String {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }

    fn publish(&self, gvk: &GroupVersionKind, event: WatchEvent) {
        let watchers = self.watchers.lock();
        if let Some(sender) = watchers.get(&Self::gvk_key(gvk)) {
            // Nobody listening is fine.
            let _ = sender.send(event);
        }
    }

    fn object_key(object: &DynamicObject) -> Result<String> {
        let key = object
            .key()
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(key.to_string())
    }

    /// Remove the object outright or, when finalizers are present, mark it
    /// as deleting. Returns the emitted event, if any.
    fn finalize_or_remove(shelf: &mut Shelf, key: &str) -> Option<WatchEvent> {
        let (finalizers_empty, already_deleting) = {
            let object = shelf.objects.get(key)?;
            (
                object.finalizers().is_empty(),
                object.deletion_timestamp().is_some(),
            )
        };

        if finalizers_empty {
            shelf.objects.remove(key).map(WatchEvent::Deleted)
        } else if !already_deleting {
            let object = shelf.objects.get_mut(key)?;
            let old = object.clone();
            object.set_deletion_timestamp(Utc::now());
            Some(WatchEvent::Modified {
                old: Some(old),
                new: object.clone(),
            })
        } else {
            None
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, gvk: &GroupVersionKind, key: &ResourceKey) -> Result<DynamicObject> {
        let shelves = self.shelves.lock();
        shelves
            .get(&Self::gvk_key(gvk))
            .and_then(|shelf| shelf.objects.get(&key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(&gvk.kind, key))
    }

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        mut object: DynamicObject,
    ) -> Result<DynamicObject> {
        let key = Self::object_key(&object)?;
        {
            let mut shelves = self.shelves.lock();
            let shelf = shelves.entry(Self::gvk_key(gvk)).or_default();
            if shelf.objects.contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    kind: gvk.kind.clone(),
                    key,
                });
            }
            if object.uid().is_none() {
                object.set_uid(&Uuid::new_v4().to_string());
            }
            object.set_generation(1);
            shelf.objects.insert(key, object.clone());
        }
        self.publish(gvk, WatchEvent::Added(object.clone()));
        Ok(object)
    }

    async fn update(
        &self,
        gvk: &GroupVersionKind,
        mut object: DynamicObject,
    ) -> Result<DynamicObject> {
        let key = Self::object_key(&object)?;
        let (event, result) = {
            let mut shelves = self.shelves.lock();
            let shelf = shelves
                .get_mut(&Self::gvk_key(gvk))
                .ok_or_else(|| StoreError::not_found(&gvk.kind, &key))?;
            let existing = shelf
                .objects
                .get(&key)
                .ok_or_else(|| StoreError::not_found(&gvk.kind, &key))?
                .clone();

            // Uid and generation are owned by the store.
            if let Some(uid) = existing.uid() {
                object.set_uid(uid);
            }
            let generation = existing.generation().unwrap_or(1);
            if existing.spec() != object.spec() {
                object.set_generation(generation + 1);
            } else {
                object.set_generation(generation);
            }

            shelf.objects.insert(key.clone(), object.clone());

            // Clearing the last finalizer of a deleting object removes it.
            if object.is_deleting() && object.finalizers().is_empty() {
                let event = shelf.objects.remove(&key).map(WatchEvent::Deleted);
                (event, object.clone())
            } else {
                (
                    Some(WatchEvent::Modified {
                        old: Some(existing),
                        new: object.clone(),
                    }),
                    object.clone(),
                )
            }
        };
        if let Some(event) = event {
            self.publish(gvk, event);
        }
        Ok(result)
    }

    async fn patch(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
        patch: Value,
    ) -> Result<DynamicObject> {
        let current = self.get(gvk, key).await?;
        let mut value = current.into_value();
        merge_patch(&mut value, &patch);
        let object =
            DynamicObject::new(value).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.update(gvk, object).await
    }

    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
        status: Value,
    ) -> Result<DynamicObject> {
        let (old, new) = {
            let mut shelves = self.shelves.lock();
            let shelf = shelves
                .get_mut(&Self::gvk_key(gvk))
                .ok_or_else(|| StoreError::not_found(&gvk.kind, key))?;
            let object = shelf
                .objects
                .get_mut(&key.to_string())
                .ok_or_else(|| StoreError::not_found(&gvk.kind, key))?;

            let old = object.clone();
            let mut current = object.status();
            merge_patch(&mut current, &status);
            object.set_status(current);
            (old, object.clone())
        };
        self.publish(
            gvk,
            WatchEvent::Modified {
                old: Some(old),
                new: new.clone(),
            },
        );
        Ok(new)
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ResourceKey) -> Result<()> {
        let event = {
            let mut shelves = self.shelves.lock();
            let shelf = shelves
                .get_mut(&Self::gvk_key(gvk))
                .ok_or_else(|| StoreError::not_found(&gvk.kind, key))?;
            let key = key.to_string();
            if !shelf.objects.contains_key(&key) {
                return Err(StoreError::not_found(&gvk.kind, &key));
            }
            Self::finalize_or_remove(shelf, &key)
        };
        if let Some(event) = event {
            self.publish(gvk, event);
        }
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let shelves = self.shelves.lock();
        let objects = match shelves.get(&Self::gvk_key(gvk)) {
            Some(shelf) => shelf
                .objects
                .values()
                .filter(|obj| namespace.is_none() || obj.namespace() == namespace)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Ok(objects)
    }

    async fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream> {
        let receiver = {
            let mut watchers = self.watchers.lock();
            let sender = watchers
                .entry(Self::gvk_key(gvk))
                .or_insert_with(|| broadcast::channel(WATCH_BUFFER).0);
            sender.subscribe()
        };
        let stream = BroadcastStream::new(receiver).filter_map(|event| async move {
            // Lagged receivers drop missed events; level-based reconciles
            // recover on the next observed change.
            event.ok()
        });
        Ok(stream.boxed())
    }
}

/// RFC 7386 style merge: objects merge recursively, nulls delete, everything
/// else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            let map = match target.as_object_mut() {
                Some(map) => map,
                None => unreachable!(),
            };
            for (key, value) in entries {
                if value.is_null() {
                    map.remove(key);
                } else {
                    merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        other => {
            *target = other.clone();
        }
    }
}
