// src/store/memory.rs

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use super::{
    ChangeEvent, DocKey, Document, DocumentStore, Query, StoreError, WriteOp, check_precondition,
    compare_values, Direction,
};

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// In-process document store.
///
/// Used by the test-suite and when no `DATABASE_URL` is configured. Commits
/// are applied under a single write lock, which makes every batch atomic and
/// serializable.
pub struct MemoryStore {
    collections: RwLock<Collections>,
    changes: broadcast::Sender<ChangeEvent>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            collections: RwLock::new(HashMap::new()),
            changes,
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the backend going away (every call fails with
    /// [`StoreError::Unavailable`]) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_available()?;
        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.ensure_available()?;
        let mut docs: Vec<Document> = {
            let collections = self.collections.read().map_err(|_| Self::poisoned())?;
            collections
                .get(&query.collection)
                .map(|docs| docs.values().filter(|d| query.matches(d)).cloned().collect())
                .unwrap_or_default()
        };

        docs.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        if let Some((field, direction)) = &query.order_by {
            // Stable sort keeps creation order among equal keys; missing keys last.
            docs.sort_by(|a, b| match (a.data.get(field), b.data.get(field)) {
                (Some(x), Some(y)) => {
                    let ord = compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal);
                    match direction {
                        Direction::Asc => ord,
                        Direction::Desc => ord.reverse(),
                    }
                }
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }

        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<Vec<Document>, StoreError> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut written = Vec::new();
        let mut events = Vec::new();

        {
            let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;

            // Stage every op first so a failing precondition leaves nothing applied.
            let mut staged: Vec<(DocKey, Option<Document>)> = Vec::with_capacity(ops.len());
            for op in ops {
                let key = op.key().clone();
                let current = staged
                    .iter()
                    .rev()
                    .find(|(k, _)| k == &key)
                    .map(|(_, doc)| doc.clone())
                    .unwrap_or_else(|| {
                        collections
                            .get(&key.collection)
                            .and_then(|docs| docs.get(&key.id))
                            .cloned()
                    });

                let next = match op {
                    WriteOp::Set {
                        key,
                        data,
                        merge,
                        precondition,
                    } => {
                        check_precondition(&key, current.as_ref().map(|d| d.version), precondition)?;
                        let doc = match current {
                            Some(mut doc) => {
                                if merge {
                                    doc.data.extend(data);
                                } else {
                                    doc.data = data;
                                }
                                doc.version += 1;
                                doc.updated_at = now;
                                doc
                            }
                            None => Document {
                                collection: key.collection.clone(),
                                id: key.id.clone(),
                                version: 1,
                                created_at: now,
                                updated_at: now,
                                data,
                            },
                        };
                        Some(doc)
                    }
                    WriteOp::Delete { key, precondition } => {
                        check_precondition(&key, current.as_ref().map(|d| d.version), precondition)?;
                        None
                    }
                };
                staged.push((key, next));
            }

            for (key, doc) in staged {
                events.push(ChangeEvent {
                    collection: key.collection.clone(),
                    id: key.id.clone(),
                });
                match doc {
                    Some(doc) => {
                        written.push(doc.clone());
                        collections
                            .entry(key.collection)
                            .or_default()
                            .insert(key.id, doc);
                    }
                    None => {
                        if let Some(docs) = collections.get_mut(&key.collection) {
                            docs.remove(&key.id);
                        }
                    }
                }
            }
        }

        for event in events {
            // No receivers is fine.
            let _ = self.changes.send(event);
        }
        Ok(written)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
