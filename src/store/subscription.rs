// src/store/subscription.rs

use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{Document, DocumentStore, Query, StoreError};

/// Notification that a document was written or deleted.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
}

/// A live query.
///
/// The first call to [`Subscription::next`] yields the current snapshot;
/// every later call waits for a write to the queried collection and yields a
/// fresh snapshot. Dropping the subscription unsubscribes.
pub struct Subscription {
    store: Arc<dyn DocumentStore>,
    query: Query,
    changes: broadcast::Receiver<ChangeEvent>,
    primed: bool,
}

impl Subscription {
    pub fn new(store: Arc<dyn DocumentStore>, query: Query) -> Self {
        // Subscribe before the first read so no write can slip in between.
        let changes = store.changes();
        Self {
            store,
            query,
            changes,
            primed: false,
        }
    }

    pub async fn next(&mut self) -> Option<Result<Vec<Document>, StoreError>> {
        if !self.primed {
            self.primed = true;
            return Some(self.store.query(&self.query).await);
        }

        loop {
            match self.changes.recv().await {
                Ok(event) if event.collection == self.query.collection => {
                    return Some(self.store.query(&self.query).await);
                }
                Ok(_) => continue,
                // Missed events: a re-read brings us back in sync.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Subscription lagged by {} events, re-reading", skipped);
                    return Some(self.store.query(&self.query).await);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Document>, StoreError>> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|snapshot| (snapshot, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn yields_initial_snapshot_then_updates() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut sub = Subscription::new(store.clone(), Query::collection("results").eq("quizId", "q1"));

        let first = sub.next().await.unwrap().unwrap();
        assert!(first.is_empty());

        store
            .create("results", json!({ "quizId": "q1", "score": 10 }).as_object().cloned().unwrap())
            .await
            .unwrap();

        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn ignores_other_collections() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut sub = Subscription::new(store.clone(), Query::collection("results"));
        sub.next().await.unwrap().unwrap();

        store
            .create("quizzes", json!({ "title": "x" }).as_object().cloned().unwrap())
            .await
            .unwrap();
        store
            .create("results", json!({ "score": 1 }).as_object().cloned().unwrap())
            .await
            .unwrap();

        let snapshot = sub.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].collection, "results");
    }
}
