//! Change subscriptions and the refetch-on-invalidate list driver.
//!
//! A [`Subscription`] only says "your view is stale"; it never carries rows.
//! [`LiveList`] joins one to a fetch function and republishes a full snapshot
//! after every invalidation.

use crate::errors::AppResult;
use crate::models::{ChangeEvent, ChangeKind, Complaint};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

const ALERT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    All,
    Owner(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invalidation {
    /// Change events folded into this invalidation.
    pub events: usize,
    /// An admin response landed on one of the subscriber's own complaints.
    pub admin_responded: bool,
}

impl Invalidation {
    fn absorb(&mut self, scope: SubscriptionScope, event: &ChangeEvent) {
        self.events += 1;
        if matches!(scope, SubscriptionScope::Owner(_))
            && event.kind == ChangeKind::Updated
            && event.has_admin_response
        {
            self.admin_responded = true;
        }
    }
}

pub struct Subscription {
    scope: SubscriptionScope,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(scope: SubscriptionScope, receiver: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { scope, receiver }
    }

    pub fn scope(&self) -> SubscriptionScope {
        self.scope
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        match self.scope {
            SubscriptionScope::All => true,
            SubscriptionScope::Owner(user_id) => event.user_id == user_id,
        }
    }

    /// Waits for the next relevant change, then folds in everything already
    /// queued so a burst of writes costs one refetch. Returns `None` once the
    /// store has gone away.
    pub async fn next_invalidation(&mut self) -> Option<Invalidation> {
        let mut invalidation = Invalidation::default();
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => {
                    invalidation.absorb(self.scope, &event);
                    break;
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // Missed events may have been ours; the view must be rebuilt.
                    tracing::debug!(skipped, "change subscription lagged");
                    invalidation.events += skipped as usize;
                    break;
                }
                Err(RecvError::Closed) => return None,
            }
        }

        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        invalidation.absorb(self.scope, &event);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => invalidation.events += skipped as usize,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        Some(invalidation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    AdminResponded,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub generation: u64,
    pub complaints: Vec<Complaint>,
    /// Last refetch failure; the rows are from the previous good fetch.
    pub error: Option<String>,
}

type FetchFn = Arc<dyn Fn() -> AppResult<Vec<Complaint>> + Send + Sync>;

/// Keeps a complaint list fresh by refetching on every invalidation.
pub struct LiveList {
    snapshots: watch::Receiver<Arc<Snapshot>>,
    alerts: mpsc::Receiver<Alert>,
    task: JoinHandle<()>,
}

impl LiveList {
    pub fn spawn<F>(subscription: Subscription, fetch: F) -> Self
    where
        F: Fn() -> AppResult<Vec<Complaint>> + Send + Sync + 'static,
    {
        let (snapshot_tx, snapshots) = watch::channel(Arc::new(Snapshot::default()));
        let (alert_tx, alerts) = mpsc::channel(ALERT_BUFFER);
        let fetch: FetchFn = Arc::new(fetch);
        let task = tokio::spawn(drive(subscription, fetch, snapshot_tx, alert_tx));
        Self {
            snapshots,
            alerts,
            task,
        }
    }

    /// Waits until a snapshot newer than the last one seen is published.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        self.snapshots.changed().await.ok()?;
        Some(self.snapshots.borrow_and_update().clone())
    }

    pub async fn next_alert(&mut self) -> Option<Alert> {
        self.alerts.recv().await
    }
}

impl Drop for LiveList {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    mut subscription: Subscription,
    fetch: FetchFn,
    snapshots: watch::Sender<Arc<Snapshot>>,
    alerts: mpsc::Sender<Alert>,
) {
    let mut generation = 0u64;
    refresh(&fetch, &snapshots, &mut generation).await;

    while let Some(invalidation) = subscription.next_invalidation().await {
        if invalidation.admin_responded && alerts.try_send(Alert::AdminResponded).is_err() {
            tracing::debug!("alert dropped, receiver full or gone");
        }
        refresh(&fetch, &snapshots, &mut generation).await;
        if snapshots.is_closed() {
            break;
        }
    }
}

async fn refresh(fetch: &FetchFn, snapshots: &watch::Sender<Arc<Snapshot>>, generation: &mut u64) {
    *generation += 1;
    let this_generation = *generation;
    let fetch = Arc::clone(fetch);
    let outcome = match tokio::task::spawn_blocking(move || fetch()).await {
        Ok(result) => result.map_err(|error| error.to_string()),
        Err(join_error) => Err(join_error.to_string()),
    };

    snapshots.send_if_modified(|current| {
        if this_generation <= current.generation {
            return false;
        }
        let next = match outcome {
            Ok(complaints) => Snapshot {
                generation: this_generation,
                complaints,
                error: None,
            },
            Err(error) => {
                tracing::warn!(error = %error, "complaint refetch failed");
                Snapshot {
                    generation: this_generation,
                    complaints: current.complaints.clone(),
                    error: Some(error),
                }
            }
        };
        *current = Arc::new(next);
        true
    });
}

#[cfg(test)]
mod tests {
    use super::{Alert, LiveList, Subscription, SubscriptionScope};
    use crate::errors::AppError;
    use crate::models::{ChangeEvent, ChangeKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    fn event(user_id: Uuid, kind: ChangeKind, has_admin_response: bool) -> ChangeEvent {
        ChangeEvent {
            kind,
            complaint_id: Uuid::new_v4(),
            user_id,
            has_admin_response,
        }
    }

    #[tokio::test]
    async fn owner_scope_ignores_other_users_and_flags_responses() {
        let (tx, rx) = broadcast::channel(16);
        let me = Uuid::new_v4();
        let mut subscription = Subscription::new(SubscriptionScope::Owner(me), rx);

        tx.send(event(Uuid::new_v4(), ChangeKind::Updated, true)).expect("send");
        tx.send(event(me, ChangeKind::Updated, true)).expect("send");

        let invalidation = subscription.next_invalidation().await.expect("invalidation");
        assert_eq!(invalidation.events, 1);
        assert!(invalidation.admin_responded);
    }

    #[tokio::test]
    async fn bursts_collapse_into_one_invalidation() {
        let (tx, rx) = broadcast::channel(16);
        let mut subscription = Subscription::new(SubscriptionScope::All, rx);
        for _ in 0..5 {
            tx.send(event(Uuid::new_v4(), ChangeKind::Inserted, false)).expect("send");
        }

        let invalidation = subscription.next_invalidation().await.expect("invalidation");
        assert_eq!(invalidation.events, 5);
        assert!(!invalidation.admin_responded);
    }

    #[tokio::test]
    async fn lagging_still_invalidates_and_closing_ends() {
        let (tx, rx) = broadcast::channel(2);
        let mut subscription = Subscription::new(SubscriptionScope::Owner(Uuid::new_v4()), rx);
        for _ in 0..6 {
            tx.send(event(Uuid::new_v4(), ChangeKind::Inserted, false)).expect("send");
        }
        assert!(subscription.next_invalidation().await.is_some());

        drop(tx);
        assert!(subscription.next_invalidation().await.is_none());
    }

    #[tokio::test]
    async fn live_list_refetches_and_keeps_rows_on_failure() {
        let (tx, rx) = broadcast::channel(16);
        let me = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut live = LiveList::spawn(Subscription::new(SubscriptionScope::Owner(me), rx), move || {
            match counter.fetch_add(1, Ordering::SeqCst) {
                1 => Err(AppError::Store("connection reset".to_string())),
                _ => Ok(Vec::new()),
            }
        });

        let first = tokio::time::timeout(Duration::from_secs(5), live.changed())
            .await
            .expect("initial fetch")
            .expect("snapshot");
        assert_eq!(first.generation, 1);
        assert!(first.error.is_none());

        tx.send(event(me, ChangeKind::Updated, true)).expect("send");
        let second = tokio::time::timeout(Duration::from_secs(5), live.changed())
            .await
            .expect("refetch")
            .expect("snapshot");
        assert_eq!(second.generation, 2);
        assert!(second.error.as_deref().unwrap_or_default().contains("connection reset"));

        let alert = tokio::time::timeout(Duration::from_secs(5), live.next_alert())
            .await
            .expect("alert");
        assert_eq!(alert, Some(Alert::AdminResponded));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
