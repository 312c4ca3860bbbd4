use anyhow::Result;
use sqlx::{
    postgres::PgListener,
    types::{time::OffsetDateTime, uuid::Uuid},
    Pool, Postgres,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    db,
    models::{NotificationStatus, PendingNotification},
    push::{PushMessage, PushSender},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { message_id: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("notification already reached terminal state {0}")]
pub struct TransitionError(pub NotificationStatus);

impl NotificationStatus {
    /// `pending` moves to `sent` or `failed` once; terminal states never move.
    pub fn transition(self, outcome: &DeliveryOutcome) -> Result<NotificationStatus, TransitionError> {
        match self {
            NotificationStatus::Pending => Ok(match outcome {
                DeliveryOutcome::Sent { .. } => NotificationStatus::Sent,
                DeliveryOutcome::Failed { .. } => NotificationStatus::Failed,
            }),
            terminal => Err(TransitionError(terminal)),
        }
    }
}

/// One delivery attempt. Provider errors become a `Failed` outcome.
pub async fn deliver<P: PushSender>(push: &P, notification: &PendingNotification) -> DeliveryOutcome {
    let message = PushMessage::from_notification(notification);
    match push.send_to_topic(&message).await {
        Ok(message_id) => DeliveryOutcome::Sent { message_id },
        Err(e) => DeliveryOutcome::Failed {
            error: e.to_string(),
        },
    }
}

/// Persistence used by the dispatcher: claim a pending row, then settle it.
#[trait_variant::make(NotificationStore: Send)]
pub trait LocalNotificationStore {
    /// `None` when the row is already claimed or no longer pending.
    async fn claim(&self, id: Uuid) -> Result<Option<PendingNotification>>;
    /// Returns false when the row had already left `pending`.
    async fn complete(&self, id: Uuid, status: NotificationStatus, outcome: &DeliveryOutcome) -> Result<bool>;
}

/// `pending_notifications` table.
#[derive(Clone)]
pub struct PgNotificationStore {
    db_pool: Pool<Postgres>,
}

impl PgNotificationStore {
    pub fn new(db_pool: Pool<Postgres>) -> Self {
        Self { db_pool }
    }
}

impl NotificationStore for PgNotificationStore {
    async fn claim(&self, id: Uuid) -> Result<Option<PendingNotification>> {
        db::claim_notification(&self.db_pool, id).await
    }

    async fn complete(&self, id: Uuid, status: NotificationStatus, outcome: &DeliveryOutcome) -> Result<bool> {
        match outcome {
            DeliveryOutcome::Sent { message_id } => {
                db::complete_notification(
                    &self.db_pool,
                    id,
                    status.as_str(),
                    Some(OffsetDateTime::now_utc()),
                    Some(message_id),
                    None,
                )
                .await
            }
            DeliveryOutcome::Failed { error } => {
                db::complete_notification(&self.db_pool, id, status.as_str(), None, None, Some(error)).await
            }
        }
    }
}

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Doubles the reconnect delay, capped at [`MAX_RECONNECT_DELAY`].
fn next_reconnect_delay(delay: Duration) -> Duration {
    std::cmp::min(delay * 2, MAX_RECONNECT_DELAY)
}

async fn connect_listener(db_pool: &Pool<Postgres>) -> Result<PgListener> {
    let mut listener = PgListener::connect_with(db_pool).await?;
    listener.listen(db::PENDING_NOTIFICATION_CHANNEL).await?;
    Ok(listener)
}

/// Feeds notification ids to the dispatcher: first the backlog, then every
/// `pg_notify` on the pending channel. Listener failures reconnect with
/// exponential backoff and re-read the backlog; only shutdown or a closed
/// dispatcher channel ends the loop.
pub async fn run_notification_listener(
    db_pool: Pool<Postgres>,
    id_sender: mpsc::Sender<Uuid>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Result<()> {
    info!("Starting pending notification listener");

    let mut reconnect_delay = Duration::from_secs(1);

    'outer: loop {
        let mut listener = match connect_listener(&db_pool).await {
            Ok(listener) => {
                reconnect_delay = Duration::from_secs(1);
                listener
            }
            Err(e) => {
                error!("Failed to start notification listener: {:#}", e);
                info!("Retrying in {} seconds", reconnect_delay.as_secs());
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => {
                        reconnect_delay = next_reconnect_delay(reconnect_delay);
                        continue 'outer;
                    }
                    _ = &mut shutdown_rx => {
                        info!("Received shutdown signal while waiting to reconnect");
                        break 'outer;
                    }
                }
            }
        };

        // Anything created while we were not listening.
        if !queue_backlog(&db_pool, &id_sender).await {
            warn!("Dispatcher channel closed, stopping listener");
            break 'outer;
        }

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Notification listener received shutdown signal");
                    break 'outer;
                }
                received = listener.try_recv() => match received {
                    Ok(Some(notification)) => match notification.payload().parse::<Uuid>() {
                        Ok(id) => {
                            if id_sender.send(id).await.is_err() {
                                warn!("Dispatcher channel closed, stopping listener");
                                break 'outer;
                            }
                        }
                        Err(e) => warn!(payload = %notification.payload(), "Ignoring malformed notification id: {}", e),
                    },
                    Ok(None) => {
                        // Connection dropped; the listener reconnects on the next call.
                        warn!("Notification listener lost its connection, re-reading backlog");
                        if !queue_backlog(&db_pool, &id_sender).await {
                            warn!("Dispatcher channel closed, stopping listener");
                            break 'outer;
                        }
                    }
                    Err(e) => {
                        error!("Notification listener failed: {}", e);
                        info!("Reconnecting in {} seconds", reconnect_delay.as_secs());
                        tokio::select! {
                            _ = tokio::time::sleep(reconnect_delay) => {
                                reconnect_delay = next_reconnect_delay(reconnect_delay);
                                continue 'outer;
                            }
                            _ = &mut shutdown_rx => {
                                info!("Received shutdown signal while waiting to reconnect");
                                break 'outer;
                            }
                        }
                    }
                }
            }
        }
    }

    info!("Notification listener stopped");
    Ok(())
}

/// Returns false once the dispatcher channel is closed.
async fn queue_backlog(db_pool: &Pool<Postgres>, id_sender: &mpsc::Sender<Uuid>) -> bool {
    match db::unclaimed_notification_ids(db_pool).await {
        Ok(ids) => {
            if !ids.is_empty() {
                info!("Queueing {} unclaimed notifications", ids.len());
            }
            for id in ids {
                if id_sender.send(id).await.is_err() {
                    return false;
                }
            }
        }
        Err(e) => error!("Failed to read notification backlog: {}", e),
    }
    true
}

pub async fn run_notification_dispatcher<P: PushSender, S: NotificationStore>(
    mut id_receiver: mpsc::Receiver<Uuid>,
    push: P,
    store: S,
) -> Result<()> {
    info!("Starting notification dispatcher");

    let mut processed = 0u64;
    let mut sent = 0u64;
    let mut failed = 0u64;

    while let Some(id) = id_receiver.recv().await {
        match dispatch_one(&store, &push, id).await {
            Ok(Some(NotificationStatus::Sent)) => sent += 1,
            Ok(Some(_)) => failed += 1,
            Ok(None) => continue,
            Err(e) => {
                error!(notification_id = %id, "Failed to dispatch notification: {:#}", e);
                continue;
            }
        }
        processed += 1;
        if processed % 10 == 0 {
            info!(
                "Notification stats: {} processed ({} sent, {} failed)",
                processed, sent, failed
            );
        }
    }

    info!("Notification dispatcher stopped");
    Ok(())
}

/// Claims, delivers and settles one notification. `None` when the row was
/// already claimed elsewhere.
async fn dispatch_one<S: NotificationStore, P: PushSender>(
    store: &S,
    push: &P,
    id: Uuid,
) -> Result<Option<NotificationStatus>> {
    let Some(notification) = store.claim(id).await? else {
        debug!(notification_id = %id, "Notification already claimed, skipping");
        return Ok(None);
    };

    let timer = std::time::Instant::now();
    let outcome = deliver(push, &notification).await;
    crate::metrics::DISPATCH_TIME.observe(timer.elapsed().as_secs_f64());

    let next = notification.status.transition(&outcome)?;
    match &outcome {
        DeliveryOutcome::Sent { message_id } => {
            crate::metrics::NOTIFICATIONS_SENT.inc();
            info!(
                notification_id = %id,
                post_id = %notification.post_id,
                topic = %notification.topic,
                message_id = %message_id,
                "Notification sent"
            );
        }
        DeliveryOutcome::Failed { error } => {
            crate::metrics::NOTIFICATIONS_FAILED.inc();
            warn!(
                notification_id = %id,
                post_id = %notification.post_id,
                topic = %notification.topic,
                "Notification failed: {}",
                error
            );
        }
    }

    let recorded = match store.complete(id, next, &outcome).await {
        Ok(recorded) => recorded,
        Err(e) => {
            // Claimed rows are never re-queued, so this one needs a manual settle.
            error!(
                notification_id = %id,
                post_id = %notification.post_id,
                outcome = ?outcome,
                "Notification claimed but its outcome was not recorded; row stays pending: {:#}",
                e
            );
            return Err(e);
        }
    };

    if !recorded {
        warn!(notification_id = %id, "Notification left pending state before its outcome was recorded");
    }
    Ok(Some(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;
    use crate::push::{PushError, PushMessage};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory `pending_notifications` with the same claim/settle guards.
    #[derive(Clone, Default)]
    struct MemoryStore {
        rows: Arc<Mutex<HashMap<Uuid, PendingNotification>>>,
        completions: Arc<Mutex<Vec<(Uuid, NotificationStatus, DeliveryOutcome)>>>,
        fail_complete: bool,
    }

    impl MemoryStore {
        fn with(notification: PendingNotification) -> Self {
            let store = Self::default();
            store
                .rows
                .lock()
                .unwrap()
                .insert(notification.id, notification);
            store
        }

        fn row(&self, id: Uuid) -> PendingNotification {
            self.rows.lock().unwrap()[&id].clone()
        }
    }

    impl NotificationStore for MemoryStore {
        async fn claim(&self, id: Uuid) -> Result<Option<PendingNotification>> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&id) {
                Some(row) if row.status == NotificationStatus::Pending && row.claimed_at.is_none() => {
                    row.claimed_at = Some(OffsetDateTime::now_utc());
                    Ok(Some(row.clone()))
                }
                _ => Ok(None),
            }
        }

        async fn complete(&self, id: Uuid, status: NotificationStatus, outcome: &DeliveryOutcome) -> Result<bool> {
            if self.fail_complete {
                return Err(anyhow::anyhow!("connection reset"));
            }
            self.completions
                .lock()
                .unwrap()
                .push((id, status, outcome.clone()));
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(&id) else {
                return Ok(false);
            };
            if row.status != NotificationStatus::Pending {
                return Ok(false);
            }
            row.status = status;
            match outcome {
                DeliveryOutcome::Sent { message_id } => {
                    row.sent_at = Some(OffsetDateTime::now_utc());
                    row.message_id = Some(message_id.clone());
                }
                DeliveryOutcome::Failed { error } => row.error = Some(error.clone()),
            }
            Ok(true)
        }
    }

    #[derive(Clone)]
    struct RecordingPush {
        fail: bool,
        sent: Arc<Mutex<Vec<PushMessage>>>,
    }

    impl RecordingPush {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl PushSender for RecordingPush {
        async fn send_to_topic(&self, message: &PushMessage) -> Result<String, PushError> {
            self.sent.lock().unwrap().push(message.clone());
            if self.fail {
                Err(PushError::Rejected {
                    status: 404,
                    body: "topic not found".into(),
                })
            } else {
                Ok("projects/prime-status/messages/42".into())
            }
        }
    }

    fn pending() -> PendingNotification {
        PendingNotification {
            id: Uuid::new_v4(),
            title: "New post from Asha".into(),
            body: "Festivals".into(),
            image_url: "https://media.example/1.jpg".into(),
            post_id: Uuid::new_v4(),
            admin_name: "Asha".into(),
            categories: vec!["Festivals".into()],
            regions: vec!["Mysuru".into()],
            language: Language::Kannada,
            topic: "posts_kannada".into(),
            status: NotificationStatus::Pending,
            created_at: OffsetDateTime::UNIX_EPOCH,
            claimed_at: None,
            sent_at: None,
            message_id: None,
            error: None,
        }
    }

    #[test]
    fn test_pending_transitions_once() {
        let sent = DeliveryOutcome::Sent {
            message_id: "m1".into(),
        };
        let failed = DeliveryOutcome::Failed {
            error: "boom".into(),
        };

        assert_eq!(
            NotificationStatus::Pending.transition(&sent),
            Ok(NotificationStatus::Sent)
        );
        assert_eq!(
            NotificationStatus::Pending.transition(&failed),
            Ok(NotificationStatus::Failed)
        );
        for terminal in [NotificationStatus::Sent, NotificationStatus::Failed] {
            assert_eq!(terminal.transition(&sent), Err(TransitionError(terminal)));
            assert_eq!(terminal.transition(&failed), Err(TransitionError(terminal)));
        }
    }

    #[tokio::test]
    async fn test_deliver_makes_a_single_attempt() {
        let push = RecordingPush::new(false);
        let notification = pending();

        let outcome = deliver(&push, &notification).await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Sent {
                message_id: "projects/prime-status/messages/42".into()
            }
        );
        let sent = push.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "posts_kannada");
    }

    #[tokio::test]
    async fn test_provider_error_becomes_failed_outcome() {
        let push = RecordingPush::new(true);

        let outcome = deliver(&push, &pending()).await;

        match outcome {
            DeliveryOutcome::Failed { error } => assert!(error.contains("topic not found")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(push.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_is_sent_exactly_once() {
        let notification = pending();
        let id = notification.id;
        let store = MemoryStore::with(notification);
        let push = RecordingPush::new(false);

        let first = dispatch_one(&store, &push, id).await.unwrap();
        let second = dispatch_one(&store, &push, id).await.unwrap();

        assert_eq!(first, Some(NotificationStatus::Sent));
        assert_eq!(second, None);
        assert_eq!(push.sent.lock().unwrap().len(), 1);

        let completions = store.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(
            completions[0],
            (
                id,
                NotificationStatus::Sent,
                DeliveryOutcome::Sent {
                    message_id: "projects/prime-status/messages/42".into()
                }
            )
        );

        let row = store.row(id);
        assert_eq!(row.status, NotificationStatus::Sent);
        assert_eq!(row.message_id.as_deref(), Some("projects/prime-status/messages/42"));
        assert!(row.sent_at.is_some());
        assert!(row.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_recorded_and_not_retried() {
        let notification = pending();
        let id = notification.id;
        let store = MemoryStore::with(notification);
        let push = RecordingPush::new(true);

        assert_eq!(
            dispatch_one(&store, &push, id).await.unwrap(),
            Some(NotificationStatus::Failed)
        );
        assert_eq!(dispatch_one(&store, &push, id).await.unwrap(), None);
        assert_eq!(push.sent.lock().unwrap().len(), 1);

        let row = store.row(id);
        assert_eq!(row.status, NotificationStatus::Failed);
        assert!(row.error.as_deref().unwrap().contains("topic not found"));
        assert!(row.message_id.is_none());
        assert!(row.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_or_settled_rows_are_skipped() {
        let mut settled = pending();
        settled.status = NotificationStatus::Sent;
        let id = settled.id;
        let store = MemoryStore::with(settled);
        let push = RecordingPush::new(false);

        assert_eq!(dispatch_one(&store, &push, id).await.unwrap(), None);
        assert_eq!(dispatch_one(&store, &push, Uuid::new_v4()).await.unwrap(), None);
        assert!(push.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_surfaces_as_error() {
        let notification = pending();
        let id = notification.id;
        let store = MemoryStore {
            fail_complete: true,
            ..MemoryStore::with(notification)
        };
        let push = RecordingPush::new(false);

        assert!(dispatch_one(&store, &push, id).await.is_err());
        assert_eq!(push.sent.lock().unwrap().len(), 1);

        let row = store.row(id);
        assert_eq!(row.status, NotificationStatus::Pending);
        assert!(row.claimed_at.is_some());
    }

    #[tokio::test]
    async fn test_dispatcher_drains_channel_and_stops_when_closed() {
        let first = pending();
        let second = pending();
        let (first_id, second_id) = (first.id, second.id);
        let store = MemoryStore::with(first);
        store.rows.lock().unwrap().insert(second_id, second);

        let (tx, rx) = mpsc::channel(8);
        for id in [first_id, second_id, first_id] {
            tx.send(id).await.unwrap();
        }
        drop(tx);

        let push = RecordingPush::new(false);
        run_notification_dispatcher(rx, push.clone(), store.clone()).await.unwrap();

        assert_eq!(push.sent.lock().unwrap().len(), 2);
        assert_eq!(store.row(first_id).status, NotificationStatus::Sent);
        assert_eq!(store.row(second_id).status, NotificationStatus::Sent);
    }

    #[test]
    fn test_reconnect_delay_doubles_up_to_cap() {
        let mut delay = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..8 {
            delay = next_reconnect_delay(delay);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 32, 60, 60, 60]);
    }
}
