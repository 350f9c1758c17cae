//! Long-poll notification service.
//!
//! A poll is registered under every watch key of its namespaces *before*
//! the release message cache is checked. A release that lands between the
//! check and the wait is therefore seen either by the check or by the
//! wake-up pass, never by neither.
//!
//! Every poll resolves exactly once: a CAS on `PendingPoll::completed`
//! picks the winner among immediate change, wake-up and timeout. A timeout
//! that loses the CAS waits for the winner's value instead of answering
//! "not modified". A
//! dropped handler future (client disconnect) also drops the
//! [`Registration`] guard, whose `Drop` unregisters the poll from every
//! key it was registered under.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use apollo_sdk::constants::KEY_SEPARATOR;
use apollo_sdk::objects::{ConfigNotification, NotificationRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::{ConfigStore, LongPollSettings};
use crate::entities::ReleaseMessage;
use crate::events::{DispatchJob, DispatchJobSender};
use crate::processors::release_message_cache::ReleaseMessageCache;
use crate::processors::release_message_scanner::{ListenerError, ReleaseMessageListener};
use crate::utils::namespace::{filter_namespace_name, normalize_namespace};
use crate::watch_keys::WatchKeyAssembler;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("invalid notifications: {0}")]
    InvalidNotifications(String),
}

/// A client's long-poll request, already decoded from the query string.
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub app_id: String,
    pub cluster: String,
    pub data_center: Option<String>,
    pub client_ip: Option<String>,
    pub notifications: Vec<NotificationRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// At least one namespace has a newer notification id.
    Changed(Vec<ConfigNotification>),
    /// The poll timed out with nothing new.
    NotModified,
}

/// What the client reported for one namespace after name cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClientNotification {
    /// Name as the client spelled it, minus any `.properties` suffix.
    original_name: String,
    notification_id: i64,
}

/// One outstanding poll.
#[derive(Debug)]
pub struct PendingPoll {
    id: u64,
    completed: AtomicBool,
    sender: parking_lot::Mutex<Option<oneshot::Sender<Vec<ConfigNotification>>>>,
    /// Lowercased canonical namespace to the client's spelling.
    original_names: HashMap<String, String>,
}

impl PendingPoll {
    fn new(
        id: u64,
        original_names: HashMap<String, String>,
    ) -> (Arc<Self>, oneshot::Receiver<Vec<ConfigNotification>>) {
        let (tx, rx) = oneshot::channel();
        let poll = Arc::new(Self {
            id,
            completed: AtomicBool::new(false),
            sender: parking_lot::Mutex::new(Some(tx)),
            original_names,
        });
        (poll, rx)
    }

    /// Resolve the poll. Returns `false` if it was already resolved.
    pub fn complete(&self, mut notifications: Vec<ConfigNotification>) -> bool {
        if !self.try_finish() {
            return false;
        }
        for notification in &mut notifications {
            if let Some(original) = self
                .original_names
                .get(&notification.namespace_name.to_lowercase())
            {
                notification.namespace_name = original.clone();
            }
        }
        if let Some(tx) = self.sender.lock().take() {
            let _ = tx.send(notifications);
        }
        true
    }

    /// Mark the poll resolved without a value.
    fn expire(&self) -> bool {
        self.try_finish()
    }

    /// Wait up to `timeout` for the poll's value. `None` means it expired.
    async fn wait(
        &self,
        mut rx: oneshot::Receiver<Vec<ConfigNotification>>,
        timeout: Duration,
    ) -> Option<Vec<ConfigNotification>> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(result) => result.ok(),
            Err(_) if self.expire() => None,
            // A wake-up claimed the poll first; its value is on the way.
            Err(_) => rx.await.ok(),
        }
    }

    fn try_finish(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
impl PendingPoll {
    pub(crate) fn new_for_test(
        id: u64,
    ) -> (Arc<Self>, oneshot::Receiver<Vec<ConfigNotification>>) {
        Self::new(id, HashMap::new())
    }
}

/// Concurrent multimap of lowercased watch key to waiting polls.
#[derive(Default)]
struct PollRegistry {
    polls: DashMap<String, HashMap<u64, Arc<PendingPoll>>>,
}

impl PollRegistry {
    fn register<'a>(&'a self, poll: &Arc<PendingPoll>, keys: Vec<String>) -> Registration<'a> {
        for key in &keys {
            self.polls
                .entry(key.clone())
                .or_default()
                .insert(poll.id, poll.clone());
        }
        Registration {
            registry: self,
            poll_id: poll.id,
            keys,
        }
    }

    fn unregister(&self, poll_id: u64, keys: &[String]) {
        for key in keys {
            if let Entry::Occupied(mut entry) = self.polls.entry(key.clone()) {
                entry.get_mut().remove(&poll_id);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
    }

    fn polls_for(&self, key: &str) -> Vec<Arc<PendingPoll>> {
        self.polls
            .get(&key.to_lowercase())
            .map(|polls| polls.values().cloned().collect())
            .unwrap_or_default()
    }

    fn contains_poll(&self, poll_id: u64) -> bool {
        self.polls.iter().any(|entry| entry.value().contains_key(&poll_id))
    }
}

/// Keeps a poll registered for as long as it lives.
struct Registration<'a> {
    registry: &'a PollRegistry,
    poll_id: u64,
    keys: Vec<String>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.poll_id, &self.keys);
    }
}

pub struct NotificationService {
    assembler: WatchKeyAssembler,
    cache: Arc<ReleaseMessageCache>,
    registry: PollRegistry,
    next_poll_id: AtomicU64,
    settings: ConfigStore<LongPollSettings>,
    dispatch_tx: DispatchJobSender,
}

impl NotificationService {
    pub fn new(
        assembler: WatchKeyAssembler,
        cache: Arc<ReleaseMessageCache>,
        settings: ConfigStore<LongPollSettings>,
        dispatch_tx: DispatchJobSender,
    ) -> Self {
        Self {
            assembler,
            cache,
            registry: PollRegistry::default(),
            next_poll_id: AtomicU64::new(1),
            settings,
            dispatch_tx,
        }
    }

    /// Number of watch keys that currently have at least one waiting poll.
    pub fn watched_key_count(&self) -> usize {
        self.registry.polls.len()
    }

    /// Hold the request until one of its namespaces changes or the
    /// long-poll timeout passes.
    pub async fn poll(&self, request: PollRequest) -> Result<PollOutcome, PollError> {
        let filtered = self.filter_notifications(&request.app_id, &request.notifications)?;
        let namespaces: Vec<String> = filtered.keys().cloned().collect();
        let keys_by_namespace = self.assembler.assemble_batch(
            &request.app_id,
            &request.cluster,
            &namespaces,
            request.data_center.as_deref(),
        );

        let original_names = filtered
            .iter()
            .map(|(ns, client)| (ns.to_lowercase(), client.original_name.clone()))
            .collect();
        let poll_id = self.next_poll_id.fetch_add(1, Ordering::Relaxed);
        let (poll, rx) = PendingPoll::new(poll_id, original_names);

        let watched: BTreeSet<String> = keys_by_namespace
            .values()
            .flatten()
            .map(|key| key.to_lowercase())
            .collect();
        let _registration = self.registry.register(&poll, watched.into_iter().collect());
        debug!(
            poll_id,
            app_id = %request.app_id,
            cluster = %request.cluster,
            client_ip = ?request.client_ip,
            namespaces = ?namespaces,
            "Long poll registered"
        );

        let changes = self.find_changes(&filtered, &keys_by_namespace).await;
        if !changes.is_empty() {
            poll.complete(changes);
        }

        let timeout = self.settings.load().timeout;
        match poll.wait(rx, timeout).await {
            Some(notifications) => Ok(PollOutcome::Changed(notifications)),
            None => {
                debug!(poll_id, "Long poll timed out");
                Ok(PollOutcome::NotModified)
            }
        }
    }

    /// Drop blank names, strip `.properties`, normalize case, and keep the
    /// smaller id when two entries name the same namespace.
    fn filter_notifications(
        &self,
        app_id: &str,
        notifications: &[NotificationRequest],
    ) -> Result<BTreeMap<String, ClientNotification>, PollError> {
        let metadata = self.assembler.metadata();
        let mut filtered: BTreeMap<String, ClientNotification> = BTreeMap::new();
        for notification in notifications {
            if notification.namespace_name.trim().is_empty() {
                continue;
            }
            let original_name = filter_namespace_name(&notification.namespace_name).to_string();
            let normalized = normalize_namespace(metadata.as_ref(), app_id, &original_name);
            if filtered
                .get(&normalized)
                .is_some_and(|existing| existing.notification_id < notification.notification_id)
            {
                continue;
            }
            filtered.insert(
                normalized,
                ClientNotification {
                    original_name,
                    notification_id: notification.notification_id,
                },
            );
        }
        if filtered.is_empty() {
            return Err(PollError::InvalidNotifications(
                "no namespace left after filtering".to_string(),
            ));
        }
        Ok(filtered)
    }

    async fn find_changes(
        &self,
        filtered: &BTreeMap<String, ClientNotification>,
        keys_by_namespace: &BTreeMap<String, BTreeSet<String>>,
    ) -> Vec<ConfigNotification> {
        let mut changes = Vec::new();
        for (namespace, client) in filtered {
            let Some(keys) = keys_by_namespace.get(namespace) else {
                continue;
            };
            let keys: Vec<String> = keys.iter().cloned().collect();
            let latest = self.cache.latest_for_keys(&keys).await;
            let Some(latest_id) = latest.iter().map(|(_, id)| *id).max() else {
                continue;
            };
            if latest_id > client.notification_id {
                let mut notification = ConfigNotification::new(namespace.clone(), latest_id);
                for (key, id) in latest {
                    notification.add_message(key, id);
                }
                changes.push(notification);
            }
        }
        changes
    }

    /// Wake every poll waiting on the message's watch key.
    pub async fn notify(&self, message: &ReleaseMessage) {
        let parts: Vec<&str> = message.message.split(KEY_SEPARATOR).collect();
        if parts.len() != 3 || parts.iter().any(|part| part.is_empty()) {
            warn!(id = message.id, message = %message.message, "Ignoring malformed release message");
            return;
        }

        let polls = self.registry.polls_for(&message.message);
        if polls.is_empty() {
            return;
        }

        let mut notification = ConfigNotification::new(parts[2], message.id);
        notification.add_message(message.message.clone(), message.id);

        let settings = self.settings.load();
        if polls.len() <= settings.notification_batch_size {
            debug!(
                id = message.id,
                message = %message.message,
                count = polls.len(),
                "Waking long polls"
            );
            for poll in polls {
                poll.complete(vec![notification.clone()]);
            }
            return;
        }

        debug!(
            id = message.id,
            message = %message.message,
            count = polls.len(),
            batch_size = settings.notification_batch_size,
            "Waking long polls in batches"
        );
        let job = DispatchJob {
            notification,
            polls,
            batch_size: settings.notification_batch_size,
            batch_interval: settings.notification_batch_interval,
        };
        if let Err(e) = self.dispatch_tx.send(job).await {
            warn!("Notification dispatcher is gone, waking polls inline");
            let job = e.0;
            for poll in job.polls {
                poll.complete(vec![job.notification.clone()]);
            }
        }
    }
}

#[async_trait]
impl ReleaseMessageListener for NotificationService {
    async fn handle_message(&self, message: &ReleaseMessage) -> Result<(), ListenerError> {
        self.notify(message).await;
        Ok(())
    }
}
