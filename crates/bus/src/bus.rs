//! The message bus.
//!
//! Delivery algorithm for one recipient:
//! 1. If the agent registered a direct handler, call it. Success ends delivery.
//! 2. Otherwise (or if the handler failed) `try_send` into the bounded mailbox.
//! 3. A full or closed mailbox, or an unknown recipient, produces exactly one
//!    dead letter. Publishers are never blocked and never see delivery errors.
//!
//! Per sender→receiver order is preserved because a publisher awaits each
//! `publish` before the next and mailbox sends are FIFO.

use async_trait::async_trait;
use chrono::Utc;
use conclave_config::BusConfig;
use conclave_core::error::StoreError;
use conclave_core::event::ObserverEvent;
use conclave_core::message::Message;
use conclave_core::store::MessageStore;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::dead_letter::{DeadLetter, DeadLetterReason, DeadLetterRing};

/// The receiving end of an agent's mailbox.
pub type Mailbox = mpsc::Receiver<Arc<Message>>;

/// Default page size for session history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// In-process delivery hook. Called instead of enqueueing when registered.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Arc<Message>) -> conclave_core::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Persistence is mandatory and the store failed: {0}")]
    Persistence(#[from] StoreError),
}

/// What happened to one published message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub registered_agents: usize,
    pub observers: usize,
    pub dead_letter_depth: usize,
}

struct AgentSlot {
    sender: mpsc::Sender<Arc<Message>>,
    handler: Option<Arc<dyn MessageHandler>>,
}

enum Delivery {
    Delivered,
    DeadLettered,
}

pub struct MessageBus {
    store: Arc<dyn MessageStore>,
    config: BusConfig,
    agents: RwLock<HashMap<String, AgentSlot>>,
    /// topic → subscribed agent IDs
    subscriptions: RwLock<HashMap<String, HashSet<String>>>,
    dead_letters: Mutex<DeadLetterRing>,
    observers: Mutex<Vec<mpsc::Sender<ObserverEvent>>>,
    mandatory_sessions: RwLock<HashSet<String>>,
    published: AtomicU64,
    delivered: AtomicU64,
    dead_lettered: AtomicU64,
}

impl MessageBus {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_config(store, BusConfig::default())
    }

    pub fn with_config(store: Arc<dyn MessageStore>, config: BusConfig) -> Self {
        Self {
            store,
            dead_letters: Mutex::new(DeadLetterRing::new(config.dead_letter_capacity)),
            config,
            agents: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            mandatory_sessions: RwLock::new(HashSet::new()),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Create a bounded mailbox for an agent. Re-registering replaces the
    /// previous mailbox, which is then closed.
    pub fn register_agent(
        &self,
        agent_id: impl Into<String>,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Mailbox {
        let agent_id = agent_id.into();
        let (sender, receiver) = mpsc::channel(self.config.mailbox_capacity);
        debug!(agent = %agent_id, capacity = self.config.mailbox_capacity, "Agent registered on bus");
        self.agents
            .write()
            .insert(agent_id, AgentSlot { sender, handler });
        receiver
    }

    /// Remove an agent's mailbox and all of its topic subscriptions.
    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().remove(agent_id).is_some();
        let mut subscriptions = self.subscriptions.write();
        for members in subscriptions.values_mut() {
            members.remove(agent_id);
        }
        subscriptions.retain(|_, members| !members.is_empty());
        if removed {
            debug!(agent = %agent_id, "Agent unregistered from bus");
        }
        removed
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.read().contains_key(agent_id)
    }

    pub fn registered_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self, agent_id: impl Into<String>, topic: impl Into<String>) {
        self.subscriptions
            .write()
            .entry(topic.into())
            .or_default()
            .insert(agent_id.into());
    }

    pub fn unsubscribe(&self, agent_id: &str, topic: &str) {
        let mut subscriptions = self.subscriptions.write();
        if let Some(members) = subscriptions.get_mut(topic) {
            members.remove(agent_id);
            if members.is_empty() {
                subscriptions.remove(topic);
            }
        }
    }

    /// Make store failures fatal for one session's publishes.
    pub fn require_persistence(&self, session_id: impl Into<String>) {
        self.mandatory_sessions.write().insert(session_id.into());
    }

    // ── Publishing ───────────────────────────────────────────────────────

    /// Persist, route, then notify observers.
    ///
    /// Only fails when persistence is mandatory and the store is down.
    pub async fn publish(&self, message: Message) -> Result<PublishOutcome, BusError> {
        let message = Arc::new(message);
        self.persist(&message).await?;
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut outcome = PublishOutcome::default();
        for recipient in self.recipients(&message) {
            match self.deliver(&recipient, &message).await {
                Delivery::Delivered => outcome.delivered += 1,
                Delivery::DeadLettered => outcome.dead_lettered += 1,
            }
        }

        self.notify(ObserverEvent::Message { message });
        Ok(outcome)
    }

    /// Persist and show a message to observers without routing it.
    pub async fn record(&self, message: Message) -> Result<(), BusError> {
        let message = Arc::new(message);
        self.persist(&message).await?;
        self.notify(ObserverEvent::Message { message });
        Ok(())
    }

    /// Offer an event to every observer. Full observers miss it; closed
    /// observers are dropped.
    pub fn notify(&self, event: ObserverEvent) {
        let mut observers = self.observers.lock();
        observers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Open a new observer channel.
    pub fn observe(&self) -> mpsc::Receiver<ObserverEvent> {
        let (tx, rx) = mpsc::channel(self.config.observer_capacity);
        self.observers.lock().push(tx);
        rx
    }

    async fn persist(&self, message: &Message) -> Result<(), BusError> {
        if let Err(e) = self.store.insert(message).await {
            let mandatory = self.config.persistence_mandatory
                || self.mandatory_sessions.read().contains(&message.session_id);
            if mandatory {
                return Err(BusError::Persistence(e));
            }
            warn!(
                message_id = %message.id,
                store = %self.store.name(),
                error = %e,
                "Message persistence failed, routing anyway"
            );
        }
        Ok(())
    }

    fn recipients(&self, message: &Message) -> Vec<String> {
        if let Some(to) = message.to_agent.as_deref().filter(|to| !to.is_empty()) {
            return vec![to.to_string()];
        }

        let mut seen = HashSet::new();
        let mut recipients: Vec<String> = {
            let agents = self.agents.read();
            let mut ids: Vec<&String> = agents.keys().collect();
            ids.sort();
            ids.into_iter()
                .filter(|id| **id != message.from_agent)
                .cloned()
                .collect()
        };
        seen.extend(recipients.iter().cloned());

        if let Some(topic) = message.channel() {
            let subscriptions = self.subscriptions.read();
            if let Some(members) = subscriptions.get(topic) {
                let mut extra: Vec<&String> = members
                    .iter()
                    .filter(|id| **id != message.from_agent && !seen.contains(*id))
                    .collect();
                extra.sort();
                recipients.extend(extra.into_iter().cloned());
            }
        }

        recipients
    }

    async fn deliver(&self, agent_id: &str, message: &Arc<Message>) -> Delivery {
        let slot = {
            let agents = self.agents.read();
            agents
                .get(agent_id)
                .map(|slot| (slot.sender.clone(), slot.handler.clone()))
        };

        let Some((sender, handler)) = slot else {
            return self.dead_letter(agent_id, message, DeadLetterReason::UnknownRecipient);
        };

        if let Some(handler) = handler {
            match handler.handle(Arc::clone(message)).await {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return Delivery::Delivered;
                }
                Err(e) => {
                    warn!(agent = %agent_id, error = %e, "Direct handler failed, falling back to mailbox");
                }
            }
        }

        match sender.try_send(Arc::clone(message)) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Delivery::Delivered
            }
            Err(TrySendError::Full(_)) => {
                self.dead_letter(agent_id, message, DeadLetterReason::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.dead_letter(agent_id, message, DeadLetterReason::MailboxClosed)
            }
        }
    }

    fn dead_letter(&self, recipient: &str, message: &Arc<Message>, reason: DeadLetterReason) -> Delivery {
        warn!(
            recipient = %recipient,
            message_id = %message.id,
            from = %message.from_agent,
            reason = %reason,
            "Message dead-lettered"
        );
        self.dead_letters.lock().push(DeadLetter {
            message: Arc::clone(message),
            recipient: recipient.to_string(),
            reason,
            timestamp: Utc::now(),
        });
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        Delivery::DeadLettered
    }

    // ── Inspection ───────────────────────────────────────────────────────

    /// Dead letters, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().snapshot()
    }

    pub async fn session_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.store.messages_for_session(session_id, limit, offset).await
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            registered_agents: self.agents.read().len(),
            observers: self.observers.lock().len(),
            dead_letter_depth: self.dead_letters.lock().len(),
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("store", &self.store.name())
            .field("stats", &self.stats())
            .finish()
    }
}
