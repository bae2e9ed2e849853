//! `CallRegistry` - process-wide directory of known calls.
//!
//! Keyed by room id. Every mutation goes through the actor mailbox, so the
//! session controller and incoming-call handlers never race on an entry.
//!
//! The registry also decides who may show an incoming-call notification:
//! the first claimant for a room that is neither joined nor ended wins, and
//! every later claim is refused. Ended rooms are remembered (bounded) so a
//! late invitation for a finished call stays silent.

use crate::errors::CallError;
use crate::observability::metrics;

use super::messages::{CallData, RegistryEvent, RegistryMessage};
use super::metrics::{ActorType, MailboxMonitor};

use common::types::{CallKind, RoomId};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 500;

/// Capacity of the change-event broadcast channel.
const REGISTRY_EVENT_CAPACITY: usize = 128;

/// How many ended rooms are remembered.
pub const ENDED_ROOM_MEMORY: usize = 256;

/// How many notification claims are remembered.
pub const CLAIMED_ROOM_MEMORY: usize = 256;

/// Handle to the `CallRegistry` actor.
#[derive(Clone)]
pub struct CallRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    events: broadcast::Sender<RegistryEvent>,
    cancel_token: CancellationToken,
}

impl CallRegistryHandle {
    /// Add a call. Returns `false` when the room id is empty or already known.
    pub async fn add(&self, data: CallData) -> Result<bool, CallError> {
        self.request(|respond_to| RegistryMessage::Add { data, respond_to })
            .await
    }

    pub async fn get(&self, room_id: &RoomId) -> Result<Option<CallData>, CallError> {
        let room_id = room_id.clone();
        self.request(|respond_to| RegistryMessage::Get {
            room_id,
            respond_to,
        })
        .await
    }

    /// Replace an existing entry.
    pub async fn update(&self, data: CallData) -> Result<(), CallError> {
        self.request(|respond_to| RegistryMessage::Update { data, respond_to })
            .await?
    }

    pub async fn remove(&self, room_id: &RoomId) -> Result<Option<CallData>, CallError> {
        let room_id = room_id.clone();
        self.request(|respond_to| RegistryMessage::Remove {
            room_id,
            respond_to,
        })
        .await
    }

    /// The non-instant call bound to `conversation_id`, if any.
    pub async fn get_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<CallData>, CallError> {
        let conversation_id = conversation_id.to_string();
        self.request(|respond_to| RegistryMessage::GetByConversation {
            conversation_id,
            respond_to,
        })
        .await
    }

    pub async fn set_calling_state(&self, room_id: &RoomId, in_calling: bool) -> Result<(), CallError> {
        let room_id = room_id.clone();
        self.request(|respond_to| RegistryMessage::SetCallingState {
            room_id,
            in_calling,
            respond_to,
        })
        .await?
    }

    pub async fn promote_to_instant(&self, room_id: &RoomId) -> Result<(), CallError> {
        let room_id = room_id.clone();
        self.request(|respond_to| RegistryMessage::PromoteToInstant {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Returns `true` only to the first claimant of a room that is not joined
    /// and not ended.
    pub async fn claim_incoming_notification(&self, room_id: &RoomId) -> Result<bool, CallError> {
        let room_id = room_id.clone();
        self.request(|respond_to| RegistryMessage::ClaimIncomingNotification {
            room_id,
            respond_to,
        })
        .await
    }

    pub async fn clear_notifying(&self, room_id: &RoomId) -> Result<(), CallError> {
        let room_id = room_id.clone();
        self.request(|respond_to| RegistryMessage::ClearNotifying {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn mark_ended(&self, room_id: &RoomId) -> Result<(), CallError> {
        let room_id = room_id.clone();
        self.request(|respond_to| RegistryMessage::MarkEnded {
            room_id,
            respond_to,
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<CallData>, CallError> {
        self.request(|respond_to| RegistryMessage::List { respond_to })
            .await
    }

    /// Change events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }
}

/// The `CallRegistry` actor.
pub struct CallRegistry {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    calls: HashMap<RoomId, CallData>,
    /// Rooms whose notification has been claimed, oldest first.
    claimed: VecDeque<RoomId>,
    /// Recently ended rooms, oldest first.
    ended: VecDeque<RoomId>,
    events: broadcast::Sender<RegistryEvent>,
    mailbox: MailboxMonitor,
}

impl CallRegistry {
    /// Spawn the registry actor.
    #[must_use]
    pub fn spawn(cancel_token: CancellationToken) -> (CallRegistryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let (events, _) = broadcast::channel(REGISTRY_EVENT_CAPACITY);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            calls: HashMap::new(),
            claimed: VecDeque::new(),
            ended: VecDeque::new(),
            events: events.clone(),
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallRegistryHandle {
            sender,
            events,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "call.actor.registry")]
    async fn run(mut self) {
        info!(target: "call.actor.registry", "CallRegistry started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "call.actor.registry", "CallRegistry received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(target: "call.actor.registry", "CallRegistry channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "call.actor.registry",
            calls_remaining = self.calls.len(),
            messages_processed = self.mailbox.messages_processed(),
            "CallRegistry stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Add { data, respond_to } => {
                let _ = respond_to.send(self.add(data));
            }
            RegistryMessage::Get {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.calls.get(&room_id).cloned());
            }
            RegistryMessage::Update { data, respond_to } => {
                let _ = respond_to.send(self.update(data));
            }
            RegistryMessage::Remove {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.remove(&room_id));
            }
            RegistryMessage::GetByConversation {
                conversation_id,
                respond_to,
            } => {
                let found = self
                    .calls
                    .values()
                    .filter(|c| c.kind != CallKind::Instant)
                    .find(|c| c.conversation_id.as_deref() == Some(conversation_id.as_str()))
                    .cloned();
                let _ = respond_to.send(found);
            }
            RegistryMessage::SetCallingState {
                room_id,
                in_calling,
                respond_to,
            } => {
                let result = self.modify(&room_id, |c| c.is_in_calling = in_calling);
                let _ = respond_to.send(result);
            }
            RegistryMessage::PromoteToInstant {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.promote_to_instant(&room_id));
            }
            RegistryMessage::ClaimIncomingNotification {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.claim(&room_id));
            }
            RegistryMessage::ClearNotifying {
                room_id,
                respond_to,
            } => {
                let result = self.modify(&room_id, |c| c.notifying = false);
                let _ = respond_to.send(result);
            }
            RegistryMessage::MarkEnded {
                room_id,
                respond_to,
            } => {
                self.mark_ended(room_id);
                let _ = respond_to.send(());
            }
            RegistryMessage::List { respond_to } => {
                let mut calls: Vec<CallData> = self.calls.values().cloned().collect();
                calls.sort_by_key(|c| c.created_at);
                let _ = respond_to.send(calls);
            }
        }
    }

    fn add(&mut self, data: CallData) -> bool {
        if data.room_id.is_empty() {
            debug!(target: "call.actor.registry", "Ignoring call with empty room id");
            return false;
        }
        if self.calls.contains_key(&data.room_id) {
            debug!(target: "call.actor.registry", room_id = %data.room_id, "Call already registered");
            return false;
        }

        info!(
            target: "call.actor.registry",
            room_id = %data.room_id,
            kind = data.kind.as_str(),
            "Call registered"
        );
        self.calls.insert(data.room_id.clone(), data.clone());
        self.publish(RegistryEvent::Added(data));
        true
    }

    fn update(&mut self, data: CallData) -> Result<(), CallError> {
        if !self.calls.contains_key(&data.room_id) {
            return Err(CallError::NotFound(format!("call {}", data.room_id)));
        }
        self.calls.insert(data.room_id.clone(), data.clone());
        self.publish(RegistryEvent::Updated(data));
        Ok(())
    }

    fn modify(&mut self, room_id: &RoomId, change: impl FnOnce(&mut CallData)) -> Result<(), CallError> {
        let Some(call) = self.calls.get_mut(room_id) else {
            return Err(CallError::NotFound(format!("call {room_id}")));
        };
        change(call);
        let updated = call.clone();
        self.publish(RegistryEvent::Updated(updated));
        Ok(())
    }

    fn remove(&mut self, room_id: &RoomId) -> Option<CallData> {
        self.claimed.retain(|claimed| claimed != room_id);
        let removed = self.calls.remove(room_id);
        if removed.is_some() {
            info!(target: "call.actor.registry", room_id = %room_id, "Call removed");
            self.publish(RegistryEvent::Removed(room_id.clone()));
        }
        removed
    }

    fn promote_to_instant(&mut self, room_id: &RoomId) -> Result<(), CallError> {
        let Some(call) = self.calls.get_mut(room_id) else {
            return Err(CallError::NotFound(format!("call {room_id}")));
        };
        if call.kind == CallKind::Instant {
            return Ok(());
        }
        call.kind = CallKind::Instant;
        info!(target: "call.actor.registry", room_id = %room_id, "Call promoted to instant");
        self.publish(RegistryEvent::KindChanged {
            room_id: room_id.clone(),
            kind: CallKind::Instant,
        });
        Ok(())
    }

    fn claim(&mut self, room_id: &RoomId) -> bool {
        if self.ended.contains(room_id) {
            debug!(target: "call.actor.registry", room_id = %room_id, "Notification refused, call ended");
            return false;
        }
        if self.calls.get(room_id).is_some_and(|c| c.is_in_calling) {
            debug!(target: "call.actor.registry", room_id = %room_id, "Notification refused, call joined");
            return false;
        }
        if self.claimed.contains(room_id) {
            return false;
        }
        if self.claimed.len() >= CLAIMED_ROOM_MEMORY {
            self.claimed.pop_front();
        }
        self.claimed.push_back(room_id.clone());
        if let Some(call) = self.calls.get_mut(room_id) {
            call.notifying = true;
        }
        true
    }

    fn mark_ended(&mut self, room_id: RoomId) {
        self.remove(&room_id);
        if !self.ended.contains(&room_id) {
            if self.ended.len() >= ENDED_ROOM_MEMORY {
                self.ended.pop_front();
            }
            self.ended.push_back(room_id);
        }
    }

    fn publish(&self, event: RegistryEvent) {
        metrics::set_calls_registered(self.calls.len());
        let _ = self.events.send(event);
    }
}
