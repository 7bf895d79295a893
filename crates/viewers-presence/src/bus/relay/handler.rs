//! Per-connection subscription registry and relay frame handling.
//!
//! `Registry` holds no socket; it turns commands and inbound frames into
//! outbound frames so the connection task only moves bytes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use viewers_common::{PublishError, SubscribeError};

use super::types::RelayCommand;
use crate::bus::wire::{ClientFrame, ServerFrame};
use crate::bus::{Ack, Delivery, DeliverySink, ReplayFrom};

// ---------------------------------------------------------------------------
// Ref Counter
// ---------------------------------------------------------------------------

/// Monotonically increasing ref counter for relay requests.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type SubscribeReply = oneshot::Sender<Result<(), SubscribeError>>;
type PublishReply = oneshot::Sender<Result<Ack, PublishError>>;

/// Local fan-out state for one relay topic subscription.
struct TopicEntry {
    sinks: HashMap<u64, DeliverySink>,
    replay_from: ReplayFrom,
    /// Relay epoch of the current subscription; replay ids are only
    /// comparable within one epoch.
    epoch: Option<u64>,
    last_replay_id: Option<u64>,
    /// The relay confirmed the current subscribe request.
    confirmed: bool,
    /// The relay confirmed this topic at least once.
    established: bool,
    waiters: Vec<SubscribeReply>,
}

impl TopicEntry {
    /// Where a (re)subscribe should resume.
    fn resume_from(&self) -> ReplayFrom {
        self.last_replay_id
            .map(ReplayFrom::After)
            .unwrap_or(self.replay_from)
    }
}

enum Pending {
    Subscribe { topic: String },
    Publish(PublishReply),
}

/// What the connection task should do after applying a command.
#[derive(Debug, PartialEq)]
pub(crate) enum Outcome {
    Send(ClientFrame),
    Idle,
    Disconnect,
}

#[derive(Default)]
pub(crate) struct Registry {
    topics: HashMap<String, TopicEntry>,
    pending: HashMap<String, Pending>,
}

impl Registry {
    /// Apply a command while connected.
    pub(crate) fn apply(&mut self, cmd: RelayCommand) -> Outcome {
        match cmd {
            RelayCommand::Subscribe {
                topic,
                replay_from,
                id,
                sink,
                reply,
            } => self
                .subscribe(topic, replay_from, id, sink, reply)
                .map_or(Outcome::Idle, Outcome::Send),
            RelayCommand::Unsubscribe { topic, id } => self
                .unsubscribe(&topic, id)
                .map_or(Outcome::Idle, Outcome::Send),
            RelayCommand::Publish {
                topic,
                payload,
                reply,
            } => {
                let msg_ref = next_ref();
                self.pending.insert(msg_ref.clone(), Pending::Publish(reply));
                Outcome::Send(ClientFrame::Publish {
                    msg_ref,
                    topic,
                    payload,
                })
            }
            RelayCommand::Disconnect => Outcome::Disconnect,
        }
    }

    /// Apply a command while there is no connection. Returns false on `Disconnect`.
    pub(crate) fn apply_offline(&mut self, cmd: RelayCommand) -> bool {
        match cmd {
            RelayCommand::Subscribe { reply, .. } => {
                let _ = reply.send(Err(SubscribeError::NotConnected));
            }
            RelayCommand::Unsubscribe { topic, id } => {
                let _ = self.unsubscribe(&topic, id);
            }
            RelayCommand::Publish { reply, .. } => {
                let _ = reply.send(Err(PublishError::NotConnected));
            }
            RelayCommand::Disconnect => return false,
        }
        true
    }

    fn subscribe(
        &mut self,
        topic: String,
        replay_from: ReplayFrom,
        id: u64,
        sink: DeliverySink,
        reply: SubscribeReply,
    ) -> Option<ClientFrame> {
        if let Some(entry) = self.topics.get_mut(&topic) {
            // The relay subscription is shared by every local subscriber.
            entry.sinks.insert(id, sink);
            if entry.confirmed {
                let _ = reply.send(Ok(()));
            } else {
                entry.waiters.push(reply);
            }
            return None;
        }

        let msg_ref = next_ref();
        self.pending.insert(
            msg_ref.clone(),
            Pending::Subscribe {
                topic: topic.clone(),
            },
        );
        self.topics.insert(
            topic.clone(),
            TopicEntry {
                sinks: HashMap::from([(id, sink)]),
                replay_from,
                epoch: None,
                last_replay_id: None,
                confirmed: false,
                established: false,
                waiters: vec![reply],
            },
        );
        Some(ClientFrame::Subscribe {
            msg_ref,
            topic,
            replay_from: replay_from.as_i64(),
            epoch: None,
        })
    }

    fn unsubscribe(&mut self, topic: &str, id: u64) -> Option<ClientFrame> {
        let entry = self.topics.get_mut(topic)?;
        entry.sinks.remove(&id);
        if !entry.sinks.is_empty() {
            return None;
        }
        self.topics.remove(topic);
        Some(ClientFrame::Unsubscribe {
            topic: topic.to_string(),
        })
    }

    /// Handle one frame from the relay, returning a frame to send back if needed.
    pub(crate) fn on_frame(&mut self, frame: ServerFrame) -> Option<ClientFrame> {
        match frame {
            ServerFrame::Subscribed {
                msg_ref,
                topic,
                epoch,
            } => {
                if let Some(Pending::Subscribe { .. }) = self.pending.remove(&msg_ref) {
                    if let Some(entry) = self.topics.get_mut(&topic) {
                        if entry.epoch.is_some_and(|known| known != epoch) {
                            info!(topic = %topic, epoch, "Relay topic restarted, replay ids reset");
                            entry.last_replay_id = None;
                        }
                        entry.epoch = Some(epoch);
                        entry.confirmed = true;
                        entry.established = true;
                        for waiter in entry.waiters.drain(..) {
                            let _ = waiter.send(Ok(()));
                        }
                    }
                    debug!(topic = %topic, "Subscribed");
                }
                None
            }
            ServerFrame::Ack { msg_ref, replay_id } => {
                if let Some(Pending::Publish(reply)) = self.pending.remove(&msg_ref) {
                    let _ = reply.send(Ok(Ack {
                        replay_id: Some(replay_id),
                    }));
                }
                None
            }
            ServerFrame::Nack { msg_ref, reason } => {
                match self.pending.remove(&msg_ref) {
                    Some(Pending::Publish(reply)) => {
                        let _ = reply.send(Err(PublishError::Rejected(reason)));
                    }
                    Some(Pending::Subscribe { topic }) => {
                        warn!(topic = %topic, reason = %reason, "Subscribe rejected");
                        if let Some(entry) = self.topics.remove(&topic) {
                            for waiter in entry.waiters {
                                let _ = waiter.send(Err(SubscribeError::Rejected(reason.clone())));
                            }
                        }
                    }
                    None => debug!(msg_ref = %msg_ref, "Nack for unknown request"),
                }
                None
            }
            ServerFrame::Event {
                topic,
                replay_id,
                payload,
            } => self.deliver(&topic, replay_id, payload),
            ServerFrame::HeartbeatAck { .. } => {
                trace!("Heartbeat acknowledged");
                None
            }
            ServerFrame::Error { message } => {
                warn!(message = %message, "Relay error");
                None
            }
        }
    }

    fn deliver(
        &mut self,
        topic: &str,
        replay_id: u64,
        payload: serde_json::Value,
    ) -> Option<ClientFrame> {
        let Some(entry) = self.topics.get_mut(topic) else {
            debug!(topic = %topic, replay_id, "Event for topic without subscribers");
            return None;
        };
        entry.last_replay_id = Some(entry.last_replay_id.map_or(replay_id, |id| id.max(replay_id)));
        let epoch = entry.epoch.unwrap_or_default();

        entry.sinks.retain(|id, sink| {
            let delivery = Delivery {
                epoch,
                replay_id: Some(replay_id),
                payload: payload.clone(),
            };
            match sink.try_send(delivery) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!(subscription = *id, replay_id, "Subscriber full, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });

        if entry.sinks.is_empty() && entry.waiters.is_empty() {
            self.topics.remove(topic);
            return Some(ClientFrame::Unsubscribe {
                topic: topic.to_string(),
            });
        }
        None
    }

    /// Subscribe frames for every live topic, sent right after a reconnect.
    pub(crate) fn resubscribe_all(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::with_capacity(self.topics.len());
        for (topic, entry) in self.topics.iter_mut() {
            entry.confirmed = false;
            let msg_ref = next_ref();
            self.pending.insert(
                msg_ref.clone(),
                Pending::Subscribe {
                    topic: topic.clone(),
                },
            );
            frames.push(ClientFrame::Subscribe {
                msg_ref,
                topic: topic.clone(),
                replay_from: entry.resume_from().as_i64(),
                epoch: entry.epoch,
            });
        }
        frames
    }

    /// Fail everything in flight after the socket is gone.
    ///
    /// Topics the relay had confirmed are kept for re-subscription.
    pub(crate) fn connection_lost(&mut self) {
        for (_, pending) in self.pending.drain() {
            if let Pending::Publish(reply) = pending {
                let _ = reply.send(Err(PublishError::NotConnected));
            }
        }
        self.topics.retain(|_, entry| {
            for waiter in entry.waiters.drain(..) {
                let _ = waiter.send(Err(SubscribeError::NotConnected));
            }
            entry.confirmed = false;
            entry.established
        });
    }

    #[cfg(test)]
    fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn subscribe_cmd(
        topic: &str,
        id: u64,
    ) -> (
        RelayCommand,
        mpsc::Receiver<Delivery>,
        oneshot::Receiver<Result<(), SubscribeError>>,
    ) {
        let (sink, events) = mpsc::channel(8);
        let (reply, response) = oneshot::channel();
        let cmd = RelayCommand::Subscribe {
            topic: topic.into(),
            replay_from: ReplayFrom::Tip,
            id,
            sink,
            reply,
        };
        (cmd, events, response)
    }

    fn subscribe_ref(outcome: &Outcome) -> String {
        match outcome {
            Outcome::Send(ClientFrame::Subscribe { msg_ref, .. }) => msg_ref.clone(),
            other => panic!("expected subscribe frame, got {other:?}"),
        }
    }

    #[test]
    fn subscribe_resolves_on_confirmation() {
        let mut registry = Registry::default();
        let (cmd, _events, mut response) = subscribe_cmd("t", 1);
        let outcome = registry.apply(cmd);
        let msg_ref = subscribe_ref(&outcome);
        assert!(response.try_recv().is_err());

        registry.on_frame(ServerFrame::Subscribed {
            msg_ref,
            topic: "t".into(),
            epoch: 1,
        });
        assert_eq!(response.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn second_local_subscriber_shares_relay_subscription() {
        let mut registry = Registry::default();
        let (cmd, _e1, _r1) = subscribe_cmd("t", 1);
        let msg_ref = subscribe_ref(&registry.apply(cmd));
        registry.on_frame(ServerFrame::Subscribed {
            msg_ref,
            topic: "t".into(),
            epoch: 1,
        });

        let (cmd, _e2, mut r2) = subscribe_cmd("t", 2);
        assert_eq!(registry.apply(cmd), Outcome::Idle);
        assert_eq!(r2.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn events_fan_out_to_local_subscribers() {
        let mut registry = Registry::default();
        let (cmd, mut e1, _r1) = subscribe_cmd("t", 1);
        let msg_ref = subscribe_ref(&registry.apply(cmd));
        registry.on_frame(ServerFrame::Subscribed {
            msg_ref,
            topic: "t".into(),
            epoch: 1,
        });
        let (cmd, mut e2, _r2) = subscribe_cmd("t", 2);
        registry.apply(cmd);

        let reply = registry.on_frame(ServerFrame::Event {
            topic: "t".into(),
            replay_id: 5,
            payload: json!({ "n": 1 }),
        });
        assert!(reply.is_none());
        assert_eq!(e1.try_recv().unwrap().replay_id, Some(5));
        assert_eq!(e2.try_recv().unwrap().payload, json!({ "n": 1 }));
    }

    #[test]
    fn nack_rejects_subscribe_and_forgets_topic() {
        let mut registry = Registry::default();
        let (cmd, _events, mut response) = subscribe_cmd("t", 1);
        let msg_ref = subscribe_ref(&registry.apply(cmd));

        registry.on_frame(ServerFrame::Nack {
            msg_ref,
            reason: "topic not allowed".into(),
        });
        assert_eq!(
            response.try_recv().unwrap(),
            Err(SubscribeError::Rejected("topic not allowed".into()))
        );
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn publish_ack_and_nack() {
        let mut registry = Registry::default();

        let (reply, mut ok_rx) = oneshot::channel();
        let outcome = registry.apply(RelayCommand::Publish {
            topic: "t".into(),
            payload: json!({}),
            reply,
        });
        let Outcome::Send(ClientFrame::Publish { msg_ref, .. }) = outcome else {
            panic!("expected publish frame");
        };
        registry.on_frame(ServerFrame::Ack {
            msg_ref,
            replay_id: 9,
        });
        assert_eq!(
            ok_rx.try_recv().unwrap(),
            Ok(Ack {
                replay_id: Some(9)
            })
        );

        let (reply, mut err_rx) = oneshot::channel();
        let Outcome::Send(ClientFrame::Publish { msg_ref, .. }) =
            registry.apply(RelayCommand::Publish {
                topic: "t".into(),
                payload: json!({}),
                reply,
            })
        else {
            panic!("expected publish frame");
        };
        registry.on_frame(ServerFrame::Nack {
            msg_ref,
            reason: "payload too large".into(),
        });
        assert_eq!(
            err_rx.try_recv().unwrap(),
            Err(PublishError::Rejected("payload too large".into()))
        );
    }

    #[test]
    fn last_unsubscribe_releases_relay_subscription() {
        let mut registry = Registry::default();
        let (cmd, _e1, _r1) = subscribe_cmd("t", 1);
        registry.apply(cmd);
        let (cmd, _e2, _r2) = subscribe_cmd("t", 2);
        registry.apply(cmd);

        assert_eq!(
            registry.apply(RelayCommand::Unsubscribe {
                topic: "t".into(),
                id: 1
            }),
            Outcome::Idle
        );
        assert_eq!(
            registry.apply(RelayCommand::Unsubscribe {
                topic: "t".into(),
                id: 2
            }),
            Outcome::Send(ClientFrame::Unsubscribe { topic: "t".into() })
        );
    }

    #[test]
    fn reconnect_resumes_after_last_seen_event() {
        let mut registry = Registry::default();
        let (cmd, _events, _response) = subscribe_cmd("t", 1);
        let msg_ref = subscribe_ref(&registry.apply(cmd));
        registry.on_frame(ServerFrame::Subscribed {
            msg_ref,
            topic: "t".into(),
            epoch: 1,
        });
        registry.on_frame(ServerFrame::Event {
            topic: "t".into(),
            replay_id: 41,
            payload: json!({}),
        });

        registry.connection_lost();
        let frames = registry.resubscribe_all();
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames[0],
            ClientFrame::Subscribe { replay_from: 41, .. }
        ));
    }

    #[test]
    fn restarted_relay_starts_a_new_epoch() {
        let mut registry = Registry::default();
        let (cmd, mut events, _response) = subscribe_cmd("t", 1);
        let msg_ref = subscribe_ref(&registry.apply(cmd));
        registry.on_frame(ServerFrame::Subscribed {
            msg_ref,
            topic: "t".into(),
            epoch: 7,
        });
        registry.on_frame(ServerFrame::Event {
            topic: "t".into(),
            replay_id: 41,
            payload: json!({}),
        });
        let before = events.try_recv().unwrap();
        assert_eq!((before.epoch, before.replay_id), (7, Some(41)));

        registry.connection_lost();
        let frames = registry.resubscribe_all();
        let ClientFrame::Subscribe {
            msg_ref,
            replay_from,
            epoch,
            ..
        } = frames[0].clone()
        else {
            panic!("expected subscribe frame");
        };
        assert_eq!((replay_from, epoch), (41, Some(7)));

        // The fresh relay numbers its events from 1 again.
        registry.on_frame(ServerFrame::Subscribed {
            msg_ref,
            topic: "t".into(),
            epoch: 9,
        });
        registry.on_frame(ServerFrame::Event {
            topic: "t".into(),
            replay_id: 1,
            payload: json!({ "new": true }),
        });
        let after = events.try_recv().unwrap();
        assert_eq!((after.epoch, after.replay_id), (9, Some(1)));

        registry.connection_lost();
        let frames = registry.resubscribe_all();
        assert!(matches!(
            frames[0],
            ClientFrame::Subscribe {
                replay_from: 1,
                epoch: Some(9),
                ..
            }
        ));
    }

    #[test]
    fn connection_lost_fails_in_flight_requests() {
        let mut registry = Registry::default();
        let (cmd, _events, mut sub_rx) = subscribe_cmd("t", 1);
        registry.apply(cmd);
        let (reply, mut pub_rx) = oneshot::channel();
        registry.apply(RelayCommand::Publish {
            topic: "t".into(),
            payload: json!({}),
            reply,
        });

        registry.connection_lost();
        assert_eq!(sub_rx.try_recv().unwrap(), Err(SubscribeError::NotConnected));
        assert_eq!(pub_rx.try_recv().unwrap(), Err(PublishError::NotConnected));
        // Never confirmed, so nothing to resubscribe.
        assert!(registry.resubscribe_all().is_empty());
    }

    #[test]
    fn offline_requests_fail_fast() {
        let mut registry = Registry::default();
        let (cmd, _events, mut response) = subscribe_cmd("t", 1);
        assert!(registry.apply_offline(cmd));
        assert_eq!(response.try_recv().unwrap(), Err(SubscribeError::NotConnected));
        assert!(!registry.apply_offline(RelayCommand::Disconnect));
    }

    #[test]
    fn closed_sinks_trigger_unsubscribe() {
        let mut registry = Registry::default();
        let (cmd, events, _response) = subscribe_cmd("t", 1);
        let msg_ref = subscribe_ref(&registry.apply(cmd));
        registry.on_frame(ServerFrame::Subscribed {
            msg_ref,
            topic: "t".into(),
            epoch: 1,
        });
        drop(events);

        let reply = registry.on_frame(ServerFrame::Event {
            topic: "t".into(),
            replay_id: 1,
            payload: json!({}),
        });
        assert_eq!(
            reply,
            Some(ClientFrame::Unsubscribe { topic: "t".into() })
        );
    }
}
