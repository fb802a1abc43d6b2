//! In-flight request bookkeeping.
//!
//! Every dispatched HTTP request gets an entry keyed by a fresh
//! `request_id`, holding the oneshot sender its front-end task is waiting
//! on. Three paths race to resolve an entry — the matching response
//! envelope, the agent disconnecting, and the request deadline — and the
//! first to remove the entry from the map wins. Losers find no entry and
//! do nothing, which is what guarantees the HTTP responder is written
//! exactly once.

use std::collections::HashMap;

use backhaul_proto::ResponseEnvelope;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

/// Why a pending request resolved without a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The agent carrying the request disconnected.
    Disconnected,
    /// The broker could not hand the request to the agent.
    ClientError,
    /// The deadline fired first.
    Timeout,
}

impl FailReason {
    pub fn status(self) -> u16 {
        match self {
            FailReason::Disconnected => 503,
            FailReason::ClientError => 500,
            FailReason::Timeout => 504,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            FailReason::Disconnected => "Client disconnected",
            FailReason::ClientError => "Client error",
            FailReason::Timeout => "Timeout",
        }
    }
}

/// How a pending request ended.
#[derive(Debug)]
pub enum Outcome {
    /// The agent answered; relay status, headers and body.
    Response(ResponseEnvelope),
    /// Resolved by a failure path; a synthetic response goes out.
    Failed(FailReason),
}

struct Pending {
    agent_id: String,
    tx: oneshot::Sender<Outcome>,
}

/// Map of `request_id` → pending request, shared by both listeners.
pub struct RequestTracker {
    pending: Mutex<HashMap<String, Pending>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh request id and store the completion channel for it.
    pub async fn open(&self, agent_id: &str) -> (String, oneshot::Receiver<Outcome>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            request_id.clone(),
            Pending {
                agent_id: agent_id.to_string(),
                tx,
            },
        );
        (request_id, rx)
    }

    /// Deliver a response envelope to its waiting request.
    ///
    /// Returns false when no entry matches — an unknown or already-resolved
    /// `request_id` — in which case the caller logs and discards.
    pub async fn complete(&self, envelope: ResponseEnvelope) -> bool {
        let entry = self.pending.lock().await.remove(&envelope.request_id);
        match entry {
            Some(pending) => {
                drop(pending.tx.send(Outcome::Response(envelope)));
                true
            }
            None => false,
        }
    }

    /// Resolve a single request with a failure.
    pub async fn fail(&self, request_id: &str, reason: FailReason) -> bool {
        let entry = self.pending.lock().await.remove(request_id);
        match entry {
            Some(pending) => {
                drop(pending.tx.send(Outcome::Failed(reason)));
                true
            }
            None => false,
        }
    }

    /// Fail every request bound to a disconnected agent. Returns how many
    /// were resolved.
    pub async fn fail_by_agent(&self, agent_id: &str) -> usize {
        let mut pending = self.pending.lock().await;
        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.agent_id == agent_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(entry) = pending.remove(id) {
                drop(entry.tx.send(Outcome::Failed(FailReason::Disconnected)));
            }
        }
        ids.len()
    }

    /// Remove an entry without signalling, for resolution paths where the
    /// waiting task itself writes the response. Returns false if another
    /// path already won.
    pub async fn expire(&self, request_id: &str) -> bool {
        self.pending.lock().await.remove(request_id).is_some()
    }

    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backhaul_proto::Headers;

    fn response_for(request_id: &str) -> ResponseEnvelope {
        ResponseEnvelope {
            client_id: "agent-1".into(),
            request_id: request_id.into(),
            status_code: 200,
            headers: Headers::new(),
            body: b"ok".to_vec(),
        }
    }

    #[tokio::test]
    async fn complete_delivers_to_waiter() {
        let tracker = RequestTracker::new();
        let (request_id, rx) = tracker.open("agent-1").await;
        assert_eq!(tracker.in_flight().await, 1);

        assert!(tracker.complete(response_for(&request_id)).await);
        assert_eq!(tracker.in_flight().await, 0);

        match rx.await.unwrap() {
            Outcome::Response(envelope) => assert_eq!(envelope.body, b"ok"),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_request_id_is_reported() {
        let tracker = RequestTracker::new();
        assert!(!tracker.complete(response_for("no-such-request")).await);
    }

    #[tokio::test]
    async fn second_resolution_is_a_noop() {
        let tracker = RequestTracker::new();
        let (request_id, rx) = tracker.open("agent-1").await;

        assert!(tracker.complete(response_for(&request_id)).await);
        // The losing paths all find nothing.
        assert!(!tracker.complete(response_for(&request_id)).await);
        assert!(!tracker.fail(&request_id, FailReason::Disconnected).await);
        assert!(!tracker.expire(&request_id).await);

        assert!(matches!(rx.await.unwrap(), Outcome::Response(_)));
    }

    #[tokio::test]
    async fn fail_carries_reason() {
        let tracker = RequestTracker::new();
        let (request_id, rx) = tracker.open("agent-1").await;

        assert!(tracker.fail(&request_id, FailReason::ClientError).await);
        match rx.await.unwrap() {
            Outcome::Failed(reason) => {
                assert_eq!(reason, FailReason::ClientError);
                assert_eq!(reason.status(), 500);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_by_agent_only_hits_that_agent() {
        let tracker = RequestTracker::new();
        let (_id_a1, rx_a1) = tracker.open("agent-a").await;
        let (_id_a2, rx_a2) = tracker.open("agent-a").await;
        let (id_b, rx_b) = tracker.open("agent-b").await;

        assert_eq!(tracker.fail_by_agent("agent-a").await, 2);
        assert_eq!(tracker.in_flight().await, 1);

        for rx in [rx_a1, rx_a2] {
            match rx.await.unwrap() {
                Outcome::Failed(reason) => assert_eq!(reason, FailReason::Disconnected),
                other => panic!("expected disconnect failure, got {other:?}"),
            }
        }

        // agent-b's request is untouched and still completable.
        assert!(tracker.complete(response_for(&id_b)).await);
        assert!(matches!(rx_b.await.unwrap(), Outcome::Response(_)));
    }

    #[tokio::test]
    async fn expire_consumes_without_signalling() {
        let tracker = RequestTracker::new();
        let (request_id, rx) = tracker.open("agent-1").await;

        assert!(tracker.expire(&request_id).await);
        // The sender was dropped, never used.
        assert!(rx.await.is_err());
        // A late response for the expired id is unmatched.
        assert!(!tracker.complete(response_for(&request_id)).await);
    }

    #[tokio::test]
    async fn fail_reason_mapping() {
        assert_eq!(FailReason::Disconnected.status(), 503);
        assert_eq!(FailReason::Disconnected.message(), "Client disconnected");
        assert_eq!(FailReason::ClientError.status(), 500);
        assert_eq!(FailReason::ClientError.message(), "Client error");
        assert_eq!(FailReason::Timeout.status(), 504);
        assert_eq!(FailReason::Timeout.message(), "Timeout");
    }
}
