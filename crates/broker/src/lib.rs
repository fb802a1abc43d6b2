//! Broker: the publicly reachable half of the reverse tunnel.
//!
//! Two listeners cooperate through shared state. The HTTP front-end
//! ([`http`]) accepts public requests, picks a connected agent, ships each
//! request over that agent's tunnel socket and waits for the correlated
//! response. The tunnel listener ([`socket`]) accepts agent connections,
//! reads their framed responses and resolves the matching pending requests.
//!
//! All correlation is by `request_id`; an agent's disconnection fails every
//! request that was dispatched to it, and a per-request deadline fails
//! whatever the agent never answered. Each pending request resolves exactly
//! once, whichever of the three paths gets there first.

pub mod http;
pub mod registry;
pub mod socket;
pub mod tracker;

use std::time::Duration;

use registry::AgentRegistry;
use tracker::RequestTracker;

/// Shared broker state: connected agents, in-flight requests, and the
/// tunables both listeners need.
pub struct Broker {
    pub registry: AgentRegistry,
    pub tracker: RequestTracker,
    /// Deadline for each in-flight request.
    pub request_timeout: Duration,
    /// Cap on inbound frame payloads from agents.
    pub max_frame_bytes: usize,
}

impl Broker {
    pub fn new(request_timeout: Duration, max_frame_bytes: usize) -> Self {
        Self {
            registry: AgentRegistry::new(),
            tracker: RequestTracker::new(),
            request_timeout,
            max_frame_bytes,
        }
    }
}
