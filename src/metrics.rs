//! Negotiation and connection metrics
//!
//! Each `MeetingService` owns its own registry so several services in one
//! process never collide on metric names.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct MeetingMetrics {
    registry: Registry,
    pub offers_sent: IntCounter,
    pub answers_sent: IntCounter,
    pub glare_resolutions: IntCounterVec,
    pub ice_queued: IntCounter,
    pub ice_applied: IntCounter,
    pub negotiation_failures: IntCounter,
    pub open_connections: IntGauge,
}

impl MeetingMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let offers_sent = IntCounter::new("meeting_offers_sent_total", "SDP offers sent to peers")?;
        let answers_sent = IntCounter::new("meeting_answers_sent_total", "SDP answers sent to peers")?;
        let glare_resolutions = IntCounterVec::new(
            Opts::new("meeting_glare_resolutions_total", "Colliding offers resolved, by outcome"),
            &["outcome"],
        )?;
        let ice_queued = IntCounter::new(
            "meeting_ice_candidates_queued_total",
            "Remote candidates queued until the remote description was set",
        )?;
        let ice_applied = IntCounter::new(
            "meeting_ice_candidates_applied_total",
            "Remote candidates applied to a connection",
        )?;
        let negotiation_failures = IntCounter::new(
            "meeting_negotiation_failures_total",
            "Per-peer negotiation steps that failed",
        )?;
        let open_connections = IntGauge::new("meeting_peer_connections_open", "Open peer connections")?;

        registry.register(Box::new(offers_sent.clone()))?;
        registry.register(Box::new(answers_sent.clone()))?;
        registry.register(Box::new(glare_resolutions.clone()))?;
        registry.register(Box::new(ice_queued.clone()))?;
        registry.register(Box::new(ice_applied.clone()))?;
        registry.register(Box::new(negotiation_failures.clone()))?;
        registry.register(Box::new(open_connections.clone()))?;

        Ok(Self {
            registry,
            offers_sent,
            answers_sent,
            glare_resolutions,
            ice_queued,
            ice_applied,
            negotiation_failures,
            open_connections,
        })
    }

    pub fn glare_rolled_back(&self) {
        self.glare_resolutions.with_label_values(&["rolled_back"]).inc();
    }

    pub fn glare_ignored(&self) {
        self.glare_resolutions.with_label_values(&["ignored"]).inc();
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
