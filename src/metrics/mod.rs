//! Prometheus collectors of the synchronization client
//!
//! Everything is registered in [`REGISTRY`] under the `livequery` namespace.
//! There is no exporter; embedders scrape [`gather`] however they like.
use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";

lazy_static! {
    /// Live change events that altered a materialized map
    pub static ref EVENTS_APPLIED: IntCounterVec = IntCounterVec::new(
        Opts::new("events_applied", "Live change events applied to a view"),
        &["channel"]
    )
    .expect("metric can not be created");

    pub static ref MALFORMED_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("malformed_events", "Frames skipped because they could not be decoded"),
        &["channel"]
    )
    .expect("metric can not be created");

    /// Finished reloads labelled replaced, retained or failed
    pub static ref RELOADS: IntCounterVec = IntCounterVec::new(
        Opts::new("reloads", "Completed reload sessions by outcome"),
        &["channel", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref FALLBACK_POLLS: IntCounterVec = IntCounterVec::new(
        Opts::new("fallback_polls", "REST snapshot polls by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    /// Channels with an attached relay
    pub static ref ACTIVE_CHANNELS: IntGauge =
        IntGauge::new("active_channels", "Channels with at least one listener")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("livequery".to_string()), None)
            .expect("registry can be created");
        register_custom_metrics(&registry);
        registry
    };
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(EVENTS_APPLIED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(MALFORMED_EVENTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RELOADS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(FALLBACK_POLLS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ACTIVE_CHANNELS.clone()))
        .expect("collector can be registered");
}

/// Renders every collector in the text exposition format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode metrics: {}", e);
        return String::default();
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
