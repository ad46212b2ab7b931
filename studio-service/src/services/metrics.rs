//! Prometheus metrics for studio-service.
//!
//! Covers the gate, chat streaming, image edits and the provider calls
//! behind them.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// The registry together with every collector registered in it.
pub struct StudioMetrics {
    registry: Registry,
    logins: IntCounterVec,
    chat_messages: IntCounterVec,
    image_edits: IntCounterVec,
    tokens: IntCounterVec,
    provider_latency: HistogramVec,
    provider_errors: IntCounterVec,
}

static METRICS: OnceLock<StudioMetrics> = OnceLock::new();

impl StudioMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let logins = IntCounterVec::new(
            Opts::new("studio_logins_total", "Credential gate attempts"),
            &["outcome"], // outcome: success, rejected
        )?;

        let chat_messages = IntCounterVec::new(
            Opts::new("studio_chat_messages_total", "Chat sends by outcome"),
            &["outcome"], // outcome: completed, failed, ignored
        )?;

        let image_edits = IntCounterVec::new(
            Opts::new("studio_image_edits_total", "Image generations and refinements"),
            &["kind", "outcome"],
        )?;

        let tokens = IntCounterVec::new(
            Opts::new("studio_tokens_total", "Total tokens processed"),
            &["model", "type"], // type: input, output
        )?;

        let provider_latency = HistogramVec::new(
            HistogramOpts::new(
                "studio_provider_latency_seconds",
                "AI provider API latency in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["operation", "model"],
        )?;

        let provider_errors = IntCounterVec::new(
            Opts::new("studio_provider_errors_total", "Total AI provider errors"),
            &["operation", "error_type"],
        )?;

        registry.register(Box::new(logins.clone()))?;
        registry.register(Box::new(chat_messages.clone()))?;
        registry.register(Box::new(image_edits.clone()))?;
        registry.register(Box::new(tokens.clone()))?;
        registry.register(Box::new(provider_latency.clone()))?;
        registry.register(Box::new(provider_errors.clone()))?;

        Ok(Self {
            registry,
            logins,
            chat_messages,
            image_edits,
            tokens,
            provider_latency,
            provider_errors,
        })
    }
}

/// Initialize all metrics. Later calls are no-ops.
///
/// The registry and its collectors are published together; a caller that
/// loses a concurrent first initialization drops its whole set.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = StudioMetrics::new()?;
    if METRICS.set(metrics).is_ok() {
        tracing::info!("Prometheus metrics initialized");
    }
    Ok(())
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match METRICS.get() {
        Some(m) => &m.registry,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

pub fn record_login(outcome: &str) {
    if let Some(counter) = METRICS.get().map(|m| &m.logins) {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_chat_message(outcome: &str) {
    if let Some(counter) = METRICS.get().map(|m| &m.chat_messages) {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_image_edit(kind: &str, outcome: &str) {
    if let Some(counter) = METRICS.get().map(|m| &m.image_edits) {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}

/// Record token usage by model.
pub fn record_tokens(model: &str, input_tokens: i32, output_tokens: i32) {
    if let Some(counter) = METRICS.get().map(|m| &m.tokens) {
        counter
            .with_label_values(&[model, "input"])
            .inc_by(input_tokens.max(0) as u64);
        counter
            .with_label_values(&[model, "output"])
            .inc_by(output_tokens.max(0) as u64);
    }
}

/// Record provider latency.
pub fn record_provider_latency(operation: &str, model: &str, duration_secs: f64) {
    if let Some(histogram) = METRICS.get().map(|m| &m.provider_latency) {
        histogram
            .with_label_values(&[operation, model])
            .observe(duration_secs);
    }
}

/// Record a provider error.
pub fn record_provider_error(operation: &str, error_type: &str) {
    if let Some(counter) = METRICS.get().map(|m| &m.provider_errors) {
        counter.with_label_values(&[operation, error_type]).inc();
    }
}
