mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use provider_bridge::config::{BridgeConfig, RoutingSettings};
use provider_bridge::observability::telemetry::BufferedTelemetry;
use provider_bridge::provider::{Provider, ProviderResponse, ProviderSet};
use provider_bridge::resilience::CircuitState;
use provider_bridge::rng::SequenceRandom;
use provider_bridge::{Bridge, ForwardRequest, RoutingMode};

use common::{http_failure, Scripted};

fn routed(mode: RoutingMode) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.routing.mode = mode;
    config.retry.max_attempts = 1;
    config
}

fn request() -> ForwardRequest {
    ForwardRequest::new("applications.submit", json!({"amount": 100})).with_organization("acme")
}

#[tokio::test(start_paused = true)]
async fn test_percentage_split_follows_rolls() {
    let mut config = routed(RoutingMode::Percentage);
    config.routing.percentage = 30.0;
    let legacy = Scripted::ok(json!({"from": "legacy"}));
    let replacement = Scripted::ok(json!({"from": "replacement"}));
    let bridge = Bridge::new(
        &config,
        ProviderSet::new(legacy.clone(), replacement.clone()),
        Arc::new(SequenceRandom::new([0.10, 0.50, 0.29, 0.30])),
        Arc::new(BufferedTelemetry::new()),
    );

    let mut chosen = Vec::new();
    for _ in 0..4 {
        let result = bridge.execute(request()).await;
        assert!(!result.fallback);
        assert!(result.comparison.is_none());
        chosen.push(result.provider);
    }

    assert_eq!(
        chosen,
        vec![
            Provider::Replacement,
            Provider::Legacy,
            Provider::Replacement,
            Provider::Legacy
        ]
    );
    assert_eq!(legacy.calls(), 2);
    assert_eq!(replacement.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dual_prefers_replacement_and_ignores_volatile_fields() {
    let mut config = routed(RoutingMode::Dual);
    config.routing.ignore_fields = vec!["timestamp".to_string()];
    let telemetry = Arc::new(BufferedTelemetry::new());
    let bridge = Bridge::new(
        &config,
        ProviderSet::new(
            Scripted::ok(json!({"id": 7, "timestamp": "2024-01-01"})),
            Scripted::ok(json!({"id": 7, "timestamp": "2024-06-30", "extra": null})),
        ),
        Arc::new(SequenceRandom::constant(0.5)),
        telemetry.clone(),
    );

    let result = bridge.execute(request()).await;

    assert_eq!(result.provider, Provider::Replacement);
    let comparison = result.comparison.expect("comparison enabled");
    assert!(!comparison.divergent);
    assert!(comparison.data_match);
    assert!(comparison.status_match);
    assert_eq!(result.shadow.map(|s| s.provider), Some(Provider::Legacy));
    assert_eq!(telemetry.count("routing.comparison"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dual_serves_legacy_when_replacement_fails() {
    let bridge = Bridge::new(
        &routed(RoutingMode::Dual),
        ProviderSet::new(Scripted::ok(json!({"id": 1})), Scripted::status(422)),
        Arc::new(SequenceRandom::constant(0.5)),
        Arc::new(BufferedTelemetry::new()),
    );

    let result = bridge.execute(request()).await;

    assert_eq!(result.provider, Provider::Legacy);
    assert!(result.response.success());
    let comparison = result.comparison.unwrap();
    assert!(comparison.divergent);
    assert!(comparison.legacy_success);
    assert!(!comparison.replacement_success);
}

#[tokio::test(start_paused = true)]
async fn test_shadow_always_answers_from_legacy() {
    let replacement = Scripted::ok(json!({"id": 2}));
    let bridge = Bridge::new(
        &routed(RoutingMode::Shadow),
        ProviderSet::new(Scripted::ok(json!({"id": 1})), replacement.clone()),
        Arc::new(SequenceRandom::constant(0.5)),
        Arc::new(BufferedTelemetry::new()),
    );

    let result = bridge.execute(request()).await;

    assert_eq!(result.mode, RoutingMode::Shadow);
    assert_eq!(result.provider, Provider::Legacy);
    assert_eq!(result.response.data(), Some(&json!({"id": 1})));
    assert!(!result.fallback);
    let shadow = result.shadow.unwrap();
    assert_eq!(shadow.provider, Provider::Replacement);
    assert!(shadow.success());
    assert!(!result.comparison.unwrap().divergent);
    assert_eq!(replacement.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_legacy_circuit_routes_straight_to_replacement() {
    let mut config = routed(RoutingMode::SingleLegacy);
    config.circuit_breaker.minimum_requests = 2;
    let telemetry = Arc::new(BufferedTelemetry::new());
    let legacy = Scripted::status(503);
    let replacement = Scripted::ok(json!({"served": true}));
    let bridge = Bridge::new(
        &config,
        ProviderSet::new(legacy.clone(), replacement.clone()),
        Arc::new(SequenceRandom::constant(0.5)),
        telemetry.clone(),
    );

    for _ in 0..3 {
        let result = bridge.execute(request()).await;
        assert!(result.fallback);
        assert_eq!(result.provider, Provider::Replacement);
        assert!(result.response.success());
    }

    // The third request never reached legacy.
    assert_eq!(legacy.calls(), 2);
    assert_eq!(replacement.calls(), 3);

    let fallbacks: Vec<_> = telemetry
        .events()
        .into_iter()
        .filter(|(name, _)| name == "routing.fallback")
        .map(|(_, props)| props["circuit_open"].as_bool())
        .collect();
    assert_eq!(fallbacks, vec![Some(false), Some(false), Some(true)]);

    let stats = bridge.stats();
    let legacy_breaker = stats.iter().find(|s| s.provider == Provider::Legacy).unwrap();
    assert_eq!(legacy_breaker.state, CircuitState::Open);
    assert_eq!(legacy_breaker.organization_id.as_deref(), Some("acme"));
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_half_open() {
    let mut config = routed(RoutingMode::SingleLegacy);
    config.routing.fallback_enabled = false;
    config.circuit_breaker.minimum_requests = 2;
    config.circuit_breaker.open_timeout_ms = 1_000;
    config.circuit_breaker.success_threshold = 1;
    let legacy = Scripted::sequence(
        [Err(http_failure(500)), Err(http_failure(500))],
        Ok(ProviderResponse::new(200, json!({"ok": true}))),
    );
    let bridge = Bridge::new(
        &config,
        ProviderSet::new(legacy.clone(), Scripted::ok(json!({}))),
        Arc::new(SequenceRandom::constant(0.5)),
        Arc::new(BufferedTelemetry::new()),
    );

    bridge.execute(request()).await;
    bridge.execute(request()).await;
    let rejected = bridge.execute(request()).await;
    assert!(rejected.response.error().is_some_and(|e| e.is_circuit_open()));
    assert_eq!(legacy.calls(), 2);

    tokio::time::advance(Duration::from_millis(1_001)).await;

    let trial = bridge.execute(request()).await;
    assert!(trial.response.success());
    assert_eq!(bridge.stats()[0].state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_routing_update_applies_to_next_request() {
    let bridge = Bridge::new(
        &routed(RoutingMode::SingleLegacy),
        ProviderSet::new(Scripted::ok(json!({})), Scripted::ok(json!({}))),
        Arc::new(SequenceRandom::constant(0.5)),
        Arc::new(BufferedTelemetry::new()),
    );
    assert_eq!(bridge.execute(request()).await.provider, Provider::Legacy);

    bridge
        .update_routing(RoutingSettings {
            mode: RoutingMode::SingleNew,
            ..RoutingSettings::default()
        })
        .unwrap();

    let result = bridge.execute(request()).await;
    assert_eq!(result.mode, RoutingMode::SingleNew);
    assert_eq!(result.provider, Provider::Replacement);
}
