//! Integration tests for the self-healing manager.

mod common;

use common::{CountingAlerts, MockDiscovery, MockLifecycle, collect_until};
use drover::services::event_bus::{EventBus, EventBusConfig, EventPayload};
use drover::{
    Agent, AgentManifest, AgentRegistration, Criticality, HealingConfig, SelfHealingManager,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

fn fast_config() -> HealingConfig {
    HealingConfig {
        base_backoff_ms: 5,
        max_restart_attempts: 3,
        attempt_window_secs: 60,
    }
}

#[tokio::test]
async fn backoff_doubles_per_attempt() {
    let events = Arc::new(EventBus::new(EventBusConfig::default()));
    let healer = SelfHealingManager::new(
        HealingConfig {
            base_backoff_ms: 250,
            ..fast_config()
        },
        Arc::new(MockLifecycle::succeeding()),
        Arc::new(MockDiscovery { substitute: None }),
        Arc::new(CountingAlerts::new()),
        events,
    );

    for (attempts, expected_ms) in [(0u32, 250u64), (1, 500), (2, 1000), (3, 2000), (4, 4000)] {
        assert_eq!(
            healer.calculate_backoff(attempts),
            Duration::from_millis(expected_ms)
        );
    }
    healer.shutdown().await;
}

#[tokio::test]
async fn restart_cycle_ends_in_escalation_after_budget() {
    let events = Arc::new(EventBus::new(EventBusConfig::default()));
    let mut rx = events.subscribe();
    let lifecycle = Arc::new(MockLifecycle::failing());
    let alerts = Arc::new(CountingAlerts::new());
    let healer = SelfHealingManager::new(
        fast_config(),
        lifecycle.clone(),
        Arc::new(MockDiscovery { substitute: None }),
        alerts.clone(),
        events,
    );

    let id = Uuid::new_v4();
    healer
        .register_manifest(id, AgentManifest::new("worker", "ocr"))
        .await;
    healer.handle_failure(id, "crashed").await;

    let seen = collect_until(&mut rx, 8_000, |payload| {
        matches!(payload, EventPayload::FeatureDegraded { .. })
    })
    .await;

    let scheduled = seen
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::RestartScheduled { .. }))
        .count();
    let failed = seen
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::RestartFailed { .. }))
        .count();
    let escalated = seen
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::EscalationRaised { .. }))
        .count();

    assert_eq!(scheduled, 3, "one schedule per budgeted attempt");
    assert_eq!(failed, 3);
    assert_eq!(escalated, 1, "critical handling fires exactly once");
    assert_eq!(alerts.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 3);
    assert_eq!(healer.restart_history(id).await.len(), 3);
    healer.shutdown().await;
}

#[tokio::test]
async fn substitute_takes_over_before_degradation() {
    let events = Arc::new(EventBus::new(EventBusConfig::default()));
    let mut rx = events.subscribe();

    let substitute = Agent::from_registration(AgentRegistration::new("standby"));
    let substitute_id = substitute.id;

    let healer = SelfHealingManager::new(
        fast_config(),
        Arc::new(MockLifecycle::failing()),
        Arc::new(MockDiscovery {
            substitute: Some(substitute),
        }),
        Arc::new(CountingAlerts::new()),
        events,
    );

    let id = Uuid::new_v4();
    healer
        .register_manifest(
            id,
            AgentManifest::new("worker", "ocr").with_criticality(Criticality::High),
        )
        .await;
    healer.handle_failure(id, "crashed").await;

    let seen = collect_until(&mut rx, 8_000, |payload| {
        matches!(payload, EventPayload::SubstituteFound { .. })
    })
    .await;

    let found = seen.iter().find_map(|e| match &e.payload {
        EventPayload::SubstituteFound {
            substitute_id: found,
            capability,
            ..
        } => Some((*found, capability.clone())),
        _ => None,
    });
    assert_eq!(found, Some((substitute_id, "ocr".to_string())));
    assert!(
        !seen
            .iter()
            .any(|e| matches!(e.payload, EventPayload::FeatureDegraded { .. }))
    );
    healer.shutdown().await;
}

#[tokio::test]
async fn opted_out_agent_is_never_restarted() {
    let events = Arc::new(EventBus::new(EventBusConfig::default()));
    let lifecycle = Arc::new(MockLifecycle::succeeding());
    let healer = SelfHealingManager::new(
        fast_config(),
        lifecycle.clone(),
        Arc::new(MockDiscovery { substitute: None }),
        Arc::new(CountingAlerts::new()),
        events,
    );

    let id = Uuid::new_v4();
    healer
        .register_manifest(id, AgentManifest::new("worker", "ocr").without_auto_restart())
        .await;
    healer.handle_failure(id, "crashed").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 0);
    assert_eq!(healer.stats().await.pending_restarts, 0);
    healer.shutdown().await;
}

#[tokio::test]
async fn successful_restart_resets_the_budget() {
    let events = Arc::new(EventBus::new(EventBusConfig::default()));
    let mut rx = events.subscribe();
    let lifecycle = Arc::new(MockLifecycle::succeeding());
    let healer = SelfHealingManager::new(
        fast_config(),
        lifecycle.clone(),
        Arc::new(MockDiscovery { substitute: None }),
        Arc::new(CountingAlerts::new()),
        events,
    );

    let id = Uuid::new_v4();
    healer
        .register_manifest(id, AgentManifest::new("worker", "ocr"))
        .await;

    for _ in 0..2 {
        healer.handle_failure(id, "crashed").await;
        let seen = collect_until(&mut rx, 3_000, |payload| {
            matches!(payload, EventPayload::RestartSucceeded { .. })
        })
        .await;
        assert!(
            seen.iter()
                .any(|e| matches!(e.payload, EventPayload::RestartSucceeded { .. }))
        );
        assert!(healer.restart_history(id).await.is_empty());
    }

    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 2);
    healer.shutdown().await;
}
