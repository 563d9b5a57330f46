//! End-to-end admission behaviour of the model service registry.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, instance, service, with_breaker, with_limit, with_strategy, Event, Harness};
use model_router::config::schema::RateLimitConfig;
use model_router::load_balancer::Strategy;
use model_router::registry::{DispatchError, LimitScope, ServiceType};
use model_router::resilience::CircuitState;

const CHAT: ServiceType = ServiceType::Chat;

#[test]
fn test_no_healthy_and_closed_instance_is_unavailable() {
    let a = instance("llama", "http://a", 1);
    let b = instance("llama", "http://b", 1);
    let h = Harness::new(&config(vec![("chat", service(vec![a.clone(), b.clone()]))]));

    h.mark_unhealthy(CHAT, &a);
    h.registry.force_open(CHAT, &b.instance_id()).unwrap();

    for _ in 0..50 {
        let err = h.registry.select_instance(CHAT, "llama", Some("10.0.0.1")).unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable { .. }));
    }

    h.mark_unhealthy(CHAT, &b);
    h.registry.force_close(CHAT, &b.instance_id()).unwrap();
    let err = h.registry.select_instance(CHAT, "llama", None).unwrap_err();
    assert!(matches!(err, DispatchError::Unavailable { .. }));
}

#[test]
fn test_service_limit_capacity_ten_rejects_eleventh_call() {
    let svc = with_limit(
        service(vec![instance("gpt", "http://a", 1)]),
        RateLimitConfig::token_bucket(LimitScope::Service, 10, 1.0),
    );
    let h = Harness::new(&config(vec![("chat", svc)]));

    for _ in 0..10 {
        assert!(h.registry.select_instance(CHAT, "gpt", None).is_ok());
    }
    let err = h.registry.select_instance(CHAT, "gpt", None).unwrap_err();
    assert_eq!(err.limit_scope(), Some(LimitScope::Service));

    // One second refills exactly one token.
    h.clock.advance(Duration::from_secs(1));
    assert!(h.registry.select_instance(CHAT, "gpt", None).is_ok());
    assert!(h.registry.select_instance(CHAT, "gpt", None).is_err());
}

#[test]
fn test_unhealthy_instance_is_never_selected() {
    for strategy in [
        Strategy::Random,
        Strategy::RoundRobin,
        Strategy::LeastConnections,
        Strategy::IpHash,
    ] {
        let healthy = instance("m", "http://healthy", 1);
        let sick = instance("m", "http://sick", 5);
        let svc = with_strategy(service(vec![sick.clone(), healthy.clone()]), strategy);
        let h = Harness::new(&config(vec![("chat", svc)]));
        h.mark_unhealthy(CHAT, &sick);

        for i in 0..100 {
            let key = format!("10.0.0.{i}");
            let chosen = h.registry.select_instance(CHAT, "m", Some(&key)).unwrap();
            assert_eq!(chosen.base_url, "http://healthy", "strategy {strategy}");
        }
    }
}

#[test]
fn test_breaker_opens_then_half_opens_after_timeout() {
    let svc = with_breaker(service(vec![instance("m", "http://a", 1)]), 3, 5_000);
    let h = Harness::new(&config(vec![("chat", svc)]));

    for _ in 0..3 {
        let chosen = h.registry.select_instance(CHAT, "m", None).unwrap();
        h.registry.record_call_failure(CHAT, &chosen);
    }
    assert_eq!(h.registry.breaker_state(CHAT, "m@http://a"), Some(CircuitState::Open));
    assert!(matches!(
        h.registry.select_instance(CHAT, "m", None),
        Err(DispatchError::Unavailable { .. })
    ));

    h.clock.advance(Duration::from_millis(4_999));
    assert!(h.registry.select_instance(CHAT, "m", None).is_err());

    h.clock.advance(Duration::from_millis(1));
    let probe = h.registry.select_instance(CHAT, "m", None).unwrap();
    assert_eq!(h.registry.breaker_state(CHAT, "m@http://a"), Some(CircuitState::HalfOpen));

    // Default success_threshold is 2.
    h.registry.record_call_complete(CHAT, &probe);
    let probe = h.registry.select_instance(CHAT, "m", None).unwrap();
    h.registry.record_call_complete(CHAT, &probe);
    assert_eq!(h.registry.breaker_state(CHAT, "m@http://a"), Some(CircuitState::Closed));

    assert_eq!(
        h.events.transitions(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[test]
fn test_weighted_random_follows_weights() {
    let svc = service(vec![instance("m", "http://heavy", 5), instance("m", "http://light", 1)]);
    let h = Harness::new(&config(vec![("chat", svc)]));

    let picks = h.pick_urls(CHAT, "m", 6000);
    let heavy = picks.iter().filter(|url| *url == "http://heavy").count();
    let ratio = heavy as f64 / picks.len() as f64;
    assert!((ratio - 5.0 / 6.0).abs() < 0.1, "ratio was {ratio}");
}

#[test]
fn test_weighted_round_robin_is_exact_per_cycle() {
    let svc = with_strategy(
        service(vec![instance("m", "http://heavy", 5), instance("m", "http://light", 1)]),
        Strategy::RoundRobin,
    );
    let h = Harness::new(&config(vec![("chat", svc)]));

    let picks = h.pick_urls(CHAT, "m", 1200);
    assert_eq!(picks.iter().filter(|url| *url == "http://heavy").count(), 1000);
}

#[test]
fn test_ip_hash_affinity_and_missing_key() {
    let svc = with_strategy(
        service(vec![
            instance("m", "http://a", 1),
            instance("m", "http://b", 1),
            instance("m", "http://c", 1),
        ]),
        Strategy::IpHash,
    );
    let h = Harness::new(&config(vec![("chat", svc)]));

    for client in ["192.168.1.10", "192.168.1.11", "2001:db8::1"] {
        let first = h.registry.select_instance(CHAT, "m", Some(client)).unwrap();
        for _ in 0..100 {
            let again = h.registry.select_instance(CHAT, "m", Some(client)).unwrap();
            assert_eq!(again.base_url, first.base_url);
        }
    }

    for _ in 0..20 {
        assert!(h.registry.select_instance(CHAT, "m", None).is_ok());
    }
}

#[test]
fn test_instance_limit_denial_does_not_fall_back() {
    let limited = instance("m", "http://a", 1)
        .with_rate_limit(RateLimitConfig::token_bucket(LimitScope::Instance, 1, 0.001));
    let free = instance("m", "http://b", 1);
    let svc = with_strategy(service(vec![limited, free]), Strategy::RoundRobin);
    let h = Harness::new(&config(vec![("chat", svc)]));

    assert_eq!(h.registry.select_instance(CHAT, "m", None).unwrap().base_url, "http://a");
    assert_eq!(h.registry.select_instance(CHAT, "m", None).unwrap().base_url, "http://b");

    match h.registry.select_instance(CHAT, "m", None).unwrap_err() {
        DispatchError::RateLimited {
            scope, instance_id, ..
        } => {
            assert_eq!(scope, LimitScope::Instance);
            assert_eq!(instance_id.as_deref(), Some("m@http://a"));
        }
        other => panic!("expected instance rate limit, got {other}"),
    }
    assert_eq!(h.registry.select_instance(CHAT, "m", None).unwrap().base_url, "http://b");
}

#[test]
fn test_service_wide_instance_limit_applies_per_instance() {
    let svc = with_limit(
        with_strategy(
            service(vec![instance("m", "http://a", 1), instance("m", "http://b", 1)]),
            Strategy::RoundRobin,
        ),
        RateLimitConfig::token_bucket(LimitScope::Instance, 2, 0.001),
    );
    let h = Harness::new(&config(vec![("chat", svc)]));

    let picks = h.pick_urls(CHAT, "m", 6);
    assert_eq!(
        picks,
        vec!["http://a", "http://b", "http://a", "http://b", "rate_limited", "rate_limited"]
    );
}

#[test]
fn test_global_limit_is_shared_across_services() {
    let mut cfg = config(vec![
        ("chat", service(vec![instance("m", "http://a", 1)])),
        ("embedding", service(vec![instance("e", "http://e", 1)])),
    ]);
    cfg.global_rate_limit = Some(RateLimitConfig::token_bucket(LimitScope::Global, 2, 0.001));
    let h = Harness::new(&cfg);

    assert!(h.registry.select_instance(CHAT, "m", None).is_ok());
    assert!(h.registry.select_instance(ServiceType::Embedding, "e", None).is_ok());
    let err = h.registry.select_instance(CHAT, "m", None).unwrap_err();
    assert_eq!(err.limit_scope(), Some(LimitScope::Global));
}

#[test]
fn test_request_weight_consumes_multiple_tokens() {
    let svc = with_limit(
        service(vec![instance("m", "http://a", 1)]),
        RateLimitConfig::token_bucket(LimitScope::Service, 5, 0.001),
    );
    let h = Harness::new(&config(vec![("chat", svc)]));

    assert!(h.registry.select_instance_weighted(CHAT, "m", None, 4).is_ok());
    assert!(h.registry.select_instance_weighted(CHAT, "m", None, 4).is_err());
    assert!(h.registry.select_instance_weighted(CHAT, "m", None, 1).is_ok());
}

#[test]
fn test_least_connections_tracks_call_lifecycle() {
    let svc = with_strategy(
        service(vec![instance("m", "http://a", 1), instance("m", "http://b", 1)]),
        Strategy::LeastConnections,
    );
    let h = Harness::new(&config(vec![("chat", svc)]));

    let first = h.registry.select_instance(CHAT, "m", None).unwrap();
    let second = h.registry.select_instance(CHAT, "m", None).unwrap();
    assert_eq!(first.base_url, "http://a");
    assert_eq!(second.base_url, "http://b");

    h.registry.record_call_complete(CHAT, &second);
    assert_eq!(h.registry.select_instance(CHAT, "m", None).unwrap().base_url, "http://b");

    // A failed call also ends the connection.
    h.registry.record_call_failure(CHAT, &first);
    assert_eq!(h.registry.select_instance(CHAT, "m", None).unwrap().base_url, "http://a");
}

#[test]
fn test_events_reach_the_sink() {
    let svc = with_limit(
        service(vec![instance("m", "http://a", 1)]),
        RateLimitConfig::token_bucket(LimitScope::Service, 1, 0.001),
    );
    let h = Harness::new(&config(vec![("chat", svc)]));

    h.registry.select_instance(CHAT, "m", None).unwrap();
    h.registry.select_instance(CHAT, "m", None).unwrap_err();

    let events = h.events.events();
    assert!(events.contains(&Event::Selection {
        instance: "m@http://a".to_string(),
        strategy: Strategy::Random,
    }));
    assert!(events.contains(&Event::RateLimit {
        scope: LimitScope::Service,
        allowed: false,
    }));
    assert!(events.contains(&Event::Rejection { kind: "rate_limited" }));
}

#[test]
fn test_concurrent_dispatch_never_oversells_service_limit() {
    let svc = with_limit(
        with_strategy(
            service(vec![instance("m", "http://a", 1), instance("m", "http://b", 3)]),
            Strategy::RoundRobin,
        ),
        RateLimitConfig::token_bucket(LimitScope::Service, 500, 0.001),
    );
    let h = Harness::new(&config(vec![("chat", svc)]));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&h.registry);
            std::thread::spawn(move || {
                (0..100)
                    .filter(|_| registry.select_instance(CHAT, "m", None).is_ok())
                    .count()
            })
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|t| t.join().unwrap()).sum();
    assert_eq!(admitted, 500);
}
