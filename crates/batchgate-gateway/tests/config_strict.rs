#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use batchgate_gateway::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
batching:
  max_batch: 8
  max_latncy_ms: 5 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.server.listen, "0.0.0.0:8080");
    assert_eq!(cfg.batching.max_batch, 8);
    assert_eq!(cfg.batching.max_latency_ms, 5);
    assert_eq!(cfg.default_policy.burst, 40);
    assert_eq!(cfg.backend.direct_id, "direct");
    assert!(cfg.agents.is_empty());
}

#[test]
fn unsupported_version() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn full_config_with_agent_overrides() {
    let ok = r#"
version: 1
server: { listen: "127.0.0.1:9000", shutdown_grace_ms: 1000 }
batching: { max_queue: 256, max_batch: 8, max_latency_ms: 5 }
default_policy: { rate: 10.0, burst: 20, timeout_ms: 2000 }
tenants:
  - { id: acme, rate: 100.0, burst: 200, timeout_ms: 5000 }
backend: { kind: echo, latency_ms: 2 }
agents:
  - { slug: retriever, max_batch: 16 }
  - { slug: ranker }
autostart:
  - { slug: retriever, name_prefix: boot, copies: 2 }
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.tenants[0].policy().timeout, Duration::from_millis(5000));
    assert_eq!(cfg.autostart[0].tenant, "default");

    let catalog = cfg.catalog();
    assert_eq!(catalog.slugs(), vec!["ranker", "retriever"]);
    let retriever = catalog.batcher_config("retriever").unwrap();
    assert_eq!(retriever.max_batch, 16);
    assert_eq!(retriever.max_queue, 256);
    assert_eq!(catalog.batcher_config("ranker").unwrap().max_batch, 8);
}

#[test]
fn invalid_values_are_rejected() {
    let cases = [
        "version: 1\nbatching: { max_batch: 0 }\n",
        "version: 1\nbatching: { max_batch: 4611686018427387903 }\n",
        "version: 1\nbatching: { max_queue: 2000000 }\n",
        "version: 1\nagents: [ { slug: r, max_batch: 1000000 } ]\n",
        "version: 1\ndefault_policy: { rate: 0.0 }\n",
        "version: 1\ntenants: [ { id: acme, burst: 0 } ]\n",
        "version: 1\ntenants: [ { id: acme }, { id: acme } ]\n",
        "version: 1\nserver: { listen: \"not-an-addr\" }\n",
        "version: 1\nbackend: { kind: grpc }\n",
        "version: 1\nautostart: [ { slug: ghost, name_prefix: boot } ]\n",
        "version: 1\nagents: [ { slug: r } ]\nautostart: [ { slug: r, name_prefix: boot, copies: 65 } ]\n",
    ];
    for yaml in cases {
        let err = config::load_from_str(yaml).expect_err(yaml);
        assert_eq!(err.client_code().as_str(), "BAD_REQUEST", "{yaml}");
    }
}

#[test]
fn config_path_resolution_order() {
    assert_eq!(
        config::resolve_path(Some("a.yaml".into()), Some("b.yaml".into())),
        "a.yaml"
    );
    assert_eq!(config::resolve_path(None, Some("b.yaml".into())), "b.yaml");
    assert_eq!(config::resolve_path(None, None), config::DEFAULT_CONFIG_PATH);
}

#[test]
fn missing_file_is_an_error() {
    let err = config::load_from_file("/nonexistent/batchgate.yaml").expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "INTERNAL");
}
