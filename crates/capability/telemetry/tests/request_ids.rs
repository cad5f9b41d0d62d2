use edge_telemetry::{init_tracing, metrics, new_request_ids, record_ingress_dropped};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
    assert_ne!(ids.request_id, ids.trace_id);
}

#[test]
fn init_tracing_is_idempotent() {
    init_tracing(false);
    init_tracing(true);
}

#[test]
fn counters_are_monotonic() {
    let before = metrics().snapshot().ingress_dropped;
    record_ingress_dropped();
    record_ingress_dropped();
    assert!(metrics().snapshot().ingress_dropped >= before + 2);
}
