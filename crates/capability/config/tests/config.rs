use edge_config::{AppConfig, ConfigError, LogFormat};

// 环境变量是进程级共享状态，两个场景放在同一个测试里顺序执行。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("EDGE_HTTP_ADDR", "127.0.0.1:9090");
        std::env::set_var("EDGE_SUPERVISOR_MAX_RETRIES", "5");
        std::env::set_var("EDGE_BROKER_WORKERS", "0");
        std::env::set_var("EDGE_LOG_FORMAT", "json");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.http_addr, "127.0.0.1:9090");
    assert_eq!(config.supervisor_max_retries, 5);
    assert_eq!(config.broker_workers, 1);
    assert_eq!(config.supervisor_interval_secs, 5);
    assert_eq!(config.ingress_queue_size, 4096);
    assert_eq!(config.log_format, LogFormat::Json);

    unsafe {
        std::env::set_var("EDGE_SUPERVISOR_BACKOFF_MS", "soon");
    }
    let err = AppConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(key, _) if key == "EDGE_SUPERVISOR_BACKOFF_MS"));

    unsafe {
        std::env::remove_var("EDGE_SUPERVISOR_BACKOFF_MS");
        std::env::remove_var("EDGE_LOG_FORMAT");
    }
}
