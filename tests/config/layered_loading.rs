use std::path::PathBuf;

use mediaflow_core::config::{ConfigManager, MediaflowConfig};
use mediaflow_core::models::LoadBalancingStrategy;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[test]
fn test_shipped_config_matches_testing_profile() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test").unwrap();
    let config = manager.config();
    let testing = MediaflowConfig::for_testing();

    assert_eq!(manager.environment(), "test");
    assert_eq!(config.resources.monitoring_interval_ms, testing.resources.monitoring_interval_ms);
    assert_eq!(config.recovery.retry_delay_ms, testing.recovery.retry_delay_ms);
    assert_eq!(config.queue.poll_interval_ms, testing.queue.poll_interval_ms);
    assert!(!config.engine.rebalance_enabled);
    assert_eq!(config.load_balancer.strategy, LoadBalancingStrategy::Adaptive);
}

#[test]
fn test_production_profile_enables_the_journal() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "production")
            .unwrap();
    let config = manager.config();

    assert!(config.queue.journal_url.is_some());
    assert_eq!(config.resources.monitoring_interval_ms, 30_000);
    assert_eq!(config.queue.default_queue_id, "media-submission");
}

#[test]
fn test_environment_variable_overrides_file_value() {
    std::env::set_var("MEDIAFLOW__RECOVERY__HISTORY_LIMIT", "7");
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "development");
    std::env::remove_var("MEDIAFLOW__RECOVERY__HISTORY_LIMIT");

    assert_eq!(manager.unwrap().config().recovery.history_limit, 7);
}
