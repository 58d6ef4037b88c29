use super::*;

#[test]
fn defaults_match_reference_timings() {
    let config = SessionConfig::default();
    assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    assert_eq!(config.stale_after, Duration::from_secs(30));
    assert_eq!(config.join_timeout, Duration::from_secs(5));
    assert_eq!(config.catch_up_attempts, 3);
    assert_eq!(config.admission, AdmissionPolicy::Prompt);
    assert_eq!(config.reconnect_attempts, 3);
    assert_eq!(config.reconnect_delay, Duration::from_secs(1));
}

#[test]
fn stale_window_covers_three_heartbeats() {
    let config = SessionConfig::default();
    assert_eq!(config.stale_ms(), config.heartbeat_ms() * 3);
}

#[test]
fn env_parse_falls_back_on_missing_key() {
    assert_eq!(env_parse("CASEFILE_TEST_SURELY_UNSET_KEY", 17_u64), 17);
}

#[test]
fn with_admission_overrides_policy() {
    let config = SessionConfig::default().with_admission(AdmissionPolicy::AutoApprove);
    assert_eq!(config.admission, AdmissionPolicy::AutoApprove);
}

#[test]
fn millisecond_accessors_follow_durations() {
    let config = SessionConfig {
        join_timeout: Duration::from_millis(40),
        catch_up_timeout: Duration::from_millis(60),
        ..SessionConfig::default()
    };
    assert_eq!(config.join_timeout_ms(), 40);
    assert_eq!(config.catch_up_timeout_ms(), 60);
}
