use super::*;

#[test]
fn defaults_allow_eight_peers_per_session() {
    let config = RelayConfig::default();
    assert_eq!(config.port, 3000);
    assert_eq!(config.client_queue, 256);
    assert_eq!(config.max_peers, 8);
}

#[test]
fn env_parse_falls_back_on_missing_key() {
    assert_eq!(env_parse("CASEFILE_RELAY_TEST_UNSET_KEY", 42_usize), 42);
}
