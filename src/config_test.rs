use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn empty_environment_uses_defaults() {
    let config = RelayConfig::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(config, RelayConfig::default());
    assert_eq!(config.listen_addr(), "0.0.0.0:3000");
    assert_eq!(config.send_timeout, Some(Duration::from_millis(5_000)));
    assert!(config.echo_errors);
    assert!(config.credentials_file.is_none());
}

#[test]
fn overrides_are_applied() {
    let config = RelayConfig::from_lookup(lookup_from(&[
        ("BIND_ADDR", "127.0.0.1"),
        ("PORT", "8080"),
        ("RELAY_CONSUMER_QUEUE", "4"),
        ("RELAY_SEND_TIMEOUT_MS", "250"),
        ("RELAY_MAX_MESSAGE_BYTES", "1024"),
        ("RELAY_ECHO_ERRORS", "off"),
        ("RELAY_CREDENTIALS_FILE", "/etc/relay/creds.json"),
    ]))
    .unwrap();

    assert_eq!(config.listen_addr(), "127.0.0.1:8080");
    assert_eq!(config.consumer_queue, 4);
    assert_eq!(config.send_timeout, Some(Duration::from_millis(250)));
    assert_eq!(config.max_message_bytes, 1024);
    assert!(!config.echo_errors);
    assert_eq!(config.credentials_file, Some(PathBuf::from("/etc/relay/creds.json")));
}

#[test]
fn zero_send_timeout_disables_it() {
    let config = RelayConfig::from_lookup(lookup_from(&[("RELAY_SEND_TIMEOUT_MS", "0")])).unwrap();
    assert_eq!(config.send_timeout, None);
}

#[test]
fn invalid_port_is_an_error() {
    let err = RelayConfig::from_lookup(lookup_from(&[("PORT", "http")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    assert_eq!(err.error_code(), "E_CONFIG");
}

#[test]
fn invalid_bool_is_an_error() {
    let err = RelayConfig::from_lookup(lookup_from(&[("RELAY_ECHO_ERRORS", "maybe")])).unwrap_err();
    assert!(err.to_string().contains("RELAY_ECHO_ERRORS"));
}

#[test]
fn zero_queue_is_an_error() {
    let err = RelayConfig::from_lookup(lookup_from(&[("RELAY_CONSUMER_QUEUE", "0")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "RELAY_CONSUMER_QUEUE", .. }));
}
