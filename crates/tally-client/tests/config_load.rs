mod support;

use std::fs;

use chrono::Duration;
use tempfile::tempdir;

use support::ScriptedTransport;

#[test]
fn bootstrap_reads_the_named_config() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("client.toml");
    fs::write(
        &path,
        "timezone = \"Asia/Tokyo\"\n\n[toast]\nerror_ms = 8000\n\n[mutation]\nreject_overlapping_keys = true\n",
    )
    .expect("write config");

    let state = tally_client::bootstrap(Some(&path), 0, 2, ScriptedTransport::new())
        .expect("bootstrap");

    assert_eq!(state.config().timezone.as_deref(), Some("Asia/Tokyo"));
    assert_eq!(state.config().toast.error_ms, 8_000);
    assert_eq!(state.config().toast.default_ms, 3_000);
    assert!(state.pipeline().settings().reject_overlapping_keys);
    assert_eq!(
        state.toasts().lock().settings().error_duration,
        Duration::milliseconds(8_000)
    );
}

#[test]
fn bootstrap_rejects_a_malformed_config() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("client.toml");
    fs::write(&path, "toast = 3\n").expect("write config");

    let err = match tally_client::bootstrap(Some(&path), 0, 2, ScriptedTransport::new()) {
        Ok(_) => panic!("malformed config accepted"),
        Err(err) => err,
    };
    let chain = format!("{err:#}");
    assert!(chain.contains("failed to load client configuration"), "{chain}");
    assert!(chain.contains("failed to parse"), "{chain}");
}
