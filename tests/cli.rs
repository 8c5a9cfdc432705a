use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const SECRET: &str = "secret-token-value-123";

/// Runs the binary with an isolated environment. The API base points at a
/// closed local port so any request fails fast instead of reaching the network.
fn run_groupme(dir: &Path, token: Option<&str>, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_groupme"));
    command
        .args(args)
        .current_dir(dir)
        .env_remove("GROUPME_TOKEN")
        .env_remove("GROUPME_LOG")
        .env("HOME", dir)
        .env("GROUPME_DATA_DIR", dir.join("data"))
        .env("GROUPME_TOKEN_PATH", dir.join("data").join("token.json"))
        .env("GROUPME_API_BASE_URL", "http://127.0.0.1:9/v3")
        .env("GROUPME_IMAGE_BASE_URL", "http://127.0.0.1:9")
        .env("GROUPME_TIMEOUT_SECS", "5")
        .stdin(Stdio::null());
    if let Some(token) = token {
        command.env("GROUPME_TOKEN", token);
    }
    command.output().expect("failed to execute groupme binary")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "groupme failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be valid json")
}

fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn missing_token_fails_before_any_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    for args in [
        vec!["list-groups"],
        vec!["former-groups"],
        vec!["group", "show", "123"],
        vec!["read", "123"],
        vec!["read-dm", "55"],
        vec!["list-dms"],
        vec!["whoami"],
        vec!["export", "123"],
        vec!["search", "123", "   "],
        vec!["search-dm", "pizza"],
        vec!["send", "123", "hi", "--dry-run"],
        vec!["send", "123", "   ", "--dry-run"],
        vec!["dm", "55", "", "--dry-run"],
        vec!["like", "123", "456"],
    ] {
        let output = run_groupme(dir.path(), None, &args);
        assert_eq!(output.status.code(), Some(1), "{args:?}");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("GROUPME_TOKEN"), "{args:?}: {stderr}");
        assert!(!stderr.contains("network error"), "{args:?}: {stderr}");
    }
}

#[test]
fn dry_run_prints_exact_group_payload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_groupme(dir.path(), Some(SECRET), &["send", "123", "  hello  world ", "--dry-run"]);
    let payload = stdout_json(&output);

    let message = &payload["message"];
    assert_eq!(message["text"], "  hello  world ");
    assert_eq!(message["attachments"], Value::Array(Vec::new()));
    assert!(message.get("recipient_id").is_none());
    let guid = message["source_guid"].as_str().expect("source_guid");
    assert_eq!(guid.len(), 36);
    assert!(!combined(&output).contains(SECRET));
}

#[test]
fn dry_run_dm_payload_names_recipient() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_groupme(dir.path(), Some(SECRET), &["dm", "55", "hey", "--dry-run"]);
    let payload = stdout_json(&output);
    assert_eq!(payload["direct_message"]["recipient_id"], "55");
    assert_eq!(payload["direct_message"]["text"], "hey");
}

#[test]
fn dry_run_with_image_does_not_upload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("photo.png");
    std::fs::write(&image, b"\x89PNG\r\n").expect("write image");
    let image_arg = image.to_string_lossy().to_string();

    let output = run_groupme(
        dir.path(),
        Some(SECRET),
        &["send", "123", "", "--image", &image_arg, "--dry-run"],
    );
    let payload = stdout_json(&output);
    let attachment = &payload["message"]["attachments"][0];
    assert_eq!(attachment["type"], "image");
    let url = attachment["url"].as_str().expect("url");
    assert!(url.starts_with("file://") && url.ends_with("/photo.png"), "{url}");
}

#[test]
fn token_path_may_be_a_bare_file_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_groupme"))
        .args(["auth", "save-token", "--token", SECRET])
        .current_dir(dir.path())
        .env_remove("GROUPME_TOKEN")
        .env("GROUPME_TOKEN_PATH", "token.json")
        .stdin(Stdio::null())
        .output()
        .expect("failed to execute groupme binary");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("token.json")).expect("token file"))
            .expect("json");
    assert_eq!(saved["token"], SECRET);
}

#[test]
fn dry_run_and_confirm_is_a_usage_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_groupme(dir.path(), Some(SECRET), &["send", "123", "hi", "--dry-run", "--confirm"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn empty_text_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_groupme(dir.path(), Some(SECRET), &["send", "123", "   ", "--dry-run"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("empty"));
}

#[test]
fn unconfirmed_send_is_refused_without_a_terminal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_groupme(dir.path(), Some(SECRET), &["send", "123", "hi"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--confirm"), "{stderr}");
    assert!(!stderr.contains("network error"), "{stderr}");
}

#[test]
fn unreachable_service_is_a_network_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_groupme(dir.path(), Some(SECRET), &["list-groups"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("network error"), "{stderr}");
    assert!(!combined(&output).contains(SECRET));
}

#[test]
fn saved_token_is_used_until_logout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let token_path = dir.path().join("data").join("token.json");

    let output = run_groupme(dir.path(), None, &["auth", "save-token", "--token", SECRET]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(!String::from_utf8_lossy(&output.stdout).contains(SECRET));
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&token_path).expect("token file")).expect("json");
    assert_eq!(saved["token"], SECRET);

    let output = run_groupme(dir.path(), None, &["send", "123", "hi", "--dry-run"]);
    assert_eq!(stdout_json(&output)["message"]["text"], "hi");

    let output = run_groupme(dir.path(), None, &["auth", "logout"]);
    assert!(output.status.success());
    assert!(!token_path.exists());

    let output = run_groupme(dir.path(), None, &["send", "123", "hi", "--dry-run"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn invalid_base_url_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_groupme"))
        .args(["list-groups"])
        .current_dir(dir.path())
        .env("GROUPME_TOKEN", SECRET)
        .env("GROUPME_TOKEN_PATH", dir.path().join("token.json"))
        .env("GROUPME_API_BASE_URL", "ftp://example.test")
        .stdin(Stdio::null())
        .output()
        .expect("failed to execute groupme binary");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("GROUPME_API_BASE_URL"));
}

#[test]
fn help_lists_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_groupme(dir.path(), None, &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["list-groups", "read", "send", "list-dms", "dm"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}
