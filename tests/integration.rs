use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sei_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sei");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // One case with three documents and a non-document
    let case_dir = root.join("processos").join("SEI_123_2024").join("vol1");
    fs::create_dir_all(&case_dir).unwrap();
    fs::write(case_dir.join("a_Despacho_1.pdf"), b"%PDF-1.4").unwrap();
    fs::write(case_dir.join("b_Oficio_2.pdf"), b"%PDF-1.4").unwrap();
    fs::write(case_dir.join("c_Despacho_3.pdf"), b"%PDF-1.4").unwrap();
    fs::write(case_dir.join("notes.txt"), b"not a document").unwrap();

    let config_content = format!(
        r#"[archive]
root = '{}/processos'
auto_download = false

[pipeline]
recursion_limit = 25

[server]
bind = "127.0.0.1:7481"
"#,
        root.display()
    );

    let config_path = config_dir.join("sei.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sei(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sei_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sei binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_tools_list() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_sei(&config, &["tools", "list"]);
    assert!(success, "tools list failed: {}", stderr);
    assert!(stdout.contains("search_process"));
    assert!(stdout.contains("get_document_list_from_process"));
    assert!(stdout.contains("get_document_by_type"));
}

#[test]
fn test_search_process_compact_id() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_sei(
        &config,
        &["tools", "call", "search_process", "--param", "id=1232024"],
    );
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("SEI_123_2024"), "stdout: {}", stdout);
}

#[test]
fn test_search_process_unknown_case_is_in_band() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_sei(
        &config,
        &["tools", "call", "search_process", "--param", "id=999/2024"],
    );
    assert!(success, "search failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["error"]["kind"], "not_found");
}

#[test]
fn test_list_documents_paginates() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_sei(
        &config,
        &[
            "tools",
            "call",
            "get_document_list_from_process",
            "--param",
            "id=123/2024",
            "--param",
            "limit=5",
            "--param",
            "offset=1",
        ],
    );
    assert!(success, "list failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        value["documents"],
        serde_json::json!(["b_Oficio_2.pdf", "c_Despacho_3.pdf"])
    );
    assert_eq!(value["total_number_of_documents"], 3);
}

#[test]
fn test_document_type_filter() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_sei(
        &config,
        &[
            "tools",
            "call",
            "get_document_by_type",
            "--param",
            "id=123/2024",
            "--param",
            "document_type=despacho",
        ],
    );
    assert!(success, "filter failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["number_of_documents"], 2);
}

#[test]
fn test_document_type_filter_no_match() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_sei(
        &config,
        &[
            "tools",
            "call",
            "get_document_by_type",
            "--param",
            "id=123/2024",
            "--param",
            "document_type=Parecer",
        ],
    );
    assert!(success, "filter failed: {}", stderr);
    assert!(
        stdout.contains("Documents of type Parecer not found in process 123/2024"),
        "stdout: {}",
        stdout
    );
}

#[test]
fn test_missing_required_param_fails() {
    let (_tmp, config) = setup_test_env();
    let (_stdout, stderr, success) = run_sei(
        &config,
        &[
            "tools",
            "call",
            "get_document_list_from_process",
            "--param",
            "id=123/2024",
        ],
    );
    assert!(!success, "call without limit should fail");
    assert!(stderr.contains("limit"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_tool_fails() {
    let (_tmp, config) = setup_test_env();
    let (_stdout, _stderr, success) = run_sei(&config, &["tools", "call", "nope"]);
    assert!(!success);
}

#[test]
fn test_status_reports_archive() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_sei(&config, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("Present:     yes"));
    assert!(stdout.contains("Processes:   1"));
    assert!(stdout.contains("Documents:   3"));
}

#[test]
fn test_fetch_skips_present_archive() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_sei(&config, &["fetch"]);
    assert!(success, "fetch failed: {}", stderr);
    assert!(stdout.contains("archive already present"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _config) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[pipeline]\nrecursion_limit = 0\n").unwrap();
    let (_stdout, stderr, success) = run_sei(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("recursion_limit"), "stderr: {}", stderr);
}
