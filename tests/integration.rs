use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kh");
    path
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files = root.join("files");
    write(
        &files,
        "alpha.md",
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    );
    write(
        &files,
        "beta.md",
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    );
    write(
        &files,
        "ops/gamma.txt",
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    );
    write(&files, ".env", "DATABASE_URL=postgres://localhost/db");
    write(&files, "node_modules/pkg/index.js", "module.exports = function () {};\n");

    let config_content = format!(
        r#"[db]
path = "{}/data/kh.sqlite"

[chunking]
chunk_size = 1000
overlap = 200

[embedding]
provider = "hash"
dims = 256

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("kh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn files_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

fn run_kh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn index_files(config_path: &Path) -> String {
    let files = files_dir(config_path);
    let (stdout, stderr, success) = run_kh(config_path, &["index", files.to_str().unwrap()]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kh(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(stdout.contains("'default'"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_kh(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_kh(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_kh(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_preview_counts_rejections() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, stderr, success) =
        run_kh(&config_path, &["preview", files.to_str().unwrap(), "--json"]);
    assert!(success, "preview failed: stdout={}, stderr={}", stdout, stderr);

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["preset"], "notes");
    assert_eq!(json["will_index"], 3);
    assert_eq!(json["rejected_by_reason"]["sensitive-name"], 1);
    assert_eq!(json["rejected_by_reason"]["pattern"], 1);
    assert_eq!(json["high_risk"], false);
}

#[test]
fn test_preview_writes_nothing() {
    let (tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (_, _, success) = run_kh(&config_path, &["preview", files.to_str().unwrap()]);
    assert!(success);
    assert!(!tmp.path().join("data/kh.sqlite").exists());
}

#[test]
fn test_index_directory() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = index_files(&config_path);
    assert!(stdout.contains("indexed:        3"));
    assert!(stdout.contains("rejected (sensitive-name): 1"));
    assert!(stdout.contains("rejected (pattern): 1"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_index_idempotent_skips_unchanged() {
    let (_tmp, config_path) = setup_test_env();

    index_files(&config_path);
    let stdout = index_files(&config_path);
    assert!(stdout.contains("indexed:        0"));
    assert!(stdout.contains("unchanged:      3"));

    let (stdout, _, success) = run_kh(&config_path, &["docs", "list", "--json"]);
    assert!(success);
    let docs: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(docs.as_array().unwrap().len(), 3);
}

#[test]
fn test_index_picks_up_edits() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    index_files(&config_path);
    write(&files, "alpha.md", "# Alpha\n\nRewritten: now about bread baking and sourdough.");
    let stdout = index_files(&config_path);
    assert!(stdout.contains("indexed:        1"));
    assert!(stdout.contains("unchanged:      2"));
}

#[test]
fn test_index_prune() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    index_files(&config_path);
    fs::remove_file(files.join("beta.md")).unwrap();
    let (stdout, _, success) = run_kh(
        &config_path,
        &["index", files.to_str().unwrap(), "--prune"],
    );
    assert!(success);
    assert!(stdout.contains("removed:        1"));
}

#[test]
fn test_search_ranks_relevant_document_first() {
    let (_tmp, config_path) = setup_test_env();
    index_files(&config_path);

    let (stdout, stderr, success) = run_kh(
        &config_path,
        &["search", "Kubernetes and Docker deployment", "--json"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["path"], "ops/gamma.txt");

    let scores: Vec<f64> = hits.iter().map(|h| h["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    index_files(&config_path);

    let (first, _, _) = run_kh(&config_path, &["search", "rust cargo crates"]);
    let (second, _, _) = run_kh(&config_path, &["search", "rust cargo crates"]);
    assert_eq!(first, second);
}

#[test]
fn test_search_filters() {
    let (_tmp, config_path) = setup_test_env();
    index_files(&config_path);

    let (stdout, _, success) = run_kh(
        &config_path,
        &["search", "document", "--type", "txt", "--json"],
    );
    assert!(success);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(hits
        .as_array()
        .unwrap()
        .iter()
        .all(|h| h["path"] == "ops/gamma.txt"));

    let (stdout, _, success) = run_kh(
        &config_path,
        &["search", "document", "--path-prefix", "ops/", "--limit", "1", "--json"],
    );
    assert!(success);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits.as_array().unwrap().len(), 1);
}

#[test]
fn test_search_empty_knowledge_base() {
    let (_tmp, config_path) = setup_test_env();
    run_kh(&config_path, &["init"]);

    let (stdout, _, success) = run_kh(&config_path, &["search", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_unknown_knowledge_base_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_kh(&config_path, &["init"]);

    let (_, stderr, success) = run_kh(&config_path, &["search", "anything", "--kb", "missing"]);
    assert!(!success);
    assert!(stderr.contains("knowledge base not found"));
}

#[test]
fn test_knowledge_bases_are_isolated() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (_, _, success) = run_kh(
        &config_path,
        &["index", files.join("ops").to_str().unwrap(), "--kb", "ops"],
    );
    assert!(success);
    index_files(&config_path);

    let (stdout, _, success) = run_kh(
        &config_path,
        &["search", "python machine learning", "--kb", "ops", "--json"],
    );
    assert!(success);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(hits
        .as_array()
        .unwrap()
        .iter()
        .all(|h| h["path"] == "gamma.txt"));
}

#[test]
fn test_context_assembles_sources() {
    let (_tmp, config_path) = setup_test_env();
    index_files(&config_path);

    let (stdout, stderr, success) = run_kh(
        &config_path,
        &["context", "python deep learning", "--limit", "2", "--json"],
    );
    assert!(success, "context failed: stdout={}, stderr={}", stdout, stderr);
    let ctx: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let text = ctx["text"].as_str().unwrap();
    assert!(text.starts_with("Source: beta.md\n"));
    assert!(text.contains("\n\n---\n\nSource: "));
    assert_eq!(ctx["sources"].as_array().unwrap().len(), 2);
    assert_eq!(ctx["truncated"], false);
}

#[test]
fn test_reindex_single_file() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);
    let root = files.to_str().unwrap();

    let (stdout, _, success) = run_kh(&config_path, &["reindex", "alpha.md", "--root", root]);
    assert!(success);
    assert!(stdout.contains("indexed alpha.md"));

    let (stdout, _, success) = run_kh(&config_path, &["reindex", ".env", "--root", root]);
    assert!(success);
    assert!(stdout.contains("rejected .env (sensitive-name"));

    fs::remove_file(files.join("alpha.md")).unwrap();
    let (stdout, _, success) = run_kh(&config_path, &["reindex", "alpha.md", "--root", root]);
    assert!(success);
    assert!(stdout.contains("removed alpha.md"));
}

#[test]
fn test_kb_commands() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_kh(&config_path, &["kb", "create", "research"]);
    assert!(success);
    assert!(stdout.contains("created knowledge base 'research'"));

    let (_, _, success) = run_kh(&config_path, &["kb", "create", "research"]);
    assert!(!success, "duplicate knowledge base should fail");

    let (stdout, _, success) = run_kh(&config_path, &["kb", "list", "--json"]);
    assert!(success);
    let kbs: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(kbs[0]["name"], "research");

    let (_, _, success) = run_kh(&config_path, &["kb", "delete", "research"]);
    assert!(success);
    let (_, _, success) = run_kh(&config_path, &["kb", "delete", "research"]);
    assert!(!success);
}

#[test]
fn test_docs_remove() {
    let (_tmp, config_path) = setup_test_env();
    index_files(&config_path);

    let (stdout, _, success) = run_kh(&config_path, &["docs", "remove", "beta.md"]);
    assert!(success);
    assert!(stdout.contains("removed beta.md"));

    let (_, _, success) = run_kh(&config_path, &["docs", "remove", "beta.md"]);
    assert!(!success);
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    index_files(&config_path);

    let (stdout, _, success) = run_kh(&config_path, &["stats", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["knowledge_bases"], 1);
    assert_eq!(stats["documents"], 3);
    assert_eq!(stats["dimensions"], 256);
    assert_eq!(stats["documents_by_type"]["md"], 2);
    assert_eq!(stats["chunks"], stats["vectors"]);
}

#[test]
fn test_dimension_change_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    index_files(&config_path);

    let config = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, config.replace("dims = 256", "dims = 128")).unwrap();

    let (_, stderr, success) = run_kh(&config_path, &["search", "rust"]);
    assert!(!success);
    assert!(stderr.contains("dimension mismatch"));
}
