use std::io::Write;

use delve_core::config::{AppConfig, EntryMode};
use delve_core::error::DelveError;

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"
max_tokens = 4096
temperature = 0.5
timeout_secs = 90

[model.retry]
max_retries = 5

[[fallback_models]]
provider = "groq"
model_id = "llama-3.3-70b-versatile"
api_key = "gsk-test"

[workflow]
max_steps = 25
entry = "search"
step_retries = 1
summary_concurrency = 5

[web_search]
provider = "tavily"
api_key = "tvly-test"
max_results = 5

[scrape]
max_chars = 8000

[pdf]
command = "/usr/local/bin/pdftotext"
top_k = 6
image_command = "pdfimages"
max_images = 4

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dimensions = 768

[log]
log_dir = "/tmp/delve-logs"
level = 3
"#;

    let tmp = write_temp(toml_content);
    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.timeout_secs, 90);
    let retry = config.model.retry.as_ref().expect("retry section");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 1000);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].provider, "groq");

    assert_eq!(config.workflow.max_steps, 25);
    assert_eq!(config.workflow.entry, EntryMode::Search);
    assert_eq!(config.workflow.step_retries, 1);
    assert_eq!(config.workflow.summary_concurrency, 5);

    let ws = config.web_search.as_ref().expect("web_search section");
    assert_eq!(ws.provider, "tavily");
    assert_eq!(ws.max_results, 5);
    assert_eq!(ws.timeout_secs, 30);

    assert_eq!(config.scrape.max_chars, 8000);
    assert_eq!(config.scrape.timeout_secs, 30);
    assert_eq!(config.pdf.command, "/usr/local/bin/pdftotext");
    assert_eq!(config.pdf.top_k, 6);
    assert_eq!(config.pdf.chunk_chars, 6000);
    assert_eq!(config.pdf.image_command.as_deref(), Some("pdfimages"));
    assert_eq!(config.pdf.max_images, 4);
    assert_eq!(config.pdf.min_image_bytes, 4096);

    let emb = config.embedding.as_ref().expect("embedding section");
    assert_eq!(emb.dimensions, 768);

    let log = config.log.as_ref().expect("log section");
    assert!(log.enabled);
    assert_eq!(log.level, 3);
    assert_eq!(log.dir(), std::path::PathBuf::from("/tmp/delve-logs"));
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = write_temp("[model]\nmodel_id = \"gpt-4o-mini\"\n");
    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "openai");
    assert_eq!(config.model.max_tokens, 4096);
    assert!(config.model.retry.is_none());
    assert!(config.fallback_models.is_empty());
    assert_eq!(config.workflow.max_steps, 40);
    assert_eq!(config.workflow.entry, EntryMode::Direct);
    assert_eq!(config.workflow.step_retries, 2);
    assert_eq!(config.workflow.summary_concurrency, 3);
    assert!(config.web_search.is_none());
    assert_eq!(config.pdf.command, "pdftotext");
    assert_eq!(config.pdf.top_k, 4);
    assert!(config.pdf.image_command.is_none());
    assert!(config.embedding.is_none());
    assert!(config.log.is_none());
}

#[test]
fn test_env_var_expansion_in_file() {
    std::env::set_var("DELVE_TEST_SERPER_KEY", "serper-from-env");
    let tmp = write_temp(
        r#"
[model]
model_id = "gpt-4o"
api_key = "${DELVE_TEST_UNSET_VAR}"

[web_search]
api_key = "${DELVE_TEST_SERPER_KEY}"
"#,
    );
    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(
        config.web_search.map(|ws| ws.api_key),
        Some("serper-from-env".to_string())
    );
    // Unset variables are left as written.
    assert_eq!(
        config.model.api_key.as_deref(),
        Some("${DELVE_TEST_UNSET_VAR}")
    );
}

#[test]
fn test_missing_file_is_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/delve.toml")).unwrap_err();
    assert!(matches!(err, DelveError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_values_rejected() {
    for bad in [
        "[model]\nmodel_id = \"m\"\n[workflow]\nmax_steps = 0\n",
        "[model]\nmodel_id = \"m\"\n[pdf]\ntop_k = 0\n",
        "[model]\nmodel_id = \"m\"\n[workflow]\nentry = \"sideways\"\n",
        "[workflow]\nmax_steps = 3\n",
    ] {
        let tmp = write_temp(bad);
        let err = AppConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, DelveError::Config(_)), "{}", bad);
    }
}
