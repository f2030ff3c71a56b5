use std::process::{Command, Stdio};

use delve_core::config::AppConfig;
use delve_llm::providers::presets::get_preset;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub fn run_doctor(config: &AppConfig) -> bool {
    let checks = vec![
        check_api_key(config),
        check_fallbacks(config),
        check_web_search(config),
        check_pdf_extractor(config),
        check_embedding(config),
        check_log_dir(config),
        check_workflow(config),
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
    fail_count == 0
}

/// A key is usable if present and not an unexpanded `${VAR}` reference.
fn usable_key(key: Option<&str>) -> bool {
    key.is_some_and(|k| !k.trim().is_empty() && !k.starts_with("${"))
}

fn check_api_key(config: &AppConfig) -> CheckResult {
    let provider = &config.model.provider;
    let needs_key = get_preset(provider).map_or(true, |p| p.needs_api_key);

    if !needs_key || usable_key(config.model.api_key.as_deref()) {
        CheckResult {
            label: "API Key".into(),
            ok: true,
            detail: format!("Configured for {} ({})", config.model.model_id, provider),
        }
    } else {
        CheckResult {
            label: "API Key".into(),
            ok: false,
            detail: format!("No API key set for provider '{}'", provider),
        }
    }
}

fn check_fallbacks(config: &AppConfig) -> CheckResult {
    let bad: Vec<String> = config
        .fallback_models
        .iter()
        .filter_map(|m| delve_llm::create_client(m).err().map(|e| format!("{} ({})", m.model_id, e)))
        .collect();

    if !bad.is_empty() {
        CheckResult {
            label: "Fallbacks".into(),
            ok: false,
            detail: bad.join(", "),
        }
    } else if config.fallback_models.is_empty() {
        CheckResult {
            label: "Fallbacks".into(),
            ok: true,
            detail: "None configured".into(),
        }
    } else {
        let names: Vec<&str> = config
            .fallback_models
            .iter()
            .map(|m| m.model_id.as_str())
            .collect();
        CheckResult {
            label: "Fallbacks".into(),
            ok: true,
            detail: names.join(" -> "),
        }
    }
}

fn check_web_search(config: &AppConfig) -> CheckResult {
    match &config.web_search {
        Some(ws) if !usable_key(Some(&ws.api_key)) => CheckResult {
            label: "Web Search".into(),
            ok: false,
            detail: format!("No API key set for '{}'", ws.provider),
        },
        Some(ws) => match delve_tools::create_search_tool(ws) {
            Ok(tool) => CheckResult {
                label: "Web Search".into(),
                ok: true,
                detail: format!("{} (up to {} results)", tool.name(), ws.max_results),
            },
            Err(e) => CheckResult {
                label: "Web Search".into(),
                ok: false,
                detail: e.to_string(),
            },
        },
        None => CheckResult {
            label: "Web Search".into(),
            ok: true,
            detail: "Not configured (web research loop unavailable)".into(),
        },
    }
}

fn check_pdf_extractor(config: &AppConfig) -> CheckResult {
    let command = &config.pdf.command;
    let status = Command::new(command)
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(_) => CheckResult {
            label: "PDF Extractor".into(),
            ok: true,
            detail: format!("{} (top_k {})", command, config.pdf.top_k),
        },
        Err(e) => CheckResult {
            label: "PDF Extractor".into(),
            ok: false,
            detail: format!("'{}' not runnable: {} (install poppler-utils)", command, e),
        },
    }
}

fn check_embedding(config: &AppConfig) -> CheckResult {
    match &config.embedding {
        Some(emb) => CheckResult {
            label: "Embeddings".into(),
            ok: true,
            detail: format!("{} via {} ({} dims)", emb.model, emb.provider, emb.dimensions),
        },
        None => CheckResult {
            label: "Embeddings".into(),
            ok: true,
            detail: "Not configured (lexical chunk ranking)".into(),
        },
    }
}

fn check_log_dir(config: &AppConfig) -> CheckResult {
    let log = match &config.log {
        Some(log) if log.enabled => log,
        _ => {
            return CheckResult {
                label: "Run Log".into(),
                ok: true,
                detail: "Disabled".into(),
            }
        }
    };

    let dir = log.dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        return CheckResult {
            label: "Run Log".into(),
            ok: false,
            detail: format!("{} (cannot create: {})", dir.display(), e),
        };
    }
    // Check writable by attempting to create a temp file
    let test_file = dir.join(".doctor_test");
    match std::fs::write(&test_file, "test") {
        Ok(_) => {
            std::fs::remove_file(&test_file).ok();
            CheckResult {
                label: "Run Log".into(),
                ok: true,
                detail: format!("{} (level {})", dir.display(), log.level),
            }
        }
        Err(e) => CheckResult {
            label: "Run Log".into(),
            ok: false,
            detail: format!("{} (not writable: {})", dir.display(), e),
        },
    }
}

fn check_workflow(config: &AppConfig) -> CheckResult {
    let wf = &config.workflow;
    CheckResult {
        label: "Workflow".into(),
        ok: true,
        detail: format!(
            "entry {:?}, max {} steps, {} retries per step",
            wf.entry, wf.max_steps, wf.step_retries
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> AppConfig {
        AppConfig::parse(toml).unwrap()
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let c = config("[model]\nprovider = \"ollama\"\nmodel_id = \"llama3.1\"\n");
        assert!(check_api_key(&c).ok);
    }

    #[test]
    fn test_unexpanded_key_is_missing() {
        let c = config(
            "[model]\nprovider = \"anthropic\"\nmodel_id = \"claude\"\napi_key = \"${DELVE_DOCTOR_UNSET_KEY}\"\n",
        );
        assert!(!check_api_key(&c).ok);
    }

    #[test]
    fn test_unknown_fallback_provider_flagged() {
        let c = config(
            "[model]\nmodel_id = \"gpt-4o\"\n\n[[fallback_models]]\nprovider = \"nope\"\nmodel_id = \"x\"\n",
        );
        assert!(!check_fallbacks(&c).ok);
    }

    #[test]
    fn test_missing_pdf_command_flagged() {
        let c = config("[model]\nmodel_id = \"m\"\n\n[pdf]\ncommand = \"delve-no-such-binary\"\n");
        assert!(!check_pdf_extractor(&c).ok);
    }
}
