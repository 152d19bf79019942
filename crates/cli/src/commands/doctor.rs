use serde::Serialize;
use tabletalk_agent::OpenAiCompatibleClient;
use tabletalk_core::config::{AppConfig, LoadOptions};
use tabletalk_db::connection::ping;

use crate::commands::{async_runtime, build_registry, open_translator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn passed(&self) -> bool {
        self.overall_status == CheckStatus::Pass
    }
}

/// Returns the rendered report and whether every check passed.
pub fn run(options: &LoadOptions, json_output: bool) -> (String, bool) {
    let report = build_report(options);
    let passed = report.passed();

    if json_output {
        let rendered = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return (rendered, passed);
    }

    (render_human(&report), passed)
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            let details = "configuration loaded and validated";
            checks.push(DoctorCheck::pass("config_validation", details));
            checks.push(check_model_endpoint(&config));
            checks.extend(check_database_and_catalog(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("model_endpoint"));
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("tool_catalog"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Builds the HTTP client only; no request leaves the machine.
fn check_model_endpoint(config: &AppConfig) -> DoctorCheck {
    match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            "model_endpoint",
            format!("{} via `{}`", config.llm.model, client.endpoint()),
        ),
        Err(error) => DoctorCheck::fail("model_endpoint", format!("{error:#}")),
    }
}

fn check_database_and_catalog(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match async_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            return vec![
                DoctorCheck::fail("database_connectivity", failure.message),
                DoctorCheck::skipped("tool_catalog"),
            ];
        }
    };

    runtime.block_on(async {
        let translator = match open_translator(&config.database).await {
            Ok(translator) => translator,
            Err(failure) => {
                return vec![
                    DoctorCheck::fail("database_connectivity", failure.message),
                    DoctorCheck::fail("tool_catalog", "database unavailable"),
                ];
            }
        };

        let connectivity = match ping(translator.pool()).await {
            Ok(()) => DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            Err(error) => {
                DoctorCheck::fail("database_connectivity", format!("ping failed: {error}"))
            }
        };
        let catalog = match build_registry(&translator) {
            Ok(registry) => {
                DoctorCheck::pass("tool_catalog", format!("{} tools registered", registry.len()))
            }
            Err(failure) => DoctorCheck::fail("tool_catalog", failure.message),
        };

        translator.pool().close().await;
        vec![connectivity, catalog]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
