//! Doctor command - validate configuration and show status

use anyhow::Result;
use news_pulse_adapters::factory::AdapterRegistry;
use news_pulse_domain::SnapshotError;
use serde::Serialize;
use std::path::PathBuf;

use crate::args::DoctorArgs;
use crate::commands::open_snapshot_store;
use crate::config::AppConfig;

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    pipeline: CheckResult,
    sources: CheckResult,
    snapshot: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        pipeline: CheckResult::error("Not checked"),
        sources: CheckResult::error("Not checked"),
        snapshot: CheckResult::error("Not checked"),
        overall: "error".to_string(),
    };

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {:#}", e));
            None
        }
    };

    if let Some(ref config) = config {
        report.pipeline = check_pipeline(config);
        report.sources = check_sources(config);
        report.snapshot = check_snapshot(config).await;
    }

    let checks = [
        &report.config,
        &report.pipeline,
        &report.sources,
        &report.snapshot,
    ];

    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

fn check_pipeline(config: &AppConfig) -> CheckResult {
    if let Err(e) = config.default_markets() {
        return CheckResult::error(e.to_string());
    }
    match config.pipeline_config() {
        Ok(pipeline) => CheckResult::ok(format!(
            "max_concurrent {}, call timeout {}s, run deadline {}s",
            pipeline.orchestrator.max_concurrent,
            pipeline.orchestrator.call_timeout.as_secs(),
            pipeline.orchestrator.run_deadline.as_secs()
        )),
        Err(e) => CheckResult::error(e.to_string()),
    }
}

fn check_sources(config: &AppConfig) -> CheckResult {
    let descriptors = match config.source_descriptors() {
        Ok(d) => d,
        Err(e) => return CheckResult::error(e.to_string()),
    };
    if descriptors.is_empty() {
        return CheckResult::error("No sources configured");
    }

    let registry = AdapterRegistry::with_defaults();
    match registry.build_all(&descriptors) {
        Ok(adapters) => {
            let details: Vec<_> = adapters
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "name": a.id(),
                        "type": a.kind(),
                        "markets": a.markets(),
                    })
                })
                .collect();
            CheckResult::ok(format!("{} sources built", adapters.len()))
                .with_details(serde_json::Value::Array(details))
        }
        Err(e) => CheckResult::error(e.to_string())
            .with_details(serde_json::json!({ "known_types": registry.types() })),
    }
}

async fn check_snapshot(config: &AppConfig) -> CheckResult {
    let store = match open_snapshot_store(config).await {
        Ok(Some(store)) => store,
        Ok(None) => return CheckResult::warn("Snapshot persistence disabled; warm start unavailable"),
        Err(e) => return CheckResult::error(format!("{:#}", e)),
    };

    match store.load().await {
        Ok(Some(snapshot)) => CheckResult::ok(format!(
            "{}: {} markets, taken at {}",
            store.describe(),
            snapshot.markets.len(),
            snapshot.taken_at
        )),
        Ok(None) => CheckResult::ok(format!("{}: no snapshot yet", store.describe())),
        Err(SnapshotError::Corrupt(reason)) => CheckResult::warn(format!(
            "{}: snapshot unreadable, next start will be cold ({})",
            store.describe(),
            reason
        )),
        Err(e) => CheckResult::error(format!("{}: {}", store.describe(), e)),
    }
}

fn print_report(report: &DoctorReport) {
    println!("news-pulse Doctor Report");
    println!("========================");
    println!();

    print_check("Config", &report.config);
    print_check("Pipeline", &report.pipeline);
    print_check("Sources", &report.sources);
    print_check("Snapshot", &report.snapshot);

    println!();
    let symbol = match report.overall.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} Overall: {}", symbol, report.overall.to_uppercase());

    if report.overall == "ok" {
        println!();
        println!("Ready to run! Try: news-pulse fetch --market us");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    let symbol = match result.status.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} {}: {}", symbol, name, result.message);
}
