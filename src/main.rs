use kubernetes_authz_e2e::access_review::KubeAccessReviewer;
use kubernetes_authz_e2e::config::{ConfigError, Settings};
use kubernetes_authz_e2e::scenarios::{
    self, Fixtures, Scenario, ScenarioError, ScenarioResult, SuiteReport,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(report) if report.is_success() => (),
        Ok(_) => std::process::exit(1),
        Err(e) => {
            error!("Setup failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<SuiteReport, SetupError> {
    let settings = Settings::from_env();
    let client = settings.kube_client().await?;
    let reviewer = KubeAccessReviewer::new(client);

    let mut suite = scenarios::catalog(&Fixtures::standard());
    if let Some(path) = &settings.scenario_file {
        suite.extend(scenarios::load_scenarios(path)?);
    }
    let suite = filter(suite, settings.scenario_filter.as_deref());
    if suite.is_empty() {
        return Err(SetupError::NoScenarios);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current query");
            on_signal.cancel();
        }
    });

    let report = scenarios::run_scenarios(&reviewer, suite, &cancel).await;
    summarize(&report);
    Ok(report)
}

fn filter(suite: Vec<Scenario>, pattern: Option<&str>) -> Vec<Scenario> {
    match pattern {
        Some(pattern) => suite
            .into_iter()
            .filter(|s| s.name.contains(pattern))
            .collect(),
        None => suite,
    }
}

fn summarize(report: &SuiteReport) {
    for (name, result) in &report.results {
        match result {
            ScenarioResult::Passed => (),
            ScenarioResult::Failed(output) => error!("FAIL {name}\n{output}"),
            ScenarioResult::Errored(e) => error!("ERROR {name}: {e}"),
        }
    }
    info!(
        passed = report.passed(),
        total = report.results.len(),
        cancelled = report.cancelled,
        "Finished authorization scenarios"
    );
}

#[derive(thiserror::Error, Debug)]
enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to load scenarios: {0}")]
    Scenarios(#[from] ScenarioError),
    #[error("No scenario matches the filter")]
    NoScenarios,
}
