use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use kubernetes_authz_e2e::autoscaling::{self, custom_metric_scenarios};
use kubernetes_authz_e2e::config::Settings;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env();
    let client = settings.kube_client().await?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

    let scenarios = autoscaling::select_scenarios(
        custom_metric_scenarios(&settings.hosted_zone, now),
        settings.scenario_filter.as_deref(),
    );
    if scenarios.is_empty() {
        bail!("no autoscaling scenario matches the filter");
    }

    let mut failed = 0;
    for (name, tc) in &scenarios {
        // Every scenario gets a namespace of its own.
        let namespace = autoscaling::create_namespace(&client, &settings.namespace_prefix).await?;
        info!(scenario = %name, namespace, "Running autoscaling scenario");
        match tc.run(&client, &namespace).await {
            Ok(()) => info!(scenario = %name, "passed"),
            Err(e) => {
                error!(scenario = %name, "failed: {e}");
                failed += 1;
            }
        }
        tc.cleanup(&client, &namespace).await;
        autoscaling::delete_namespace(&client, &namespace).await;
    }

    if failed > 0 {
        bail!("{failed} of {} autoscaling scenarios failed", scenarios.len());
    }
    Ok(())
}
