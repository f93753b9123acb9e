use kube::config::{KubeConfigOptions, Kubeconfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read kubeconfig {path}: {error}")]
    Kubeconfig {
        path: String,
        error: kube::config::KubeconfigError,
    },
    #[error("failed to create Kubernetes client: {0}")]
    Client(#[from] kube::Error),
}

/// Runtime settings, read from the environment once at startup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub kubeconfig_path: Option<String>,
    pub scenario_file: Option<String>,
    pub scenario_filter: Option<String>,
    pub hosted_zone: String,
    pub namespace_prefix: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            kubeconfig_path: set("KUBECONFIG_PATH"),
            scenario_file: set("SCENARIO_FILE"),
            scenario_filter: set("SCENARIO_FILTER"),
            hosted_zone: set("HOSTED_ZONE").unwrap_or_else(|| "example.org".to_string()),
            namespace_prefix: set("E2E_NAMESPACE_PREFIX")
                .unwrap_or_else(|| "zalando-kube-metrics-adapter".to_string()),
        }
    }

    /// A client for the configured kubeconfig, or the inferred environment if none is set.
    pub async fn kube_client(&self) -> Result<kube::Client, ConfigError> {
        let Some(path) = &self.kubeconfig_path else {
            return Ok(kube::Client::try_default().await?);
        };
        let kubeconfig = Kubeconfig::read_from(path).map_err(|error| ConfigError::Kubeconfig {
            path: path.clone(),
            error,
        })?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|error| ConfigError::Kubeconfig {
                path: path.clone(),
                error,
            })?;
        Ok(kube::Client::try_from(config)?)
    }
}

#[cfg(test)]
mod test {
    use super::Settings;
    use std::collections::HashMap;

    #[test]
    fn test_settings_from_lookup() {
        let tests = vec![
            (
                HashMap::new(),
                None,
                None,
                "example.org",
                "zalando-kube-metrics-adapter",
            ),
            (
                HashMap::from([
                    ("KUBECONFIG_PATH", "/workdir/test/e2e/kubeconfig"),
                    ("SCENARIO_FILTER", "ReadOnly"),
                    ("HOSTED_ZONE", "teapot.example.com"),
                    ("E2E_NAMESPACE_PREFIX", ""),
                ]),
                Some("/workdir/test/e2e/kubeconfig"),
                Some("ReadOnly"),
                "teapot.example.com",
                "zalando-kube-metrics-adapter",
            ),
        ];
        for (env, kubeconfig_path, filter, hosted_zone, prefix) in tests {
            let settings = Settings::from_lookup(|key| env.get(key).map(|v| v.to_string()));
            assert_eq!(settings.kubeconfig_path.as_deref(), kubeconfig_path);
            assert_eq!(settings.scenario_filter.as_deref(), filter);
            assert_eq!(settings.scenario_file, None);
            assert_eq!(settings.hosted_zone, hosted_zone);
            assert_eq!(settings.namespace_prefix, prefix);
        }
    }
}
