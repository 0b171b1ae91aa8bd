//! Deploying plans on this host and uploading the results to the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use shoal_agent::{HostedRuntimes, RegistryClient};
use shoal_core::DeployResult;
use shoal_deployer::{CommandHandlerResolver, Deployer, Provider, ProviderFactory};

use crate::config::ShoalConfig;

/// A service definitions file and the plan deploying them.
#[derive(Debug, Clone)]
pub struct DeployJob {
    pub definitions: PathBuf,
    pub plan: PathBuf,
}

impl DeployJob {
    /// Pair up `definitions plan [definitions plan]...`.
    pub fn pairs(files: &[PathBuf]) -> Result<Vec<Self>> {
        if files.len() % 2 != 0 {
            bail!(
                "expected <definitions> <plan> pairs, got {} file(s)",
                files.len()
            );
        }
        Ok(files
            .chunks(2)
            .map(|pair| Self {
                definitions: pair[0].clone(),
                plan: pair[1].clone(),
            })
            .collect())
    }
}

#[derive(Debug, Serialize)]
pub struct Deployment {
    pub plan: PathBuf,
    pub result: DeployResult,
    /// Registry row ids, one per runtime entry in result order.
    pub runtime_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FailedDeployment {
    pub plan: PathBuf,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct DeployReport {
    pub host_id: String,
    pub deployments: Vec<Deployment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedDeployment>,
}

impl DeployReport {
    /// Remember every uploaded runtime so the agent can tear it down later.
    pub async fn record_into(&self, runtimes: &HostedRuntimes) {
        for deployment in &self.deployments {
            runtimes
                .record(&deployment.result, &deployment.runtime_ids)
                .await;
        }
    }
}

/// Runs deploy jobs for one host. Each job deploys and uploads on its own; a
/// failed job does not stop the ones after it.
pub struct HostDeployer {
    deployer: Deployer,
    client: Arc<dyn RegistryClient>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl HostDeployer {
    pub fn new(config: &ShoalConfig, client: Arc<dyn RegistryClient>) -> Self {
        let mut handlers = CommandHandlerResolver::new();
        if let Some(interpreter) = &config.deploy.interpreter {
            handlers = handlers.with_interpreter(interpreter.clone());
        }
        let deployer = Deployer::new(ProviderFactory::with_defaults(), Arc::new(handlers))
            .with_base_dir(&config.deploy.base_dir);
        Self {
            deployer,
            client,
            providers: HashMap::new(),
        }
    }

    /// Provider instances that took part in a successful job, by name.
    pub fn providers(&self) -> &HashMap<String, Arc<dyn Provider>> {
        &self.providers
    }

    pub async fn run(&mut self, host_id: &str, jobs: &[DeployJob]) -> DeployReport {
        let mut report = DeployReport {
            host_id: host_id.to_string(),
            deployments: Vec::new(),
            failed: Vec::new(),
        };
        for job in jobs {
            match self.run_one(host_id, job).await {
                Ok(deployment) => report.deployments.push(deployment),
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::error!(plan = %job.plan.display(), error = %error, "Deploy failed");
                    report.failed.push(FailedDeployment {
                        plan: job.plan.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    async fn run_one(&mut self, host_id: &str, job: &DeployJob) -> Result<Deployment> {
        let definitions: Value = read_json(&job.definitions)?;
        let Some(result) = self.deployer.deploy(&job.plan, &definitions).await? else {
            bail!(
                "nothing to deploy: {} must list applications and {} must be a list",
                job.plan.display(),
                job.definitions.display()
            );
        };

        for name in result
            .values()
            .flatten()
            .flat_map(|record| &record.entries)
            .map(|entry| entry.provider_name.as_str())
        {
            if let Some(instance) = self.deployer.factory().instance(name) {
                self.providers.insert(name.to_string(), instance);
            }
        }

        let runtime_ids = self
            .client
            .upload_service_deploy_result(&result, host_id)
            .await
            .context("failed to upload deploy result")?;
        tracing::info!(
            host_id,
            plan = %job.plan.display(),
            runtimes = runtime_ids.len(),
            "Deploy result uploaded"
        );
        Ok(Deployment {
            plan: job.plan.clone(),
            result,
            runtime_ids,
        })
    }
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_pair_up_in_order() {
        let files: Vec<PathBuf> = ["a.json", "a-plan.json", "b.json", "b-plan.json"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let jobs = DeployJob::pairs(&files).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].definitions, PathBuf::from("b.json"));
        assert_eq!(jobs[1].plan, PathBuf::from("b-plan.json"));
    }

    #[test]
    fn odd_file_count_is_rejected() {
        let files = vec![PathBuf::from("a.json")];
        let err = DeployJob::pairs(&files).unwrap_err();
        assert!(err.to_string().contains("pairs"));
    }
}
