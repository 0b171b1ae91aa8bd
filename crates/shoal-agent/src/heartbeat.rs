//! Host registration and load reporting loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shoal_core::{LoadSample, Resource, ResourceStatus, ResourceType};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::RegistryClient;
use crate::sampler::LoadSampler;

/// Running agent loops. Dropping the handle leaves them running; call
/// [`AgentHandle::shutdown`] to stop them.
pub struct AgentHandle {
    shutdown: watch::Sender<bool>,
    host_id: watch::Receiver<Option<String>>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    /// Id the registry assigned, once registration has succeeded.
    pub fn host_id(&self) -> Option<String> {
        self.host_id.borrow().clone()
    }

    /// Wait until registration succeeds. Returns `None` if the agent stops
    /// first.
    pub async fn registered(&mut self) -> Option<String> {
        self.host_id
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|id| id.clone())
    }

    /// Signal both loops and wait for them to finish their current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Agent loop ended abnormally");
            }
        }
        tracing::info!("Host agent stopped");
    }
}

/// Start the registration loop and the load loop for `host_info`.
///
/// Heartbeats are only sent once registration has produced a host id.
/// Registration retries every `interval` until it succeeds.
pub fn start_host(
    host_info: Resource,
    interval: Duration,
    client: Arc<dyn RegistryClient>,
    sampler: Arc<dyn LoadSampler>,
) -> AgentHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (host_id_tx, host_id_rx) = watch::channel(None);

    tracing::info!(
        account = %host_info.account,
        name = %host_info.name,
        interval_ms = interval.as_millis() as u64,
        "Starting host agent"
    );

    let load = tokio::spawn(load_loop(
        host_info.account.clone(),
        host_info.name.clone(),
        interval,
        Arc::clone(&client),
        Arc::clone(&sampler),
        host_id_rx.clone(),
        shutdown_rx.clone(),
    ));
    let registration = tokio::spawn(registration_loop(
        host_info,
        interval,
        client,
        sampler,
        host_id_tx,
        shutdown_rx,
    ));

    AgentHandle {
        shutdown: shutdown_tx,
        host_id: host_id_rx,
        tasks: vec![load, registration],
    }
}

/// Sleep for `interval` unless shutdown is signalled first. Returns `false`
/// when the loop should stop.
async fn pause(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        result = shutdown.changed() => match result {
            Ok(()) => !*shutdown.borrow(),
            Err(_) => false,
        },
    }
}

async fn load_loop(
    account: String,
    name: String,
    interval: Duration,
    client: Arc<dyn RegistryClient>,
    sampler: Arc<dyn LoadSampler>,
    host_id: watch::Receiver<Option<String>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let load = sampler.sample();
        let resource_id = host_id.borrow().clone();

        match resource_id {
            None => tracing::trace!("Host not registered yet, load sample primed"),
            Some(id) => {
                let sample = LoadSample {
                    resource_id: Some(id),
                    name: name.clone(),
                    account: account.clone(),
                    cpu: load.cpu,
                    mem: load.mem,
                    sampled_at: Utc::now(),
                };
                match client.resource_heartbeat(&sample).await {
                    Ok(()) => tracing::debug!(
                        workload = sample.workload_percentage(),
                        "Heartbeat sent"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Heartbeat failed"),
                }
            }
        }

        if !pause(interval, &mut shutdown).await {
            break;
        }
    }
}

async fn registration_loop(
    host_info: Resource,
    interval: Duration,
    client: Arc<dyn RegistryClient>,
    sampler: Arc<dyn LoadSampler>,
    host_id: watch::Sender<Option<String>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let load = sampler.sample();
        let resource = Resource {
            cpu_cores: Some(load.cpu.count),
            mem_megabytes: Some(load.mem.total),
            status: ResourceStatus::Ready,
            resource_type: ResourceType::Host,
            ..host_info.clone()
        };

        match client.update_resource_info(&resource).await {
            Ok(Some(id)) => {
                tracing::info!(host_id = %id, attempt, "Host registered");
                let _ = host_id.send(Some(id));
                return;
            }
            Ok(None) => tracing::warn!(attempt, "Registry returned no host id, retrying"),
            Err(e) => tracing::warn!(attempt, error = %e, "Host registration failed, retrying"),
        }

        if !pause(interval, &mut shutdown).await {
            return;
        }
    }
}
