//! Per-instance run orchestration
//!
//! Provisions one client container under controlled host conditions,
//! drives the executor against it, and tears everything down on every
//! exit path. Teardown runs with a fresh context so a cancelled run still
//! releases its containers, volumes, temp files and host settings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use benchmarkoor_clients::{log_parser, spec, ClientKind, ClientSpec, RollbackSpec};
use benchmarkoor_config::{InstanceConfig, RollbackStrategy, RunSection};
use benchmarkoor_docker::{
    collect_samples, run_labels, ContainerManager, ContainerOptions, MountSpec, ResourceSample,
    StepTracker, DEFAULT_STATS_INTERVAL,
};
use benchmarkoor_host::{Conditioner, OriginalSettings};
use benchmarkoor_rpc::wait_until_ready;
use benchmarkoor_suite::Suite;

use crate::collector::BlockLogCollector;
use crate::error::{Result, RunnerError};
use crate::executor::{ClientReset, ExecutorConfig, ResetEndpoints, TestExecutor};
use crate::persist::{RunConfigArtifact, RunWriter, SystemInfo};
use crate::result::{RunResult, RunStatus, TestResult};

/// Grace window for teardown after cancellation.
const TEARDOWN_GRACE: Duration = Duration::from_secs(60);

/// Shared collaborators for all instances of a run.
pub struct RunnerContext {
    pub manager: Arc<ContainerManager>,
    pub conditioner: Arc<Conditioner>,
    pub run: RunSection,
    pub results_root: PathBuf,
}

/// What the CLI needs to know about a finished instance.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub instance_id: String,
    pub status: RunStatus,
    pub tests_total: usize,
    pub tests_failed: usize,
}

/// 8-char random hex run id.
pub fn generate_run_id() -> String {
    hex::encode(rand::rng().random::<[u8; 4]>())
}

/// Everything created for an instance, released in reverse order.
#[derive(Default)]
struct Provisioned {
    container: Option<String>,
    volume: Option<String>,
    conditioner_state: Option<OriginalSettings>,
    temp_dir: Option<tempfile::TempDir>,
    helper_cancel: Option<CancellationToken>,
    log_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    stats_task: Option<JoinHandle<Vec<ResourceSample>>>,
}

/// Run one instance end to end; always returns a summary, never leaks
/// provisioned resources.
pub async fn run_instance(
    ctx: &RunnerContext,
    instance: &InstanceConfig,
    suite: &Suite,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let run_id = generate_run_id();
    let started = Utc::now();
    let writer = RunWriter::create(&ctx.results_root, &run_id)?;
    info!(run_id = %run_id, instance = %instance.id, client = %instance.client, "starting run");

    let mut provisioned = Provisioned::default();
    let outcome = provision_and_execute(
        ctx,
        instance,
        suite,
        &writer,
        &run_id,
        &cancel,
        &mut provisioned,
    )
    .await;

    let (status, termination_reason, tests) = match outcome {
        Ok(tests) if cancel.is_cancelled() => {
            (RunStatus::Cancelled, Some("context cancelled".to_string()), tests)
        }
        Ok(tests) => (RunStatus::Completed, None, tests),
        Err(RunnerError::Cancelled) => {
            (RunStatus::Cancelled, Some("context cancelled".to_string()), Vec::new())
        }
        Err(RunnerError::ContainerDied { code }) => (
            RunStatus::ContainerDied,
            Some(format!("container exited with code {code}")),
            Vec::new(),
        ),
        Err(error) => {
            error!(run_id = %run_id, instance = %instance.id, %error, "instance run failed");
            (RunStatus::Cancelled, Some(error.to_string()), Vec::new())
        }
    };

    // Teardown must survive cancellation: fresh token, bounded grace.
    let samples = teardown(ctx, &mut provisioned).await;

    let tests_failed = tests.iter().filter(|test| !test.success).count();
    let summary = RunSummary {
        run_id: run_id.clone(),
        instance_id: instance.id.clone(),
        status,
        tests_total: tests.len(),
        tests_failed,
    };

    let result = RunResult {
        run_id,
        timestamp: started,
        timestamp_end: Some(Utc::now()),
        suite_hash: suite.hash.clone(),
        instance_id: instance.id.clone(),
        client: instance.client.clone(),
        status,
        termination_reason,
        tests,
    };
    writer.write_result(&result)?;
    writer.write_resource_stats(&samples)?;

    info!(
        run_id = %summary.run_id,
        status = ?summary.status,
        tests = summary.tests_total,
        failed = summary.tests_failed,
        "run finished"
    );
    Ok(summary)
}

#[allow(clippy::too_many_lines)]
async fn provision_and_execute(
    ctx: &RunnerContext,
    instance: &InstanceConfig,
    suite: &Suite,
    writer: &RunWriter,
    run_id: &str,
    cancel: &CancellationToken,
    provisioned: &mut Provisioned,
) -> Result<Vec<TestResult>> {
    let kind = ClientKind::from_name(&instance.client)
        .ok_or_else(|| RunnerError::UnknownClient(instance.client.clone()))?;
    let client_spec = spec(kind);

    writer.write_config(&RunConfigArtifact {
        run_id: run_id.to_string(),
        timestamp: Utc::now(),
        suite_hash: suite.hash.clone(),
        instance: instance.clone(),
        run: ctx.run.clone(),
        system: SystemInfo::capture(),
    })?;

    let labels = run_labels(run_id, &instance.id, client_spec.kind.name());
    ctx.manager.ensure_network(&ctx.run.docker_network).await?;

    let volume = format!("benchmarkoor-{run_id}-{}", instance.id);
    ctx.manager.create_volume(&volume, &labels).await?;
    provisioned.volume = Some(volume.clone());

    // Ephemeral genesis and JWT files, bind-mounted read-only.
    let genesis = fetch_genesis(&instance.genesis).await?;
    let temp_dir = tempfile::tempdir()?;
    let genesis_file = temp_dir.path().join("genesis.json");
    let jwt_file = temp_dir.path().join("jwt.hex");
    std::fs::write(&genesis_file, genesis)?;
    std::fs::write(&jwt_file, hex::encode(ctx.run.jwt_secret()?))?;

    let image = instance
        .image
        .clone()
        .unwrap_or_else(|| client_spec.default_image.to_string());
    ctx.manager.pull_image(&image, instance.pull_policy).await?;

    let mounts = vec![
        MountSpec {
            source: volume.clone(),
            target: client_spec.data_dir.to_string(),
            read_only: false,
            volume: true,
        },
        MountSpec {
            source: genesis_file.display().to_string(),
            target: client_spec.genesis_path.to_string(),
            read_only: true,
            volume: false,
        },
        MountSpec {
            source: jwt_file.display().to_string(),
            target: client_spec.jwt_path.to_string(),
            read_only: true,
            volume: false,
        },
    ];
    provisioned.temp_dir = Some(temp_dir);

    let container = format!("benchmarkoor-{run_id}-{}", instance.id);
    let init_options = client_spec.requires_init.then(|| ContainerOptions {
        name: format!("{container}-init"),
        image: image.clone(),
        entrypoint: None,
        command: Some(
            client_spec
                .init_command
                .iter()
                .map(ToString::to_string)
                .collect(),
        ),
        env: merged_env(client_spec, instance),
        mounts: mounts.clone(),
        network: ctx.run.docker_network.clone(),
        labels: labels.clone(),
        limits: None,
    });

    if let Some(init) = &init_options {
        info!(run_id = %run_id, container = %init.name, "running init container");
        ctx.manager
            .run_init_container(init, Box::new(writer.container_init_log()?))
            .await?;
    }

    // Collector before the container starts so no early log line is missed.
    let collector = BlockLogCollector::new(log_parser(kind));
    let tracker = StepTracker::new();

    if let Some(cpu_freq) = &instance.cpu_freq {
        provisioned.conditioner_state = ctx.conditioner.apply(cpu_freq)?;
    }

    let main_options = ContainerOptions {
        name: container.clone(),
        image,
        entrypoint: instance.entrypoint.clone(),
        command: Some(resolved_command(client_spec, instance)),
        env: merged_env(client_spec, instance),
        mounts,
        network: ctx.run.docker_network.clone(),
        labels: labels.clone(),
        limits: instance.resource_limits.clone(),
    };
    ctx.manager.create_container(&main_options).await?;
    provisioned.container = Some(container.clone());
    ctx.manager.start_container(&container).await?;

    let helper_cancel = cancel.child_token();
    provisioned.helper_cancel = Some(helper_cancel.clone());

    spawn_log_stream(
        Arc::clone(&ctx.manager),
        &container,
        &collector,
        writer.container_log()?,
        &helper_cancel,
        &provisioned.log_tasks,
    );

    {
        let manager = Arc::clone(&ctx.manager);
        let container = container.clone();
        let tracker = tracker.clone();
        let stats_cancel = helper_cancel.clone();
        provisioned.stats_task = Some(tokio::spawn(async move {
            collect_samples(
                &manager,
                &container,
                DEFAULT_STATS_INTERVAL,
                tracker,
                &stats_cancel,
            )
            .await
        }));
    }

    // Death watch: the container exiting under the executor is terminal.
    let resetting = Arc::new(AtomicBool::new(false));
    let death = CancellationToken::new();
    let death_code = Arc::new(Mutex::new(0i64));
    {
        let manager = Arc::clone(&ctx.manager);
        let container = container.clone();
        let resetting = Arc::clone(&resetting);
        let death = death.clone();
        let death_code = Arc::clone(&death_code);
        let watch_cancel = helper_cancel.clone();
        tokio::spawn(async move {
            loop {
                let waited = tokio::select! {
                    () = watch_cancel.cancelled() => return,
                    waited = manager.wait_exit(&container) => waited,
                };
                if resetting.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                *death_code.lock() = waited.unwrap_or(-1);
                death.cancel();
                return;
            }
        });
    }

    let ip = ctx
        .manager
        .container_ip(&container, &ctx.run.docker_network)
        .await?;
    let rpc_url: Url = format!("http://{ip}:{}/", client_spec.rpc_port).parse()?;
    let engine_url: Url = format!("http://{ip}:{}/", client_spec.engine_port).parse()?;

    wait_until_ready(&rpc_url, ctx.run.effective_ready_timeout(), cancel).await?;
    // Post-ready quiescence before the first measurement.
    tokio::select! {
        () = cancel.cancelled() => return Err(RunnerError::Cancelled),
        () = tokio::time::sleep(Duration::from_secs(ctx.run.ready_wait_after)) => {}
    }

    let rollback = match instance.rollback {
        RollbackStrategy::Auto => client_spec.rollback,
        RollbackStrategy::Recreate => RollbackSpec::None,
    };
    let reset = Arc::new(ContainerReset {
        manager: Arc::clone(&ctx.manager),
        main: main_options,
        init: init_options,
        volume: volume.clone(),
        labels,
        network: ctx.run.docker_network.clone(),
        rpc_port: client_spec.rpc_port,
        engine_port: client_spec.engine_port,
        ready_timeout: ctx.run.effective_ready_timeout(),
        ready_wait_after: ctx.run.ready_wait_after,
        collector: collector.clone(),
        log_path: writer.run_dir().join(benchmarkoor_storage::layout::CONTAINER_LOG_FILE),
        log_tasks: Arc::clone(&provisioned.log_tasks),
        helper_cancel: helper_cancel.clone(),
        resetting: Arc::clone(&resetting),
        cancel: cancel.clone(),
    });

    let filtered = filter_tests(suite, ctx.run.test_filter.as_deref());
    let mut executor = TestExecutor::new(
        engine_url,
        rpc_url,
        ctx.run.jwt_secret()?,
        rollback,
        Some(reset),
        collector.clone(),
        tracker,
        ExecutorConfig::default(),
        cancel.clone(),
    );

    let tests = tokio::select! {
        tests = executor.run(&filtered, writer) => tests?,
        () = death.cancelled() => {
            let code = *death_code.lock();
            return Err(RunnerError::ContainerDied { code });
        }
    };

    writer.write_block_logs(&collector.take_matched())?;
    Ok(tests)
}

/// Reverse-order release of everything `provision_and_execute` created.
/// Idempotent: already-released resources are skipped.
async fn teardown(ctx: &RunnerContext, provisioned: &mut Provisioned) -> Vec<ResourceSample> {
    let teardown_work = async {
        if let Some(container) = provisioned.container.take() {
            if let Err(error) = ctx.manager.stop_container(&container).await {
                warn!(container = %container, %error, "failed to stop container");
            }
            if let Err(error) = ctx.manager.remove_container(&container).await {
                warn!(container = %container, %error, "failed to remove container");
            }
        }
        if let Some(volume) = provisioned.volume.take() {
            if let Err(error) = ctx.manager.remove_volume(&volume).await {
                warn!(volume = %volume, %error, "failed to remove volume");
            }
        }
    };
    if tokio::time::timeout(TEARDOWN_GRACE, teardown_work).await.is_err() {
        warn!("teardown exceeded grace window");
    }

    if let Some(cancel) = provisioned.helper_cancel.take() {
        cancel.cancel();
    }
    let samples = match provisioned.stats_task.take() {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let log_tasks: Vec<_> = std::mem::take(&mut *provisioned.log_tasks.lock());
    for task in log_tasks {
        let _ = task.await;
    }

    if let Some(original) = provisioned.conditioner_state.take() {
        ctx.conditioner.restore(&original);
    }
    // TempDir removal happens on drop.
    provisioned.temp_dir.take();
    samples
}

fn spawn_log_stream(
    manager: Arc<ContainerManager>,
    container: &str,
    collector: &BlockLogCollector,
    log_file: std::fs::File,
    cancel: &CancellationToken,
    log_tasks: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    let stderr_file = match log_file.try_clone() {
        Ok(file) => file,
        Err(error) => {
            warn!(%error, "failed to clone log file, stderr shares the stdout writer");
            return;
        }
    };
    let stdout = collector.writer(Box::new(log_file));
    let stderr = collector.writer(Box::new(stderr_file));
    let container = container.to_string();
    let cancel = cancel.clone();
    let task = tokio::spawn(async move {
        if let Err(error) = manager
            .stream_logs(&container, Box::new(stdout), Box::new(stderr), &cancel)
            .await
        {
            warn!(container = %container, %error, "log streaming ended with error");
        }
    });
    log_tasks.lock().push(task);
}

/// Keep only the tests whose name or path contains the filter.
fn filter_tests(suite: &Suite, filter: Option<&str>) -> Suite {
    match filter {
        Some(filter) if !filter.is_empty() => {
            let mut filtered = suite.clone();
            filtered
                .tests
                .retain(|test| test.script.name.contains(filter) || test.path.contains(filter));
            filtered
        }
        _ => suite.clone(),
    }
}

async fn fetch_genesis(source: &str) -> Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::get(source)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| RunnerError::GenesisFetch {
                source_desc: source.to_string(),
                message: error.to_string(),
            })?;
        let bytes = response
            .bytes()
            .await
            .map_err(|error| RunnerError::GenesisFetch {
                source_desc: source.to_string(),
                message: error.to_string(),
            })?;
        Ok(bytes.to_vec())
    } else {
        tokio::fs::read(source)
            .await
            .map_err(|error| RunnerError::GenesisFetch {
                source_desc: source.to_string(),
                message: error.to_string(),
            })
    }
}

fn resolved_command(client_spec: &ClientSpec, instance: &InstanceConfig) -> Vec<String> {
    let mut command = instance.command.clone().unwrap_or_else(|| {
        client_spec
            .default_command
            .iter()
            .map(ToString::to_string)
            .collect()
    });
    command.extend(instance.extra_args.iter().cloned());
    command
}

fn merged_env(client_spec: &ClientSpec, instance: &InstanceConfig) -> Vec<String> {
    let mut env: HashMap<String, String> = client_spec
        .default_env
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    env.extend(instance.env.clone());
    let mut pairs: Vec<String> = env
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    pairs.sort();
    pairs
}

/// Full client reset: recreate volume, rerun init, restart the container
/// and re-probe readiness. Used when RPC rollback is unavailable or
/// fails.
struct ContainerReset {
    manager: Arc<ContainerManager>,
    main: ContainerOptions,
    init: Option<ContainerOptions>,
    volume: String,
    labels: HashMap<String, String>,
    network: String,
    rpc_port: u16,
    engine_port: u16,
    ready_timeout: u64,
    ready_wait_after: u64,
    collector: BlockLogCollector,
    log_path: PathBuf,
    log_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    helper_cancel: CancellationToken,
    resetting: Arc<AtomicBool>,
    cancel: CancellationToken,
}

#[async_trait]
impl ClientReset for ContainerReset {
    async fn recreate(&self) -> Result<ResetEndpoints> {
        self.resetting.store(true, Ordering::SeqCst);
        let result = self.recreate_inner().await;
        self.resetting.store(false, Ordering::SeqCst);
        result
    }
}

impl ContainerReset {
    async fn recreate_inner(&self) -> Result<ResetEndpoints> {
        if let Err(error) = self.manager.stop_container(&self.main.name).await {
            warn!(%error, "stop before recreate failed");
        }
        self.manager.remove_container(&self.main.name).await?;
        self.manager.remove_volume(&self.volume).await?;
        self.manager.create_volume(&self.volume, &self.labels).await?;

        if let Some(init) = &self.init {
            self.manager
                .run_init_container(init, Box::new(std::io::sink()))
                .await?;
        }

        self.manager.create_container(&self.main).await?;
        self.manager.start_container(&self.main.name).await?;

        // Re-attach the log stream; the old one ended with the old container.
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        spawn_log_stream(
            Arc::clone(&self.manager),
            &self.main.name,
            &self.collector,
            log_file,
            &self.helper_cancel,
            &self.log_tasks,
        );

        let ip = self
            .manager
            .container_ip(&self.main.name, &self.network)
            .await?;
        let rpc: Url = format!("http://{ip}:{}/", self.rpc_port).parse()?;
        wait_until_ready(&rpc, self.ready_timeout, &self.cancel).await?;
        tokio::time::sleep(Duration::from_secs(self.ready_wait_after)).await;

        let engine: Url = format!("http://{ip}:{}/", self.engine_port).parse()?;
        Ok(ResetEndpoints { engine, rpc })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchmarkoor_fixtures::TestScript;
    use benchmarkoor_suite::{SourceDescriptor, SuiteTest};

    fn suite_with(names: &[&str]) -> Suite {
        Suite {
            hash: "b".repeat(64),
            tests: names
                .iter()
                .map(|name| SuiteTest {
                    path: format!("file/{name}"),
                    script: TestScript {
                        name: (*name).to_string(),
                        ..TestScript::default()
                    },
                })
                .collect(),
            warmup: Vec::new(),
            filter: None,
            sources: vec![SourceDescriptor::LocalDir {
                path: ".".to_string(),
            }],
        }
    }

    #[test]
    fn test_run_id_is_8_hex_chars() {
        for _ in 0..32 {
            let id = generate_run_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_test_filter_matches_name_or_path() {
        let suite = suite_with(&["test_blob_one", "test_simple"]);
        assert_eq!(filter_tests(&suite, Some("blob")).tests.len(), 1);
        assert_eq!(filter_tests(&suite, Some("file/")).tests.len(), 2);
        assert_eq!(filter_tests(&suite, Some("nope")).tests.len(), 0);
        assert_eq!(filter_tests(&suite, None).tests.len(), 2);
        assert_eq!(filter_tests(&suite, Some("")).tests.len(), 2);
    }

    #[test]
    fn test_command_resolution_appends_extra_args() {
        let client_spec = spec(ClientKind::Geth);
        let instance: InstanceConfig = serde_json::from_value(serde_json::json!({
            "id": "geth-default",
            "client": "geth",
            "genesis": "./genesis.json",
            "extra_args": ["--cache=4096"],
        }))
        .expect("instance");

        let command = resolved_command(client_spec, &instance);
        assert_eq!(command.last().map(String::as_str), Some("--cache=4096"));
        assert!(command.iter().any(|arg| arg == "--datadir=/data"));
    }

    #[test]
    fn test_env_merging_prefers_instance_values() {
        let client_spec = spec(ClientKind::Reth);
        let instance: InstanceConfig = serde_json::from_value(serde_json::json!({
            "id": "reth-tuned",
            "client": "reth",
            "genesis": "./genesis.json",
            "env": { "RUST_LOG": "debug", "EXTRA": "1" },
        }))
        .expect("instance");

        let env = merged_env(client_spec, &instance);
        assert!(env.contains(&"RUST_LOG=debug".to_string()));
        assert!(env.contains(&"EXTRA=1".to_string()));
        assert!(!env.contains(&"RUST_LOG=info".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_genesis_from_file_and_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("genesis.json");
        std::fs::write(&path, b"{\"config\":{}}").expect("write");
        let bytes = fetch_genesis(&path.display().to_string()).await.expect("file");
        assert_eq!(bytes, b"{\"config\":{}}");

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/genesis.json")
            .with_status(200)
            .with_body("{\"config\":{\"chainId\":1}}")
            .create_async()
            .await;
        let url = format!("{}/genesis.json", server.url());
        let bytes = fetch_genesis(&url).await.expect("url");
        assert_eq!(bytes, b"{\"config\":{\"chainId\":1}}");

        let err = fetch_genesis("/no/such/genesis.json").await.expect_err("missing");
        assert!(matches!(err, RunnerError::GenesisFetch { .. }));
    }
}
