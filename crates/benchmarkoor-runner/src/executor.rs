//! Test executor: drives one suite against one live client
//!
//! RPC issuance is strictly sequential within an instance; the Engine API
//! does not tolerate out-of-order payload submission. Each test walks
//! `ready → warmup → setup → test → cleanup → flushed`, with warmup once
//! at suite start.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use benchmarkoor_clients::RollbackSpec;
use benchmarkoor_docker::StepTracker;
use benchmarkoor_rpc::{validate_response, EngineClient, LineMeta};
use benchmarkoor_suite::{Suite, SuiteTest};

use crate::collector::BlockLogCollector;
use crate::error::{Result, RunnerError};
use crate::persist::RunWriter;
use crate::result::{StepRecorder, TestDetails, TestResult};

const NEW_PAYLOAD_PREFIX: &str = "engine_newPayload";
const ROLLBACK_METHOD: &str = "debug_setHead";

/// Fresh endpoints after a client reset.
#[derive(Debug, Clone)]
pub struct ResetEndpoints {
    pub engine: Url,
    pub rpc: Url,
}

/// Runner-side fallback when RPC rollback is unavailable or fails: tear
/// the client down and bring it back up from a clean state.
#[async_trait]
pub trait ClientReset: Send + Sync {
    async fn recreate(&self) -> Result<ResetEndpoints>;
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Retry budget for `SYNCING` replies from `engine_newPayload*`.
    pub syncing_retries: u32,
    pub syncing_backoff: Duration,
    pub call_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            syncing_retries: 3,
            syncing_backoff: Duration::from_millis(500),
            call_timeout: None,
        }
    }
}

pub struct TestExecutor {
    engine: EngineClient,
    rpc: EngineClient,
    jwt_secret: [u8; 32],
    rollback: RollbackSpec,
    reset: Option<Arc<dyn ClientReset>>,
    collector: BlockLogCollector,
    tracker: StepTracker,
    config: ExecutorConfig,
    cancel: CancellationToken,
}

impl TestExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine_url: Url,
        rpc_url: Url,
        jwt_secret: [u8; 32],
        rollback: RollbackSpec,
        reset: Option<Arc<dyn ClientReset>>,
        collector: BlockLogCollector,
        tracker: StepTracker,
        config: ExecutorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine: EngineClient::new(engine_url, Some(&jwt_secret)),
            rpc: EngineClient::new(rpc_url, None),
            jwt_secret,
            rollback,
            reset,
            collector,
            tracker,
            config,
            cancel,
        }
    }

    /// Execute every test in order; per-test details flush to `writer` as
    /// each test concludes.
    pub async fn run(&mut self, suite: &Suite, writer: &RunWriter) -> Result<Vec<TestResult>> {
        self.run_warmup(suite).await;

        let mut results = Vec::with_capacity(suite.tests.len());
        for test in &suite.tests {
            if self.cancel.is_cancelled() {
                info!(test = %test.script.name, "run cancelled, skipping remaining tests");
                break;
            }
            let (result, details) = self.run_test(test).await;
            writer.write_test_details(&test.path, &details)?;
            results.push(result);
        }
        Ok(results)
    }

    async fn run_warmup(&mut self, suite: &Suite) {
        if suite.warmup.is_empty() {
            return;
        }
        self.tracker.enter("warmup");
        for script in &suite.warmup {
            let mut recorder = StepRecorder::start();
            for line in script.script.all_lines() {
                if self.cancel.is_cancelled() {
                    return;
                }
                if let Err(error) = self.send_line(&script.script.name, line, &mut recorder).await
                {
                    warn!(warmup = %script.script.name, %error, "warmup call failed, skipping rest of script");
                    break;
                }
            }
        }
        self.tracker.clear();
    }

    async fn run_test(&mut self, test: &SuiteTest) -> (TestResult, TestDetails) {
        let script = &test.script;
        debug!(test = %script.name, payloads = script.payload_count, "starting test");

        let mut steps = BTreeMap::new();
        let mut details = TestDetails::default();
        let mut failed = false;
        let mut cancelled = false;

        // Setup: all but the final payload pair.
        self.tracker.enter("setup");
        let mut recorder = StepRecorder::start();
        for line in &script.setup_lines {
            match self.send_line(&script.name, line, &mut recorder).await {
                Ok(()) => {}
                Err(RunnerError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(error) => {
                    warn!(test = %script.name, step = "setup", %error, "setup call failed");
                    failed = true;
                    break;
                }
            }
        }
        let (step_result, step_details) = recorder.finish();
        steps.insert("setup".to_string(), step_result);
        details.steps.insert("setup".to_string(), step_details);

        // Test: the final pair; its wall-clock time is the headline.
        let mut test_duration_ns = 0;
        if !failed && !cancelled {
            self.tracker.enter("test");
            let mut recorder = StepRecorder::start();
            let started = Instant::now();
            for line in &script.test_lines {
                match self.send_line(&script.name, line, &mut recorder).await {
                    Ok(()) => {}
                    Err(RunnerError::Cancelled) => {
                        cancelled = true;
                        break;
                    }
                    Err(error) => {
                        warn!(test = %script.name, step = "test", %error, "test call failed");
                        failed = true;
                        break;
                    }
                }
            }
            test_duration_ns = started.elapsed().as_nanos() as u64;
            let (step_result, step_details) = recorder.finish();
            steps.insert("test".to_string(), step_result);
            details.steps.insert("test".to_string(), step_details);
        }

        // Cleanup always runs, even after failure or cancellation.
        self.tracker.enter("cleanup");
        let mut recorder = StepRecorder::start();
        if let Err(error) = self.run_rollback(script.final_block_number, &mut recorder).await {
            warn!(test = %script.name, step = "cleanup", %error, "rollback failed");
        }
        let (step_result, step_details) = recorder.finish();
        steps.insert("cleanup".to_string(), step_result);
        details.steps.insert("cleanup".to_string(), step_details);
        self.tracker.clear();

        let block_log = self.collector.matched_payload(&script.name);
        let result = TestResult {
            name: script.name.clone(),
            path: test.path.clone(),
            success: !failed && !cancelled,
            cancelled,
            test_duration_ns,
            steps,
            block_log,
        };
        (result, details)
    }

    /// Send one script line with bounded `SYNCING` retries. Every attempt
    /// is recorded against the owning step.
    async fn send_line(
        &mut self,
        test: &str,
        line: &str,
        recorder: &mut StepRecorder,
    ) -> Result<()> {
        let meta = LineMeta::parse(line)?;

        // Early registration: correlate the coming block log, whichever
        // side arrives first.
        if meta.method.starts_with(NEW_PAYLOAD_PREFIX) {
            if let Some(hash) = &meta.block_hash {
                self.collector.register(hash, test);
            }
        }

        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            let outcome = self.call_and_validate(line, &meta.method).await;
            let duration_ns = started.elapsed().as_nanos() as u64;

            match outcome {
                Ok(()) => {
                    recorder.record(&meta.method, duration_ns, true);
                    return Ok(());
                }
                Err(RunnerError::Cancelled) => return Err(RunnerError::Cancelled),
                Err(RunnerError::Rpc(error))
                    if error.is_syncing() && attempt < self.config.syncing_retries =>
                {
                    recorder.record(&meta.method, duration_ns, false);
                    attempt += 1;
                    debug!(method = %meta.method, attempt, "SYNCING, backing off");
                    tokio::select! {
                        () = self.cancel.cancelled() => return Err(RunnerError::Cancelled),
                        () = tokio::time::sleep(self.config.syncing_backoff) => {}
                    }
                }
                Err(error) => {
                    recorder.record(&meta.method, duration_ns, false);
                    return Err(error);
                }
            }
        }
    }

    async fn call_and_validate(&self, line: &str, method: &str) -> Result<()> {
        let call = self.engine.call_line(line, self.config.call_timeout);
        let response = tokio::select! {
            () = self.cancel.cancelled() => return Err(RunnerError::Cancelled),
            response = call => response?,
        };
        validate_response(method, &response)?;
        Ok(())
    }

    /// Return the client to the parent of the test's final block, via the
    /// client's rollback RPC or a full recreate.
    async fn run_rollback(
        &mut self,
        final_block_number: u64,
        recorder: &mut StepRecorder,
    ) -> Result<()> {
        let target = final_block_number.saturating_sub(1);
        match self.rollback.encode(target) {
            Some(argument) => {
                let started = Instant::now();
                let outcome = async {
                    let response = self
                        .rpc
                        .call_method(ROLLBACK_METHOD, json!([argument]), self.config.call_timeout)
                        .await?;
                    validate_response(ROLLBACK_METHOD, &response)
                }
                .await;
                let duration_ns = started.elapsed().as_nanos() as u64;
                recorder.record(ROLLBACK_METHOD, duration_ns, outcome.is_ok());

                match outcome {
                    Ok(()) => Ok(()),
                    Err(error) => {
                        warn!(%error, "rollback RPC failed, falling back to recreate");
                        self.recreate_client().await
                    }
                }
            }
            None => self.recreate_client().await,
        }
    }

    async fn recreate_client(&mut self) -> Result<()> {
        let Some(reset) = self.reset.clone() else {
            warn!("client has no rollback spec and no reset handle; state carries over");
            return Ok(());
        };
        info!("recreating client to reset state");
        let endpoints = reset.recreate().await?;
        // The old container IP is stale after a recreate.
        self.engine = EngineClient::new(endpoints.engine, Some(&self.jwt_secret));
        self.rpc = EngineClient::new(endpoints.rpc, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchmarkoor_clients::GethParser;
    use benchmarkoor_fixtures::TestScript;
    use benchmarkoor_suite::SourceDescriptor;

    fn secret() -> [u8; 32] {
        [0x11; 32]
    }

    fn script_line(id: u64, method: &str, block_hash: Option<&str>) -> String {
        let params = match block_hash {
            Some(hash) => json!([{ "blockHash": hash, "parentHash": "0x0" }, [], "0x0"]),
            None => json!([{ "headBlockHash": "0x0" }, null]),
        };
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }).to_string()
    }

    fn two_payload_suite() -> Suite {
        let script = TestScript {
            name: "test_two_blocks".to_string(),
            setup_lines: vec![
                script_line(1, "engine_newPayloadV3", Some("0xblock1")),
                script_line(2, "engine_forkchoiceUpdatedV3", None),
            ],
            test_lines: vec![
                script_line(3, "engine_newPayloadV3", Some("0xblock2")),
                script_line(4, "engine_forkchoiceUpdatedV3", None),
            ],
            genesis_hash: "0xgenesis".to_string(),
            final_block_hash: "0xblock2".to_string(),
            final_parent_hash: "0xblock1".to_string(),
            final_block_number: 2,
            payload_count: 2,
            ..TestScript::default()
        };
        Suite {
            hash: "a".repeat(64),
            tests: vec![SuiteTest {
                path: "file/test_two_blocks".to_string(),
                script,
            }],
            warmup: Vec::new(),
            filter: None,
            sources: vec![SourceDescriptor::LocalDir {
                path: "./fixtures".to_string(),
            }],
        }
    }

    fn executor(server_url: &str, rollback: RollbackSpec) -> TestExecutor {
        let url: Url = server_url.parse().expect("url");
        TestExecutor::new(
            url.clone(),
            url,
            secret(),
            rollback,
            None,
            BlockLogCollector::new(&GethParser),
            StepTracker::new(),
            ExecutorConfig {
                syncing_backoff: Duration::from_millis(10),
                ..ExecutorConfig::default()
            },
            CancellationToken::new(),
        )
    }

    async fn mock_engine(server: &mut mockito::Server) -> (mockito::Mock, mockito::Mock) {
        let new_payload = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::Regex("engine_newPayloadV".to_string()))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"status":"VALID"}}"#)
            .create_async()
            .await;
        let forkchoice = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::Regex("engine_forkchoiceUpdated".to_string()))
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"payloadStatus":{"status":"VALID"},"payloadId":null}}"#,
            )
            .create_async()
            .await;
        (new_payload, forkchoice)
    }

    async fn mock_rollback(server: &mut mockito::Server, times: usize) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(mockito::Matcher::Regex("debug_setHead".to_string()))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .expect(times)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_successful_run_records_all_steps() {
        let mut server = mockito::Server::new_async().await;
        let (_np, _fcu) = mock_engine(&mut server).await;
        let rollback = mock_rollback(&mut server, 1).await;

        let root = tempfile::tempdir().expect("tempdir");
        let writer = RunWriter::create(root.path(), "deadbeef").expect("writer");
        let suite = two_payload_suite();
        let mut executor = executor(&server.url(), RollbackSpec::HexString);

        let results = executor.run(&suite, &writer).await.expect("run");
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.success);
        assert!(!result.cancelled);
        assert!(result.test_duration_ns > 0);
        assert_eq!(result.steps["setup"].methods["engine_newPayloadV3"].count, 1);
        assert_eq!(result.steps["test"].methods["engine_forkchoiceUpdatedV3"].count, 1);
        assert_eq!(result.steps["cleanup"].methods["debug_setHead"].count, 1);
        rollback.assert_async().await;

        let details_path = root
            .path()
            .join("runs/deadbeef/file/test_two_blocks.result-details.json");
        let details: TestDetails =
            serde_json::from_slice(&std::fs::read(details_path).expect("details"))
                .expect("details json");
        for step in details.steps.values() {
            assert_eq!(step.durations_ns.len(), step.status.len());
        }
        assert!(details.steps["setup"].all_succeeded());
        assert_eq!(details.steps["test"].durations_ns.len(), 2);
    }

    #[tokio::test]
    async fn test_setup_failure_skips_test_phase_but_cleans_up() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(mockito::Matcher::Regex("engine_newPayloadV".to_string()))
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"status":"INVALID","validationError":"bad block"}}"#,
            )
            .create_async()
            .await;
        let rollback = mock_rollback(&mut server, 1).await;

        let root = tempfile::tempdir().expect("tempdir");
        let writer = RunWriter::create(root.path(), "deadbeef").expect("writer");
        let suite = two_payload_suite();
        let mut executor = executor(&server.url(), RollbackSpec::HexString);

        let results = executor.run(&suite, &writer).await.expect("run");
        let result = &results[0];
        assert!(!result.success);
        assert_eq!(result.test_duration_ns, 0);
        // No test-phase calls were made.
        assert!(!result.steps.contains_key("test"));
        assert_eq!(result.steps["setup"].methods["engine_newPayloadV3"].count, 1);
        rollback.assert_async().await;
    }

    #[tokio::test]
    async fn test_syncing_retries_then_promotes_to_fatal() {
        let mut server = mockito::Server::new_async().await;
        let new_payload = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::Regex("engine_newPayloadV".to_string()))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"status":"SYNCING"}}"#)
            // Initial attempt plus the full retry budget.
            .expect(4)
            .create_async()
            .await;
        mock_rollback(&mut server, 1).await;

        let root = tempfile::tempdir().expect("tempdir");
        let writer = RunWriter::create(root.path(), "deadbeef").expect("writer");
        let suite = two_payload_suite();
        let mut executor = executor(&server.url(), RollbackSpec::HexString);

        let results = executor.run(&suite, &writer).await.expect("run");
        assert!(!results[0].success);
        assert_eq!(
            results[0].steps["setup"].methods["engine_newPayloadV3"].count,
            4
        );
        new_payload.assert_async().await;
    }

    #[tokio::test]
    async fn test_rollback_argument_encoding_per_spec() {
        for (rollback, expected) in [
            (RollbackSpec::HexString, r#""0x1""#),
            (RollbackSpec::Int, "1"),
        ] {
            let mut server = mockito::Server::new_async().await;
            let (_np, _fcu) = mock_engine(&mut server).await;
            let set_head = server
                .mock("POST", "/")
                .match_body(mockito::Matcher::Regex(format!(
                    r#""params":\[{expected}\]"#
                )))
                .with_status(200)
                .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
                .expect(1)
                .create_async()
                .await;

            let root = tempfile::tempdir().expect("tempdir");
            let writer = RunWriter::create(root.path(), "deadbeef").expect("writer");
            let suite = two_payload_suite();
            let mut executor = executor(&server.url(), rollback);
            executor.run(&suite, &writer).await.expect("run");
            set_head.assert_async().await;
        }
    }

    struct CountingReset {
        calls: std::sync::atomic::AtomicUsize,
        endpoints: ResetEndpoints,
    }

    #[async_trait]
    impl ClientReset for CountingReset {
        async fn recreate(&self) -> crate::error::Result<ResetEndpoints> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.endpoints.clone())
        }
    }

    #[tokio::test]
    async fn test_no_rollback_spec_triggers_client_recreate() {
        let mut server = mockito::Server::new_async().await;
        let (_np, _fcu) = mock_engine(&mut server).await;
        let set_head = mock_rollback(&mut server, 0).await;

        let url: Url = server.url().parse().expect("url");
        let reset = Arc::new(CountingReset {
            calls: std::sync::atomic::AtomicUsize::new(0),
            endpoints: ResetEndpoints {
                engine: url.clone(),
                rpc: url.clone(),
            },
        });

        let mut executor = TestExecutor::new(
            url.clone(),
            url,
            secret(),
            RollbackSpec::None,
            Some(Arc::clone(&reset) as Arc<dyn ClientReset>),
            BlockLogCollector::new(&GethParser),
            StepTracker::new(),
            ExecutorConfig::default(),
            CancellationToken::new(),
        );

        let root = tempfile::tempdir().expect("tempdir");
        let writer = RunWriter::create(root.path(), "deadbeef").expect("writer");
        let suite = two_payload_suite();
        let results = executor.run(&suite, &writer).await.expect("run");

        assert!(results[0].success);
        assert_eq!(reset.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        // No debug_setHead was ever issued.
        set_head.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancelled_run_marks_test_cancelled() {
        let mut server = mockito::Server::new_async().await;
        let (_np, _fcu) = mock_engine(&mut server).await;
        mock_rollback(&mut server, 0).await;

        let url: Url = server.url().parse().expect("url");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut executor = TestExecutor::new(
            url.clone(),
            url,
            secret(),
            RollbackSpec::HexString,
            None,
            BlockLogCollector::new(&GethParser),
            StepTracker::new(),
            ExecutorConfig::default(),
            CancellationToken::new(),
        );
        // Cancel mid-run: the token is shared, cancel before the test starts
        // its setup loop.
        executor.cancel = cancel;

        let root = tempfile::tempdir().expect("tempdir");
        let writer = RunWriter::create(root.path(), "deadbeef").expect("writer");
        let suite = two_payload_suite();
        let results = executor.run(&suite, &writer).await.expect("run");
        // The whole run was already cancelled; no tests executed.
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_block_log_is_attached_to_result() {
        let mut server = mockito::Server::new_async().await;
        let (_np, _fcu) = mock_engine(&mut server).await;
        mock_rollback(&mut server, 1).await;

        let root = tempfile::tempdir().expect("tempdir");
        let writer = RunWriter::create(root.path(), "deadbeef").expect("writer");
        let suite = two_payload_suite();
        let mut executor = executor(&server.url(), RollbackSpec::HexString);

        // The collector sees the client's block log while the test runs;
        // simulate it arriving before the registration.
        use std::io::Write as _;
        let mut log_writer = executor.collector.writer(Box::new(std::io::sink()));
        log_writer
            .write_all(
                b"INFO [08-01|12:00:00.000] {\"block\":{\"hash\":\"0xblock2\"},\"execution\":{\"total_ns\":7}}\n",
            )
            .expect("write");

        let results = executor.run(&suite, &writer).await.expect("run");
        let block_log = results[0].block_log.as_ref().expect("block log");
        assert_eq!(block_log["block"]["hash"], "0xblock2");
        assert_eq!(block_log["execution"]["total_ns"], 7);
    }
}
