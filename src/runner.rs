//! Background runner
//!
//! Runs invocations and downloads away from the UI thread, one task per
//! job, and hands each outcome back to the UI loop, which publishes it on
//! the job's notifier channel. A semaphore bounds how many jobs run at
//! once; extra jobs queue for a permit.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Local;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::InvokeError;
use crate::notifier::Notifier;
use crate::process::{self, CancelToken, ExecutionResult, Invocation, OutputLine};
use crate::tools::http::{self, DownloadReport, DownloadRequest, ReleaseManifest};
use crate::ui_loop::UiHandle;

/// Events the runner publishes
#[derive(Debug, Clone)]
pub enum Event {
    /// A process job finished (exactly one per invocation)
    Finished { channel: String, result: ExecutionResult },
    /// A line of output from a streaming job, published on `output_channel`
    Output { channel: String, line: OutputLine },
    /// An HTTP download finished (exactly one per request)
    Downloaded { channel: String, report: DownloadReport },
    /// A release manifest check finished
    UpdateChecked {
        channel: String,
        id: Uuid,
        outcome: Result<ReleaseManifest, InvokeError>,
    },
}

impl Event {
    pub fn channel(&self) -> &str {
        match self {
            Event::Finished { channel, .. }
            | Event::Output { channel, .. }
            | Event::Downloaded { channel, .. }
            | Event::UpdateChecked { channel, .. } => channel,
        }
    }

    /// Id of the job this event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            Event::Finished { result, .. } => result.invocation_id(),
            Event::Output { line, .. } => line.invocation_id,
            Event::Downloaded { report, .. } => report.request_id,
            Event::UpdateChecked { id, .. } => *id,
        }
    }

    pub fn status_line(&self) -> String {
        match self {
            Event::Finished { result, .. } => result.status_line(),
            Event::Output { line, .. } => line.text.clone(),
            Event::Downloaded { report, .. } => report.status_line(),
            Event::UpdateChecked { outcome, .. } => match outcome {
                Ok(manifest) => format!("latest release is {}", manifest.version),
                Err(e) => format!("update check failed: {}", e),
            },
        }
    }
}

/// Channel carrying streamed output lines for jobs submitted on `channel`
pub fn output_channel(channel: &str) -> String {
    format!("{}/output", channel)
}

/// Handle to a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    channel: String,
    cancel: CancelToken,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Ask the job to stop; it still delivers a (cancelled) result
    pub fn cancel(&self) {
        log::info!("[{}] cancellation requested", self.id);
        self.cancel.cancel();
    }
}

type JobTable = Arc<Mutex<HashMap<Uuid, CancelToken>>>;

fn lock_jobs(jobs: &Mutex<HashMap<Uuid, CancelToken>>) -> MutexGuard<'_, HashMap<Uuid, CancelToken>> {
    jobs.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct BackgroundRunner {
    runtime: Runtime,
    ui: UiHandle,
    notifier: Notifier<Event>,
    permits: Arc<Semaphore>,
    jobs: JobTable,
    default_timeout: Option<Duration>,
    client: reqwest::Client,
}

impl BackgroundRunner {
    pub fn new(config: &AppConfig, ui: UiHandle, notifier: Notifier<Event>) -> Result<Self, String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mediawrap-worker")
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to start worker runtime: {}", e))?;
        let client = http::build_client().map_err(|e| e.to_string())?;
        let limit = config.max_concurrent_jobs.max(1);

        log::info!("Background runner ready ({} concurrent jobs)", limit);

        Ok(Self {
            runtime,
            ui,
            notifier,
            permits: Arc::new(Semaphore::new(limit)),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            default_timeout: config.default_timeout(),
            client,
        })
    }

    pub fn notifier(&self) -> &Notifier<Event> {
        &self.notifier
    }

    /// Run an invocation; its result is published on `channel`
    pub fn submit(&self, channel: &str, invocation: Invocation) -> JobHandle {
        self.submit_process(channel, invocation, false)
    }

    /// Like `submit`, also publishing each output line on `output_channel(channel)`
    pub fn submit_streaming(&self, channel: &str, invocation: Invocation) -> JobHandle {
        self.submit_process(channel, invocation, true)
    }

    fn submit_process(&self, channel: &str, invocation: Invocation, stream: bool) -> JobHandle {
        let invocation = invocation.with_default_timeout(self.default_timeout);
        log::info!("[{}] queued on '{}': {}", invocation.id(), channel, invocation.display());

        let ui = self.ui.clone();
        let notifier = self.notifier.clone();
        let out_channel = output_channel(channel);
        let finished_channel = channel.to_string();
        let panic_channel = channel.to_string();
        let for_panic = invocation.clone();
        let started_at = Local::now();

        self.spawn_job(
            invocation.id(),
            channel,
            move |cancel| async move {
                let result = if stream {
                    process::run_streaming(&invocation, &cancel, move |line| {
                        let notifier = notifier.clone();
                        let out_channel = out_channel.clone();
                        ui.post(move || {
                            let event = Event::Output {
                                channel: out_channel.clone(),
                                line,
                            };
                            notifier.publish(&out_channel, &event);
                        });
                    })
                    .await
                } else {
                    process::run(&invocation, &cancel).await
                };
                Event::Finished {
                    channel: finished_channel,
                    result,
                }
            },
            move |error| Event::Finished {
                channel: panic_channel,
                result: ExecutionResult::failed(&for_panic, started_at, error),
            },
        )
    }

    /// Download `request` over HTTP; the report is published on `channel`
    pub fn submit_download(&self, channel: &str, request: DownloadRequest) -> JobHandle {
        log::info!("[{}] queued download on '{}': {}", request.id(), channel, request.url);

        let client = self.client.clone();
        let done_channel = channel.to_string();
        let panic_channel = channel.to_string();
        let for_panic = request.clone();
        let started_at = Local::now();

        self.spawn_job(
            request.id(),
            channel,
            move |cancel| async move {
                let report = http::download(&client, &request, &cancel).await;
                Event::Downloaded {
                    channel: done_channel,
                    report,
                }
            },
            move |error| Event::Downloaded {
                channel: panic_channel,
                report: DownloadReport {
                    request_id: for_panic.id(),
                    url: for_panic.url.clone(),
                    destination: for_panic.destination.clone(),
                    bytes_written: 0,
                    error: Some(error),
                    started_at,
                    finished_at: Local::now(),
                },
            },
        )
    }

    /// Fetch the release manifest at `url`; the outcome is published on `channel`
    pub fn submit_update_check(&self, channel: &str, url: &str) -> JobHandle {
        let id = Uuid::new_v4();
        log::info!("[{}] queued update check on '{}': {}", id, channel, url);

        let client = self.client.clone();
        let url = url.to_string();
        let done_channel = channel.to_string();
        let panic_channel = channel.to_string();

        self.spawn_job(
            id,
            channel,
            move |cancel| async move {
                let outcome = if cancel.is_cancelled() {
                    Err(InvokeError::Cancelled)
                } else {
                    tokio::select! {
                        outcome = http::fetch_release_manifest(&client, &url) => outcome,
                        _ = cancel.cancelled() => Err(InvokeError::Cancelled),
                    }
                };
                Event::UpdateChecked {
                    channel: done_channel,
                    id,
                    outcome,
                }
            },
            move |error| Event::UpdateChecked {
                channel: panic_channel,
                id,
                outcome: Err(error),
            },
        )
    }

    /// Spawn one job: wait for a permit, do the work, post the event to the UI
    ///
    /// `on_panic` builds the event when the work itself panics, so every job
    /// still delivers exactly one event.
    fn spawn_job<W, Fut, P>(&self, id: Uuid, channel: &str, work: W, on_panic: P) -> JobHandle
    where
        W: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Event> + Send + 'static,
        P: FnOnce(InvokeError) -> Event + Send + 'static,
    {
        let cancel = CancelToken::new();
        lock_jobs(&self.jobs).insert(id, cancel.clone());

        let handle = JobHandle {
            id,
            channel: channel.to_string(),
            cancel: cancel.clone(),
        };

        let permits = self.permits.clone();
        let jobs = self.jobs.clone();
        let ui = self.ui.clone();
        let notifier = self.notifier.clone();
        let channel = channel.to_string();

        self.runtime.spawn(async move {
            // A job cancelled while queued skips straight to its work, which
            // sees the cancelled token and returns without running anything
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };

            let event = match tokio::spawn(work(cancel)).await {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("[{}] job panicked: {}", id, e);
                    on_panic(InvokeError::io(format!("worker failed: {}", e)))
                }
            };
            drop(permit);

            lock_jobs(&jobs).remove(&id);

            let posted = ui.post(move || {
                let delivered = notifier.publish(&channel, &event);
                log::debug!("[{}] result delivered to {} listener(s) on '{}'", id, delivered, channel);
            });
            if !posted {
                log::warn!("[{}] UI loop is gone, result dropped", id);
            }
        });

        handle
    }

    /// Jobs that have not yet handed their result to the UI loop
    pub fn in_flight(&self) -> usize {
        lock_jobs(&self.jobs).len()
    }

    pub fn cancel_all(&self) {
        let tokens: Vec<CancelToken> = lock_jobs(&self.jobs).values().cloned().collect();
        if !tokens.is_empty() {
            log::info!("Cancelling {} job(s)", tokens.len());
        }
        for token in tokens {
            token.cancel();
        }
    }

    /// Cancel outstanding jobs and stop the worker threads
    pub fn shutdown(self) {
        self.cancel_all();
        self.runtime.shutdown_timeout(Duration::from_secs(2));
        log::info!("Background runner stopped");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_fixtures::{fake_tool_dir, serve_once};
    use crate::ui_loop::UiLoop;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    fn setup(max_jobs: usize) -> (UiLoop, Notifier<Event>, BackgroundRunner) {
        let ui = UiLoop::new();
        let notifier = Notifier::new();
        let config = AppConfig {
            max_concurrent_jobs: max_jobs,
            ..AppConfig::default()
        };
        let runner = BackgroundRunner::new(&config, ui.handle(), notifier.clone()).unwrap();
        (ui, notifier, runner)
    }

    fn collect(notifier: &Notifier<Event>, channel: &str) -> (Arc<Mutex<Vec<Event>>>, crate::notifier::Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = notifier.subscribe(channel, move |e: &Event| sink.lock().unwrap().push(e.clone()));
        (events, sub)
    }

    fn finished(events: &Arc<Mutex<Vec<Event>>>) -> Vec<ExecutionResult> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Finished { result, .. } => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_result_delivered_once_on_ui_thread() {
        let (ui, notifier, runner) = setup(2);
        let ui_thread = thread::current().id();
        let seen_thread = Arc::new(Mutex::new(None));
        let seen_clone = seen_thread.clone();
        let _thread_sub = notifier.subscribe("encode", move |_| {
            *seen_clone.lock().unwrap() = Some(thread::current().id());
        });
        let (events, _sub) = collect(&notifier, "encode");

        let inv = sh("echo done");
        let id = inv.id();
        runner.submit("encode", inv);

        assert!(ui.run_until(|| !events.lock().unwrap().is_empty(), WAIT));
        // Give a duplicate delivery the chance to show up
        ui.pump_for(Duration::from_millis(100));

        let results = finished(&events);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].invocation_id(), id);
        assert_eq!(results[0].exit_code(), Some(0));
        assert_eq!(results[0].stdout(), "done\n");
        assert_eq!(*seen_thread.lock().unwrap(), Some(ui_thread));
        assert_eq!(runner.in_flight(), 0);
    }

    #[test]
    fn test_missing_binary_delivers_not_found() {
        let (ui, notifier, runner) = setup(2);
        let (events, _sub) = collect(&notifier, "probe");
        let empty = TempDir::new().unwrap();

        runner.submit("probe", Invocation::new("missing-binary").search_path(empty.path()));

        assert!(ui.run_until(|| !events.lock().unwrap().is_empty(), WAIT));
        let results = finished(&events);
        assert_eq!(results[0].error(), Some(&InvokeError::not_found("missing-binary")));
    }

    #[test]
    fn test_concurrent_jobs_complete_independently() {
        let (ui, notifier, runner) = setup(4);
        let dir = TempDir::new().unwrap();
        let (a_events, _a) = collect(&notifier, "encode-a");
        let (b_events, _b) = collect(&notifier, "encode-b");

        let out_a = dir.path().join("a.out");
        let out_b = dir.path().join("b.out");
        runner.submit(
            "encode-a",
            sh(&format!("sleep 0.2; echo a > '{}'", out_a.display())),
        );
        runner.submit(
            "encode-b",
            sh(&format!("sleep 0.2; echo b > '{}'", out_b.display())),
        );

        let done = ui.run_until(
            || !a_events.lock().unwrap().is_empty() && !b_events.lock().unwrap().is_empty(),
            WAIT,
        );
        assert!(done);
        ui.pump_for(Duration::from_millis(100));

        assert_eq!(finished(&a_events).len(), 1);
        assert_eq!(finished(&b_events).len(), 1);
        assert!(finished(&a_events)[0].is_success());
        assert!(finished(&b_events)[0].is_success());
        assert_eq!(std::fs::read_to_string(&out_a).unwrap(), "a\n");
        assert_eq!(std::fs::read_to_string(&out_b).unwrap(), "b\n");
    }

    #[test]
    fn test_cancel_delivers_cancelled_result() {
        let (ui, notifier, runner) = setup(2);
        let (events, _sub) = collect(&notifier, "download");

        let handle = runner.submit("download", sh("sleep 30"));
        thread::sleep(Duration::from_millis(100));
        handle.cancel();

        let start = Instant::now();
        assert!(ui.run_until(|| !events.lock().unwrap().is_empty(), WAIT));
        assert!(start.elapsed() < WAIT);
        assert_eq!(finished(&events)[0].error(), Some(&InvokeError::Cancelled));
    }

    #[test]
    fn test_streaming_uses_separate_output_channel() {
        let (ui, notifier, runner) = setup(2);
        let (done_events, _d) = collect(&notifier, "fetch");
        let (line_events, _l) = collect(&notifier, &output_channel("fetch"));

        runner.submit_streaming("fetch", sh("echo one; echo two"));

        assert!(ui.run_until(|| !done_events.lock().unwrap().is_empty(), WAIT));
        ui.pump_for(Duration::from_millis(100));

        let lines: Vec<String> = line_events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.status_line())
            .collect();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(done_events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrency_limit_queues_jobs() {
        let (ui, notifier, runner) = setup(1);
        let (events, _sub) = collect(&notifier, "encode");

        let start = Instant::now();
        runner.submit("encode", sh("sleep 0.3"));
        runner.submit("encode", sh("sleep 0.3"));

        assert!(ui.run_until(|| events.lock().unwrap().len() == 2, WAIT));
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[test]
    fn test_job_cancelled_while_queued_never_runs() {
        let (ui, notifier, runner) = setup(1);
        let (events, _sub) = collect(&notifier, "encode");
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");

        let blocker = runner.submit("encode", sh("sleep 30"));
        let queued = runner.submit(
            "encode",
            sh(&format!("touch '{}'", marker.display())),
        );
        queued.cancel();

        assert!(ui.run_until(|| events.lock().unwrap().len() == 1, WAIT));
        let first = finished(&events);
        assert_eq!(first[0].error(), Some(&InvokeError::Cancelled));
        assert!(!marker.exists());

        blocker.cancel();
        assert!(ui.run_until(|| events.lock().unwrap().len() == 2, WAIT));
        assert_eq!(runner.in_flight(), 0);
    }

    #[test]
    fn test_cancel_all_stops_everything() {
        let (ui, notifier, runner) = setup(4);
        let (events, _sub) = collect(&notifier, "encode");
        for _ in 0..3 {
            runner.submit("encode", sh("sleep 30"));
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runner.in_flight(), 3);

        runner.cancel_all();
        assert!(ui.run_until(|| events.lock().unwrap().len() == 3, WAIT));
        assert!(finished(&events)
            .iter()
            .all(|r| r.error() == Some(&InvokeError::Cancelled)));
        runner.shutdown();
    }

    #[test]
    fn test_default_timeout_from_config() {
        let ui = UiLoop::new();
        let notifier = Notifier::new();
        let config = AppConfig {
            default_timeout_secs: Some(1),
            ..AppConfig::default()
        };
        let runner = BackgroundRunner::new(&config, ui.handle(), notifier.clone()).unwrap();
        let (events, _sub) = collect(&notifier, "encode");

        runner.submit("encode", sh("sleep 30"));
        assert!(ui.run_until(|| !events.lock().unwrap().is_empty(), WAIT));
        assert_eq!(
            finished(&events)[0].error(),
            Some(&InvokeError::TimedOut {
                after: Duration::from_secs(1)
            })
        );
    }

    #[test]
    fn test_probe_version_through_runner() {
        let (ui, notifier, runner) = setup(2);
        let tools = fake_tool_dir();
        let (events, _sub) = collect(&notifier, "version");

        runner.submit("version", Invocation::new("probe").arg("-version").search_path(tools.path()));
        assert!(ui.run_until(|| !events.lock().unwrap().is_empty(), WAIT));

        let result = &finished(&events)[0];
        assert!(result.is_success());
        assert_eq!(crate::tools::parse_version(result.stdout()).unwrap(), "6.1.1");
    }

    #[test]
    fn test_download_job_publishes_report() {
        let (ui, notifier, runner) = setup(2);
        let (events, _sub) = collect(&notifier, "update");
        let (base, server) = serve_once("200 OK", b"payload".to_vec());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");

        runner.submit_download("update", DownloadRequest::new(format!("{}/payload.bin", base), &dest));
        assert!(ui.run_until(|| !events.lock().unwrap().is_empty(), WAIT));
        server.join().unwrap();

        match &events.lock().unwrap()[0] {
            Event::Downloaded { report, channel } => {
                assert_eq!(channel, "update");
                assert!(report.is_success());
                assert_eq!(report.bytes_written, 7);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn test_update_check_publishes_manifest() {
        let (ui, notifier, runner) = setup(2);
        let (events, _sub) = collect(&notifier, "update");
        let body = br#"{ "version": "9.0.0", "url": "https://example.com/dl" }"#;
        let (base, server) = serve_once("200 OK", body.to_vec());

        let handle = runner.submit_update_check("update", &format!("{}/latest.json", base));
        assert!(ui.run_until(|| !events.lock().unwrap().is_empty(), WAIT));
        server.join().unwrap();

        let event = events.lock().unwrap()[0].clone();
        assert_eq!(event.job_id(), handle.id());
        match event {
            Event::UpdateChecked { outcome, .. } => {
                assert_eq!(outcome.unwrap().version, "9.0.0");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    fn explode() -> Event {
        panic!("worker exploded")
    }

    #[test]
    fn test_panicking_job_still_delivers_one_io_result() {
        let (ui, notifier, runner) = setup(2);
        let (events, _sub) = collect(&notifier, "encode");
        let inv = sh("true");
        let id = inv.id();
        let started_at = Local::now();

        runner.spawn_job(
            id,
            "encode",
            |_cancel| async move { explode() },
            move |error| Event::Finished {
                channel: "encode".to_string(),
                result: ExecutionResult::failed(&inv, started_at, error),
            },
        );

        assert!(ui.run_until(|| !events.lock().unwrap().is_empty(), WAIT));
        ui.pump_for(Duration::from_millis(100));

        let results = finished(&events);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].invocation_id(), id);
        assert!(matches!(results[0].error(), Some(InvokeError::Io { .. })));
        assert_eq!(runner.in_flight(), 0);
    }

    #[test]
    fn test_results_without_listeners_are_dropped_quietly() {
        let (ui, _notifier, runner) = setup(2);
        runner.submit("nobody", sh("true"));

        assert!(ui.run_until(|| runner.in_flight() == 0, WAIT));
        ui.pump_for(Duration::from_millis(100));
    }
}
