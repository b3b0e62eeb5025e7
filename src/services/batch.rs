use crate::core::error::DubError;
use crate::core::io::Storage;
use crate::core::state::{LineStatus, RoleConfig};
use crate::services::repository::{LineRepository, StatusChange};
use crate::services::tts::{SynthesisClient, SynthesisRequest};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Live view of a batch run, published after every state change.
///
/// `total` and `completed` are project-wide (baseline completions included);
/// `failed` and `skipped` count only this run. Counters never decrease
/// within a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Most recently dispatched or finished attempt. Advisory only.
    pub current_task: Option<String>,
    pub is_running: bool,
}

/// Final accounting for one run. `completed`/`failed`/`skipped` count this
/// run only; `baseline` is how many lines were already completed before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub baseline: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// True when the run was cancelled before draining its queue.
    pub stopped: bool,
}

/// Owned run context: every worker funnels counter updates through this one
/// mutex instead of mutating ambient shared state.
struct RunState {
    total: usize,
    baseline: usize,
    completed: usize,
    failed: usize,
    skipped: usize,
    current_task: Option<String>,
}

impl RunState {
    fn new(total: usize, baseline: usize) -> Self {
        Self {
            total,
            baseline,
            completed: 0,
            failed: 0,
            skipped: 0,
            current_task: None,
        }
    }

    fn snapshot(&self, is_running: bool) -> BatchProgress {
        BatchProgress {
            total: self.total,
            completed: self.baseline + self.completed,
            failed: self.failed,
            skipped: self.skipped,
            current_task: self.current_task.clone(),
            is_running,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub server_url: String,
    pub output_dir: PathBuf,
    pub max_concurrency: usize,
}

/// Drives dubbing work against the line repository: single attempts, batch
/// runs under a concurrency cap, cooperative stop, and progress publishing.
pub struct DubbingEngine {
    repo: Arc<Mutex<LineRepository>>,
    roles: Arc<Mutex<HashMap<String, RoleConfig>>>,
    client: Arc<dyn SynthesisClient>,
    storage: Arc<dyn Storage>,
    options: EngineOptions,
    progress: watch::Sender<BatchProgress>,
    /// Single-flight guard: one run (batch or single) at a time.
    run_lock: tokio::sync::Mutex<()>,
    /// Token of the active run, present only while one is in progress.
    cancel: Mutex<Option<CancellationToken>>,
    autosave: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

enum AttemptOutcome {
    Succeeded,
    Failed,
}

impl DubbingEngine {
    pub fn new(
        repo: Arc<Mutex<LineRepository>>,
        roles: Arc<Mutex<HashMap<String, RoleConfig>>>,
        client: Arc<dyn SynthesisClient>,
        storage: Arc<dyn Storage>,
        options: EngineOptions,
    ) -> Self {
        let (progress, _) = watch::channel(BatchProgress::default());
        Self {
            repo,
            roles,
            client,
            storage,
            options,
            progress,
            run_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(None),
            autosave: Mutex::new(None),
        }
    }

    /// Observe progress snapshots. Readers may lag; they always see a
    /// consistent snapshot.
    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    /// Wire up the debounced persistence bridge. Every recorded result
    /// nudges it; saving remains fire-and-forget.
    pub fn attach_autosaver(&self, tx: mpsc::UnboundedSender<()>) {
        *self.autosave.lock().unwrap() = Some(tx);
    }

    /// Request cooperative cancellation of the active run. No new work is
    /// admitted after this; in-flight attempts finish and are recorded.
    /// Idempotent, safe to call when idle.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().unwrap().as_ref() {
            info!("stop requested for active batch run");
            token.cancel();
        }
    }

    /// Run a single line through the same state machine as the batch path.
    /// Per-line failures land on the line itself; the returned status is the
    /// line's final state. Rejected while a batch run is active.
    pub async fn generate_one(&self, index: usize) -> Result<LineStatus, DubError> {
        let _guard = self.run_lock.try_lock().map_err(|_| DubError::RunActive)?;
        let endpoint = self.validated_endpoint()?;

        let (role, content) = {
            let repo = self.repo.lock().unwrap();
            let line = repo.get(index)?;
            (line.role.clone(), line.content.clone())
        };

        let config = self.role_config(&role);
        let reference_voice = match config.reference_voice.clone() {
            Some(voice) => voice,
            None => {
                let message = DubError::MissingReferenceVoice { role }.to_string();
                self.repo
                    .lock()
                    .unwrap()
                    .set_status(index, StatusChange::Error { message })?;
                self.nudge_autosave();
                return Ok(LineStatus::Error);
            }
        };

        self.repo
            .lock()
            .unwrap()
            .set_status(index, StatusChange::Generating)?;

        let request = SynthesisRequest {
            text: content,
            reference_voice,
            speed: config.clamped_speed(),
            endpoint,
            role,
        };
        let artifact_path = self.artifact_path(index, &request.role);
        let outcome = run_attempt(
            &self.repo,
            self.client.as_ref(),
            self.storage.as_ref(),
            request,
            artifact_path,
            index,
        )
        .await;
        self.nudge_autosave();

        Ok(match outcome {
            AttemptOutcome::Succeeded => LineStatus::Completed,
            AttemptOutcome::Failed => LineStatus::Error,
        })
    }

    /// Run a batch over the requested indices with at most `concurrency`
    /// attempts in flight. Drives the run to drain (or stop) while
    /// publishing progress snapshots, then returns the final accounting.
    pub async fn generate_batch(
        &self,
        indices: &[usize],
        concurrency: usize,
    ) -> Result<BatchReport, DubError> {
        let _guard = self.run_lock.try_lock().map_err(|_| DubError::RunActive)?;
        let endpoint = self.validated_endpoint()?;
        let limit = concurrency.clamp(1, self.options.max_concurrency.max(1));
        let queue = dedup_preserving_order(indices);

        let (total, baseline) = {
            let repo = self.repo.lock().unwrap();
            // A missing index is a contract violation; surface it before the
            // run touches any line.
            for &index in &queue {
                repo.get(index)?;
            }
            (repo.len(), repo.completed_count())
        };

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(token.clone());

        let run = Arc::new(Mutex::new(RunState::new(total, baseline)));
        self.publish(&run, true);

        info!(
            "batch run started: {} requested, concurrency {}, baseline {}/{}",
            queue.len(),
            limit,
            baseline,
            total
        );

        let role_configs = self.roles.lock().unwrap().clone();
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut workers: JoinSet<()> = JoinSet::new();

        for index in queue {
            if token.is_cancelled() {
                break;
            }

            let (role, content) = {
                let repo = self.repo.lock().unwrap();
                let line = match repo.get(index) {
                    Ok(line) => line,
                    Err(e) => {
                        // Validated above; the repository cannot shrink while
                        // the run lock is held.
                        warn!("line {} vanished mid-run: {}", index, e);
                        continue;
                    }
                };
                if line.status == LineStatus::Generating {
                    debug!("line {} already in flight, not admitting again", index);
                    continue;
                }
                (line.role.clone(), line.content.clone())
            };

            let config = role_configs
                .get(&role)
                .cloned()
                .unwrap_or_else(|| RoleConfig::new(role.clone()));
            let reference_voice = match config.reference_voice.clone() {
                Some(voice) => voice,
                None => {
                    // Recorded synchronously, consumes no concurrency slot.
                    let message = DubError::MissingReferenceVoice { role: role.clone() }.to_string();
                    if let Err(e) = self
                        .repo
                        .lock()
                        .unwrap()
                        .set_status(index, StatusChange::Error { message: message.clone() })
                    {
                        warn!("failed to record skip for line {}: {}", index, e);
                    }
                    {
                        let mut state = run.lock().unwrap();
                        state.failed += 1;
                        state.skipped += 1;
                        state.current_task = Some(format!("skipped line {}: {}", index, message));
                        self.progress.send_replace(state.snapshot(true));
                    }
                    self.nudge_autosave();
                    continue;
                }
            };

            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    // The semaphore is never closed.
                    Err(_) => break,
                },
            };

            if let Err(e) = self
                .repo
                .lock()
                .unwrap()
                .set_status(index, StatusChange::Generating)
            {
                warn!("failed to mark line {} generating: {}", index, e);
                continue;
            }

            let description = describe_task(&role, &content);
            {
                let mut state = run.lock().unwrap();
                state.current_task = Some(description.clone());
                self.progress.send_replace(state.snapshot(true));
            }

            let request = SynthesisRequest {
                text: content,
                reference_voice,
                speed: config.clamped_speed(),
                endpoint: endpoint.clone(),
                role,
            };
            let artifact_path = self.artifact_path(index, &request.role);
            let repo = Arc::clone(&self.repo);
            let client = Arc::clone(&self.client);
            let storage = Arc::clone(&self.storage);
            let run_state = Arc::clone(&run);
            let progress = self.progress.clone();
            let autosave = self.autosave.lock().unwrap().clone();

            workers.spawn(async move {
                let outcome = run_attempt(
                    &repo,
                    client.as_ref(),
                    storage.as_ref(),
                    request,
                    artifact_path,
                    index,
                )
                .await;

                // Publish while still holding the run lock: a send outside it
                // could land after a newer worker's send and roll counters
                // backward for subscribers.
                {
                    let mut state = run_state.lock().unwrap();
                    match outcome {
                        AttemptOutcome::Succeeded => state.completed += 1,
                        AttemptOutcome::Failed => state.failed += 1,
                    }
                    state.current_task = Some(format!("finished {}", description));
                    progress.send_replace(state.snapshot(true));
                }
                if let Some(tx) = autosave {
                    let _ = tx.send(());
                }
                drop(permit);
            });
        }

        // Cancellation never aborts in-flight attempts; drain them all and
        // keep their results.
        while workers.join_next().await.is_some() {}

        let stopped = token.is_cancelled();
        *self.cancel.lock().unwrap() = None;

        let report = {
            let mut state = run.lock().unwrap();
            state.current_task = Some(if stopped {
                format!(
                    "stopped: {} succeeded, {} failed this run",
                    state.completed, state.failed
                )
            } else {
                format!(
                    "done: {} succeeded, {} failed, {} skipped",
                    state.completed, state.failed, state.skipped
                )
            });
            BatchReport {
                total: state.total,
                baseline: state.baseline,
                completed: state.completed,
                failed: state.failed,
                skipped: state.skipped,
                stopped,
            }
        };
        self.publish(&run, false);
        self.nudge_autosave();

        info!(
            "batch run {}: {} succeeded, {} failed, {} skipped",
            if stopped { "stopped" } else { "finished" },
            report.completed,
            report.failed,
            report.skipped
        );
        Ok(report)
    }

    fn role_config(&self, role: &str) -> RoleConfig {
        self.roles
            .lock()
            .unwrap()
            .get(role)
            .cloned()
            .unwrap_or_else(|| RoleConfig::new(role))
    }

    fn validated_endpoint(&self) -> Result<String, DubError> {
        let url = self.options.server_url.trim();
        if url.is_empty() {
            return Err(DubError::InvalidEndpoint(
                "server URL is not configured".to_string(),
            ));
        }
        Url::parse(url).map_err(|e| DubError::InvalidEndpoint(format!("{}: {}", url, e)))?;
        Ok(url.to_string())
    }

    fn artifact_path(&self, index: usize, role: &str) -> String {
        let safe_role = role.replace(['/', '\\'], "_");
        self.options
            .output_dir
            .join(format!("{:04}_{}.wav", index, safe_role))
            .to_string_lossy()
            .into_owned()
    }

    /// Snapshot and send under the run lock so publications are serialized
    /// in state order.
    fn publish(&self, run: &Mutex<RunState>, is_running: bool) {
        let state = run.lock().unwrap();
        self.progress.send_replace(state.snapshot(is_running));
    }

    fn nudge_autosave(&self) {
        if let Some(tx) = self.autosave.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }
}

/// One synthesis attempt for a line already marked `Generating`. The outcome
/// is recorded on the line; failures are absorbed here, never propagated.
async fn run_attempt(
    repo: &Mutex<LineRepository>,
    client: &dyn SynthesisClient,
    storage: &dyn Storage,
    request: SynthesisRequest,
    artifact_path: String,
    index: usize,
) -> AttemptOutcome {
    let change = match client.synthesize(&request).await {
        Ok(audio) => match storage.write(&artifact_path, &audio).await {
            Ok(()) => StatusChange::Completed {
                artifact: artifact_path,
            },
            Err(e) => {
                warn!("failed to store artifact for line {}: {}", index, e);
                StatusChange::Error {
                    message: format!("failed to store artifact: {}", e),
                }
            }
        },
        Err(e) => {
            debug!("synthesis failed for line {}: {}", index, e);
            StatusChange::Error {
                message: e.to_string(),
            }
        }
    };

    let outcome = match change {
        StatusChange::Completed { .. } => AttemptOutcome::Succeeded,
        _ => AttemptOutcome::Failed,
    };
    if let Err(e) = repo.lock().unwrap().set_status(index, change) {
        warn!("failed to record attempt result for line {}: {}", index, e);
    }
    outcome
}

fn describe_task(role: &str, content: &str) -> String {
    let preview: String = content.chars().take(20).collect();
    if role.is_empty() {
        preview
    } else {
        format!("{}: {}", role, preview)
    }
}

fn dedup_preserving_order(indices: &[usize]) -> Vec<usize> {
    let mut seen = HashSet::new();
    indices
        .iter()
        .copied()
        .filter(|index| seen.insert(*index))
        .collect()
}
