//! Step loop.
//!
//! One worker per step, strictly sequential per run: every run sits behind
//! its own async mutex, distinct runs proceed independently. Each step works
//! on a copy of the run document which replaces the live one only after the
//! checkpoint store accepted it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::contract::validate_output;
use super::errors::{OrchestratorError, OrchestratorResult};
use super::escalation::apply_human_input;
use crate::agents::{Next, Registry, RoleWorker, StepContext, Worker, WorkerError, WorkerOutput};
use crate::config::OrchestratorConfig;
use crate::domain::clock::Clock;
use crate::domain::repositories::CheckpointStore;
use crate::domain::run::{
    FailureRecord, HumanInput, MessageDraft, MessageKind, MessagePriority, PendingEscalation,
    Role, SharedState, WorkflowStatus,
};

struct RunHandle {
    state: Mutex<SharedState>,
    cancel_requested: AtomicBool,
}

impl RunHandle {
    fn new(state: SharedState) -> Arc<Self> {
        let cancelled = state.workflow_status() == WorkflowStatus::Cancelled;
        Arc::new(Self {
            state: Mutex::new(state),
            cancel_requested: AtomicBool::new(cancelled),
        })
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    store: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    runs: RwLock<HashMap<Uuid, Arc<RunHandle>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            config,
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Registers a new run and executes its intake step
    ///
    /// # Errors
    /// `Validation` when the document is not a fresh, valid run or its id is
    /// already known; `Checkpoint` when the intake step could not be saved.
    #[instrument(skip(self, initial_state), fields(run_id = %initial_state.run_id()))]
    pub async fn start_workflow(&self, initial_state: SharedState) -> OrchestratorResult<Uuid> {
        if initial_state.workflow_status() != WorkflowStatus::Initializing {
            return Err(OrchestratorError::Validation(format!(
                "A new run must be initializing, not {}",
                initial_state.workflow_status()
            )));
        }
        initial_state.context().validate()?;

        let run_id = initial_state.run_id();
        {
            let mut runs = self.runs.write().await;
            let known = runs.contains_key(&run_id)
                || self
                    .store
                    .get(run_id)
                    .await
                    .map_err(OrchestratorError::Checkpoint)?
                    .is_some();
            if known {
                return Err(OrchestratorError::Validation(format!(
                    "Run {} already exists",
                    run_id
                )));
            }
            let mut state = initial_state;
            state.start_clock(self.clock.now());
            runs.insert(run_id, RunHandle::new(state));
        }

        info!(run_id = %run_id, "Run started");
        self.step(run_id).await?;
        Ok(run_id)
    }

    /// Current snapshot, rehydrated from the checkpoint store if needed
    pub async fn get_workflow_state(&self, run_id: Uuid) -> OrchestratorResult<SharedState> {
        let handle = self.handle(run_id).await?;
        let state = handle.state.lock().await;
        Ok(state.clone())
    }

    /// Rehydrates every run the checkpoint store still holds as active
    pub async fn recover(&self) -> OrchestratorResult<Vec<Uuid>> {
        let active = self
            .store
            .list_active()
            .await
            .map_err(OrchestratorError::Checkpoint)?;
        for run_id in &active {
            self.handle(*run_id).await?;
        }
        info!(runs = active.len(), "Recovered runs from checkpoints");
        Ok(active)
    }

    pub async fn active_runs(&self) -> Vec<Uuid> {
        let runs = self.runs.read().await;
        let mut active = Vec::new();
        for (run_id, handle) in runs.iter() {
            if !handle.state.lock().await.workflow_status().is_terminal() {
                active.push(*run_id);
            }
        }
        active.sort();
        active
    }

    /// Executes exactly one step
    ///
    /// # Errors
    /// `InvalidState` for paused or finished runs; `Checkpoint` when the
    /// step could not be saved, in which case the live run is unchanged.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn step(&self, run_id: Uuid) -> OrchestratorResult<SharedState> {
        let handle = self.handle(run_id).await?;
        let mut live = handle.state.lock().await;

        let status = live.workflow_status();
        if status.is_terminal() || status == WorkflowStatus::HumanEscalation {
            return Err(OrchestratorError::invalid_state(
                run_id,
                status,
                "only initializing or running runs can step",
            ));
        }

        let mut next = live.clone();
        let now = self.clock.now();
        if handle.cancel_requested() {
            mark_cancelled(&mut next, now)?;
        } else {
            self.execute_step(&mut next, &handle, now).await?;
        }

        self.save(&mut next).await?;
        *live = next.clone();
        drop(live);
        self.release_if_finished(&next).await;
        Ok(next)
    }

    /// Steps until the run pauses, finishes or is cancelled
    ///
    /// A run that stopped between two steps, for instance cancelled from
    /// another task, ends the loop with its current snapshot.
    pub async fn run_until_paused(&self, run_id: Uuid) -> OrchestratorResult<SharedState> {
        loop {
            let state = match self.step(run_id).await {
                Ok(state) => state,
                Err(err @ OrchestratorError::InvalidState { .. }) => {
                    let state = self.get_workflow_state(run_id).await?;
                    if state.workflow_status() == WorkflowStatus::Running {
                        return Err(err);
                    }
                    state
                }
                Err(err) => return Err(err),
            };
            if state.workflow_status() != WorkflowStatus::Running {
                return Ok(state);
            }
        }
    }

    /// Drives `run_until_paused` on its own Tokio task
    pub fn spawn_run(self: &Arc<Self>, run_id: Uuid) -> JoinHandle<OrchestratorResult<SharedState>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run_until_paused(run_id).await })
    }

    /// Folds human input into a paused run and routes exactly once
    ///
    /// # Errors
    /// `InvalidState` unless the run is waiting on a human; `Validation` for
    /// malformed input. Neither changes the run.
    #[instrument(skip(self, input), fields(run_id = %run_id, reviewer = %input.reviewer))]
    pub async fn continue_workflow(
        &self,
        run_id: Uuid,
        input: HumanInput,
    ) -> OrchestratorResult<SharedState> {
        let handle = self.handle(run_id).await?;
        let mut live = handle.state.lock().await;

        let status = live.workflow_status();
        if status != WorkflowStatus::HumanEscalation {
            return Err(OrchestratorError::invalid_state(
                run_id,
                status,
                "only runs awaiting human input can be resumed",
            ));
        }

        let now = self.clock.now();
        let mut next = live.clone();
        let pending = apply_human_input(&mut next, &input, now)?;
        next.transition_to(WorkflowStatus::Running)?;
        next.commit(now);

        if handle.cancel_requested() {
            mark_cancelled(&mut next, now)?;
        } else {
            self.route(&mut next, pending.paused_at, now).await?;
        }
        info!(
            run_id = %run_id,
            cause = %pending.key.cause,
            status = %next.workflow_status(),
            "Run resumed"
        );

        self.save(&mut next).await?;
        *live = next.clone();
        drop(live);
        self.release_if_finished(&next).await;
        Ok(next)
    }

    /// Cancels a run cooperatively
    ///
    /// A step in flight sees the request, finishes and marks the run
    /// cancelled instead of routing. Returns once the run is cancelled.
    ///
    /// # Errors
    /// `NotFound` for unknown runs, `InvalidState` for finished ones.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn cancel(&self, run_id: Uuid) -> OrchestratorResult<()> {
        let handle = self.handle(run_id).await?;
        let already_requested = handle.cancel_requested.swap(true, Ordering::SeqCst);
        let mut live = handle.state.lock().await;

        let status = live.workflow_status();
        if status == WorkflowStatus::Cancelled && !already_requested {
            // the step that held the lock honoured this request
            return Ok(());
        }
        if status.is_terminal() {
            return Err(OrchestratorError::invalid_state(
                run_id,
                status,
                "run already finished",
            ));
        }

        let mut next = live.clone();
        mark_cancelled(&mut next, self.clock.now())?;
        self.save(&mut next).await?;
        *live = next.clone();
        drop(live);
        self.release_if_finished(&next).await;
        Ok(())
    }

    /// Runs currently held in memory, finished or not
    pub async fn loaded_runs(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Drops the in-memory handle of an archived run
    ///
    /// Must be called without holding the run's state lock.
    async fn release_if_finished(&self, state: &SharedState) {
        if state.workflow_status().is_terminal() && state.archived() {
            self.runs.write().await.remove(&state.run_id());
            debug!(run_id = %state.run_id(), "Finished run released");
        }
    }

    async fn handle(&self, run_id: Uuid) -> OrchestratorResult<Arc<RunHandle>> {
        if let Some(handle) = self.runs.read().await.get(&run_id) {
            return Ok(handle.clone());
        }

        let stored = self
            .store
            .get(run_id)
            .await
            .map_err(OrchestratorError::Checkpoint)?
            .ok_or(OrchestratorError::NotFound(run_id))?;
        let mut runs = self.runs.write().await;
        let handle = runs
            .entry(run_id)
            .or_insert_with(|| {
                info!(run_id = %run_id, version = stored.version(), "Run rehydrated from checkpoint");
                RunHandle::new(stored)
            })
            .clone();
        Ok(handle)
    }

    async fn execute_step(
        &self,
        state: &mut SharedState,
        handle: &RunHandle,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let node = match state.workflow_status() {
            WorkflowStatus::Initializing => {
                state.transition_to(WorkflowStatus::Running)?;
                Role::Supervisor
            }
            _ => state.next_action().unwrap_or(Role::Supervisor),
        };

        if state.step_count() >= self.config.max_steps {
            let err = WorkerError::Fatal(format!(
                "step limit of {} reached",
                self.config.max_steps
            ));
            return fail(state, node, 0, &err, now);
        }

        let Some(worker) = self.registry.worker(node) else {
            let err = WorkerError::Fatal(format!("no worker registered for {}", node));
            return fail(state, node, 0, &err, now);
        };

        let ctx = StepContext {
            run_id: state.run_id(),
            now,
            focus_deal: state.focus_deal(),
            attempt: 1,
        };
        let output = match self.invoke(worker, state, ctx).await {
            Ok(output) => output,
            Err((err, attempt)) => return fail(state, node, attempt, &err, now),
        };

        *state = output.state;
        for draft in output.drafts {
            state.append_message(draft, now);
        }
        if state.operator_override() == Some(node) {
            state.set_operator_override(None);
        }
        state.set_current_step(node);
        state.record_step();
        state.commit(now);

        if handle.cancel_requested() {
            return mark_cancelled(state, now);
        }
        self.route(state, node, now).await
    }

    /// Runs a worker with bounded retries
    ///
    /// Every attempt sees the current snapshot, including the error entries
    /// of earlier attempts. Recoverable failures back off exponentially; a
    /// fatal failure or an exhausted budget is returned with its attempt.
    async fn invoke(
        &self,
        worker: &Worker,
        state: &mut SharedState,
        mut ctx: StepContext,
    ) -> Result<WorkerOutput, (WorkerError, u32)> {
        let node = worker.role();
        let policy = self.config.retry_policy();
        let step_timeout = self.config.step_timeout();

        loop {
            let snapshot = state.clone();
            let result = match tokio::time::timeout(step_timeout, worker.execute(&snapshot, &ctx))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Recoverable(format!(
                    "{} timed out after {:?}",
                    node, step_timeout
                ))),
            }
            .and_then(|output| validate_output(node, &snapshot, &output).map(|_| output));

            let err = match result {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };
            if !err.is_recoverable() {
                return Err((err, ctx.attempt));
            }

            state.append_message(
                MessageDraft::error(
                    node,
                    format!("Attempt {} failed: {}", ctx.attempt, err.message()),
                )
                .with_payload(json!({ "attempt": ctx.attempt, "recoverable": true })),
                self.clock.now(),
            );
            if ctx.attempt >= policy.max_attempts {
                return Err((
                    WorkerError::Fatal(format!(
                        "{} gave up after {} attempts: {}",
                        node,
                        ctx.attempt,
                        err.message()
                    )),
                    ctx.attempt,
                ));
            }

            let delay = policy.backoff_duration(ctx.attempt - 1);
            warn!(
                run_id = %ctx.run_id,
                node = %node,
                attempt = ctx.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Recoverable worker error, retrying"
            );
            tokio::time::sleep(delay).await;
            ctx.attempt += 1;
        }
    }

    /// Asks the Supervisor for the next node and applies its decision
    async fn route(
        &self,
        state: &mut SharedState,
        paused_at: Role,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let (decision, advice) = self.registry.supervisor().decide(state).await;
        state.set_advisory_hint(advice);
        state.record_route_evaluation();

        let target = match decision.next {
            Next::Worker(role) => role.to_string(),
            Next::Escalate(key) => format!("human review ({})", key.cause),
            Next::Complete => "completion".to_string(),
        };
        let mut draft = MessageDraft::new(
            Role::Supervisor,
            MessageKind::Routing,
            format!("Next: {} [{}] {}", target, decision.rule, decision.reason),
        )
        .with_payload(json!(decision));
        if let Some(deal_id) = decision.deal_id {
            draft = draft.for_deal(deal_id);
        }
        state.append_message(draft, now);

        match decision.next {
            Next::Worker(role) => {
                state.set_next_action(Some(role), decision.deal_id);
            }
            Next::Escalate(key) => {
                state.set_next_action(None, decision.deal_id);
                state.pause(PendingEscalation {
                    key,
                    detail: decision.reason.clone(),
                    raised_at: now,
                    paused_at,
                });
                state.transition_to(WorkflowStatus::HumanEscalation)?;

                let mut draft = MessageDraft::new(
                    Role::Supervisor,
                    MessageKind::Escalation,
                    format!("Human input required ({}): {}", key.cause, decision.reason),
                )
                .with_priority(MessagePriority::High)
                .with_payload(json!({ "key": key, "paused_at": paused_at }));
                if let Some(deal_id) = key.deal_id {
                    draft = draft.for_deal(deal_id);
                }
                state.append_message(draft, now);
                info!(run_id = %state.run_id(), cause = %key.cause, "Run paused for human input");
            }
            Next::Complete => {
                state.set_next_action(None, None);
                state.transition_to(WorkflowStatus::Completed)?;
                info!(
                    run_id = %state.run_id(),
                    steps = state.step_count(),
                    deals = state.deals().len(),
                    "Run completed"
                );
            }
        }
        Ok(())
    }

    /// Checkpoints the document; finished runs are archived instead
    async fn save(&self, state: &mut SharedState) -> OrchestratorResult<()> {
        let run_id = state.run_id();
        let result = if state.workflow_status().is_terminal() && !state.archived() {
            state.mark_archived();
            self.store.archive(run_id, state).await
        } else {
            self.store.put(run_id, state).await
        };
        result.map_err(|e| {
            error!(run_id = %run_id, error = %e, "Checkpoint failed");
            OrchestratorError::Checkpoint(e)
        })
    }
}

fn fail(
    state: &mut SharedState,
    node: Role,
    attempt: u32,
    err: &WorkerError,
    now: DateTime<Utc>,
) -> OrchestratorResult<()> {
    error!(run_id = %state.run_id(), node = %node, attempt, error = %err, "Run failed");
    state.append_message(
        MessageDraft::error(node, err.message())
            .with_payload(json!({ "attempt": attempt, "recoverable": false })),
        now,
    );
    state.set_failure(FailureRecord {
        node,
        attempt,
        error: err.message().to_string(),
        failed_at: now,
    });
    state.set_current_step(node);
    state.set_next_action(None, None);
    state.record_step();
    state.transition_to(WorkflowStatus::Failed)?;
    state.commit(now);
    Ok(())
}

fn mark_cancelled(state: &mut SharedState, now: DateTime<Utc>) -> OrchestratorResult<()> {
    state.append_message(
        MessageDraft::new(Role::Supervisor, MessageKind::Detail, "Run cancelled")
            .with_priority(MessagePriority::High),
        now,
    );
    state.set_next_action(None, None);
    state.transition_to(WorkflowStatus::Cancelled)?;
    state.commit(now);
    info!(run_id = %state.run_id(), "Run cancelled");
    Ok(())
}
