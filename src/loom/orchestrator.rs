//! Orchestrator (C7) — the top-level turn algorithm (§4.7, §5).
//!
//! One [`Orchestrator::handle_turn`] call executes exactly one conversational
//! turn: validate, append the user message, decide supervisor vs. manual
//! routing, run each resulting step in order, and persist the result. A
//! per-session in-flight marker (a plain `std::sync::RwLock`-guarded map,
//! chosen because its critical sections never span an `.await` — the pattern
//! the tokio docs recommend over an async mutex here) enforces that only one
//! turn runs per session at a time; a second concurrent call is rejected with
//! [`OrchestratorError::Busy`] rather than queued, a fail-fast posture for
//! overlapping requests on one session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as SyncRwLock};
use std::time::Duration;

use chrono::Utc;

use crate::loom::agent::AgentRunner;
use crate::loom::analyzer::{Analyzer, ContextFusion};
use crate::loom::client_wrapper::ClientFactory;
use crate::loom::error::OrchestratorError;
use crate::loom::event::{EventHandler, StreamEvent};
use crate::loom::planner::{self, Step};
use crate::loom::registry::AgentRegistry;
use crate::loom::session::{MessageAnnotations, SenderRole, Session};
use crate::loom::store::SessionStore;
use crate::loom::tool_runtime::{ToolCache, ToolOutcome, ToolRuntime};

fn fusion_directive(fusion: ContextFusion) -> &'static str {
    match fusion {
        ContextFusion::PersonaIntegratedStorytelling => {
            "Weave the gathered information into your own voice and persona, as if you had lived it yourself."
        }
        ContextFusion::HumorIntegration => {
            "Use the gathered information as raw material for comedic exaggeration."
        }
        ContextFusion::FactualIntegration => {
            "Present the gathered information accurately and matter-of-factly."
        }
        ContextFusion::NarrativeIntegration => {
            "Weave the gathered information into a short narrative."
        }
    }
}

struct TurnGuard<'a> {
    active: &'a SyncRwLock<HashMap<String, Arc<AtomicBool>>>,
    session_id: String,
}

impl<'a> TurnGuard<'a> {
    fn acquire(
        active: &'a SyncRwLock<HashMap<String, Arc<AtomicBool>>>,
        session_id: &str,
    ) -> Result<(Self, Arc<AtomicBool>), OrchestratorError> {
        let mut guard = active.write().expect("active-turn lock poisoned");
        if guard.contains_key(session_id) {
            return Err(OrchestratorError::Busy);
        }
        let cancel = Arc::new(AtomicBool::new(false));
        guard.insert(session_id.to_string(), cancel.clone());
        Ok((
            TurnGuard {
                active,
                session_id: session_id.to_string(),
            },
            cancel,
        ))
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.active.write() {
            guard.remove(&self.session_id);
        }
    }
}

/// Default per-agent (LLM) call timeout, used when the orchestrator is
/// built via [`Orchestrator::new`] without [`Orchestrator::with_timeouts`].
/// Matches [`crate::loom::config::OrchestratorConfig`]'s own default.
const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default whole-turn timeout; see [`DEFAULT_AGENT_TIMEOUT`].
const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    store: Arc<SessionStore>,
    tool_runtime: Arc<ToolRuntime>,
    client_factory: Arc<dyn ClientFactory>,
    analyzer: Analyzer,
    agent_runner: AgentRunner,
    events: Arc<dyn EventHandler>,
    default_agent_id: String,
    active: SyncRwLock<HashMap<String, Arc<AtomicBool>>>,
    agent_timeout: Duration,
    turn_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<SessionStore>,
        tool_runtime: Arc<ToolRuntime>,
        client_factory: Arc<dyn ClientFactory>,
        events: Arc<dyn EventHandler>,
        default_agent_id: impl Into<String>,
    ) -> Self {
        let default_agent_id = default_agent_id.into();
        Self {
            registry,
            store,
            tool_runtime,
            client_factory,
            analyzer: Analyzer::new(default_agent_id.clone()),
            agent_runner: AgentRunner::new(),
            events,
            default_agent_id,
            active: SyncRwLock::new(HashMap::new()),
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }

    /// Override the per-agent and whole-turn timeouts (§5), normally sourced
    /// from [`crate::loom::config::OrchestratorConfig`].
    pub fn with_timeouts(mut self, agent_timeout: Duration, turn_timeout: Duration) -> Self {
        self.agent_timeout = agent_timeout;
        self.turn_timeout = turn_timeout;
        self
    }

    /// Signal cooperative cancellation for the turn currently running on
    /// `session_id`, if any. Edge-triggered: a second call while the turn is
    /// already marked cancelled is a harmless no-op.
    pub fn cancel_turn(&self, session_id: &str) -> bool {
        match self.active.read().expect("active-turn lock poisoned").get(session_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub async fn handle_turn(&self, session_id: &str, prompt: &str) -> Result<(), OrchestratorError> {
        let (_guard, cancel) = TurnGuard::acquire(&self.active, session_id)?;

        let mut session = self.store.get(session_id).await?;

        if prompt.trim().is_empty() {
            let text = "prompt must not be empty".to_string();
            session.append(
                SenderRole::System,
                text.clone(),
                MessageAnnotations {
                    error: true,
                    ..Default::default()
                },
                Utc::now(),
            );
            self.store.put(session_id, &session).await?;
            self.events
                .on_event(session_id, &StreamEvent::SystemError { text })
                .await;
            return Err(OrchestratorError::EmptyPrompt);
        }

        session.append(SenderRole::User, prompt, MessageAnnotations::default(), Utc::now());
        self.events
            .on_event(session_id, &StreamEvent::User { text: prompt.to_string() })
            .await;

        let supervisor_mode = session.settings.supervisor_mode;
        let (steps, fusion, primary_agent_id) = if supervisor_mode {
            let catalog = self.registry.snapshot_catalog().await;
            let plan = self.analyzer.analyze(prompt, &catalog);
            let steps = planner::plan_supervised(&plan);
            (steps, Some(fusion_directive(plan.context_fusion)), Some(plan.primary_agent))
        } else {
            let steps = planner::plan_manual(&session.settings.manual_plan);
            let primary = session
                .settings
                .manual_plan
                .enabled_entries()
                .last()
                .map(|e| e.agent_id.clone());
            (steps, None, primary)
        };

        let turn_error = match tokio::time::timeout(
            self.turn_timeout,
            self.run_steps(
                session_id,
                prompt,
                supervisor_mode,
                steps,
                fusion,
                primary_agent_id.as_deref(),
                cancel.as_ref(),
                &mut session,
            ),
        )
        .await
        {
            Ok(turn_error) => turn_error,
            Err(_) => {
                self.cancel_turn(session_id);
                let text = format!("turn exceeded {:?} timeout", self.turn_timeout);
                session.append(
                    SenderRole::System,
                    text.clone(),
                    MessageAnnotations {
                        error: true,
                        ..Default::default()
                    },
                    Utc::now(),
                );
                self.events
                    .on_event(session_id, &StreamEvent::SystemError { text })
                    .await;
                Some(OrchestratorError::Cancelled)
            }
        };

        if let Err(e) = self.store.put(session_id, &session).await {
            // Persistence failed: the in-memory `session` built up over this
            // call is dropped here rather than retried or returned, and the
            // client is told via the same `system` event channel as any
            // other turn-aborting failure (§7 store_error).
            let store_error = OrchestratorError::from(e);
            let text = store_error.to_string();
            self.events
                .on_event(session_id, &StreamEvent::SystemError { text })
                .await;
            return Err(store_error);
        }

        match turn_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run every planned step against `session` in order, appending history
    /// and emitting stream events as it goes. Split out from
    /// [`Self::handle_turn`] so the whole sequence can be raced against the
    /// turn timeout there (§5) while still mutating the caller's session in
    /// place.
    #[allow(clippy::too_many_arguments)]
    async fn run_steps(
        &self,
        session_id: &str,
        prompt: &str,
        supervisor_mode: bool,
        steps: Vec<Step>,
        fusion: Option<&str>,
        primary_agent_id: Option<&str>,
        cancel: &AtomicBool,
        session: &mut Session,
    ) -> Option<OrchestratorError> {
        let mut cache = ToolCache::new();
        let mut tool_outputs: HashMap<String, String> = HashMap::new();
        let mut last_agent_output: Option<String> = None;
        let mut turn_error: Option<OrchestratorError> = None;

        for step in steps {
            if turn_error.is_some() {
                break;
            }
            match step {
                Step::ToolStep {
                    tool_id,
                    option,
                    for_agent,
                } => {
                    let outcome = self
                        .tool_runtime
                        .maybe_run(&mut cache, &tool_id, prompt, option.as_deref(), &for_agent)
                        .await;
                    match outcome {
                        ToolOutcome::Used { result, .. } => {
                            let text = result.text();
                            session.append(
                                SenderRole::Tool {
                                    tool_id: tool_id.clone(),
                                },
                                text.clone(),
                                MessageAnnotations {
                                    tool_id: Some(tool_id.clone()),
                                    target_agent_id: Some(for_agent.clone()),
                                    via_supervisor: Some(supervisor_mode),
                                    error: false,
                                },
                                Utc::now(),
                            );
                            self.events
                                .on_event(
                                    session_id,
                                    &StreamEvent::Tool {
                                        tool_id: tool_id.clone(),
                                        text: text.clone(),
                                        for_agent: for_agent.clone(),
                                        via_supervisor: Some(supervisor_mode),
                                    },
                                )
                                .await;
                            tool_outputs.insert(tool_id, text);
                        }
                        ToolOutcome::Skipped { reason } => {
                            log::debug!("tool '{}' skipped: {}", tool_id, reason);
                        }
                        ToolOutcome::Failed { error } => {
                            // A tool failure (including timeout) does not abort
                            // the turn: the dependent agent still runs with
                            // whatever tool outputs did succeed (§4.7, §8).
                            log::warn!("tool '{}' failed: {}", tool_id, error);
                        }
                    }
                }
                Step::AgentStep {
                    agent_id,
                    tools_context,
                    prior_agent_output,
                    manual,
                } => {
                    let agent_def = match self.registry.get(&agent_id).await {
                        Some(a) => a,
                        None if manual => {
                            let text = format!(
                                "manual plan referenced unknown agent '{}'; step skipped",
                                agent_id
                            );
                            session.append(
                                SenderRole::System,
                                text.clone(),
                                MessageAnnotations {
                                    error: true,
                                    ..Default::default()
                                },
                                Utc::now(),
                            );
                            self.events
                                .on_event(session_id, &StreamEvent::SystemError { text })
                                .await;
                            continue;
                        }
                        None => match self.registry.get(&self.default_agent_id).await {
                            Some(a) => a,
                            None => {
                                turn_error = Some(OrchestratorError::Plan(
                                    "no agents configured in catalog".to_string(),
                                ));
                                break;
                            }
                        },
                    };

                    let outputs_for_agent: Vec<(String, String)> = tools_context
                        .iter()
                        .filter_map(|id| tool_outputs.get(id).map(|t| (id.clone(), t.clone())))
                        .collect();
                    let prior = if prior_agent_output {
                        last_agent_output.as_deref()
                    } else {
                        None
                    };

                    let messages = self.agent_runner.compose_prompt(
                        &agent_def,
                        &outputs_for_agent,
                        prior,
                        fusion,
                        prompt,
                        &session.history,
                    );
                    let client = self.client_factory.client_for(&agent_def).await;
                    let outcome = self
                        .agent_runner
                        .run(
                            session_id,
                            &agent_def,
                            client.as_ref(),
                            &messages,
                            self.events.as_ref(),
                            cancel,
                            self.agent_timeout,
                        )
                        .await;

                    match outcome {
                        crate::loom::agent::AgentTurnOutcome::Completed { text } => {
                            session.append(
                                SenderRole::Agent {
                                    agent_id: agent_def.id.clone(),
                                },
                                text.clone(),
                                MessageAnnotations {
                                    via_supervisor: Some(supervisor_mode),
                                    ..Default::default()
                                },
                                Utc::now(),
                            );
                            last_agent_output = Some(text);
                        }
                        crate::loom::agent::AgentTurnOutcome::Cancelled => {
                            let text = "turn cancelled".to_string();
                            session.append(
                                SenderRole::System,
                                text.clone(),
                                MessageAnnotations {
                                    error: true,
                                    ..Default::default()
                                },
                                Utc::now(),
                            );
                            self.events
                                .on_event(session_id, &StreamEvent::SystemError { text })
                                .await;
                            turn_error = Some(OrchestratorError::Cancelled);
                        }
                        crate::loom::agent::AgentTurnOutcome::Failed { error } => {
                            let is_primary = primary_agent_id.as_deref() == Some(agent_def.id.as_str());
                            session.append(
                                SenderRole::System,
                                error.clone(),
                                MessageAnnotations {
                                    error: true,
                                    target_agent_id: Some(agent_def.id.clone()),
                                    ..Default::default()
                                },
                                Utc::now(),
                            );
                            self.events
                                .on_event(session_id, &StreamEvent::SystemError { text: error.clone() })
                                .await;
                            // A non-primary agent's provider failure doesn't
                            // abort the turn; only the primary agent's does
                            // (§7).
                            if is_primary {
                                turn_error = Some(OrchestratorError::Provider(error));
                            }
                        }
                    }
                }
                Step::DelegationStep { message, target_agent } => {
                    // An announcement only: no LLM call (§4.5).
                    session.append(
                        SenderRole::Supervisor,
                        message.clone(),
                        MessageAnnotations {
                            target_agent_id: Some(target_agent.clone()),
                            ..Default::default()
                        },
                        Utc::now(),
                    );
                    self.events
                        .on_event(
                            session_id,
                            &StreamEvent::Supervisor {
                                text: message,
                                routing_decision: Some("delegate".to_string()),
                                chosen_agent: Some(target_agent),
                                supervisor_type: Some("handoff".to_string()),
                            },
                        )
                        .await;
                }
            }
        }

        // Final supervisor acknowledgement naming the agent that produced the
        // user-facing answer (§4.7 step 5) — supervisor mode only, and only
        // when a step actually reached that point.
        if supervisor_mode && turn_error.is_none() && last_agent_output.is_some() {
            if let Some(agent_id) = primary_agent_id.as_deref() {
                let text = format!("{} provided the final answer.", agent_id);
                session.append(
                    SenderRole::Supervisor,
                    text.clone(),
                    MessageAnnotations {
                        target_agent_id: Some(agent_id.to_string()),
                        ..Default::default()
                    },
                    Utc::now(),
                );
                self.events
                    .on_event(
                        session_id,
                        &StreamEvent::Supervisor {
                            text,
                            routing_decision: Some("ack".to_string()),
                            chosen_agent: Some(agent_id.to_string()),
                            supervisor_type: Some("acknowledgement".to_string()),
                        },
                    )
                    .await;
            }
        }

        turn_error
    }
}
