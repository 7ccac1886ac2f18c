//! Agent loop - plan, execute, verify.
//!
//! Each iteration renders a fresh prompt from the goal, environment facts and
//! the condensed iteration history, asks the reasoning service for a plan,
//! and either verifies (final or empty plans) or executes the plan's commands
//! in order. Command failures are folded into history for the next plan;
//! infrastructure failures end the run with an `error` event.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::install::any_install_command;
use super::prompt::{IterationView, PromptContext, PromptRenderer};
use crate::domain::{ConnectionDescriptor, ExecutionLog, ExecutionPlan, IterationHistory, IterationRecord, RunOutcome};
use crate::error::Result;
use crate::executor::BackendExecutor;
use crate::history::{HistoryStore, NoHistory};
use crate::llm::ReasoningClient;
use crate::registry::ConnectionRegistry;
use crate::retrieval::{KnowledgeMatch, NoRetrieval, RetrievalProvider};
use crate::stream::{EventSink, StreamEvent};
use crate::verification::{VerificationOutcome, Verifier, extract_subject};

/// Default iteration cap
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// One-shot check for OS and kernel facts, run before the first iteration.
pub const ENV_CHECK: &str = "uname -a; cat /etc/os-release 2>/dev/null | head -5";

/// Environment text used when the check fails.
pub const UNKNOWN_ENVIRONMENT: &str = "unknown";

/// Configuration for the AgentLoop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_iterations: u32,
    /// Per-command output shown to the planner, in characters
    pub output_truncate_chars: usize,
    /// Retrieval matches attached to the prompt
    pub retrieval_limit: usize,
    /// Accept an unverifiable goal only after some command has succeeded
    pub require_command_for_unverifiable: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output_truncate_chars: 2000,
            retrieval_limit: 3,
            require_command_for_unverifiable: true,
        }
    }
}

/// How a run left the iteration loop, before terminal events are emitted.
enum Finish {
    Completed {
        reasoning: String,
        verification: VerificationOutcome,
    },
    Exhausted,
    Aborted,
}

/// Mutable state of one goal execution.
#[derive(Default)]
struct RunState {
    history: IterationHistory,
    install_attempted: bool,
    /// Last iteration number started
    iteration: u32,
    knowledge: Option<Vec<KnowledgeMatch>>,
}

/// Drives goal executions against connections from a shared registry.
pub struct AgentLoop {
    llm: Arc<dyn ReasoningClient>,
    registry: Arc<ConnectionRegistry>,
    retrieval: Arc<dyn RetrievalProvider>,
    history_store: Arc<dyn HistoryStore>,
    verifier: Verifier,
    renderer: PromptRenderer,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn ReasoningClient>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            llm,
            registry,
            retrieval: Arc::new(NoRetrieval),
            history_store: Arc::new(NoHistory),
            verifier: Verifier::new(),
            renderer: PromptRenderer::new(),
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retrieval(mut self, retrieval: Arc<dyn RetrievalProvider>) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = store;
        self
    }

    pub fn with_renderer(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Execute `goal` on `connection`, publishing progress to `sink`.
    ///
    /// The stream ends with exactly one of `done`, `error` or `abort`.
    pub async fn run(
        &self,
        goal: &str,
        connection: &ConnectionDescriptor,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        log::info!("run started on {}: {:?}", connection.id, goal);
        sink.emit(StreamEvent::start(goal)).await;

        let mut state = RunState::default();
        let finish = self.drive(goal, connection, sink, cancel, &mut state).await;
        let iterations = state.iteration;

        match finish {
            Ok(Finish::Completed {
                reasoning,
                verification,
            }) => {
                log::info!("run on {} completed after {} iteration(s)", connection.id, iterations);
                sink.emit(StreamEvent::complete(&reasoning, &verification)).await;
                sink.emit(StreamEvent::done(true, iterations, state.history.into_records()))
                    .await;
                RunOutcome::Completed { iterations }
            }
            Ok(Finish::Exhausted) => {
                log::info!("run on {} exhausted {} iteration(s)", connection.id, iterations);
                sink.emit(StreamEvent::done(false, iterations, state.history.into_records()))
                    .await;
                RunOutcome::Exhausted { iterations }
            }
            Ok(Finish::Aborted) => {
                log::info!("run on {} aborted at iteration {}", connection.id, iterations);
                sink.emit(StreamEvent::abort(iterations)).await;
                RunOutcome::Aborted { iterations }
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("run on {} failed: {}", connection.id, message);
                sink.emit(StreamEvent::error(&message)).await;
                RunOutcome::Failed(message)
            }
        }
    }

    async fn drive(
        &self,
        goal: &str,
        connection: &ConnectionDescriptor,
        sink: &EventSink,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<Finish> {
        let executor = self.registry.get_executor(connection).await?;

        sink.emit(StreamEvent::status("Gathering environment information")).await;
        let environment = self.gather_environment(executor.as_ref(), &connection.id).await;
        let subject = extract_subject(goal);
        let max = self.config.max_iterations;

        while state.history.next_iteration() <= max {
            let iteration = state.history.next_iteration();
            if Self::stopped(cancel, sink) {
                return Ok(Finish::Aborted);
            }

            state.iteration = iteration;
            sink.emit(StreamEvent::iteration_start(iteration, max)).await;
            log::debug!("iteration {}/{} on {}", iteration, max, connection.id);

            if iteration >= 2 && state.knowledge.is_none() {
                state.knowledge = Some(self.lookup_knowledge(subject.as_deref(), sink).await);
            }

            let prompt = self.renderer.render(&self.prompt_context(goal, &environment, state))?;
            let response = tokio::select! {
                _ = cancel.cancelled() => return Ok(Finish::Aborted),
                response = self.llm.complete(&prompt) => response?,
            };
            let plan = ExecutionPlan::parse(&response)?;
            sink.emit(StreamEvent::reasoning(iteration, &plan.reasoning)).await;

            if plan.is_final_step || !plan.has_commands() {
                sink.emit(StreamEvent::status("Verifying task completion")).await;
                let verification = self.verify(goal, executor.as_ref(), &connection.id, &state.history).await?;
                sink.emit(StreamEvent::verification(&verification)).await;

                if verification.success {
                    return Ok(Finish::Completed {
                        reasoning: plan.reasoning,
                        verification,
                    });
                }

                if !plan.has_commands() {
                    sink.emit(StreamEvent::status_with_verification(
                        "Task marked complete but verification failed, re-planning",
                        &verification,
                    ))
                    .await;
                    state
                        .history
                        .push(IterationRecord::verification_failure(iteration, plan, verification.to_log()))?;
                    sink.emit(StreamEvent::iteration_complete(iteration)).await;
                    continue;
                }
            }

            if Self::stopped(cancel, sink) {
                return Ok(Finish::Aborted);
            }

            let logs = self
                .execute_batch(executor.as_ref(), &connection.id, &plan.commands, sink)
                .await?;
            if any_install_command(&plan.commands) {
                state.install_attempted = true;
            }
            state.history.push(IterationRecord::executed(iteration, plan, logs))?;
            sink.emit(StreamEvent::iteration_complete(iteration)).await;
        }

        Ok(Finish::Exhausted)
    }

    fn stopped(cancel: &CancellationToken, sink: &EventSink) -> bool {
        cancel.is_cancelled() || sink.is_closed()
    }

    /// Run a plan's commands sequentially; later commands may depend on
    /// earlier ones.
    async fn execute_batch(
        &self,
        executor: &dyn BackendExecutor,
        connection_id: &str,
        commands: &[String],
        sink: &EventSink,
    ) -> Result<Vec<ExecutionLog>> {
        let mut logs = Vec::with_capacity(commands.len());
        for command in commands {
            sink.emit(StreamEvent::command_start(command)).await;
            let log = executor.execute(command).await?;
            self.record(connection_id, &log).await;
            sink.emit(StreamEvent::command_output(&log)).await;
            logs.push(log);
        }
        Ok(logs)
    }

    /// Run the verifier and apply the unverifiable-goal policy.
    async fn verify(
        &self,
        goal: &str,
        executor: &dyn BackendExecutor,
        connection_id: &str,
        history: &IterationHistory,
    ) -> Result<VerificationOutcome> {
        let mut outcome = self.verifier.verify(goal, executor).await?;
        if let Some(log) = &outcome.log {
            self.record(connection_id, log).await;
        }
        if outcome.unverifiable && self.config.require_command_for_unverifiable && !history.any_command_succeeded() {
            log::info!("unverifiable goal rejected: no command has succeeded yet");
            outcome.success = false;
            outcome.output = format!(
                "{} and no command has succeeded yet; run at least one command that achieves it",
                outcome.output
            );
        }
        Ok(outcome)
    }

    async fn gather_environment(&self, executor: &dyn BackendExecutor, connection_id: &str) -> String {
        match executor.execute(ENV_CHECK).await {
            Ok(log) => {
                self.record(connection_id, &log).await;
                let facts = log.output.trim();
                if log.is_success() && !facts.is_empty() {
                    facts.to_string()
                } else {
                    log::warn!("environment check failed on {} (exit {})", connection_id, log.exit_code);
                    UNKNOWN_ENVIRONMENT.to_string()
                }
            }
            Err(e) => {
                log::warn!("environment check raised on {}: {}", connection_id, e);
                UNKNOWN_ENVIRONMENT.to_string()
            }
        }
    }

    /// Fetch retrieval context once; failures leave it out.
    async fn lookup_knowledge(&self, subject: Option<&str>, sink: &EventSink) -> Vec<KnowledgeMatch> {
        let Some(subject) = subject else {
            return Vec::new();
        };
        match self.retrieval.search(subject, self.config.retrieval_limit).await {
            Ok(matches) => {
                if !matches.is_empty() {
                    sink.emit(StreamEvent::status(format!(
                        "Found {} reference(s) for {}",
                        matches.len(),
                        subject
                    )))
                    .await;
                }
                matches
            }
            Err(e) => {
                log::warn!("retrieval for {:?} failed: {}", subject, e);
                Vec::new()
            }
        }
    }

    async fn record(&self, connection_id: &str, log: &ExecutionLog) {
        if let Err(e) = self.history_store.record_command(connection_id, log).await {
            log::warn!("failed to record command history for {}: {}", connection_id, e);
        }
    }

    fn prompt_context(&self, goal: &str, environment: &str, state: &RunState) -> PromptContext {
        let truncate = self.config.output_truncate_chars;
        PromptContext {
            goal: goal.to_string(),
            environment: environment.to_string(),
            iteration: state.history.next_iteration(),
            max_iterations: self.config.max_iterations,
            install_attempted: state.install_attempted,
            history: state
                .history
                .records()
                .iter()
                .map(|r| IterationView::from_record(r, truncate))
                .collect(),
            knowledge: state.knowledge.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConnectionKind;
    use crate::error::PilotError;
    use crate::history::InMemoryHistoryStore;
    use crate::llm::MockReasoningClient;
    use crate::registry::ExecutorFactory;
    use crate::retrieval::{KeywordRetrieval, KnowledgeEntry};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Executor answering by command prefix, recording what it ran.
    struct FakeExecutor {
        rules: Vec<(String, String, i32)>,
        received: Mutex<Vec<String>>,
        raise_on: Option<String>,
    }

    impl FakeExecutor {
        fn new(rules: &[(&str, &str, i32)]) -> Self {
            Self {
                rules: rules
                    .iter()
                    .map(|(p, o, c)| (p.to_string(), o.to_string(), *c))
                    .collect(),
                received: Mutex::new(Vec::new()),
                raise_on: None,
            }
        }

        fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BackendExecutor for FakeExecutor {
        fn kind(&self) -> ConnectionKind {
            ConnectionKind::Local
        }

        async fn execute(&self, command: &str) -> Result<ExecutionLog> {
            self.received.lock().unwrap().push(command.to_string());
            if self.raise_on.as_deref() == Some(command) {
                return Err(PilotError::Executor("session vanished".to_string()));
            }
            for (prefix, output, code) in &self.rules {
                if command.starts_with(prefix.as_str()) {
                    return Ok(ExecutionLog::completed(command, output.as_str(), *code));
                }
            }
            Ok(ExecutionLog::completed(command, "", 0))
        }

        async fn disconnect(&self) {}
    }

    struct FixedFactory(Arc<FakeExecutor>);

    #[async_trait]
    impl ExecutorFactory for FixedFactory {
        async fn create(&self, _descriptor: &ConnectionDescriptor) -> Result<Arc<dyn BackendExecutor>> {
            Ok(self.0.clone())
        }
    }

    fn plan_json(commands: &[&str], final_step: bool) -> String {
        serde_json::json!({
            "reasoning": format!("running {} command(s)", commands.len()),
            "commands": commands,
            "expectedOutcome": "progress",
            "isFinalStep": final_step,
        })
        .to_string()
    }

    fn agent(exec: Arc<FakeExecutor>, llm: Arc<MockReasoningClient>) -> AgentLoop {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(FixedFactory(exec))));
        AgentLoop::new(llm, registry)
    }

    async fn run_collect(agent: &AgentLoop, goal: &str, cancel: &CancellationToken) -> (RunOutcome, Vec<StreamEvent>) {
        let (sink, mut rx) = EventSink::channel(1024);
        let outcome = agent.run(goal, &ConnectionDescriptor::local("test"), &sink, cancel).await;
        drop(sink);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (outcome, events)
    }

    fn tags(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::tag).collect()
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.output_truncate_chars, 2000);
        assert_eq!(config.retrieval_limit, 3);
        assert!(config.require_command_for_unverifiable);
    }

    #[tokio::test]
    async fn test_final_step_verified_completes_without_running_commands() {
        let exec = Arc::new(FakeExecutor::new(&[("nginx -v", "nginx version: nginx/1.24.0", 0)]));
        let llm = Arc::new(MockReasoningClient::new([plan_json(&["systemctl restart nginx"], true)]));
        let agent = agent(exec.clone(), llm);

        let (outcome, events) = run_collect(&agent, "install nginx", &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Completed { iterations: 1 });
        assert_eq!(
            tags(&events),
            vec!["start", "status", "iteration_start", "reasoning", "status", "verification", "complete", "done"]
        );
        assert_eq!(exec.received(), vec![ENV_CHECK, "nginx -v 2>&1"]);
    }

    #[tokio::test]
    async fn test_final_step_unverified_runs_commands() {
        let exec = Arc::new(FakeExecutor::new(&[("nginx -v", "nginx: not found", 127)]));
        let llm = Arc::new(MockReasoningClient::new([plan_json(&["apt-get install -y nginx"], true)]));
        let agent = agent(exec.clone(), llm.clone()).with_config(AgentConfig {
            max_iterations: 1,
            ..Default::default()
        });

        let (outcome, events) = run_collect(&agent, "install nginx", &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Exhausted { iterations: 1 });
        assert!(exec.received().contains(&"apt-get install -y nginx".to_string()));
        let last = events.last().unwrap();
        match last {
            StreamEvent::Done(done) => {
                assert!(!done.success);
                assert_eq!(done.execution_history.len(), 1);
                assert_eq!(done.execution_history[0].logs.len(), 1);
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_install_flag_reaches_next_prompt() {
        let exec = Arc::new(FakeExecutor::new(&[("nginx -v", "nginx version: nginx/1.24.0", 0)]));
        let llm = Arc::new(MockReasoningClient::new([
            plan_json(&["apt-get install -y nginx"], false),
            plan_json(&[], true),
        ]));
        let agent = agent(exec, llm.clone());

        let (outcome, _) = run_collect(&agent, "install nginx", &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Completed { iterations: 2 });
        let prompts = llm.prompts();
        assert!(prompts[0].contains("No install command has been run yet."));
        assert!(prompts[1].contains("An install command has already been run."));
        assert!(prompts[1].contains("$ apt-get install -y nginx"));
    }

    #[tokio::test]
    async fn test_unverifiable_goal_needs_a_successful_command() {
        let exec = Arc::new(FakeExecutor::new(&[]));
        let llm = Arc::new(MockReasoningClient::new([
            plan_json(&[], true),
            plan_json(&["echo configured"], false),
            plan_json(&[], true),
        ]));
        let agent = agent(exec, llm);

        let (outcome, events) = run_collect(&agent, "配置", &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Completed { iterations: 3 });
        let verifications: Vec<bool> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Verification(v) => Some(v.success),
                _ => None,
            })
            .collect();
        assert_eq!(verifications, vec![false, true]);
    }

    #[tokio::test]
    async fn test_unverifiable_goal_accepted_when_policy_disabled() {
        let exec = Arc::new(FakeExecutor::new(&[]));
        let llm = Arc::new(MockReasoningClient::new([plan_json(&[], true)]));
        let agent = agent(exec, llm).with_config(AgentConfig {
            require_command_for_unverifiable: false,
            ..Default::default()
        });

        let (outcome, _) = run_collect(&agent, "配置", &CancellationToken::new()).await;
        assert_eq!(outcome, RunOutcome::Completed { iterations: 1 });
    }

    #[tokio::test]
    async fn test_reasoning_failure_is_fatal() {
        let exec = Arc::new(FakeExecutor::new(&[]));
        let llm = Arc::new(MockReasoningClient::default());
        llm.push_failure("overloaded");
        let agent = agent(exec, llm);

        let (outcome, events) = run_collect(&agent, "install nginx", &CancellationToken::new()).await;

        assert!(matches!(outcome, RunOutcome::Failed(_)));
        assert_eq!(tags(&events).last(), Some(&"error"));
        assert!(!tags(&events).contains(&"done"));
    }

    #[tokio::test]
    async fn test_executor_raising_is_fatal() {
        let mut fake = FakeExecutor::new(&[]);
        fake.raise_on = Some("ls /srv".to_string());
        let exec = Arc::new(fake);
        let llm = Arc::new(MockReasoningClient::new([plan_json(&["ls /srv", "echo after"], false)]));
        let agent = agent(exec.clone(), llm);

        let (outcome, events) = run_collect(&agent, "install nginx", &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Failed("Executor error: session vanished".to_string()));
        assert!(!exec.received().contains(&"echo after".to_string()));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_environment_check_failure_is_not_fatal() {
        let exec = Arc::new(FakeExecutor::new(&[("uname", "uname: not found", 127)]));
        let llm = Arc::new(MockReasoningClient::new([plan_json(&["true"], false)]));
        let agent = agent(exec, llm.clone()).with_config(AgentConfig {
            max_iterations: 1,
            ..Default::default()
        });

        let (outcome, _) = run_collect(&agent, "install nginx", &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Exhausted { iterations: 1 });
        assert!(llm.prompts()[0].contains("## Target environment\nunknown"));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_aborts() {
        let exec = Arc::new(FakeExecutor::new(&[]));
        let llm = Arc::new(MockReasoningClient::new([plan_json(&["true"], false)]));
        let agent = agent(exec, llm.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (outcome, events) = run_collect(&agent, "install nginx", &cancel).await;

        assert_eq!(outcome, RunOutcome::Aborted { iterations: 0 });
        assert_eq!(tags(&events).last(), Some(&"abort"));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_history_store_records_every_command() {
        let exec = Arc::new(FakeExecutor::new(&[("nginx -v", "nginx version: nginx/1.24.0", 0)]));
        let llm = Arc::new(MockReasoningClient::new([
            plan_json(&["apt-get update", "apt-get install -y nginx"], false),
            plan_json(&[], true),
        ]));
        let store = Arc::new(InMemoryHistoryStore::new());
        let agent = agent(exec, llm).with_history_store(store.clone());

        run_collect(&agent, "install nginx", &CancellationToken::new()).await;

        let commands: Vec<String> = store.entries().into_iter().map(|e| e.command).collect();
        assert_eq!(
            commands,
            vec![ENV_CHECK, "apt-get update", "apt-get install -y nginx", "nginx -v 2>&1"]
        );
    }

    #[tokio::test]
    async fn test_retrieval_attached_from_second_iteration() {
        let exec = Arc::new(FakeExecutor::new(&[]));
        let llm = Arc::new(MockReasoningClient::new([
            plan_json(&["true"], false),
            plan_json(&["true"], false),
        ]));
        let retrieval = Arc::new(KeywordRetrieval::new(vec![KnowledgeEntry {
            title: "Nginx on Debian".to_string(),
            content: "apt-get install -y nginx".to_string(),
            commands: None,
            keywords: vec!["nginx".to_string()],
        }]));
        let agent = agent(exec, llm.clone())
            .with_retrieval(retrieval)
            .with_config(AgentConfig {
                max_iterations: 2,
                ..Default::default()
            });

        run_collect(&agent, "install nginx", &CancellationToken::new()).await;

        let prompts = llm.prompts();
        assert!(!prompts[0].contains("Nginx on Debian"));
        assert!(prompts[1].contains("### Nginx on Debian"));
    }
}
