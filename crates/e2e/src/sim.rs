//! In-memory eventually consistent cloud double
//!
//! Implements every remote boundary the harness polls against. Each
//! externally observable effect is stamped with a visibility deadline;
//! reads before the deadline see the previous state, reads after it see
//! the new one. That makes convergence real in tests instead of mocked
//! away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use vigil_harness::activity::{ActivityService, TaskHandoff};
use vigil_harness::error::{Error, Result};
use vigil_harness::invoke::{ActionOutcome, InvocationKind, ResourceInvoker};
use vigil_harness::logs::LogObserver;
use vigil_harness::queue::{MessageSource, QueueMessage};
use vigil_harness::snapshot::Variables;
use vigil_harness::stack::{require_output, StackLifecycle};
use vigil_harness::workflow::{ExecutionSnapshot, ExecutionStatus, WorkflowObserver};

/// How often blocked receives and polls re-check state.
const POLL_TICK: Duration = Duration::from_millis(5);

/// Tunables for the simulated cloud.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Delay before any effect becomes externally observable.
    pub visibility_delay: Duration,

    /// Long-poll bound for task acquisition.
    pub poll_wait: Duration,

    /// Account id stamped into resource names.
    pub account_id: String,

    /// Region stamped into resource names.
    pub region: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            visibility_delay: Duration::from_millis(25),
            poll_wait: Duration::from_millis(500),
            account_id: "123456789012".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Snapshot-friendly view of one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub name: String,
    pub url: String,
    pub arn: String,

    /// Access policy, embedded as JSON text the way the control plane
    /// returns it.
    pub policy: String,

    pub created_at: String,
}

struct StoredMessage {
    id: String,
    body: String,
    visible_at: Instant,
    receive_count: u32,
    sent_at: DateTime<Utc>,
    dedup: Option<String>,
}

struct QueueState {
    url: String,
    arn: String,
    policy: String,
    created_at: DateTime<Utc>,
    messages: Vec<StoredMessage>,
}

struct ExecutionState {
    observed_status: ExecutionStatus,
    target_status: ExecutionStatus,
    visible_at: Instant,
    cause: Option<String>,
    error: Option<String>,
    output: Option<String>,
    token: Option<String>,
}

struct PendingTask {
    execution: String,
    input: Value,
    visible_at: Instant,
}

struct TokenState {
    execution: String,
    exhausted: bool,
    heartbeats: u32,
}

struct LogLine {
    text: String,
    visible_at: Instant,
}

#[derive(Default)]
struct SimState {
    deployed: bool,
    planned_queues: Vec<String>,
    workflows: HashMap<String, String>,
    queues: HashMap<String, QueueState>,
    executions: HashMap<String, ExecutionState>,
    pending: HashMap<String, Vec<PendingTask>>,
    tokens: HashMap<String, TokenState>,
    logs: HashMap<String, Vec<LogLine>>,
    objects: HashMap<String, Vec<u8>>,
    outputs: HashMap<String, HashMap<String, String>>,
}

/// The simulated cloud. Cheap to clone; all handles share one state.
#[derive(Clone)]
pub struct SimCloud {
    config: SimConfig,
    state: Arc<Mutex<SimState>>,
}

impl Default for SimCloud {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimCloud {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Declare a queue to be materialized by the next deploy.
    pub fn plan_queue(&self, name: &str) {
        self.state.lock().planned_queues.push(name.to_string());
    }

    /// Declare a workflow whose executions park on `channel`.
    pub fn plan_workflow(&self, machine: &str, channel: &str) {
        self.state
            .lock()
            .workflows
            .insert(machine.to_string(), channel.to_string());
    }

    /// Receive handle for one queue.
    pub fn queue(&self, name: &str) -> SimQueue {
        SimQueue {
            cloud: self.clone(),
            name: name.to_string(),
        }
    }

    /// The task-protocol boundary as a shareable service.
    pub fn service(&self) -> Arc<dyn ActivityService> {
        Arc::new(self.clone())
    }

    pub fn account_id(&self) -> &str {
        &self.config.account_id
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Fixture template variables matching this cloud's identity.
    pub fn template_vars(&self) -> Variables {
        Variables::new()
            .set("AccountId", self.config.account_id.as_str())
            .set("Region", self.config.region.as_str())
            .set("Partition", "aws")
    }

    /// Control-plane view of a queue for snapshot checks.
    pub fn queue_info(&self, name: &str) -> Result<QueueInfo> {
        let state = self.state.lock();
        let queue = state.queues.get(name).ok_or_else(|| Error::NotFound {
            kind: "queue".to_string(),
            id: name.to_string(),
        })?;
        Ok(QueueInfo {
            name: name.to_string(),
            url: queue.url.clone(),
            arn: queue.arn.clone(),
            policy: queue.policy.clone(),
            created_at: queue.created_at.to_rfc3339(),
        })
    }

    /// Stored object body, if any.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(&format!("{}/{}", bucket, key))
            .cloned()
    }

    fn queue_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:sqs:{}:{}:{}",
            self.config.region, self.config.account_id, name
        )
    }
}

fn observed_now(exec: &ExecutionState) -> ExecutionStatus {
    if Instant::now() >= exec.visible_at {
        exec.target_status
    } else {
        exec.observed_status
    }
}

impl SimCloud {
    fn resolve_task(
        &self,
        token: &str,
        to: ExecutionStatus,
        cause: Option<String>,
        error: Option<String>,
        output: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let execution = {
            let token_state = state.tokens.get_mut(token).ok_or_else(|| {
                Error::ProtocolViolation("unknown task token".to_string())
            })?;
            if token_state.exhausted {
                return Err(Error::TokenExhausted);
            }
            token_state.exhausted = true;
            token_state.execution.clone()
        };
        let exec = state
            .executions
            .get_mut(&execution)
            .ok_or_else(|| Error::NotFound {
                kind: "execution".to_string(),
                id: execution.clone(),
            })?;
        exec.observed_status = observed_now(exec);
        exec.target_status = to;
        exec.visible_at = Instant::now() + self.config.visibility_delay;
        exec.cause = cause;
        exec.error = error;
        exec.output = output;
        info!("execution '{}' resolving to {}", execution, to);
        Ok(())
    }
}

#[async_trait]
impl StackLifecycle for SimCloud {
    async fn deploy(&self) -> Result<()> {
        let mut state = self.state.lock();
        let planned = state.planned_queues.clone();
        for name in planned {
            let url = format!(
                "https://sqs.{}.sim/{}/{}",
                self.config.region, self.config.account_id, name
            );
            let arn = self.queue_arn(&name);
            let policy = json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": "sqs:SendMessage",
                    "Resource": arn,
                }],
            })
            .to_string();
            state.queues.insert(
                name.clone(),
                QueueState {
                    url: url.clone(),
                    arn: arn.clone(),
                    policy,
                    created_at: Utc::now(),
                    messages: Vec::new(),
                },
            );
            let outputs = state.outputs.entry(name.clone()).or_default();
            outputs.insert("url".to_string(), url);
            outputs.insert("arn".to_string(), arn);
        }
        state.deployed = true;
        info!("deployed {} queues, {} workflows", state.queues.len(), state.workflows.len());
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.queues.clear();
        state.executions.clear();
        state.pending.clear();
        state.tokens.clear();
        state.logs.clear();
        state.objects.clear();
        state.outputs.clear();
        state.deployed = false;
        info!("destroyed all simulated resources");
        Ok(())
    }

    async fn output(&self, key: &str, attribute: &str) -> Result<String> {
        let state = self.state.lock();
        let value = state
            .outputs
            .get(key)
            .and_then(|attrs| attrs.get(attribute))
            .map(|v| v.as_str());
        require_output(value, key, attribute)
    }
}

#[async_trait]
impl WorkflowObserver for SimCloud {
    async fn start_execution(&self, machine: &str, input: &Value) -> Result<String> {
        let mut state = self.state.lock();
        if !state.deployed {
            return Err(Error::Internal(
                "deploy the stack before starting executions".to_string(),
            ));
        }
        let channel = state
            .workflows
            .get(machine)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "workflow".to_string(),
                id: machine.to_string(),
            })?;
        let execution = format!(
            "arn:aws:states:{}:{}:execution:{}:{}",
            self.config.region,
            self.config.account_id,
            machine,
            Uuid::new_v4()
        );
        state.executions.insert(
            execution.clone(),
            ExecutionState {
                observed_status: ExecutionStatus::Running,
                target_status: ExecutionStatus::Running,
                visible_at: Instant::now(),
                cause: None,
                error: None,
                output: None,
                token: None,
            },
        );
        state
            .pending
            .entry(channel)
            .or_default()
            .push(PendingTask {
                execution: execution.clone(),
                input: input.clone(),
                visible_at: Instant::now() + self.config.visibility_delay,
            });
        info!("started execution of '{}'", machine);
        Ok(execution)
    }

    async fn stop_execution(&self, execution: &str) -> Result<()> {
        let mut state = self.state.lock();
        let exec = state
            .executions
            .get_mut(execution)
            .ok_or_else(|| Error::NotFound {
                kind: "execution".to_string(),
                id: execution.to_string(),
            })?;
        exec.observed_status = observed_now(exec);
        exec.target_status = ExecutionStatus::Aborted;
        exec.visible_at = Instant::now() + self.config.visibility_delay;
        exec.cause = Some("stopped by caller".to_string());
        let parked = exec.token.clone();
        if let Some(token) = parked {
            if let Some(token_state) = state.tokens.get_mut(&token) {
                token_state.exhausted = true;
            }
        }
        // Work not yet handed out dies with the execution.
        for tasks in state.pending.values_mut() {
            tasks.retain(|t| t.execution != execution);
        }
        info!("stopping execution '{}'", execution);
        Ok(())
    }

    async fn describe_execution(&self, execution: &str) -> Result<ExecutionSnapshot> {
        let state = self.state.lock();
        let exec = state
            .executions
            .get(execution)
            .ok_or_else(|| Error::NotFound {
                kind: "execution".to_string(),
                id: execution.to_string(),
            })?;
        let visible = Instant::now() >= exec.visible_at;
        let status = if visible {
            exec.target_status
        } else {
            exec.observed_status
        };
        Ok(ExecutionSnapshot {
            status,
            cause: if visible { exec.cause.clone() } else { None },
            error: if visible { exec.error.clone() } else { None },
            output: if visible { exec.output.clone() } else { None },
        })
    }
}

#[async_trait]
impl ActivityService for SimCloud {
    async fn poll_task(&self, channel: &str, worker: &str) -> Result<Option<TaskHandoff>> {
        {
            let state = self.state.lock();
            if !state.workflows.values().any(|c| c == channel) {
                return Err(Error::NotFound {
                    kind: "activity channel".to_string(),
                    id: channel.to_string(),
                });
            }
        }
        let deadline = Instant::now() + self.config.poll_wait;
        loop {
            {
                let mut state = self.state.lock();
                let now = Instant::now();
                let ready = state
                    .pending
                    .get_mut(channel)
                    .and_then(|tasks| {
                        tasks
                            .iter()
                            .position(|t| t.visible_at <= now)
                            .map(|pos| tasks.remove(pos))
                    });
                if let Some(task) = ready {
                    let token = Uuid::new_v4().to_string();
                    state.tokens.insert(
                        token.clone(),
                        TokenState {
                            execution: task.execution.clone(),
                            exhausted: false,
                            heartbeats: 0,
                        },
                    );
                    if let Some(exec) = state.executions.get_mut(&task.execution) {
                        exec.token = Some(token.clone());
                    }
                    debug!("handing task on '{}' to worker '{}'", channel, worker);
                    return Ok(Some(TaskHandoff {
                        input: task.input,
                        token,
                    }));
                }
            }
            if Instant::now() >= deadline {
                debug!("no task on '{}' within the poll bound", channel);
                return Ok(None);
            }
            tokio::time::sleep(POLL_TICK).await;
        }
    }

    async fn record_heartbeat(&self, token: &str) -> Result<()> {
        let mut state = self.state.lock();
        let token_state = state.tokens.get_mut(token).ok_or_else(|| {
            Error::ProtocolViolation("unknown task token".to_string())
        })?;
        if token_state.exhausted {
            return Err(Error::TokenExhausted);
        }
        token_state.heartbeats += 1;
        debug!(
            "heartbeat {} for execution '{}'",
            token_state.heartbeats, token_state.execution
        );
        Ok(())
    }

    async fn record_success(&self, token: &str, output: &str) -> Result<()> {
        self.resolve_task(
            token,
            ExecutionStatus::Succeeded,
            None,
            None,
            Some(output.to_string()),
        )
    }

    async fn record_failure(&self, token: &str, error_code: &str, cause: &str) -> Result<()> {
        self.resolve_task(
            token,
            ExecutionStatus::Failed,
            Some(cause.to_string()),
            Some(error_code.to_string()),
            None,
        )
    }
}

#[async_trait]
impl ResourceInvoker for SimCloud {
    async fn invoke_function(
        &self,
        function: &str,
        kind: InvocationKind,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        // Dry runs validate without executing, so they leave no log trail.
        if kind != InvocationKind::DryRun {
            let request_id = Uuid::new_v4();
            let visible_at = Instant::now() + self.config.visibility_delay;
            let group = format!("/sim/function/{}", function);
            let mut state = self.state.lock();
            let lines = state.logs.entry(group).or_default();
            lines.push(LogLine {
                text: format!("START RequestId: {}", request_id),
                visible_at,
            });
            lines.push(LogLine {
                text: format!("INVOKE {} {}", function, payload),
                visible_at,
            });
            lines.push(LogLine {
                text: format!("END RequestId: {}", request_id),
                visible_at,
            });
        }
        debug!("invoked '{}' as {}", function, kind);
        let outcome = match kind {
            InvocationKind::RequestResponse => ActionOutcome {
                status_code: 200,
                payload: Some(json!({ "ok": true, "echo": payload }).to_string()),
            },
            InvocationKind::Event => ActionOutcome {
                status_code: 202,
                payload: None,
            },
            InvocationKind::DryRun => ActionOutcome {
                status_code: 204,
                payload: None,
            },
        };
        Ok(outcome)
    }

    async fn send_message(
        &self,
        queue: &str,
        body: &str,
        _group: Option<&str>,
        dedup: Option<&str>,
    ) -> Result<String> {
        let mut state = self.state.lock();
        let visible_at = Instant::now() + self.config.visibility_delay;
        let queue_state = state.queues.get_mut(queue).ok_or_else(|| Error::NotFound {
            kind: "queue".to_string(),
            id: queue.to_string(),
        })?;
        // FIFO-style dedup: a repeated dedup id acknowledges the original
        // message instead of enqueueing a copy.
        if let Some(dedup_id) = dedup {
            if let Some(existing) = queue_state
                .messages
                .iter()
                .find(|m| m.dedup.as_deref() == Some(dedup_id))
            {
                return Ok(existing.id.clone());
            }
        }
        let id = Uuid::new_v4().to_string();
        queue_state.messages.push(StoredMessage {
            id: id.clone(),
            body: body.to_string(),
            visible_at,
            receive_count: 0,
            sent_at: Utc::now(),
            dedup: dedup.map(|d| d.to_string()),
        });
        info!("message {} sent to '{}'", id, queue);
        Ok(id)
    }

    async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state
            .objects
            .insert(format!("{}/{}", bucket, key), body.to_vec());
        debug!("stored object '{}/{}' ({} bytes)", bucket, key, body.len());
        Ok(())
    }
}

#[async_trait]
impl LogObserver for SimCloud {
    async fn fetch_events(&self, group: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        let now = Instant::now();
        let events = state
            .logs
            .get(group)
            .map(|lines| {
                lines
                    .iter()
                    .filter(|l| l.visible_at <= now)
                    .map(|l| l.text.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(events)
    }
}

/// Receive handle for one simulated queue.
pub struct SimQueue {
    cloud: SimCloud,
    name: String,
}

#[async_trait]
impl MessageSource for SimQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut state = self.cloud.state.lock();
                let queue_state =
                    state.queues.get_mut(&self.name).ok_or_else(|| Error::NotFound {
                        kind: "queue".to_string(),
                        id: self.name.clone(),
                    })?;
                let now = Instant::now();
                if let Some(message) = queue_state
                    .messages
                    .iter_mut()
                    .find(|m| m.visible_at <= now)
                {
                    message.receive_count += 1;
                    return Ok(Some(QueueMessage {
                        receipt_handle: format!("{}#{}", message.id, message.receive_count),
                        body: message.body.clone(),
                        receive_count: message.receive_count,
                        sent_at: message.sent_at,
                    }));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_TICK).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate() -> SimCloud {
        SimCloud::new(SimConfig {
            visibility_delay: Duration::ZERO,
            ..SimConfig::default()
        })
    }

    #[tokio::test]
    async fn deploy_materializes_planned_queues_with_outputs() {
        let cloud = immediate();
        cloud.plan_queue("orders");
        cloud.deploy().await.unwrap();

        let url = cloud.output("orders", "url").await.unwrap();
        assert!(url.contains("orders"), "got: {}", url);
        let info = cloud.queue_info("orders").unwrap();
        assert!(info.arn.ends_with(":orders"));
        assert!(info.policy.contains("sqs:SendMessage"));
    }

    #[tokio::test]
    async fn destroy_clears_resources_and_outputs() {
        let cloud = immediate();
        cloud.plan_queue("orders");
        cloud.deploy().await.unwrap();
        cloud.destroy().await.unwrap();

        assert!(cloud.queue_info("orders").is_err());
        assert!(matches!(
            cloud.output("orders", "url").await.unwrap_err(),
            Error::MissingOutput { .. }
        ));
    }

    #[tokio::test]
    async fn sending_to_an_unknown_queue_fails() {
        let cloud = immediate();
        let err = cloud
            .send_message("missing", "hi", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn duplicate_dedup_ids_collapse_to_one_message() {
        let cloud = immediate();
        cloud.plan_queue("orders.fifo");
        cloud.deploy().await.unwrap();

        let first = cloud
            .send_message("orders.fifo", "a", Some("g1"), Some("d1"))
            .await
            .unwrap();
        let second = cloud
            .send_message("orders.fifo", "a", Some("g1"), Some("d1"))
            .await
            .unwrap();
        assert_eq!(first, second, "second send must acknowledge the first");

        let state = cloud.state.lock();
        assert_eq!(state.queues["orders.fifo"].messages.len(), 1);
    }

    #[tokio::test]
    async fn objects_are_stored_verbatim() {
        let cloud = immediate();
        cloud.put_object("artifacts", "report.txt", b"ok").await.unwrap();
        assert_eq!(cloud.object("artifacts", "report.txt").unwrap(), b"ok");
    }
}
