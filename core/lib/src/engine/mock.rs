use super::{EngineError, ProvisioningEngine, StackDescription, StackRequest, UpdateOutcome};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Default)]
struct MockState {
    stack: Option<StackDescription>,
    /// Statuses reported by successive describe calls once an operation starts
    statuses: VecDeque<String>,
    operating: bool,
    status_reason: Option<String>,
    /// Errors returned by the next engine calls, in order
    failures: VecDeque<EngineError>,
    outputs: BTreeMap<String, String>,
    no_changes: bool,
    /// Delay before every engine call answers
    latency: Option<Duration>,
    calls: Vec<String>,
    requests: Vec<StackRequest>,
}

/// In-memory engine that replays a scripted status sequence
#[derive(Clone, Default)]
pub struct MockProvisioningEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockProvisioningEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose stack already exists with `status`
    pub fn existing(stack_name: &str, status: &str) -> Self {
        let engine = Self::new();
        engine.state().stack = Some(StackDescription {
            stack_name: stack_name.to_string(),
            stack_id: Some(format!(
                "arn:aws:cloudformation:us-east-1:123456789012:stack/{}/mock",
                stack_name
            )),
            status: status.to_string(),
            status_reason: None,
            outputs: BTreeMap::new(),
        });
        engine
    }

    pub fn with_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .statuses
            .extend(statuses.into_iter().map(Into::into));
        self
    }

    pub fn with_status_reason(self, reason: impl Into<String>) -> Self {
        self.state().status_reason = Some(reason.into());
        self
    }

    pub fn with_failures(self, failures: impl IntoIterator<Item = EngineError>) -> Self {
        self.state().failures.extend(failures);
        self
    }

    pub fn with_outputs<'a>(self, outputs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.state().outputs.extend(
            outputs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        self
    }

    /// Updates report that nothing changed
    pub fn without_changes(self) -> Self {
        self.state().no_changes = true;
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = Some(latency);
        self
    }

    /// Names of the engine calls made so far
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn last_request(&self) -> Option<StackRequest> {
        self.state().requests.last().cloned()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn respond(&self) {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            sleep(latency).await;
        }
    }

    fn begin(&self, call: &str) -> Result<MutexGuard<'_, MockState>, EngineError> {
        let mut state = self.state();
        state.calls.push(call.to_string());
        match state.failures.pop_front() {
            Some(failure) => Err(failure),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl ProvisioningEngine for MockProvisioningEngine {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackDescription>, EngineError> {
        self.respond().await;
        let mut state = self.begin("describe")?;
        let state = &mut *state;
        let Some(stack) = state
            .stack
            .as_mut()
            .filter(|stack| stack.stack_name == stack_name)
        else {
            return Ok(None);
        };
        let next = if state.operating {
            state.statuses.pop_front()
        } else {
            None
        };
        if let Some(status) = next {
            stack.status = status;
            if stack.phase() != super::StackPhase::InProgress {
                stack.status_reason = state.status_reason.clone();
                stack.outputs = state.outputs.clone();
            }
        }
        Ok(Some(stack.clone()))
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<String, EngineError> {
        self.respond().await;
        let mut state = self.begin("create")?;
        let stack_id = format!(
            "arn:aws:cloudformation:us-east-1:123456789012:stack/{}/mock",
            request.stack_name
        );
        state.stack = Some(StackDescription {
            stack_name: request.stack_name.clone(),
            stack_id: Some(stack_id.clone()),
            status: "CREATE_IN_PROGRESS".to_string(),
            status_reason: None,
            outputs: BTreeMap::new(),
        });
        state.requests.push(request.clone());
        state.operating = true;
        Ok(stack_id)
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateOutcome, EngineError> {
        self.respond().await;
        let mut guard = self.begin("update")?;
        let state = &mut *guard;
        state.requests.push(request.clone());
        if state.no_changes {
            return Ok(UpdateOutcome::NoChanges);
        }
        let Some(stack) = state.stack.as_mut() else {
            return Err(EngineError::StackNotFound(request.stack_name.clone()));
        };
        stack.status = "UPDATE_IN_PROGRESS".to_string();
        let stack_id = stack.stack_id.clone();
        state.operating = true;
        Ok(UpdateOutcome::Started { stack_id })
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), EngineError> {
        self.respond().await;
        let mut guard = self.begin("delete")?;
        let state = &mut *guard;
        match state.stack.as_mut() {
            Some(stack) if stack.stack_name == stack_name => {
                stack.status = "DELETE_IN_PROGRESS".to_string();
                state.operating = true;
                Ok(())
            }
            _ => Err(EngineError::StackNotFound(stack_name.to_string())),
        }
    }

    async fn stack_outputs(
        &self,
        stack_name: &str,
    ) -> Result<BTreeMap<String, String>, EngineError> {
        self.respond().await;
        let state = self.begin("outputs")?;
        match &state.stack {
            Some(stack) if stack.stack_name == stack_name => Ok(state.outputs.clone()),
            _ => Err(EngineError::StackNotFound(stack_name.to_string())),
        }
    }
}
