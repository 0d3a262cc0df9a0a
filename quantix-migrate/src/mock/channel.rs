//! Scripted remote channel.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::context::RequestContext;
use crate::error::Result;
use crate::rpc::{RemoteOutcome, RemoteProcedureChannel, RemoteRequest};

/// A request observed by [`MockChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub host: String,
    pub request: RemoteRequest,
}

struct ChannelState {
    script: VecDeque<Result<RemoteOutcome>>,
    fallback: Result<RemoteOutcome>,
    calls: Vec<RecordedCall>,
}

/// Channel replying from a script, then with a fixed fallback.
pub struct MockChannel {
    state: Mutex<ChannelState>,
}

impl MockChannel {
    /// Every call completes with `true`.
    pub fn new() -> Self {
        Self::always(Ok(RemoteOutcome::Completed(serde_json::Value::Bool(true))))
    }

    /// Every call gets `reply`.
    pub fn always(reply: Result<RemoteOutcome>) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                script: VecDeque::new(),
                fallback: reply,
                calls: Vec::new(),
            }),
        }
    }

    /// Queue a one-shot reply ahead of the fallback.
    pub fn push(&self, reply: Result<RemoteOutcome>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.script.push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.calls.clone()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteProcedureChannel for MockChannel {
    async fn call(
        &self,
        _ctx: &RequestContext,
        host: &str,
        request: RemoteRequest,
    ) -> Result<RemoteOutcome> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.calls.push(RecordedCall {
            host: host.to_string(),
            request,
        });
        match state.script.pop_front() {
            Some(reply) => reply,
            None => state.fallback.clone(),
        }
    }
}
