//! Bookkeeping for human-authentication pauses.
//!
//! The gate only tracks requests. Presenting a request to a human is the
//! caller's job (see `io::human`).

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

/// Default ceiling on authentication requests per task.
pub const DEFAULT_MAX_AUTH_REQUESTS: u32 = 5;

/// One pause for human input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthRequest {
    pub task_id: String,
    pub description: String,
    /// Monotonically increasing across the gate's lifetime.
    pub seq: u64,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthGateError {
    #[error("authentication attempts exhausted for task {task_id} (limit {limit})")]
    AuthLimitExceeded { task_id: String, limit: u32 },
    #[error("no pending authentication request for task {task_id}")]
    NoPendingAuth { task_id: String },
    #[error("task {task_id} already has pending authentication request #{seq}")]
    AuthAlreadyPending { task_id: String, seq: u64 },
}

#[derive(Debug, Default)]
struct TaskAuthState {
    opened: u32,
    pending: Option<AuthRequest>,
}

/// Per-task authentication request tracker.
#[derive(Debug)]
pub struct AuthGate {
    max_requests: u32,
    next_seq: u64,
    tasks: HashMap<String, TaskAuthState>,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AUTH_REQUESTS)
    }
}

impl AuthGate {
    pub fn new(max_requests: u32) -> Self {
        Self {
            max_requests,
            next_seq: 1,
            tasks: HashMap::new(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Open a new pending request for `task_id`.
    ///
    /// Counts pending and resolved requests alike against the ceiling.
    pub fn open(&mut self, task_id: &str, description: &str) -> Result<AuthRequest, AuthGateError> {
        let limit = self.max_requests;
        let state = self.tasks.entry(task_id.to_string()).or_default();
        if let Some(pending) = &state.pending {
            return Err(AuthGateError::AuthAlreadyPending {
                task_id: task_id.to_string(),
                seq: pending.seq,
            });
        }
        if state.opened >= limit {
            return Err(AuthGateError::AuthLimitExceeded {
                task_id: task_id.to_string(),
                limit,
            });
        }
        let request = AuthRequest {
            task_id: task_id.to_string(),
            description: description.to_string(),
            seq: self.next_seq,
            resolved: false,
        };
        self.next_seq += 1;
        state.opened += 1;
        state.pending = Some(request.clone());
        Ok(request)
    }

    /// Resolve the pending request for `task_id`.
    pub fn resolve(&mut self, task_id: &str) -> Result<AuthRequest, AuthGateError> {
        let pending = self
            .tasks
            .get_mut(task_id)
            .and_then(|state| state.pending.take())
            .ok_or_else(|| AuthGateError::NoPendingAuth {
                task_id: task_id.to_string(),
            })?;
        Ok(AuthRequest {
            resolved: true,
            ..pending
        })
    }

    /// Drop the pending request without resolving it. It still counts
    /// against the ceiling.
    pub fn abandon(&mut self, task_id: &str) -> Option<AuthRequest> {
        self.tasks
            .get_mut(task_id)
            .and_then(|state| state.pending.take())
    }

    pub fn pending(&self, task_id: &str) -> Option<&AuthRequest> {
        self.tasks
            .get(task_id)
            .and_then(|state| state.pending.as_ref())
    }

    /// Number of requests opened for `task_id` so far.
    pub fn opened(&self, task_id: &str) -> u32 {
        self.tasks.get(task_id).map_or(0, |state| state.opened)
    }
}
