//! # Call Registry
//!
//! Process-wide table of active calls, keyed by telephony connection id.
//!
//! ## Resource Management:
//! - Enforces the maximum number of concurrent calls
//! - Entries are inserted on `start` and removed when the call ends
//! - Function-call tasks reach their call through here after the
//!   connection's handler has moved on

use crate::call::session::CallSession;
use crate::error::{BridgeError, BridgeResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub struct CallRegistry {
    calls: RwLock<HashMap<String, CallSession>>,
    max_concurrent_calls: usize,
}

/// Point-in-time view of the registry, for logs.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub active_calls: usize,
    pub max_concurrent_calls: usize,
}

impl CallRegistry {
    pub fn new(max_concurrent_calls: usize) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            max_concurrent_calls,
        }
    }

    /// Register a new call for a connection.
    ///
    /// ## Returns:
    /// - **Ok(())**: call registered
    /// - **Err(Capacity)**: the concurrent call limit is reached
    /// - **Err(Transport)**: the connection already has a call
    pub fn open(&self, connection_id: &str, session: CallSession) -> BridgeResult<()> {
        let mut calls = self.calls.write().unwrap_or_else(PoisonError::into_inner);

        if calls.len() >= self.max_concurrent_calls {
            return Err(BridgeError::Capacity(format!(
                "Maximum concurrent calls ({}) reached",
                self.max_concurrent_calls
            )));
        }

        if calls.contains_key(connection_id) {
            return Err(BridgeError::Transport(format!(
                "Connection '{}' already has an active call",
                connection_id
            )));
        }

        calls.insert(connection_id.to_string(), session);
        Ok(())
    }

    /// Run `f` against the call owned by a connection, if it is still registered.
    pub fn with_call<R>(&self, connection_id: &str, f: impl FnOnce(&mut CallSession) -> R) -> Option<R> {
        let mut calls = self.calls.write().unwrap_or_else(PoisonError::into_inner);
        calls.get_mut(connection_id).map(f)
    }

    pub fn remove(&self, connection_id: &str) -> Option<CallSession> {
        let mut calls = self.calls.write().unwrap_or_else(PoisonError::into_inner);
        calls.remove(connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        let calls = self.calls.read().unwrap_or_else(PoisonError::into_inner);
        calls.contains_key(connection_id)
    }

    pub fn active_count(&self) -> usize {
        let calls = self.calls.read().unwrap_or_else(PoisonError::into_inner);
        calls.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_concurrent_calls
    }

    pub fn active_call_ids(&self) -> Vec<String> {
        let calls = self.calls.read().unwrap_or_else(PoisonError::into_inner);
        calls.values().map(|call| call.call_id.clone()).collect()
    }

    pub fn summary(&self) -> RegistrySummary {
        RegistrySummary {
            active_calls: self.active_count(),
            max_concurrent_calls: self.max_concurrent_calls,
        }
    }
}
