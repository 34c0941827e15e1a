//! Remote agent effects
//!
//! Each managed host runs an agent that performs OS-level provisioning.
//! Agent calls are slow and unreliable, so the control plane only issues
//! them after its database transaction has committed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identifiers::HostId;

/// Error returned by a remote agent; always a soft failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum AgentError {
    /// Transport-level failure reaching the agent
    #[error("I/O error talking to agent: {message}")]
    Io {
        /// Failure description
        message: String,
    },

    /// Agent was reached but refused or failed the operation
    #[error("Agent rejected operation: {message}")]
    Rejected {
        /// Failure description
        message: String,
    },
}

impl AgentError {
    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a rejection error
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

/// One queued call to a host's agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// Target host
    pub host: HostId,
    /// Agent operation name
    pub operation: String,
    /// Operation arguments
    pub args: serde_json::Value,
}

impl RemoteCall {
    /// Create a call
    pub fn new(host: HostId, operation: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            host,
            operation: operation.into(),
            args,
        }
    }
}

/// Transport to per-host agents
#[async_trait]
pub trait RemoteAgentEffects: Send + Sync {
    /// Invoke `operation` on the agent of `host`
    async fn invoke(
        &self,
        host: HostId,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, AgentError>;
}
