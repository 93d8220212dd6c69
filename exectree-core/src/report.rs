//! Completion reports posted by a node to its parent.

use crate::definition::State;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node that did not complete a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub node: String,
    pub reason: String,
}

/// Aggregated outcome of one command on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Success,

    /// At least one child (or the node's own hook) failed. Children still
    /// pending at the deadline are listed too.
    Failed {
        failures: Vec<Failure>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pending: Vec<String>,
    },

    /// Some children did not report before the deadline.
    Timeout { pending: Vec<String> },
}

impl Status {
    /// A single failure attributed to `node`.
    pub fn failed(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Status::Failed {
            failures: vec![Failure {
                node: node.into(),
                reason: reason.into(),
            }],
            pending: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Status::Failed { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Status::Timeout { .. })
    }

    /// Nodes named as failed.
    pub fn failed_nodes(&self) -> Vec<&str> {
        match self {
            Status::Failed { failures, .. } => failures.iter().map(|f| f.node.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Nodes that never reported.
    pub fn pending_nodes(&self) -> Vec<&str> {
        match self {
            Status::Failed { pending, .. } | Status::Timeout { pending } => {
                pending.iter().map(|p| p.as_str()).collect()
            }
            Status::Success => Vec::new(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => f.write_str("success"),
            Status::Failed { failures, pending } => {
                f.write_str("failed: ")?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{} ({})", failure.node, failure.reason)?;
                }
                if !pending.is_empty() {
                    write!(f, "; timed out: {}", pending.join(", "))?;
                }
                Ok(())
            }
            Status::Timeout { pending } => write!(f, "timeout: {}", pending.join(", ")),
        }
    }
}

/// Result of one command on one node, consumed once by the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub node: String,
    pub trigger: String,
    pub final_state: State,
    pub status: Status,

    /// Fan-out invocation this report answers, if issued by a parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<u64>,

    /// Time spent on the command in milliseconds.
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl CompletionReport {
    pub fn new(
        node: impl Into<String>,
        trigger: impl Into<String>,
        final_state: impl Into<State>,
        status: Status,
    ) -> Self {
        Self {
            node: node.into(),
            trigger: trigger.into(),
            final_state: final_state.into(),
            status,
            correlation: None,
            elapsed_ms: 0,
        }
    }

    pub fn with_correlation(mut self, correlation: Option<u64>) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl fmt::Display for CompletionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' -> {} [{}] in {}ms",
            self.node, self.trigger, self.final_state, self.status, self.elapsed_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Success.to_string(), "success");
        assert_eq!(
            Status::failed("b", "boom").to_string(),
            "failed: b (boom)"
        );

        let status = Status::Failed {
            failures: vec![Failure {
                node: "b".into(),
                reason: "boom".into(),
            }],
            pending: vec!["c".into()],
        };
        assert_eq!(status.to_string(), "failed: b (boom); timed out: c");
        assert_eq!(status.failed_nodes(), vec!["b"]);
        assert_eq!(status.pending_nodes(), vec!["c"]);

        let status = Status::Timeout {
            pending: vec!["c".into(), "d".into()],
        };
        assert_eq!(status.to_string(), "timeout: c, d");
    }

    #[test]
    fn test_report_json_shape() {
        let report = CompletionReport::new("root", "boot", "booted", Status::failed("b", "boom"))
            .with_correlation(Some(7));
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["final_state"], "booted");
        assert_eq!(json["status"]["status"], "failed");
        assert_eq!(json["status"]["failures"][0]["node"], "b");
        assert_eq!(json["correlation"], 7);
    }
}
