//! Operation kinds shared by the audit trail and the triage queue.

use serde::{Deserialize, Serialize};

/// The certifier-facing operation an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FelOperation {
    Authentication,
    Certification,
    Cancellation,
    StatusQuery,
    Reconciliation,
    ExpirySweep,
}

impl FelOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FelOperation::Authentication => "authentication",
            FelOperation::Certification => "certification",
            FelOperation::Cancellation => "cancellation",
            FelOperation::StatusQuery => "status_query",
            FelOperation::Reconciliation => "reconciliation",
            FelOperation::ExpirySweep => "expiry_sweep",
        }
    }
}

impl core::fmt::Display for FelOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
