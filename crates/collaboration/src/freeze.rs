/// Code freeze flag shared between clients over the realtime channel
/// Last received value wins; there is no server copy and no ordering.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeFreezeStatus {
    Active,
    #[default]
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFreeze {
    pub status: CodeFreezeStatus,
    pub frozen_by: Option<String>,
    pub frozen_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl CodeFreeze {
    /// Initial state: inactive, nothing stamped.
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn active(frozen_by: impl Into<String>, at: DateTime<Utc>, reason: Option<String>) -> Self {
        Self {
            status: CodeFreezeStatus::Active,
            frozen_by: Some(frozen_by.into()),
            frozen_at: Some(at),
            reason,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CodeFreezeStatus::Active
    }

    /// The value after flipping this one. Activation stamps `by`, `at` and
    /// `reason`; deactivation clears them.
    pub fn toggled(&self, by: &str, at: DateTime<Utc>, reason: Option<String>) -> Self {
        if self.is_active() {
            Self::inactive()
        } else {
            Self::active(by, at, reason)
        }
    }

    /// Text shown to other clients when this value arrives.
    pub fn announcement(&self) -> String {
        if self.is_active() {
            let by = self.frozen_by.as_deref().unwrap_or("unknown");
            match self.reason.as_deref() {
                Some(reason) => format!("Code has been frozen by {}: {}", by, reason),
                None => format!("Code has been frozen by {}", by),
            }
        } else {
            "Code freeze has been lifted".to_string()
        }
    }
}
