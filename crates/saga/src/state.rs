// Saga lifecycle:
//   pending → disabling → notifying → completed   (happy path)
//   disabling → failed                            (disable exhausted / non-retryable)
//   notifying → failed                            (notify exhausted / non-retryable)

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    Pending,
    Disabling,
    Notifying,
    Completed,
    Failed,
}

impl SagaState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Disabling => "disabling",
            Self::Notifying => "notifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "disabling" => Some(Self::Disabling),
            "notifying" => Some(Self::Notifying),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn can_transition_to(self, next: SagaState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Disabling)
                | (Self::Disabling, Self::Notifying)
                | (Self::Disabling, Self::Failed)
                | (Self::Notifying, Self::Completed)
                | (Self::Notifying, Self::Failed)
        )
    }
}

impl Display for SagaState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
