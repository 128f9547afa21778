// The two activities a disable saga runs, in order.

pub mod disable;
pub mod notify;

use std::fmt::{Display, Formatter};

use serde::Serialize;

pub use disable::{DisableStep, FleetControl, SimulatedFleetControl};
pub use notify::{HttpNotificationSender, NotificationSender, NotifyStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Disable,
    Notify,
}

impl StepKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Notify => "notify",
        }
    }
}

impl Display for StepKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
