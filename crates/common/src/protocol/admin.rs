// Admin gateway request/response bodies.

use serde::{Deserialize, Serialize};

/// `POST /disable_robot` body. Only `robot_id` is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisableRobotRequest {
    #[serde(default)]
    pub robot_id: String,
    #[serde(default)]
    pub user_id: String,
}

/// `POST /disable_robot` success body. Reports that the saga started, not
/// how it ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisableRobotResponse {
    pub message: String,
    pub workflow_id: String,
    pub run_id: String,
    pub robot_id: String,
}

pub const DISABLE_INITIATED_MESSAGE: &str = "Disable robot workflow initiated";

impl DisableRobotResponse {
    pub fn initiated(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        robot_id: impl Into<String>,
    ) -> Self {
        Self {
            message: DISABLE_INITIATED_MESSAGE.to_string(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            robot_id: robot_id.into(),
        }
    }
}
