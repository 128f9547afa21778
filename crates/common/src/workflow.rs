// Saga naming shared by the gateway and the saga engine.

/// Namespace prefix for disable-robot saga ids.
pub const WORKFLOW_ID_PREFIX: &str = "disable_robot_workflow_";

/// Queue the admin saga runs are recorded against.
pub const TASK_QUEUE: &str = "ADMIN_TASK_QUEUE";

/// Deterministic saga id for a robot. Two requests for the same robot
/// always map to the same id, which is what makes the start idempotent.
pub fn workflow_id_for(robot_id: &str) -> String {
    format!("{WORKFLOW_ID_PREFIX}{robot_id}")
}

/// Message delivered to the operator once a robot is disabled.
pub fn disabled_message(robot_id: &str) -> String {
    format!("Robot {robot_id} has been disabled.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_id_is_prefixed_robot_id() {
        assert_eq!(workflow_id_for("r1"), "disable_robot_workflow_r1");
        assert_eq!(workflow_id_for("r1"), workflow_id_for("r1"));
        assert_ne!(workflow_id_for("r1"), workflow_id_for("r2"));
    }

    #[test]
    fn disabled_message_names_robot() {
        assert!(disabled_message("r1").contains("r1"));
    }
}
