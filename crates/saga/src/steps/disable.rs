use std::{
    collections::HashSet,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tracing::{debug, info};

use crate::error::StepError;

pub const DEFAULT_DISABLE_LATENCY: Duration = Duration::from_secs(2);

/// Control plane for the robot fleet.
///
/// `disable` must be idempotent: the saga re-runs it after a timeout or a
/// restart, so disabling an already disabled robot has to succeed again.
pub trait FleetControl: Send + Sync {
    fn disable(
        &self,
        robot_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, StepError>> + Send>>;
}

/// Stand-in for the fleet backend: waits `latency`, then reports success.
#[derive(Debug, Clone)]
pub struct SimulatedFleetControl {
    latency: Duration,
    disabled: Arc<Mutex<HashSet<String>>>,
}

impl Default for SimulatedFleetControl {
    fn default() -> Self {
        Self::new(DEFAULT_DISABLE_LATENCY)
    }
}

impl SimulatedFleetControl {
    pub fn new(latency: Duration) -> Self {
        Self { latency, disabled: Arc::new(Mutex::new(HashSet::new())) }
    }

    pub fn is_disabled(&self, robot_id: &str) -> bool {
        self.disabled.lock().unwrap_or_else(PoisonError::into_inner).contains(robot_id)
    }
}

impl FleetControl for SimulatedFleetControl {
    fn disable(
        &self,
        robot_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, StepError>> + Send>> {
        let robot_id = robot_id.to_owned();
        let latency = self.latency;
        let disabled = Arc::clone(&self.disabled);

        Box::pin(async move {
            tokio::time::sleep(latency).await;
            let newly_disabled =
                disabled.lock().unwrap_or_else(PoisonError::into_inner).insert(robot_id.clone());
            if newly_disabled {
                info!(robot_id = %robot_id, "robot disabled");
            } else {
                debug!(robot_id = %robot_id, "robot was already disabled");
            }
            Ok(format!("Robot {robot_id} is now disabled."))
        })
    }
}

pub struct DisableStep {
    fleet: Arc<dyn FleetControl>,
}

impl DisableStep {
    pub fn new(fleet: Arc<dyn FleetControl>) -> Self {
        Self { fleet }
    }

    /// Returns the fleet's human-readable confirmation.
    pub async fn execute(&self, robot_id: &str) -> Result<String, StepError> {
        self.fleet.disable(robot_id).await
    }
}
