// fleetops-common: wire types, naming and HTTP plumbing shared by the FleetOps services

pub mod http;
pub mod protocol;
pub mod workflow;
