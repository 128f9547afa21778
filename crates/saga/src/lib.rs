// fleetops-saga: durable disable-then-notify saga for robots.

pub mod engine;
pub mod error;
pub mod journal;
pub mod retry;
pub mod state;
pub mod steps;
