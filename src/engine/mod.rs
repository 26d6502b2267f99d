pub mod audit;
pub mod classify;
pub mod config;
pub mod copy;
pub mod delete;
pub mod identity;
pub mod lock;
pub mod paths;
pub mod pipeline;
pub mod planner;
pub mod provision;
pub mod record;
pub mod snapshot;
pub mod state;
pub mod util;
pub mod verify;

#[cfg(test)]
pub mod test_support;
