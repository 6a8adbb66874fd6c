pub mod actor;
pub mod controller;

pub use actor::ReminderActor;
pub use controller::{run_sweep, SweepStats};
