mod pending;
mod propagate;
mod registry;
mod timer;
mod trigger;

pub use pending::PendingStateManager;
pub use propagate::FavouritePropagator;
pub use registry::ScheduleRegistry;
pub use timer::{Tick, TokioTriggerFacility, TriggerError, LEASE_HEARTBEAT};
pub use trigger::TriggerController;
