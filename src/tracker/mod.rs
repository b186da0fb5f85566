pub mod state;
pub mod validation;

pub use state::{LoadingGuard, StateTracker, Tracked};
pub use validation::{ValidationError, ValidationErrors, check_constraints, compile_pattern};
