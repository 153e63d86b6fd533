pub mod controller;
pub mod state;

pub use controller::{TimerController, TimerEvent};
pub use state::{FocusSnapshot, TimerState, TimerStatus, TimerTransition};
