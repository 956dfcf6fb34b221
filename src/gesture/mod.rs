mod controller;
mod types;

pub use controller::GestureController;
pub use types::{GestureKind, GestureObservation, Handedness};
