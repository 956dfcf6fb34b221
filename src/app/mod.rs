//! Pipeline lifecycle: wiring, the frame and gesture loops, signals and shutdown.

mod frame_loop;
mod gesture_loop;
mod orchestrator;
mod retention;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::{Components, Orchestrator};
pub use types::{ComponentState, FrameLoopStats, GestureLoopStats, ShutdownReason};
