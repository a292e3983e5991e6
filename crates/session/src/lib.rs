//! Per-call session supervision and turn control
//!
//! A `Session` is the full per-call object graph: ingress and egress
//! transport tasks, the recognizer stream, the segment logger, and the turn
//! controller, all supervised under one cancellation token tree. Exactly one
//! session exists per call identifier; the server's registry enforces that.
//!
//! The turn controller is the central state machine
//! (`Greeting → Listening → Thinking → Speaking`, with `Terminating` from
//! anywhere). Barge-in is its hot path: a speech-start while the speaking
//! flag is set cancels the playback task within a tight budget, discards the
//! in-flight audio at egress, and marks the interrupted assistant turn
//! truncated in history.

mod controller;
mod events;
mod playback;
mod session;

pub use controller::TurnState;
pub use session::{run_call, CallSetup};

pub(crate) use events::{pump_recognition, ControllerEvent};
