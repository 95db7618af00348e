//! Test harness for vkpace.
//!
//! Provides a deterministic simulated GPU and scripted window/payload
//! collaborators, so the frame scheduler can be tested without a device.

pub mod harness;
pub mod sim;

pub use harness::{
    extent, init_test_logging, scheduler, stage_tag, RecordedStage, RecordingOverlay,
    RecordingPayload, SimWindow,
};
pub use sim::{
    FenceWait, LiveCounts, ScriptedStatus, SimError, SimGpu, SimPresent, SimSubmission,
    DEFAULT_COST,
};
