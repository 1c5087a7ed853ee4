//! Shared data models for the vgen text-to-video service.
//!
//! This crate provides Serde-serializable types for:
//! - Generation requests and the runtime call parameters derived from them
//! - Job identifiers, states and outputs
//! - GPU memory statistics
//! - Progress message schemas

pub mod generation;
pub mod job;
pub mod memory;
pub mod progress;

// Re-export common types
pub use generation::{
    num_frames, output_file_name, GenerationDefaults, GenerationParams, GenerationRequest,
    RequestError, DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_SECONDS, DEFAULT_WIDTH,
};
pub use job::{JobId, JobOutput, JobState};
pub use memory::MemoryStats;
pub use progress::{ProgressMessage, ProgressMessageType};
