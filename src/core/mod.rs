pub mod audio;
pub mod realtime;
pub mod tools;
pub mod usage;
pub mod validation;

// Re-export commonly used types for convenience
pub use audio::{AudioFrame, AudioRoutingGraph, AudioSink, RemoteAudioTrack};

pub use realtime::{
    RealtimeError, RealtimeResult, SessionController, SessionDependencies, SessionEvent,
    SessionHandle, SessionSettings, SessionState,
};

pub use tools::{ToolDispatcher, ToolKind, ToolOutcome};

pub use usage::{CostBreakdown, TokenBuckets, UsageExtractor, UsageTimeline, calculate_cost};

pub use validation::{HttpModerator, Moderator, ValidationOutcome, ValidationPipeline};
