pub mod bridge;
pub mod config;
pub mod engine;
pub mod event;
pub mod run;
pub mod stream;
pub mod supervisor;
pub mod types;
pub mod wire;

pub use engine::{EventSink, ResearchEngine};
pub use event::{EventKind, ProgressEvent};
pub use stream::ResponseStreamer;
pub use supervisor::RunLimits;
pub use types::*;
