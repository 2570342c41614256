//! The chat-to-speech pipeline.
//!
//! Raw chat events enter through the [`ingest::IngestionAdapter`], which logs
//! them, runs the [`filter`] against the live rules and queues admitted
//! messages. The [`driver::PlaybackDriver`] speaks queued items strictly in
//! order, one at a time, re-reading playback settings for every item.

pub mod driver;
pub mod filter;
pub mod hot_reload;
pub mod ingest;
pub mod log;
pub mod presenter;
pub mod queue;
pub mod runtime;
pub mod session;

pub use presenter::{Presenter, TracingPresenter};
pub use queue::{PlaybackState, SpeechQueue};
pub use runtime::{Pipeline, PipelineOptions};
pub use session::ChatSession;
