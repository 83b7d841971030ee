pub mod frames;
pub mod observer;
pub mod pipeline;
pub mod strategies;

pub use frames::FrameNavigator;
pub use observer::{ExtractionObserver, NoopObserver, TelemetryObserver, TracingObserver};
pub use pipeline::ExtractionPipeline;
