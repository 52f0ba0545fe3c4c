pub mod event_logger;

pub use event_logger::{
    EventSink, HttpEventSink, MemoryEventSink, PlaybackEvent, PlaybackLogEntry, PlaybackLogger,
};
