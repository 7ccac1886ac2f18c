//! Stream emitter - progress events and their NDJSON transport.

mod emitter;
mod event;

pub use emitter::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_LINE_LENGTH, EventSink, NdjsonCodec, write_ndjson, write_ndjson_with_limit,
};
pub use event::{
    AbortData, CommandOutputData, CommandStartData, CompleteData, DoneData, ErrorData, IterationCompleteData,
    IterationStartData, ReasoningData, StartData, StatusData, StreamEvent, VerificationData,
};
