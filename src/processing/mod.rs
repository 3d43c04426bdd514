pub mod accumulator;
pub mod linker;
pub mod merge;
pub mod segmenter;

pub use accumulator::{ChunkAccumulator, InFlight};
pub use linker::convert_tool_result_to_messages;
pub use merge::merge_message_chunk;
pub use segmenter::convert_server_history_to_messages;
