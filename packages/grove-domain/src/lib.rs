pub mod chunk;
pub mod conversation;
pub mod research;

pub use chunk::{Chunk, QueryRecord, QueryType, RetrievalResult};
pub use conversation::{ChatRole, ChatTurn};
pub use research::ResearchState;
