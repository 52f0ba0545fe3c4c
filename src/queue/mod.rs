pub mod item;
pub mod manager;
pub mod reorder;
pub mod store;

pub use item::{ItemDraft, ItemId, ItemKind, QueueItem};
pub use manager::{QueueManager, QueueSnapshot};
pub use store::{MemoryQueueStore, QueueStore};
