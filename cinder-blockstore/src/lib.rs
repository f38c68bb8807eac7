pub mod kvstore;
mod store;

pub use store::{BlockHandler, BlockStore, ChainEvent, StoreOp};
