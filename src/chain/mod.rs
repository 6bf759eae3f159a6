pub mod pool;
pub mod retry;

pub use pool::{split_endpoint_list, BlockRef, ChainClientPool};
