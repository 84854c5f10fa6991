mod ring;
mod balance;
mod pool;

pub use ring::HashRing;
pub use balance::select;
pub use pool::{PoolSnapshot, UpstreamPool};
