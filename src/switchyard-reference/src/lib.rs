mod reference;
mod builder;
mod cache;

pub use reference::{runtime_load_balance, RegistryConfig, RouteReference};
pub use builder::{HttpReferenceBuilder, ReferenceBuilder};
pub use cache::{ReferenceCache, ReferenceConfig};
