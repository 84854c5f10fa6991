pub mod plugin;
pub mod selector;
pub mod rule;
pub mod condition;
pub mod upstream;
pub mod metadata;
pub mod handle;

pub use plugin::*;
pub use selector::*;
pub use rule::*;
pub use condition::*;
pub use upstream::*;
pub use metadata::*;
pub use handle::*;

pub(crate) fn def_true() -> bool {
    true
}
