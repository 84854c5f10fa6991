mod source;
mod synchronizer;
mod stream;

pub use source::{pull_snapshot, ControlPlaneSource, HttpControlPlane, StaticSource};
pub use synchronizer::{event_channel, EventSender, Synchronizer};
pub use stream::EventStream;
