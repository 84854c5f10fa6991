mod decision;
mod data_plane;

pub use decision::{DecisionHandle, RouteDecision};
pub use data_plane::{DataPlane, DataPlaneSettings};
