//! Execution contexts of the panel: the controller loop and the tasks that
//! feed it or read from it.

pub mod bridge;
pub mod controller;
pub mod render;
pub mod supervisor;
pub mod telemetry;
pub mod view;

pub use bridge::CommandBridge;
pub use controller::{Controller, RunOutcome};
pub use render::RenderScheduler;
pub use telemetry::TelemetryCache;
pub use view::{Display, Frame, LogDisplay, PanelInfo};
