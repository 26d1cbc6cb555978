//! The menu state machine: screens, state, editors and transitions.

pub mod editor;
pub mod event;
pub mod navigator;
pub mod screen;
pub mod state;

pub use event::{ActionKind, Event, Moment, SideEffect};
pub use navigator::{Navigator, NavigatorSettings};
pub use screen::{InfoPage, MenuScreen};
pub use state::{NavigatorState, UpdatePhase};
