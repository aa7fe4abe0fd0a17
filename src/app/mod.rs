//! Workspace, view handles and the event bus.
//!
//! The [`Workspace`] is the system of record on the client side: UI code
//! issues commands against it and observes the results through
//! [`EventBus`] subscriptions instead of owning state itself.

mod events;
mod view;
mod workspace;

pub use events::{AppEvent, EventBus, EventHandler, SubscriberId};
pub use view::View;
pub use workspace::{RefreshSummary, Workspace};
