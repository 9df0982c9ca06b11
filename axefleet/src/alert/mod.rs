//! Fleet alerting.
//!
//! The control loop emits typed [`event::Alert`]s onto a channel without
//! caring who listens. A dedicated notifier task consumes them, drops
//! repeats through the [`gate::AlertGate`], and fans the rest out to the
//! configured [`notifier::Notifier`] sinks.

pub mod event;
pub mod gate;
pub mod notifier;

pub use event::{Alert, AlertType, Severity};
pub use gate::AlertGate;
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
