//! In-memory arbitration of exclusive, time-bounded access to named
//! resources. Requesters submit allocation records; the registry decides
//! whether a request can be granted, fits it into a concrete time slot, and
//! cascades the consequences (reschedule, shrink, cancel) to every other
//! live allocation sharing a resource.

pub mod model;
pub mod notify;
pub mod observability;
pub mod registry;
pub mod sweeper;

pub use model::{Allocation, Annotations, Initiator, Ms, Policy, Priority, Span, State};
pub use notify::{Notice, NotificationGate, NotifyHub};
pub use registry::{Registry, RegistryError};
