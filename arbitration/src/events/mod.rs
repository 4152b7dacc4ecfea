//! Observability events for the arbiter
//!
//! 1. **Event Types** (`types.rs`): every grant, release, preemption,
//!    denial, registration and cycle step.
//! 2. **Event Bus** (`bus.rs`): Tokio broadcast pub/sub with filters.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ engine/intake│────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │ (UI, audit)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::{ArbiterEvent, ReleaseReason};
