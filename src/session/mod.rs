//! Connection session lifecycle.
//!
//! [`SessionManager`] is the public entry point. The state machine, retry
//! policy and cancellation token are exposed for controllers that need finer
//! control or want to drive the machine directly in tests.

pub mod cancel;
pub mod machine;
pub mod manager;
pub mod retry;

pub use cancel::CancelToken;
pub use machine::{SessionStateMachine, Transition};
pub use manager::{ConnectAttempt, ConnectOutcome, SessionManager};
pub use retry::RetryPolicy;
