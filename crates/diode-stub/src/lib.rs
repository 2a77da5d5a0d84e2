//! Stand-ins for the agent container, so the harness can be exercised without a
//! container runtime or the agent image.

pub mod agent;
pub mod runtime;

pub use agent::StubAgent;
pub use runtime::StubRuntime;
