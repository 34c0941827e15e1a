//! Effect traits for the control plane's external collaborators
//!
//! The core never talks to remote agents, client sessions or the permission
//! model directly; it goes through these narrow traits so production
//! handlers and test mocks are interchangeable.

pub mod authorization;
pub mod remote;
pub mod session;

pub use authorization::AuthorizationEffects;
pub use remote::{AgentError, RemoteAgentEffects, RemoteCall};
pub use session::{ClientSessionEffects, DeliveryError, SessionSubscription};
