pub mod identity;
pub mod loading;
pub mod reference;

pub use identity::{IdentityCell, Subscription, SubscriptionId};
pub use reference::ReferenceState;
