mod hub;

pub use hub::{HubSignal, NegotiationChannel, NegotiationHub};
