pub mod connection;
pub mod negotiation;
pub mod reconciliation;
