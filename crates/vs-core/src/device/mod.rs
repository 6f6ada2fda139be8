//! Device domain models.

mod device;
mod replica;

pub use device::{Device, LinkedDeviceRecord};
pub use replica::LocalReplica;
