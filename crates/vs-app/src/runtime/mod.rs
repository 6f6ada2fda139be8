mod command;
mod event_loop;
mod handle;

pub use command::SyncCommand;
pub use event_loop::{SyncDeps, SyncRuntime};
pub use handle::SyncHandle;
