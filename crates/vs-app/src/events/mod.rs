mod broadcaster;

pub use broadcaster::{EventBroadcaster, EventCallback};
