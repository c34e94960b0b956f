mod options;
mod stream;

pub use options::{LifecycleObserver, TailOptions};
pub use stream::{LifecycleEvent, TailBatch, TailStream};
