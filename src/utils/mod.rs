pub mod shutdown;

pub use shutdown::{BackgroundTasks, ShutdownSignal};
