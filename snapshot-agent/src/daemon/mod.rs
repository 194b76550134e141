pub mod lock;
pub mod shutdown;

pub use lock::ProfileLock;
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
