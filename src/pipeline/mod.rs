pub mod pacing;
pub mod ringbuf;
pub mod shutdown;

pub use pacing::Pacer;
pub use ringbuf::{BufferStats, PacingBuffer};
pub use shutdown::{Shutdown, ShutdownListener};
