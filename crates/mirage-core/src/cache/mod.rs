//! Frame clock and frame-memoized views

mod cached;
mod clock;
mod factory;

pub use cached::Cached;
pub use clock::{FrameClock, FrameDriver};
pub use factory::{TrackedAddress, ViewFactory};
