pub mod clock;
pub mod jwt;

pub use clock::{Clock, ManualClock, SystemClock};
