pub mod clock;

pub use clock::{Clock, VirtualClock, WallClock};
