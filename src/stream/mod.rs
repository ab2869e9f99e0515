//! Stream combinators for frame delivery

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
