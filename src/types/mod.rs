//! Core types shared by the primitives.

mod time;

pub use time::Time;
