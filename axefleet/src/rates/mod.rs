pub mod schedule;
pub mod window;
