//! Domain types for CrossLab

pub mod bar;
pub mod series;

pub use bar::{Bar, BarError};
pub use series::Series;
