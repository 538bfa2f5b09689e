pub mod config;
pub mod limit;
pub mod scan;
pub mod signals;
