pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod job;
pub mod orchestrate;
pub mod queue;
pub mod raster;
pub mod reduce;
pub mod repair;
pub mod report;
pub mod supervise;
pub mod util;
