pub mod access_review;
pub mod autoscaling;
pub mod config;
pub mod scenarios;
pub mod testcase;
mod util;
