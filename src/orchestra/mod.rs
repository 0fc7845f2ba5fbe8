pub mod config;
pub mod driver;
pub mod error;
pub mod network;
pub mod provider;
pub mod report;
pub mod runtime;
pub mod topology;
pub mod unit;
pub mod worker;
