pub mod cli;
pub mod error;
pub mod model;
pub mod normalization;
pub mod orchestrator;
pub mod profile;
pub mod providers;
pub mod storage;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
    pub mod retry;
}
