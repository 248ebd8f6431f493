pub mod bootstrap;
pub mod conf;
pub mod plan;
pub mod provision;
pub mod report;
pub mod utils;
pub mod verify;
