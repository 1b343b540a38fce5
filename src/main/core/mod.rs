pub mod configuration;
pub mod engine;
pub mod logger;
pub mod main;
pub mod scenario;
