pub mod annotations;
pub mod compare;
pub mod config;
pub mod engine;
pub mod errors;
pub mod evaluators_api;
pub mod model;
pub mod providers;
pub mod storage;
