pub mod constants;
pub mod engine;
pub mod errors;
pub mod history_store;
pub mod puzzle;
pub mod reward;
pub mod room;
pub mod server_protocol;
pub mod server_utils;
pub mod types;
