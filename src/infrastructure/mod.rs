pub mod bear_request;
pub mod calendar_store;
pub mod config;
pub mod error;
pub mod url_dispatcher;
