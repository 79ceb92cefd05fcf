pub mod listener;
pub mod request;
pub mod service;
pub mod state;
