pub mod config;
pub mod multicall;
pub mod networks;
pub mod rpc;
pub mod store;
pub mod structured_log;
