pub mod config;
pub mod error;
pub mod event;
pub mod interpreter;
pub mod ledger;
pub mod metadata;
pub mod metrics_consts;
pub mod processor;
pub mod server;
pub mod storage;
