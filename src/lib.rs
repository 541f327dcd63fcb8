pub mod aggregate;
pub mod config;
pub mod error;
pub mod ledger;
pub mod maintenance;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod registry;
pub mod routes;
pub mod stats;
pub mod store;
