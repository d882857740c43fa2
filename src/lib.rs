pub mod api;
pub mod auth;
pub mod backup;
pub mod config;
pub mod control;
pub mod db;
pub mod envelope;
pub mod error;
pub mod farm;
pub mod ingest;
pub mod realtime;
pub mod remote;
pub mod store;
