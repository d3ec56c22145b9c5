pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod geo;
pub mod http;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod pricing;
