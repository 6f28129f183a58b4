//! Boursa Library
//!
//! Data-analysis backend: dataset upload, non-parametric tests, charts,
//! stock quotes, ML forecasts and a live user map

pub mod auth;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod forecast;
pub mod history;
pub mod jobs;
pub mod locations;
pub mod logging;
pub mod session;
pub mod stats;
pub mod stock;
pub mod storage;
pub mod types;
pub mod upload;
pub mod visualisation;
pub mod web;
