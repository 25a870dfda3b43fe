//! UK rail feed ingestion and aggregation engine.
//!
//! Subscribes to the Network Rail open data feeds (train movements, VSTP,
//! train describer, speed restrictions, RTPPM) and the Darwin departure
//! board services, normalizes them into one per-train model, and serves
//! that model with fallback board queries and a realtime update stream.

pub mod aggregator;
pub mod config;
pub mod domain;
pub mod facade;
pub mod fanout;
pub mod reference;
pub mod stores;
pub mod transport;
pub mod web;
