//! Core library for ranking-playlist-sync
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod ranking;
pub mod service;
pub mod store;
