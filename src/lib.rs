//! Tidewatch: ocean hazard report triage.
//!
//! Classifies citizen hazard reports with a multilingual keyword lexicon and
//! an optional remote model, buffers submissions made without connectivity,
//! and clusters reports into map hotspots.

pub mod analyzer;
pub mod classifier;
pub mod cluster;
pub mod config;
pub mod error;
pub mod health;
pub mod hotspots;
pub mod lexicon;
pub mod models;
pub mod pipeline;
pub mod publisher;
pub mod queue;
pub mod social;
pub mod store;
pub mod sync;
