//! Integration tests for Spine Tracker
//!
//! These tests use wiremock to stand in for catalog pages and drive the
//! fetcher, pipeline and scheduler end to end against SQLite.

mod common;
mod fetcher_tests;
mod ingest_tests;
mod scheduler_tests;
