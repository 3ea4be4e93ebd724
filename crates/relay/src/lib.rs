//! Outbox relay service: runs the dispatch and retention loops and serves
//! the ops endpoints.

pub mod app;
