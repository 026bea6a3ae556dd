//! Reuse-aware UI copy rewriting.
//!
//! [`select`] holds the streaming top-K selector; [`retrieval`] wraps it (or a
//! hosted index) behind one trait; [`suggest`] is the request pipeline.

pub mod config;
pub mod corpus;
pub mod retrieval;
pub mod select;
pub mod suggest;
pub mod types;
