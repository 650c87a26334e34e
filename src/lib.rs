// src/lib.rs

//! geoimport Library
//!
//! Downloads elevation tiles listed in an atom registry to disk, and imports
//! railway routes, ways and stations from a map query service into a
//! PostGIS database.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
