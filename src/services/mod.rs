//! Service layer for the import pipelines.
//!
//! This module contains the remote-source clients:
//! - Elevation tile registry enumeration (`AtomEnumerator`)
//! - Map query service access (`OverpassClient`)

pub mod atom;
pub mod overpass;

pub use atom::AtomEnumerator;
pub use overpass::OverpassClient;
