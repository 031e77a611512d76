//! Headway detection and adherence measurement.
//!
//! Turns a route's sparse vehicle-position samples into stop arrivals at a
//! reference point, derives headways between consecutive arrivals inside the
//! service windows, and summarises them against the headway promise.

pub mod arrivals;
pub mod grade;
pub mod headways;
pub mod metrics;
pub mod pipeline;
pub mod reference;
pub mod types;
pub mod utility;
pub mod window;
