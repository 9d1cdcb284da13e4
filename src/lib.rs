//! Core pipeline of an RNA structure-probing analysis toolkit: scoring and
//! normalization of per-base count profiles into reactivities (`norm`),
//! detection of enriched regions in immunoprecipitation coverage
//! (`peakcall`), and replicate combination with per-base statistics
//! (`combine`).

pub mod combine;
pub mod config;
pub mod errs;
pub mod logging;
pub mod norm;
pub mod peaks;
pub mod pool;
pub mod rc;
pub mod stats;
mod util;
pub mod xml;
