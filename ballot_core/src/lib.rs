//! Client library for voting on a single awards event whose data lives in a
//! hosted backend: browsing categories and participants, casting one vote
//! per category, following the results live and managing the catalog.

pub mod admin;
pub mod catalog;
pub mod config;
pub mod data;
pub mod digest;
pub mod error;
pub mod gateway;
pub mod probe;
pub mod realtime;
pub mod submit;
pub mod tally;
pub mod voter;

pub use error::{Error, ErrorKind, ValidationError};
