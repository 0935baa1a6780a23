//! Security alert mail relay
//!
//! Vendor alert mails are extracted into canonical events, fingerprinted and de-duplicated,
//! classified by risk and fanned out to administrators and host owners with delivery receipts.

pub mod admin;
pub mod channels;
pub mod config;
pub mod db;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod risk;
pub mod utils;

#[cfg(test)]
pub mod testing;
