//! # regbot-controller
//!
//! Controller for a pool of SIP registration workers.
//!
//! Pulls the subscriber inventory from MySQL, materializes it in Redis, and
//! splits it across whichever workers have announced themselves on the
//! control channel. Each worker gets its slice as one `assign` message on its
//! own channel.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod model;
pub mod store;
pub mod telemetry;
