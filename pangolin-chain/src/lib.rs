//! Core chain data types for Pangolin.
//!
//! This crate holds the primitives shared by every node component:
//! transactions and their content-addressed identifiers, and block heights.
//! Transactions are opaque to the node; only the application that executes
//! them can interpret their payload.

#![deny(missing_docs)]

pub mod block;
pub mod transaction;
