//! # Backend Client
//!
//! `DeliveryBackend` implementations.
//!
//! Responsibilities:
//! - Speak the delivery backend's JSON-over-HTTP protocol
//! - Map transport and HTTP failures into `ContractError`
//! - Provide a scripted in-memory backend for tests and dry runs

pub mod client;
pub mod error;
pub mod mock_client;

pub use client::HttpBackend;
pub use contracts::{DeliveryBackend, JobStatusClient};
pub use error::{ClientError, Result};
pub use mock_client::{MockBackend, MockCallCounts, MockConfig, MockJobOutcome};
