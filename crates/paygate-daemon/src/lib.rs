//! paygate-daemon
//!
//! The daemon binary wiring: configuration, the per-request payment handler,
//! the payment-gated gRPC gateway, downstream forwarding and telemetry.
//! The channel/state machinery itself lives in `paygate-core`.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod downstream;
pub mod gateway;
pub mod handler;
pub mod telemetry;
