// Copyright [2026] [Paygate Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Paygate Contributors
// SPDX-License-Identifier: Apache-2.0

//! paygate-core
//!
//! The payment-authorization core of the paygate daemon.
//!
//! This crate implements the channel-state machinery shared by daemon
//! replicas:
//! - Payment cheque model + canonical signature digest (keccak-256/secp256k1)
//! - CAS-capable key/value backends (in-memory and etcd v3)
//! - Typed channel storage with a deterministic wire codec
//! - Combined storage reconciling cached rows with the on-chain escrow
//! - The payment channel service serializing transactions cluster-wide
//! - The pluggable income validation policy

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod blockchain;
pub mod combined;
pub mod crypto;
pub mod error;
pub mod etcd;
pub mod income;
pub mod kv;
pub mod payment;
pub mod service;
pub mod storage;

pub use crate::error::{ErrorKind, PaymentError, PaymentResult};
pub use crate::payment::{ChannelData, ChannelKey, ChannelState, Payment};
pub use crate::service::{PaymentChannelService, PaymentTransaction};
