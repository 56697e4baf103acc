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

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

pub mod pb {
    tonic::include_proto!("paygate.v1");
}

pub const PROTOCOL_SEMVER: &str = "1.0.0";

/// Payment metadata headers, exact spellings shared by daemon and clients.
/// The `-bin` suffix on the signature header selects binary-safe gRPC
/// metadata transport.
pub const PAYMENT_CHANNEL_ID_HEADER: &str = "snet-payment-channel-id";
pub const PAYMENT_CHANNEL_NONCE_HEADER: &str = "snet-payment-channel-nonce";
pub const PAYMENT_CHANNEL_AMOUNT_HEADER: &str = "snet-payment-channel-amount";
pub const PAYMENT_CHANNEL_SIGNATURE_HEADER: &str = "snet-payment-channel-signature-bin";
