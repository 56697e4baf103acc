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

use std::sync::Arc;

use ethers::types::{Address, U256};
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use paygate_core::income::{IncomeData, IncomeValidator};
use paygate_core::service::{PaymentChannelService, PaymentTransaction};
use paygate_core::{ErrorKind, Payment, PaymentError};
use paygate_protocol::{
    PAYMENT_CHANNEL_AMOUNT_HEADER, PAYMENT_CHANNEL_ID_HEADER, PAYMENT_CHANNEL_NONCE_HEADER,
    PAYMENT_CHANNEL_SIGNATURE_HEADER,
};

use crate::telemetry::Telemetry;

/// Maps domain error kinds onto gRPC status codes, passing messages through
/// verbatim.
pub fn to_grpc_status(err: &PaymentError) -> Status {
    let code = match err.kind() {
        ErrorKind::InvalidArgument => Code::InvalidArgument,
        ErrorKind::Unauthenticated => Code::Unauthenticated,
        ErrorKind::FailedPrecondition => Code::FailedPrecondition,
        ErrorKind::IncorrectChannelId => Code::InvalidArgument,
        ErrorKind::Unavailable => Code::Unavailable,
        ErrorKind::Internal => Code::Internal,
    };
    Status::new(code, err.message())
}

/// A validated payment bound to an open channel transaction, waiting for the
/// downstream call outcome.
pub struct PendingPayment {
    payment: Payment,
    transaction: Box<dyn PaymentTransaction>,
}

impl std::fmt::Debug for PendingPayment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPayment")
            .field("payment", &self.payment)
            .finish_non_exhaustive()
    }
}

impl PendingPayment {
    pub fn payment(&self) -> &Payment {
        &self.payment
    }

    pub(crate) async fn abandon(mut self) {
        if let Err(err) = self.transaction.rollback().await {
            tracing::warn!(
                channel_id = %self.payment.channel_id,
                error = %err,
                "rollback of an abandoned payment failed"
            );
        }
    }
}

/// Rolls the transaction back if the request future is dropped between
/// payment start and completion (client cancellation, deadline). Disarm
/// before completing normally.
pub struct RollbackGuard {
    pending: Option<PendingPayment>,
}

impl RollbackGuard {
    pub fn new(pending: PendingPayment) -> Self {
        Self {
            pending: Some(pending),
        }
    }

    pub fn disarm(mut self) -> Option<PendingPayment> {
        self.pending.take()
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::warn!(
                channel_id = %pending.payment().channel_id,
                "request cancelled mid-payment, rolling back"
            );
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(pending.abandon());
            }
        }
    }
}

/// Per-request payment state machine: parse the cheque out of request
/// metadata, open a channel transaction, validate the income delta, then
/// commit once the downstream call succeeded (or roll back).
pub struct PaymentHandler {
    service: Arc<dyn PaymentChannelService>,
    income_validator: Arc<dyn IncomeValidator>,
    mpe_contract_address: Address,
    telemetry: Arc<Telemetry>,
}

impl PaymentHandler {
    pub fn new(
        service: Arc<dyn PaymentChannelService>,
        income_validator: Arc<dyn IncomeValidator>,
        mpe_contract_address: Address,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            service,
            income_validator,
            mpe_contract_address,
            telemetry,
        }
    }

    /// PARSE → BEGIN → VALIDATE_INCOME. Any failure leaves no transaction
    /// open and no storage change.
    pub async fn payment(&self, metadata: &MetadataMap) -> Result<PendingPayment, Status> {
        let payment = self.parse_payment(metadata)?;
        let transaction = self
            .service
            .start_payment_transaction(payment.clone())
            .await
            .map_err(|err| to_grpc_status(&err))?;

        let income = payment
            .amount
            .checked_sub(transaction.channel().authorized_amount)
            .ok_or_else(|| {
                Status::internal("cheque amount is below the authorized watermark after validation")
            })?;
        let income = IncomeData { income };
        if let Err(err) = self.income_validator.validate(&income).await {
            let mut transaction = transaction;
            if let Err(rollback_err) = transaction.rollback().await {
                tracing::warn!(
                    channel_id = %payment.channel_id,
                    error = %rollback_err,
                    "rollback after income reject failed"
                );
            }
            return Err(to_grpc_status(&err));
        }

        Ok(PendingPayment {
            payment,
            transaction,
        })
    }

    /// COMMIT, after the downstream call produced a reply. A commit failure
    /// here is a revenue-loss event: the reply has already been earned, so
    /// it is logged and counted but never surfaced to the client.
    pub async fn complete(&self, mut pending: PendingPayment) {
        match pending.transaction.commit().await {
            Ok(()) => self.telemetry.record_commit(),
            Err(err) => {
                self.telemetry.record_revenue_loss();
                tracing::error!(
                    channel_id = %pending.payment.channel_id,
                    amount = %pending.payment.amount,
                    error = %err,
                    "revenue loss: payment commit failed after the call was served"
                );
            }
        }
    }

    /// ROLLBACK, after the downstream call failed.
    pub async fn complete_after_error(&self, mut pending: PendingPayment) {
        match pending.transaction.rollback().await {
            Ok(()) => self.telemetry.record_rollback(),
            Err(err) => {
                tracing::warn!(
                    channel_id = %pending.payment.channel_id,
                    error = %err,
                    "rollback after downstream error failed"
                );
            }
        }
    }

    #[allow(clippy::result_large_err)]
    fn parse_payment(&self, metadata: &MetadataMap) -> Result<Payment, Status> {
        let channel_id = big_int_header(metadata, PAYMENT_CHANNEL_ID_HEADER)?;
        let channel_nonce = big_int_header(metadata, PAYMENT_CHANNEL_NONCE_HEADER)?;
        let amount = big_int_header(metadata, PAYMENT_CHANNEL_AMOUNT_HEADER)?;
        let signature = bytes_header(metadata, PAYMENT_CHANNEL_SIGNATURE_HEADER)?;
        Ok(Payment {
            mpe_contract_address: self.mpe_contract_address,
            channel_id,
            channel_nonce,
            amount,
            signature,
        })
    }
}

#[allow(clippy::result_large_err)]
fn big_int_header(metadata: &MetadataMap, header: &str) -> Result<U256, Status> {
    let Some(value) = metadata.get(header) else {
        return Err(Status::invalid_argument(format!("missing \"{header}\"")));
    };
    value
        .to_str()
        .ok()
        .and_then(|text| U256::from_dec_str(text).ok())
        .ok_or_else(|| Status::invalid_argument(format!("invalid {header}")))
}

#[allow(clippy::result_large_err)]
fn bytes_header(metadata: &MetadataMap, header: &str) -> Result<Vec<u8>, Status> {
    let Some(value) = metadata.get_bin(header) else {
        return Err(Status::invalid_argument(format!("missing \"{header}\"")));
    };
    value
        .to_bytes()
        .map(|bytes| bytes.to_vec())
        .map_err(|_| Status::invalid_argument(format!("invalid {header}")))
}
