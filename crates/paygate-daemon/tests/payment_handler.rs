//! Payment handler state machine tests against mocked channel service and
//! income validator: metadata parsing, error propagation, rollback on income
//! reject, and revenue-loss accounting.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use parking_lot::Mutex;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::Code;

use paygate_core::income::{IncomeData, IncomeValidator};
use paygate_core::payment::{ChannelData, ChannelState};
use paygate_core::service::{PaymentChannelService, PaymentTransaction};
use paygate_core::{Payment, PaymentError, PaymentResult};
use paygate_daemon::handler::PaymentHandler;
use paygate_daemon::telemetry::Telemetry;
use paygate_protocol::{
    PAYMENT_CHANNEL_AMOUNT_HEADER, PAYMENT_CHANNEL_ID_HEADER, PAYMENT_CHANNEL_NONCE_HEADER,
    PAYMENT_CHANNEL_SIGNATURE_HEADER,
};

#[derive(Default, Debug)]
struct TransactionLog {
    committed: bool,
    rolled_back: bool,
}

#[derive(Debug)]
struct MockTransaction {
    channel: ChannelData,
    log: Arc<Mutex<TransactionLog>>,
    fail_commit: bool,
    finished: bool,
}

#[async_trait]
impl PaymentTransaction for MockTransaction {
    fn channel(&self) -> &ChannelData {
        &self.channel
    }

    async fn commit(&mut self) -> PaymentResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.fail_commit {
            return Err(PaymentError::failed_precondition("state changed under us"));
        }
        self.log.lock().committed = true;
        Ok(())
    }

    async fn rollback(&mut self) -> PaymentResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.log.lock().rolled_back = true;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

struct MockService {
    error: Option<PaymentError>,
    channel: ChannelData,
    log: Arc<Mutex<TransactionLog>>,
    fail_commit: bool,
    last_payment: Mutex<Option<Payment>>,
}

impl MockService {
    fn ok() -> Self {
        Self {
            error: None,
            channel: channel(),
            log: Arc::new(Mutex::new(TransactionLog::default())),
            fail_commit: false,
            last_payment: Mutex::new(None),
        }
    }

    fn failing(error: PaymentError) -> Self {
        Self {
            error: Some(error),
            ..Self::ok()
        }
    }
}

#[async_trait]
impl PaymentChannelService for MockService {
    async fn start_payment_transaction(
        &self,
        payment: Payment,
    ) -> PaymentResult<Box<dyn PaymentTransaction>> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        *self.last_payment.lock() = Some(payment);
        Ok(Box::new(MockTransaction {
            channel: self.channel.clone(),
            log: Arc::clone(&self.log),
            fail_commit: self.fail_commit,
            finished: false,
        }))
    }
}

struct MockValidator {
    error: Option<PaymentError>,
    last_income: Mutex<Option<IncomeData>>,
}

impl MockValidator {
    fn ok() -> Self {
        Self {
            error: None,
            last_income: Mutex::new(None),
        }
    }

    fn failing(error: PaymentError) -> Self {
        Self {
            error: Some(error),
            last_income: Mutex::new(None),
        }
    }
}

#[async_trait]
impl IncomeValidator for MockValidator {
    async fn validate(&self, income: &IncomeData) -> PaymentResult<()> {
        *self.last_income.lock() = Some(income.clone());
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn channel() -> ChannelData {
    ChannelData {
        nonce: U256::from(3),
        state: ChannelState::Open,
        sender: Address::repeat_byte(0xAB),
        recipient: Address::repeat_byte(0xCD),
        group_id: U256::from(7),
        full_amount: U256::from(1_000_000u64),
        authorized_amount: U256::from(12_300u64),
        signature: None,
    }
}

fn mpe_address() -> Address {
    "0xf25186b5081ff5ce73482ad761db0eb0d25abfbf".parse().unwrap()
}

fn metadata() -> MetadataMap {
    let mut md = MetadataMap::new();
    md.insert(PAYMENT_CHANNEL_ID_HEADER, "42".parse().unwrap());
    md.insert(PAYMENT_CHANNEL_NONCE_HEADER, "3".parse().unwrap());
    md.insert(PAYMENT_CHANNEL_AMOUNT_HEADER, "12345".parse().unwrap());
    md.insert_bin(
        PAYMENT_CHANNEL_SIGNATURE_HEADER,
        MetadataValue::from_bytes(&[0x01, 0x02, 0xFE, 0xFF]),
    );
    md
}

fn handler(service: Arc<MockService>, validator: Arc<MockValidator>) -> (PaymentHandler, Arc<Telemetry>) {
    let telemetry = Arc::new(Telemetry::new("daemon-test", "service-test"));
    let handler = PaymentHandler::new(service, validator, mpe_address(), Arc::clone(&telemetry));
    (handler, telemetry)
}

#[tokio::test]
async fn valid_metadata_yields_a_pending_payment() {
    let service = Arc::new(MockService::ok());
    let (handler, _telemetry) = handler(Arc::clone(&service), Arc::new(MockValidator::ok()));

    let pending = handler.payment(&metadata()).await.unwrap();

    let payment = pending.payment();
    assert_eq!(payment.channel_id, U256::from(42));
    assert_eq!(payment.channel_nonce, U256::from(3));
    assert_eq!(payment.amount, U256::from(12_345u64));
    assert_eq!(payment.signature, vec![0x01, 0x02, 0xFE, 0xFF]);
    assert_eq!(payment.mpe_contract_address, mpe_address());
    assert!(service.last_payment.lock().is_some());
}

#[tokio::test]
async fn missing_channel_id_is_reported_by_name() {
    let (handler, _telemetry) = handler(Arc::new(MockService::ok()), Arc::new(MockValidator::ok()));
    let mut md = metadata();
    md.remove(PAYMENT_CHANNEL_ID_HEADER);

    let status = handler.payment(&md).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "missing \"snet-payment-channel-id\"");
}

#[tokio::test]
async fn missing_channel_nonce_is_reported_by_name() {
    let (handler, _telemetry) = handler(Arc::new(MockService::ok()), Arc::new(MockValidator::ok()));
    let mut md = metadata();
    md.remove(PAYMENT_CHANNEL_NONCE_HEADER);

    let status = handler.payment(&md).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "missing \"snet-payment-channel-nonce\"");
}

#[tokio::test]
async fn missing_amount_is_reported_by_name() {
    let (handler, _telemetry) = handler(Arc::new(MockService::ok()), Arc::new(MockValidator::ok()));
    let mut md = metadata();
    md.remove(PAYMENT_CHANNEL_AMOUNT_HEADER);

    let status = handler.payment(&md).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "missing \"snet-payment-channel-amount\"");
}

#[tokio::test]
async fn missing_signature_is_reported_by_name() {
    let (handler, _telemetry) = handler(Arc::new(MockService::ok()), Arc::new(MockValidator::ok()));
    let mut md = metadata();
    md.remove_bin(PAYMENT_CHANNEL_SIGNATURE_HEADER);

    let status = handler.payment(&md).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(
        status.message(),
        "missing \"snet-payment-channel-signature-bin\""
    );
}

#[tokio::test]
async fn malformed_channel_id_is_invalid_argument() {
    let (handler, _telemetry) = handler(Arc::new(MockService::ok()), Arc::new(MockValidator::ok()));
    let mut md = metadata();
    md.insert(PAYMENT_CHANNEL_ID_HEADER, "forty-two".parse().unwrap());

    let status = handler.payment(&md).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "invalid snet-payment-channel-id");
}

#[tokio::test]
async fn channel_service_errors_keep_their_kind_and_message() {
    let service = Arc::new(MockService::failing(PaymentError::failed_precondition(
        "another transaction in progress",
    )));
    let (handler, _telemetry) = handler(service, Arc::new(MockValidator::ok()));

    let status = handler.payment(&metadata()).await.unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(status.message(), "another transaction in progress");
}

#[tokio::test]
async fn income_reject_rolls_back_and_propagates_the_message() {
    let service = Arc::new(MockService::ok());
    let validator = Arc::new(MockValidator::failing(PaymentError::unauthenticated(
        "incorrect payment income: \"45\", expected \"46\"",
    )));
    let (handler, _telemetry) = handler(Arc::clone(&service), Arc::clone(&validator));

    let status = handler.payment(&metadata()).await.unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(
        status.message(),
        "incorrect payment income: \"45\", expected \"46\""
    );
    assert!(service.log.lock().rolled_back);
    assert!(!service.log.lock().committed);

    // The validator saw the delta between the cheque and the watermark.
    let income = validator.last_income.lock().clone().unwrap();
    assert_eq!(income.income, U256::from(45));
}

#[tokio::test]
async fn complete_commits_and_counts() {
    let service = Arc::new(MockService::ok());
    let (handler, telemetry) = handler(Arc::clone(&service), Arc::new(MockValidator::ok()));

    let pending = handler.payment(&metadata()).await.unwrap();
    handler.complete(pending).await;

    assert!(service.log.lock().committed);
    assert!(telemetry.render().contains("paygate_commits_total 1"));
}

#[tokio::test]
async fn commit_failure_after_service_is_a_revenue_loss_event() {
    let mut service = MockService::ok();
    service.fail_commit = true;
    let service = Arc::new(service);
    let (handler, telemetry) = handler(Arc::clone(&service), Arc::new(MockValidator::ok()));

    let pending = handler.payment(&metadata()).await.unwrap();
    handler.complete(pending).await;

    assert!(!service.log.lock().committed);
    assert!(telemetry.render().contains("paygate_revenue_loss_total 1"));
}

#[tokio::test]
async fn complete_after_error_rolls_back() {
    let service = Arc::new(MockService::ok());
    let (handler, telemetry) = handler(Arc::clone(&service), Arc::new(MockValidator::ok()));

    let pending = handler.payment(&metadata()).await.unwrap();
    handler.complete_after_error(pending).await;

    assert!(service.log.lock().rolled_back);
    assert!(telemetry.render().contains("paygate_rollbacks_total 1"));
}
