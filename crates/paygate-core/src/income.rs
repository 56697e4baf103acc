use async_trait::async_trait;
use ethers::types::U256;

use crate::error::{PaymentError, PaymentResult};

/// Income attributed to one request: the delta between the cheque amount and
/// the previously authorized amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomeData {
    pub income: U256,
}

/// Policy hook deciding whether the price delta of a cheque is acceptable.
/// Pluggable so pricing can evolve without touching the payment state
/// machine.
#[async_trait]
pub trait IncomeValidator: Send + Sync {
    async fn validate(&self, income: &IncomeData) -> PaymentResult<()>;
}

/// Default policy: every call costs exactly the configured price.
pub struct FixedPriceValidator {
    price: U256,
}

impl FixedPriceValidator {
    pub fn new(price: U256) -> Self {
        Self { price }
    }
}

#[async_trait]
impl IncomeValidator for FixedPriceValidator {
    async fn validate(&self, income: &IncomeData) -> PaymentResult<()> {
        if income.income != self.price {
            return Err(PaymentError::unauthenticated(format!(
                "incorrect payment income: \"{}\", expected \"{}\"",
                income.income, self.price
            )));
        }
        Ok(())
    }
}
