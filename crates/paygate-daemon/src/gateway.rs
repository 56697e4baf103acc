use std::sync::Arc;
use std::time::Instant;

use tonic::{Request, Response, Status};

use paygate_protocol::pb;
use paygate_protocol::pb::gateway_server::Gateway;

use crate::downstream::Downstream;
use crate::handler::{PaymentHandler, RollbackGuard};
use crate::telemetry::Telemetry;

/// The payment-gated gRPC surface: each `Invoke` runs the payment state
/// machine around one forwarded call of the fronted service.
pub struct PaymentGateway {
    handler: Arc<PaymentHandler>,
    downstream: Arc<dyn Downstream>,
    telemetry: Arc<Telemetry>,
}

impl PaymentGateway {
    pub fn new(
        handler: Arc<PaymentHandler>,
        downstream: Arc<dyn Downstream>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            handler,
            downstream,
            telemetry,
        }
    }
}

#[tonic::async_trait]
impl Gateway for PaymentGateway {
    async fn invoke(
        &self,
        request: Request<pb::InvokeRequest>,
    ) -> Result<Response<pb::InvokeReply>, Status> {
        let started = Instant::now();
        let (metadata, _extensions, body) = request.into_parts();
        let method = body.method.clone();

        let pending = match self.handler.payment(&metadata).await {
            Ok(pending) => pending,
            Err(status) => {
                self.telemetry.record_reject(code_label(status.code()));
                self.telemetry
                    .record_response(&method, code_label(status.code()), started.elapsed());
                return Err(status);
            }
        };

        // The guard covers the suspension on the downstream call: a dropped
        // request future rolls the channel transaction back.
        let guard = RollbackGuard::new(pending);
        let outcome = self.downstream.invoke(&body.method, body.payload).await;
        let Some(pending) = guard.disarm() else {
            return Err(Status::internal("payment transaction was abandoned"));
        };

        match outcome {
            Ok(payload) => {
                self.handler.complete(pending).await;
                self.telemetry
                    .record_response(&method, code_label(tonic::Code::Ok), started.elapsed());
                Ok(Response::new(pb::InvokeReply { payload }))
            }
            Err(status) => {
                self.handler.complete_after_error(pending).await;
                self.telemetry
                    .record_response(&method, code_label(status.code()), started.elapsed());
                Err(status)
            }
        }
    }

    async fn health(
        &self,
        _request: Request<pb::HealthRequest>,
    ) -> Result<Response<pb::HealthReply>, Status> {
        let status = self.downstream.health().await?;
        Ok(Response::new(pb::HealthReply { status }))
    }
}

fn code_label(code: tonic::Code) -> &'static str {
    match code {
        tonic::Code::Ok => "Ok",
        tonic::Code::InvalidArgument => "InvalidArgument",
        tonic::Code::Unauthenticated => "Unauthenticated",
        tonic::Code::FailedPrecondition => "FailedPrecondition",
        tonic::Code::Unavailable => "Unavailable",
        tonic::Code::Internal => "Internal",
        tonic::Code::DeadlineExceeded => "DeadlineExceeded",
        tonic::Code::Cancelled => "Cancelled",
        _ => "Other",
    }
}
