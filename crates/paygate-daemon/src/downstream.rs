use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use paygate_protocol::pb;
use paygate_protocol::pb::gateway_client::GatewayClient;

/// The service-level invocation that happens between payment start and
/// payment commit. The daemon only ever forwards one opaque call and probes
/// liveness.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn invoke(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, Status>;

    async fn health(&self) -> Result<String, Status>;
}

/// Forwards calls to the fronted service over its own gateway endpoint. The
/// channel connects lazily so daemon startup does not depend on backend
/// availability; connection failures surface per-call as `Unavailable`.
pub struct GrpcDownstream {
    client: GatewayClient<Channel>,
}

impl GrpcDownstream {
    pub fn connect_lazy(endpoint: &str) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(endpoint.to_string())?.connect_lazy();
        Ok(Self {
            client: GatewayClient::new(channel),
        })
    }
}

#[async_trait]
impl Downstream for GrpcDownstream {
    async fn invoke(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, Status> {
        let mut client = self.client.clone();
        let reply = client
            .invoke(pb::InvokeRequest {
                method: method.to_string(),
                payload,
            })
            .await?;
        Ok(reply.into_inner().payload)
    }

    async fn health(&self) -> Result<String, Status> {
        let mut client = self.client.clone();
        let reply = client.health(pb::HealthRequest {}).await?;
        Ok(reply.into_inner().status)
    }
}
