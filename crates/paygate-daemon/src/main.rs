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

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use paygate_core::blockchain::MpeContract;
use paygate_core::combined::CombinedStorage;
use paygate_core::etcd::EtcdStore;
use paygate_core::income::FixedPriceValidator;
use paygate_core::kv::KeyValueStore;
use paygate_core::service::EscrowPaymentService;
use paygate_core::storage::ChannelStorage;
use paygate_daemon::config::DaemonConfig;
use paygate_daemon::downstream::{Downstream, GrpcDownstream};
use paygate_daemon::gateway::PaymentGateway;
use paygate_daemon::handler::PaymentHandler;
use paygate_daemon::telemetry::{derive_daemon_id, Telemetry};
use paygate_protocol::pb::gateway_server::GatewayServer;

// Exit codes for the host CLI: 2 configuration invalid, 3 KV unreachable.
const EXIT_INVALID_CONFIG: i32 = 2;
const EXIT_KV_UNREACHABLE: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "paygate-daemon")]
#[command(about = "Payment-gating gRPC daemon for escrow channel cheques")]
struct Args {
    #[arg(long, default_value = "paygate.json")]
    config: String,

    /// Overrides the configured gRPC listen address.
    #[arg(long)]
    listen: Option<String>,

    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log))
        .init();

    let mut config = match DaemonConfig::load(Path::new(&args.config)) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid daemon configuration");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let resolved = match config.resolve() {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::error!(error = %err, "invalid daemon configuration");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
    };

    let kv: Arc<dyn KeyValueStore> = match EtcdStore::connect(&config.kv.to_etcd_config()).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::error!(error = %err, "unable to connect to payment channel storage");
            std::process::exit(EXIT_KV_UNREACHABLE);
        }
    };

    let contract = match MpeContract::new(
        &config.ethereum_rpc_endpoint,
        resolved.mpe_contract_address,
        Duration::from_millis(config.kv.request_timeout_ms),
    ) {
        Ok(contract) => Arc::new(contract),
        Err(err) => {
            tracing::error!(error = %err, "invalid ethereum configuration");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
    };

    let downstream: Arc<dyn Downstream> =
        match GrpcDownstream::connect_lazy(&config.downstream_endpoint) {
            Ok(downstream) => Arc::new(downstream),
            Err(err) => {
                tracing::error!(error = %err, "invalid downstream endpoint");
                std::process::exit(EXIT_INVALID_CONFIG);
            }
        };

    let daemon_id = derive_daemon_id(&config.replica_group_id, &config.listen);
    let storage = ChannelStorage::new(Arc::clone(&kv));
    let combined = Arc::new(CombinedStorage::new(
        storage,
        contract,
        resolved.replica_group_id,
        resolved.reconcile_on_hit,
    ));
    let service = Arc::new(EscrowPaymentService::new(
        combined,
        Arc::clone(&kv),
        resolved.lock_ttl,
        daemon_id.clone(),
    ));
    let income_validator = Arc::new(FixedPriceValidator::new(resolved.price));
    let telemetry = Arc::new(Telemetry::new(daemon_id, config.service_id.clone()));
    let handler = Arc::new(PaymentHandler::new(
        service,
        income_validator,
        resolved.mpe_contract_address,
        Arc::clone(&telemetry),
    ));
    let gateway = PaymentGateway::new(handler, Arc::clone(&downstream), Arc::clone(&telemetry));

    let _telemetry_handle = Arc::clone(&telemetry)
        .spawn_server(resolved.telemetry_listen, Arc::clone(&downstream))
        .await?;

    tracing::info!(
        listen = %resolved.listen,
        telemetry_listen = %resolved.telemetry_listen,
        replica_group_id = %resolved.replica_group_id,
        mpe_contract = %resolved.mpe_contract_address,
        price = %resolved.price,
        "starting paygate gRPC gateway"
    );

    tonic::transport::Server::builder()
        .add_service(GatewayServer::new(gateway))
        .serve(resolved.listen)
        .await?;

    Ok(())
}
