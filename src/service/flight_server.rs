// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{
    Action as FlightAction, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, Result as FlightResult, SchemaResult,
    Ticket,
};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use crate::classify::Classifier;
use crate::common::status::ServiceError;
use crate::runtime::dataset_registry::DatasetRegistry;
use crate::service::action::{Action, ActionDispatcher, ComputeSlots, PostAction};
use crate::service::shutdown::ShutdownController;
use crate::service::transfer::{TransferHandlers, encode_dataset};
use crate::texflight_logging::{debug, error, info, warn};

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct FlightServerOptions {
    pub host: String,
    pub port: u16,
    /// Host advertised in endpoint locations. Derived from `host` when unset.
    pub advertise_host: Option<String>,
    pub shutdown_grace: Duration,
    pub max_message_bytes: usize,
    pub slots: ComputeSlots,
}

impl Default for FlightServerOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5005,
            advertise_host: None,
            shutdown_grace: Duration::from_millis(500),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            slots: ComputeSlots::default(),
        }
    }
}

fn advertised_host(bind_host: &str) -> String {
    let host = match bind_host {
        "0.0.0.0" => "127.0.0.1",
        "::" | "[::]" => "::1",
        other => other,
    };
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

pub struct TexFlightService {
    transfer: Arc<TransferHandlers>,
    dispatcher: Arc<ActionDispatcher>,
    shutdown: ShutdownController,
}

impl TexFlightService {
    pub fn new(
        transfer: Arc<TransferHandlers>,
        dispatcher: Arc<ActionDispatcher>,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            transfer,
            dispatcher,
            shutdown,
        }
    }
}

fn log_failure(rpc: &'static str, err: ServiceError) -> Status {
    warn!(target: "texflight::flight", rpc, error = %err, "flight request failed");
    Status::from(err)
}

#[tonic::async_trait]
impl FlightService for TexFlightService {
    type HandshakeStream = BoxStream<'static, Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, Result<FlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, Result<PutResult, Status>>;
    type DoActionStream = BoxStream<'static, Result<FlightResult, Status>>;
    type ListActionsStream = BoxStream<'static, Result<ActionType, Status>>;
    type DoExchangeStream = BoxStream<'static, Result<FlightData, Status>>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake: authentication is not supported"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        let infos = self
            .transfer
            .list_flights()
            .map(|info| info.map_err(|e| log_failure("ListFlights", e)));
        Ok(Response::new(stream::iter(infos).boxed()))
    }

    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        let descriptor = request.into_inner();
        let info = self
            .transfer
            .get_flight_info(&descriptor)
            .map_err(|e| log_failure("GetFlightInfo", e))?;
        Ok(Response::new(info))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info is not supported"))
    }

    async fn get_schema(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        let descriptor = request.into_inner();
        let schema = self
            .transfer
            .get_schema(&descriptor)
            .map_err(|e| log_failure("GetSchema", e))?;
        Ok(Response::new(schema))
    }

    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        let ticket = request.into_inner();
        let dataset = self
            .transfer
            .download(&ticket)
            .map_err(|e| log_failure("DoGet", e))?;
        Ok(Response::new(encode_dataset(dataset)))
    }

    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        let inbound = request.into_inner();
        self.transfer
            .upload(inbound)
            .await
            .map_err(|e| log_failure("DoPut", e))?;
        Ok(Response::new(stream::empty().boxed()))
    }

    async fn do_action(
        &self,
        request: Request<FlightAction>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        let action = Action::parse(&request.into_inner().r#type);
        debug!(target: "texflight::flight", action = %action, "DoAction");
        let outcome = self
            .dispatcher
            .dispatch(&action)
            .await
            .map_err(|e| log_failure("DoAction", e))?;

        let ack = stream::once(future::ready(Ok(FlightResult {
            body: outcome.body,
        })));
        let response = match outcome.post {
            PostAction::None => ack.boxed(),
            PostAction::Terminate => {
                // Polled only once the ack has been handed to the transport.
                let shutdown = self.shutdown.clone();
                let terminate = stream::once(async move {
                    if shutdown.schedule() {
                        info!(
                            target: "texflight::flight",
                            grace_ms = shutdown.grace().as_millis() as u64,
                            "shutdown acknowledged, termination scheduled"
                        );
                    }
                })
                .filter_map(|()| future::ready(None::<Result<FlightResult, Status>>));
                ack.chain(terminate).boxed()
            }
        };
        Ok(Response::new(response))
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        let actions = ActionDispatcher::action_types().into_iter().map(Ok);
        Ok(Response::new(stream::iter(actions).boxed()))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange is not supported"))
    }
}

/// A running flight server. Dropping the handle does not stop the server.
#[derive(Debug)]
pub struct FlightServerHandle {
    local_addr: SocketAddr,
    location: String,
    registry: Arc<DatasetRegistry>,
    shutdown: ShutdownController,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl FlightServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn registry(&self) -> &Arc<DatasetRegistry> {
        &self.registry
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Stops accepting connections right away.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Waits until the server has stopped and released its listener.
    pub async fn wait(self) -> Result<(), ServiceError> {
        self.task
            .await
            .map_err(|e| ServiceError::internal(format!("flight server task failed: {e}")))?
            .map_err(|e| ServiceError::internal(format!("flight server stopped: {e}")))
    }
}

/// Binds the listener and serves Arrow Flight on the current tokio runtime.
///
/// Bind failures are reported as `StartupFailure`; the server never starts.
pub async fn start_flight_server(
    options: FlightServerOptions,
    classifier: Arc<dyn Classifier>,
) -> Result<FlightServerHandle, ServiceError> {
    let listener = tokio::net::TcpListener::bind((options.host.as_str(), options.port))
        .await
        .map_err(|e| {
            ServiceError::startup(format!(
                "failed to bind flight listener on {}:{}: {e}",
                options.host, options.port
            ))
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| ServiceError::startup(format!("resolve flight listener address: {e}")))?;
    let host = options
        .advertise_host
        .clone()
        .unwrap_or_else(|| advertised_host(&options.host));
    let location = format!("grpc+tcp://{host}:{}", local_addr.port());

    let registry = Arc::new(DatasetRegistry::new());
    let (shutdown, signal) = ShutdownController::new(options.shutdown_grace);
    let transfer = Arc::new(TransferHandlers::new(Arc::clone(&registry), location.clone()));
    let dispatcher = Arc::new(ActionDispatcher::new(
        Arc::clone(&registry),
        classifier,
        options.slots.clone(),
    ));
    let service = TexFlightService::new(transfer, dispatcher, shutdown.clone());
    let service = FlightServiceServer::new(service)
        .max_decoding_message_size(options.max_message_bytes)
        .max_encoding_message_size(options.max_message_bytes);

    let incoming = TcpListenerStream::new(listener);
    let task = tokio::spawn(async move {
        let result = Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(incoming, signal.wait())
            .await;
        match &result {
            Ok(()) => info!(target: "texflight::flight", %local_addr, "flight server stopped"),
            Err(e) => error!(
                target: "texflight::flight",
                %local_addr,
                error = %e,
                "flight server stopped with error"
            ),
        }
        result
    });

    info!(
        target: "texflight::flight",
        %local_addr,
        location = %location,
        input_slot = %options.slots.input,
        output_slot = %options.slots.output,
        "Flight Server serving"
    );
    Ok(FlightServerHandle {
        local_addr,
        location,
        registry,
        shutdown,
        task,
    })
}
