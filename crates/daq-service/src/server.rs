//! TCP control server for one service runtime.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use daq_core::{DaqError, Result};
use daq_protocol::protocol::{read_frame, write_frame};
use daq_protocol::{
    BusyReport, CleanupReport, ControlRequest, ControlResponse, FinishParams, PingReply,
    RequestType, ResponseStatus, Serializer, SetupParams, PONG,
};
use daq_task::ProviderRegistry;

use crate::runtime::{build_setup, AcquisitionService};

/// Accepts control connections and dispatches the uniform lifecycle
/// contract onto the shared [`AcquisitionService`].
///
/// Blocking runtime operations (`setup`, `start`, `finish`) run under
/// `spawn_blocking` so the accept loop keeps serving heartbeats while a
/// teardown drains workers.
pub struct ControlServer {
    listener: TcpListener,
    service: Arc<AcquisitionService>,
    providers: ProviderRegistry,
    serializer: Serializer,
    shutdown_tx: watch::Sender<bool>,
}

impl ControlServer {
    pub async fn bind(
        addr: &str,
        service: Arc<AcquisitionService>,
        providers: ProviderRegistry,
        serializer: Serializer,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, service = %service.name(), "control server listening");
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            service,
            providers,
            serializer,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Observer that flips to `true` when a `finish(stop_service=true)`
    /// asks the process to exit.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Serve until a stop-service finish arrives.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, "control client connected");
                            let service = Arc::clone(&self.service);
                            let providers = self.providers.clone();
                            let serializer = self.serializer;
                            let shutdown_tx = self.shutdown_tx.clone();
                            tokio::spawn(async move {
                                if let Err(err) =
                                    handle_client(socket, service, providers, serializer, shutdown_tx)
                                        .await
                                {
                                    warn!(%peer, %err, "control client error");
                                }
                            });
                        }
                        Err(err) => error!(%err, "accept failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!(service = %self.service.name(), "control server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_client(
    mut socket: TcpStream,
    service: Arc<AcquisitionService>,
    providers: ProviderRegistry,
    serializer: Serializer,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    loop {
        let body = match read_frame(&mut socket).await {
            Ok(body) => body,
            // Peer hung up; not an error.
            Err(DaqError::Io(_)) => return Ok(()),
            Err(err) => return Err(err),
        };

        let (response, stop_process) = match ControlRequest::decode(&body) {
            Ok(request) => {
                process_request(request, &service, &providers, serializer).await
            }
            Err(err) => (
                ControlResponse::failure(0, ResponseStatus::InvalidRequest, err.to_string()),
                false,
            ),
        };

        write_frame(&mut socket, &response.encode()).await?;

        if stop_process {
            // The caller has its acknowledgement; now let the process
            // wind down.
            let _ = shutdown_tx.send(true);
            return Ok(());
        }
    }
}

async fn process_request(
    request: ControlRequest,
    service: &Arc<AcquisitionService>,
    providers: &ProviderRegistry,
    serializer: Serializer,
) -> (ControlResponse, bool) {
    let id = request.request_id;
    match request.request_type {
        RequestType::Setup => {
            let params: SetupParams = match serializer.decode(&request.payload) {
                Ok(params) => params,
                Err(err) => {
                    return (
                        ControlResponse::failure(id, ResponseStatus::InvalidRequest, err.to_string()),
                        false,
                    )
                }
            };
            let service = Arc::clone(service);
            let providers = providers.clone();
            let result = tokio::task::spawn_blocking(move || {
                build_setup(&params, &providers).and_then(|setup| service.setup(setup))
            })
            .await;
            (respond_empty(id, flatten(result)), false)
        }
        RequestType::Start => {
            let starter = Arc::clone(service);
            let result = tokio::task::spawn_blocking(move || starter.start()).await;
            let response = respond_empty(id, flatten(result));
            if response.status == ResponseStatus::Success {
                spawn_deadline(Arc::clone(service));
            }
            (response, false)
        }
        RequestType::Finish => {
            let params: FinishParams = if request.payload.is_empty() {
                FinishParams {
                    stop_service: false,
                }
            } else {
                match serializer.decode(&request.payload) {
                    Ok(params) => params,
                    Err(err) => {
                        return (
                            ControlResponse::failure(
                                id,
                                ResponseStatus::InvalidRequest,
                                err.to_string(),
                            ),
                            false,
                        )
                    }
                }
            };
            let service = Arc::clone(service);
            let result =
                tokio::task::spawn_blocking(move || service.finish(params.stop_service)).await;
            match flatten(result) {
                Ok(stop_process) => (ControlResponse::success(id, Vec::new()), stop_process),
                Err(err) => (
                    ControlResponse::failure(id, ResponseStatus::Error, err.to_string()),
                    false,
                ),
            }
        }
        RequestType::IsBusy => {
            let report = BusyReport {
                busy: service.is_busy(),
            };
            (respond_payload(id, serializer.encode(&report)), false)
        }
        RequestType::Progress => {
            let report = service.progress();
            (respond_payload(id, serializer.encode(&report)), false)
        }
        RequestType::Cleanup => {
            let report = CleanupReport {
                cleaned: service.cleanup(),
            };
            (respond_payload(id, serializer.encode(&report)), false)
        }
        RequestType::Ping => {
            let reply = PingReply {
                message: PONG.into(),
                service: service.name().to_string(),
            };
            (respond_payload(id, serializer.encode(&reply)), false)
        }
    }
}

/// Arm the run-duration deadline: finish automatically once the fixed
/// duration elapses, unless an operator teardown cancels it first. The
/// deadline is retired through the cancellation watch, not by a timer
/// thread calling back into live state.
fn spawn_deadline(service: Arc<AcquisitionService>) {
    let Some(total) = service.total() else {
        return;
    };
    let mut cancel = service.subscribe_cancel();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(total) => {
                debug!(service = %service.name(), "run duration elapsed");
                let service = Arc::clone(&service);
                let _ = tokio::task::spawn_blocking(move || service.finish(false)).await;
            }
            _ = cancel.changed() => {}
        }
    });
}

fn flatten<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(DaqError::ServiceState(format!("task panicked: {}", err))),
    }
}

fn respond_empty(id: u32, result: Result<()>) -> ControlResponse {
    match result {
        Ok(()) => ControlResponse::success(id, Vec::new()),
        Err(err) => ControlResponse::failure(id, ResponseStatus::Error, err.to_string()),
    }
}

fn respond_payload(id: u32, payload: Result<Vec<u8>>) -> ControlResponse {
    match payload {
        Ok(payload) => ControlResponse::success(id, payload),
        Err(err) => ControlResponse::failure(id, ResponseStatus::Error, err.to_string()),
    }
}
