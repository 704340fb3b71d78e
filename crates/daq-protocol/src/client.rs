//! Control client used by the orchestrator and operator tooling.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use daq_core::limits::{CONNECT_TIMEOUT, RPC_TIMEOUT};
use daq_core::{DaqError, Result};

use crate::messages::{
    BusyReport, CleanupReport, FinishParams, PingReply, ProgressReport, Serializer, SetupParams,
    PONG,
};
use crate::protocol::{read_frame, write_frame, ControlRequest, ControlResponse, RequestType,
    ResponseStatus};

/// Request/response client for one service runtime.
///
/// One request in flight at a time; every method degrades to `Err`
/// rather than letting a transport failure escape as a panic.
pub struct ControlClient {
    stream: TcpStream,
    serializer: Serializer,
    next_id: u32,
    request_timeout: Duration,
}

impl ControlClient {
    /// Connect to `addr` (`host:port`) within the default connect
    /// timeout.
    pub async fn connect(addr: &str, serializer: Serializer) -> Result<Self> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| DaqError::Remote(format!("connect to {} timed out", addr)))??;
        Ok(Self {
            stream,
            serializer,
            next_id: 0,
            request_timeout: RPC_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn call(&mut self, request_type: RequestType, payload: Vec<u8>) -> Result<ControlResponse> {
        self.next_id = self.next_id.wrapping_add(1);
        let request = ControlRequest::new(self.next_id, request_type, payload);

        write_frame(&mut self.stream, &request.encode()).await?;
        let body = timeout(self.request_timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| DaqError::Remote(format!("{:?} timed out", request_type)))??;
        let response = ControlResponse::decode(&body)?;

        if response.request_id != request.request_id {
            return Err(DaqError::Protocol(format!(
                "response id {} does not match request id {}",
                response.request_id, request.request_id
            )));
        }
        debug!(?request_type, status = ?response.status, "control rpc");
        match response.status {
            ResponseStatus::Success => Ok(response),
            _ => Err(DaqError::Remote(if response.error_message.is_empty() {
                format!("{:?} failed with {:?}", request_type, response.status)
            } else {
                response.error_message
            })),
        }
    }

    pub async fn setup(&mut self, params: &SetupParams) -> Result<()> {
        let payload = self.serializer.encode(params)?;
        self.call(RequestType::Setup, payload).await.map(|_| ())
    }

    pub async fn start(&mut self) -> Result<()> {
        self.call(RequestType::Start, Vec::new()).await.map(|_| ())
    }

    pub async fn finish(&mut self, stop_service: bool) -> Result<()> {
        let payload = self.serializer.encode(&FinishParams { stop_service })?;
        self.call(RequestType::Finish, payload).await.map(|_| ())
    }

    pub async fn is_busy(&mut self) -> Result<bool> {
        let response = self.call(RequestType::IsBusy, Vec::new()).await?;
        let report: BusyReport = self.serializer.decode(&response.payload)?;
        Ok(report.busy)
    }

    pub async fn progress(&mut self) -> Result<ProgressReport> {
        let response = self.call(RequestType::Progress, Vec::new()).await?;
        self.serializer.decode(&response.payload)
    }

    pub async fn cleanup(&mut self) -> Result<bool> {
        let response = self.call(RequestType::Cleanup, Vec::new()).await?;
        let report: CleanupReport = self.serializer.decode(&response.payload)?;
        Ok(report.cleaned)
    }

    /// Heartbeat. `Ok(true)` only for a well-formed pong.
    pub async fn ping(&mut self) -> Result<bool> {
        let response = self.call(RequestType::Ping, Vec::new()).await?;
        let reply: PingReply = self.serializer.decode(&response.payload)?;
        Ok(reply.message == PONG)
    }
}
