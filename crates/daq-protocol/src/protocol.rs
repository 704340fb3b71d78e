//! Wire framing: length-prefixed request/response records.

use chrono::Utc;

use daq_core::{DaqError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Upper bound on a single control frame. Setup payloads carry
/// pre-rendered waveforms, so this is generous.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Control operations a service runtime answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Setup = 0,
    Start = 1,
    Finish = 2,
    IsBusy = 3,
    Progress = 4,
    Cleanup = 5,
    Ping = 6,
}

impl RequestType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RequestType::Setup),
            1 => Some(RequestType::Start),
            2 => Some(RequestType::Finish),
            3 => Some(RequestType::IsBusy),
            4 => Some(RequestType::Progress),
            5 => Some(RequestType::Cleanup),
            6 => Some(RequestType::Ping),
            _ => None,
        }
    }
}

/// Outcome carried on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    Success = 0,
    Error = 1,
    NotFound = 2,
    InvalidRequest = 3,
    Timeout = 4,
}

impl ResponseStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ResponseStatus::Success),
            1 => Some(ResponseStatus::Error),
            2 => Some(ResponseStatus::NotFound),
            3 => Some(ResponseStatus::InvalidRequest),
            4 => Some(ResponseStatus::Timeout),
            _ => None,
        }
    }
}

/// One control request.
#[derive(Debug, Clone)]
pub struct ControlRequest {
    pub request_id: u32,
    pub request_type: RequestType,
    pub payload: Vec<u8>,
    pub timestamp_ms: u64,
}

impl ControlRequest {
    pub fn new(request_id: u32, request_type: RequestType, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            request_type,
            payload,
            timestamp_ms: Utc::now().timestamp_millis() as u64,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17 + self.payload.len());
        buf.push(self.request_type as u8);
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 17 {
            return Err(DaqError::Protocol("request frame too short".into()));
        }
        let request_type = RequestType::from_u8(data[0])
            .ok_or_else(|| DaqError::Protocol(format!("unknown request type {}", data[0])))?;
        let request_id = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let payload_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
        if data.len() != 17 + payload_len {
            return Err(DaqError::Protocol("request payload length mismatch".into()));
        }
        let payload = data[9..9 + payload_len].to_vec();
        let ts_bytes: [u8; 8] = data[9 + payload_len..17 + payload_len]
            .try_into()
            .map_err(|_| DaqError::Protocol("request timestamp truncated".into()))?;
        Ok(Self {
            request_id,
            request_type,
            payload,
            timestamp_ms: u64::from_le_bytes(ts_bytes),
        })
    }
}

/// One control response.
#[derive(Debug, Clone)]
pub struct ControlResponse {
    pub request_id: u32,
    pub status: ResponseStatus,
    pub payload: Vec<u8>,
    pub error_message: String,
    pub timestamp_ms: u64,
}

impl ControlResponse {
    pub fn success(request_id: u32, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Success,
            payload,
            error_message: String::new(),
            timestamp_ms: Utc::now().timestamp_millis() as u64,
        }
    }

    pub fn failure(request_id: u32, status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            payload: Vec::new(),
            error_message: message.into(),
            timestamp_ms: Utc::now().timestamp_millis() as u64,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let err = self.error_message.as_bytes();
        let mut buf = Vec::with_capacity(21 + self.payload.len() + err.len());
        buf.push(self.status as u8);
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&(err.len() as u32).to_le_bytes());
        buf.extend_from_slice(err);
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 21 {
            return Err(DaqError::Protocol("response frame too short".into()));
        }
        let status = ResponseStatus::from_u8(data[0])
            .ok_or_else(|| DaqError::Protocol(format!("unknown response status {}", data[0])))?;
        let request_id = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let payload_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
        if data.len() < 13 + payload_len {
            return Err(DaqError::Protocol("response payload truncated".into()));
        }
        let payload = data[9..9 + payload_len].to_vec();
        let off = 9 + payload_len;
        let err_len =
            u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]) as usize;
        if data.len() != off + 4 + err_len + 8 {
            return Err(DaqError::Protocol("response length mismatch".into()));
        }
        let error_message = String::from_utf8(data[off + 4..off + 4 + err_len].to_vec())
            .map_err(|_| DaqError::Protocol("response error message is not UTF-8".into()))?;
        let ts_bytes: [u8; 8] = data[off + 4 + err_len..]
            .try_into()
            .map_err(|_| DaqError::Protocol("response timestamp truncated".into()))?;
        Ok(Self {
            request_id,
            status,
            payload,
            error_message,
            timestamp_ms: u64::from_le_bytes(ts_bytes),
        })
    }
}

// =============================================================================
// Frame I/O
// =============================================================================

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_FRAME_BYTES {
        return Err(DaqError::Protocol(format!(
            "frame of {} bytes exceeds maximum {}",
            body.len(),
            MAX_FRAME_BYTES
        )));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(DaqError::Protocol(format!(
            "incoming frame of {} bytes exceeds maximum {}",
            len, MAX_FRAME_BYTES
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let req = ControlRequest::new(42, RequestType::Setup, b"hello".to_vec());
        let decoded = ControlRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.request_type, RequestType::Setup);
        assert_eq!(decoded.payload, b"hello");
        assert_eq!(decoded.timestamp_ms, req.timestamp_ms);
    }

    #[test]
    fn response_roundtrip_with_error() {
        let resp = ControlResponse::failure(7, ResponseStatus::NotFound, "no such service");
        let decoded = ControlResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.status, ResponseStatus::NotFound);
        assert_eq!(decoded.error_message, "no such service");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn decode_rejects_malformed_frames() {
        assert!(ControlRequest::decode(&[]).is_err());
        assert!(ControlRequest::decode(&[9; 17]).is_err()); // unknown type
        let mut truncated = ControlRequest::new(1, RequestType::Ping, vec![1, 2, 3]).encode();
        truncated.pop();
        assert!(ControlRequest::decode(&truncated).is_err());
        assert!(ControlResponse::decode(&[0; 5]).is_err());
    }

    #[tokio::test]
    async fn frame_io_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"frame-body").await.unwrap();
        let body = read_frame(&mut b).await.unwrap();
        assert_eq!(body, b"frame-body");
    }
}
