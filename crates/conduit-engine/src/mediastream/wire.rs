//! The UDP media-stream wire format: a one-byte control action on the handshake datagram, and a
//! small binary header on every data datagram after that.

use crate::error::MediaStreamError;

/// The smallest a data frame (header + payload) is allowed to be.
pub const MIN_FRAME_SIZE: usize = 40;

const DATA_HEADER_LEN: usize = 16;
const CONNECTION_ID_FRAME_LEN: usize = 8;

/// The action code carried on the first datagram a client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
}

impl ControlAction {
    pub fn decode(byte: u8) -> Result<Self, MediaStreamError> {
        match byte {
            0 => Ok(ControlAction::Start),
            other => Err(MediaStreamError::UnknownAction(other)),
        }
    }

    pub fn encode(self) -> u8 {
        match self {
            ControlAction::Start => 0,
        }
    }
}

/// The one-time datagram telling a client which connection id to echo back on control traffic.
pub struct ConnectionIdFrame {
    pub connection_id: u64,
}

impl ConnectionIdFrame {
    pub fn encode(&self) -> [u8; CONNECTION_ID_FRAME_LEN] {
        self.connection_id.to_be_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self, MediaStreamError> {
        if data.len() < CONNECTION_ID_FRAME_LEN {
            return Err(MediaStreamError::FrameTooSmall(data.len()));
        }
        let mut bytes = [0u8; CONNECTION_ID_FRAME_LEN];
        bytes.copy_from_slice(&data[..CONNECTION_ID_FRAME_LEN]);
        Ok(Self {
            connection_id: u64::from_be_bytes(bytes),
        })
    }
}

/// The header prefixed to every data datagram, so the receiver can detect drops, reordering, and
/// where a fragmented frame ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrameHeader {
    pub sequence_number: u64,
    pub fragment_index: u32,
    pub fragment_count: u32,
}

impl DataFrameHeader {
    /// Encodes the header followed by `payload` into one datagram, failing if the result would
    /// be smaller than [`MIN_FRAME_SIZE`].
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, MediaStreamError> {
        let mut out = Vec::with_capacity(DATA_HEADER_LEN + payload.len());
        out.extend_from_slice(&self.sequence_number.to_be_bytes());
        out.extend_from_slice(&self.fragment_index.to_be_bytes());
        out.extend_from_slice(&self.fragment_count.to_be_bytes());
        out.extend_from_slice(payload);
        if out.len() < MIN_FRAME_SIZE {
            return Err(MediaStreamError::FrameTooSmall(out.len()));
        }
        Ok(out)
    }

    /// Splits a received datagram into its header and payload.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), MediaStreamError> {
        if data.len() < MIN_FRAME_SIZE {
            return Err(MediaStreamError::FrameTooSmall(data.len()));
        }
        let sequence_number = u64::from_be_bytes(data[0..8].try_into().unwrap());
        let fragment_index = u32::from_be_bytes(data[8..12].try_into().unwrap());
        let fragment_count = u32::from_be_bytes(data[12..16].try_into().unwrap());
        Ok((
            Self {
                sequence_number,
                fragment_index,
                fragment_count,
            },
            &data[DATA_HEADER_LEN..],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_data_frame() {
        let header = DataFrameHeader {
            sequence_number: 42,
            fragment_index: 1,
            fragment_count: 3,
        };
        let payload = vec![7u8; MIN_FRAME_SIZE];
        let encoded = header.encode(&payload).unwrap();
        let (decoded, body) = DataFrameHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(body, payload.as_slice());
    }

    #[test]
    fn rejects_undersized_frames() {
        let header = DataFrameHeader {
            sequence_number: 0,
            fragment_index: 0,
            fragment_count: 1,
        };
        let err = header.encode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, MediaStreamError::FrameTooSmall(_)));
    }

    #[test]
    fn rejects_unknown_control_actions() {
        assert!(matches!(
            ControlAction::decode(9),
            Err(MediaStreamError::UnknownAction(9))
        ));
    }
}
