//! UDP telemetry listener: a managed worker that owns one bound datagram
//! socket and keeps the latest record reported by each miner.

pub mod hashrate;
pub mod record;
pub mod service;
pub mod task;

pub use hashrate::{format_hashrate, parse_hashrate};
pub use record::{
    decode_datagram, DecodeError, MinerRecord, FIRMWARE_VERSION_FIELD, HASHRATE_FIELD, RECEIVED_AT_FIELD,
    SOURCE_ID_FIELD, TIMESTAMP_FORMAT,
};
pub use service::SocketListener;
pub use task::DatagramTask;
