use std::any::type_name;

use anyhow::Context;
use bincode::{Decode, Encode};
use tokio_util::bytes::BytesMut;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

pub fn read_u32(src: &BytesMut, offset: usize) -> anyhow::Result<u32> {
    let bytes = src
        .get(offset..(offset + 4))
        .ok_or_else(|| anyhow::anyhow!("buffer too short for u32 at offset {}", offset))?;
    let mut u32_bytes = [0u8; 4];
    u32_bytes.copy_from_slice(bytes);
    Ok(u32::from_be_bytes(u32_bytes))
}

pub fn encode_bytes<T>(value: &T) -> anyhow::Result<Vec<u8>>
where
    T: Encode,
{
    bincode::encode_to_vec(value, bincode::config::standard()).context(type_name::<T>())
}

pub fn decode_bytes<T>(bytes: &[u8]) -> anyhow::Result<T>
where
    T: Decode,
{
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .context(type_name::<T>())
        .map(|(t, _)| t)
}

pub fn init_logger(level: tracing::Level) {
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .pretty();
    tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_max_level(level)
        .init();
}

pub fn init_logger_with_filter(filter: impl Into<EnvFilter>) {
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .pretty()
        .with_file(false);
    tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .init();
}
