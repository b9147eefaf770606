//! Serial port access for `ASRL` resources.
//!
//! Requires the `serial` feature (enabled by default).

use anyhow::Context;
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;

/// Open a serial port with 8N1 framing and no flow control.
///
/// Opening is done on the blocking pool; some platforms stall for a while
/// when a USB adapter is enumerating.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    resource: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    let port_path_owned = port_path.to_string();
    let resource_owned = resource.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open {} on {}", resource_owned, port_path_owned))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}
