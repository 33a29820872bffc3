//! Line-oriented serial transport.
//!
//! ASCII instruments answer each command with an optional echo, a response and
//! a prompt. [`LineTransport`] hides the port so drivers can be tested against
//! scripted responses; [`SerialTransport`] is the tokio-serial implementation
//! (feature `tokio_serial`).

use anyhow::Result;
use async_trait::async_trait;

/// Request/response channel to an ASCII instrument.
#[async_trait]
pub trait LineTransport: Send + Sync {
    /// Send `command` and return the instrument's response with echo and prompt removed.
    async fn query(&self, command: &str) -> Result<String>;
}

/// Remove a leading echo of `command` and the trailing prompt character.
pub fn clean_response(command: &str, raw: &str, prompt: char) -> String {
    let without_prompt = raw.trim().trim_end_matches(prompt).trim();
    without_prompt
        .strip_prefix(command)
        .unwrap_or(without_prompt)
        .trim()
        .to_string()
}

#[cfg(feature = "tokio_serial")]
mod port {
    use super::{clean_response, LineTransport};
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::Mutex;
    use tokio_serial::{SerialPortBuilderExt, SerialStream};

    /// Serial port speaking CR-terminated commands and `prompt`-terminated replies.
    pub struct SerialTransport {
        port: Mutex<BufReader<SerialStream>>,
        timeout: Duration,
        prompt: u8,
    }

    impl SerialTransport {
        /// Open `port_path` at `baud_rate`, 8N1, no flow control.
        pub fn open(port_path: &str, baud_rate: u32, timeout: Duration, prompt: u8) -> Result<Self> {
            let port = tokio_serial::new(port_path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .with_context(|| format!("Failed to open serial port {port_path}"))?;
            Ok(Self {
                port: Mutex::new(BufReader::new(port)),
                timeout,
                prompt,
            })
        }
    }

    #[async_trait]
    impl LineTransport for SerialTransport {
        async fn query(&self, command: &str) -> Result<String> {
            let mut port = self.port.lock().await;
            port.get_mut()
                .write_all(format!("{command}\r").as_bytes())
                .await
                .context("Serial write failed")?;

            let mut buffer = Vec::new();
            tokio::time::timeout(self.timeout, port.read_until(self.prompt, &mut buffer))
                .await
                .with_context(|| format!("Serial read timeout for '{command}'"))??;

            let raw = String::from_utf8_lossy(&buffer);
            Ok(clean_response(command, &raw, self.prompt as char))
        }
    }
}

#[cfg(feature = "tokio_serial")]
pub use port::SerialTransport;
