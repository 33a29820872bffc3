//! Thorlabs MCLS1 multi-channel laser source driver
//!
//! Protocol Overview:
//! - Format: ASCII command/response over USB virtual COM port
//! - Baud: 115200, 8N1, no flow control
//! - Terminator: CR (\r); every reply ends with a `>` prompt
//! - Commands: `system=1`, `channel=N`, `current=X.XX`, `enable=0|1`
//! - Queries: `current?`, `id?`
//!
//! Commands act on the selected channel, so every per-channel operation
//! selects its channel first.

use crate::config::LaserConfig;
use crate::error::DaqError;
use crate::hardware::capabilities::{Connection, LaserSource};
use crate::hardware::serial::LineTransport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// MCLS1 prompt character.
pub const PROMPT: u8 = b'>';
/// Serial baud rate.
pub const BAUD_RATE: u32 = 115_200;
/// Channels on the unit.
pub const CHANNELS: std::ops::RangeInclusive<u8> = 1..=4;

/// Driver for the MCLS1 laser source.
pub struct Mcls1Laser<T: LineTransport> {
    id: String,
    transport: T,
    config: LaserConfig,
}

impl<T: LineTransport> Mcls1Laser<T> {
    /// Driver named `id` talking over `transport`.
    pub fn new(id: impl Into<String>, transport: T, config: LaserConfig) -> Self {
        Self {
            id: id.into(),
            transport,
            config,
        }
    }

    fn check_channel(channel: u8) -> Result<(), DaqError> {
        if CHANNELS.contains(&channel) {
            Ok(())
        } else {
            Err(DaqError::Instrument(format!(
                "Invalid MCLS1 channel {channel}. Must be {}-{}",
                CHANNELS.start(),
                CHANNELS.end()
            )))
        }
    }

    async fn command(&self, command: &str) -> Result<String> {
        debug!(instrument = %self.id, command, "MCLS1 command");
        self.transport
            .query(command)
            .await
            .with_context(|| format!("MCLS1 command '{command}' failed"))
    }

    async fn select_channel(&self, channel: u8) -> Result<()> {
        Self::check_channel(channel)?;
        self.command(&format!("channel={channel}")).await?;
        Ok(())
    }

    /// Turn the output of `channel` on or off.
    pub async fn set_enabled(&self, channel: u8, enabled: bool) -> Result<()> {
        self.select_channel(channel).await?;
        self.command(if enabled { "enable=1" } else { "enable=0" })
            .await?;
        Ok(())
    }

    /// Identification string
    pub async fn identify(&self) -> Result<String> {
        self.command("id?").await
    }
}

#[async_trait]
impl<T: LineTransport> Connection for Mcls1Laser<T> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&self) -> Result<()> {
        self.command("system=1").await?;
        let channel = self.config.channel;
        self.set_current(channel, self.config.default_current).await?;
        self.set_enabled(channel, true).await?;
        info!(
            instrument = %self.id,
            channel,
            current_ma = self.config.default_current,
            "Laser source enabled"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let channel = self.config.channel;
        self.set_current(channel, 0.0).await?;
        self.set_enabled(channel, false).await
    }
}

#[async_trait]
impl<T: LineTransport> LaserSource for Mcls1Laser<T> {
    async fn set_current(&self, channel: u8, milliamps: f64) -> Result<()> {
        if !(0.0..=self.config.max_current).contains(&milliamps) {
            return Err(DaqError::Instrument(format!(
                "Laser current {milliamps} mA out of range (0-{} mA)",
                self.config.max_current
            ))
            .into());
        }
        self.select_channel(channel).await?;
        self.command(&format!("current={milliamps:.2}")).await?;
        info!(instrument = %self.id, channel, current_ma = milliamps, "Set laser current");
        Ok(())
    }

    async fn get_current(&self, channel: u8) -> Result<f64> {
        self.select_channel(channel).await?;
        let response = self.command("current?").await?;
        response
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Failed to parse MCLS1 current '{response}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Records commands and answers queries from a table.
    #[derive(Default)]
    struct ScriptedTransport {
        sent: Mutex<Vec<String>>,
        replies: HashMap<&'static str, &'static str>,
    }

    #[async_trait]
    impl LineTransport for ScriptedTransport {
        async fn query(&self, command: &str) -> Result<String> {
            self.sent.lock().await.push(command.to_string());
            Ok(self.replies.get(command).copied().unwrap_or("").to_string())
        }
    }

    fn config() -> LaserConfig {
        LaserConfig {
            serial_port: "/dev/ttyUSB0".into(),
            channel: 2,
            default_current: 30.0,
            coron_current: 50.0,
            direct_current: 10.0,
            max_current: 80.0,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn open_selects_channel_and_sets_default_current() {
        let laser = Mcls1Laser::new("mcls1", ScriptedTransport::default(), config());
        laser.open().await.unwrap();
        let sent = laser.transport.sent.lock().await.clone();
        assert_eq!(
            sent,
            vec!["system=1", "channel=2", "current=30.00", "channel=2", "enable=1"]
        );
    }

    #[tokio::test]
    async fn rejects_out_of_range_current_and_channel() {
        let laser = Mcls1Laser::new("mcls1", ScriptedTransport::default(), config());
        assert!(laser.set_current(1, 120.0).await.is_err());
        assert!(laser.set_current(7, 10.0).await.is_err());
        assert!(laser.transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn parses_current_query() {
        let transport = ScriptedTransport {
            replies: HashMap::from([("current?", "42.50")]),
            ..Default::default()
        };
        let laser = Mcls1Laser::new("mcls1", transport, config());
        assert_eq!(laser.get_current(3).await.unwrap(), 42.5);
    }

    #[tokio::test]
    async fn close_zeroes_and_disables() {
        let laser = Mcls1Laser::new("mcls1", ScriptedTransport::default(), config());
        laser.close().await.unwrap();
        let sent = laser.transport.sent.lock().await.clone();
        assert_eq!(sent, vec!["channel=2", "current=0.00", "channel=2", "enable=0"]);
    }
}
