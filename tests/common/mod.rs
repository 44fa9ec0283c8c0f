//! In-memory `SerialPort` fakes shared by the integration tests.

use tokio::sync::mpsc;

use serialbridge::serial::{ModemLines, SerialPort, SettingsUpdate};
use serialbridge::Result;

/// A device backed by two channels: one the test feeds to simulate bytes
/// arriving from the device, one the test drains to observe what the pipe
/// wrote to the device.
pub struct FakeSerial {
    from_device: mpsc::UnboundedReceiver<Vec<u8>>,
    to_device: mpsc::UnboundedSender<Vec<u8>>,
}

impl FakeSerial {
    pub fn new() -> (Self, mpsc::UnboundedSender<Vec<u8>>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        (
            FakeSerial {
                from_device: device_rx,
                to_device: host_tx,
            },
            device_tx,
            host_rx,
        )
    }
}

#[async_trait::async_trait]
impl SerialPort for FakeSerial {
    async fn apply(&mut self, _update: &SettingsUpdate) -> Result<()> {
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.from_device.recv().await {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => std::future::pending().await,
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let _ = self.to_device.send(buf.to_vec());
        Ok(buf.len())
    }

    fn modem_lines(&self) -> Result<ModemLines> {
        Ok(ModemLines::empty())
    }
}

/// A device that is always readable but never has data -- the "stuck peer"
/// condition from spec §4.4/§8 scenario 5.
pub struct AlwaysEmptySerial;

#[async_trait::async_trait]
impl SerialPort for AlwaysEmptySerial {
    async fn apply(&mut self, _update: &SettingsUpdate) -> Result<()> {
        Ok(())
    }

    async fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }

    fn modem_lines(&self) -> Result<ModemLines> {
        Ok(ModemLines::empty())
    }
}
