//! Port lifecycle
//!
//! A [`Port`] moves through `Closed -> Open -> Configured`. Opening claims
//! the interface; the chip's initialization sequence takes it to
//! `Configured`. Every configuration call made while `Open` runs that
//! sequence first, so the chip never sees a configuration request or bulk
//! data before it has been initialized.
//!
//! Control operations hold the port's write lock for their whole transfer
//! sequence, so at most one is in flight and the rest queue in arrival
//! order. Bulk reads and writes only take the lock to check that the chip
//! is initialized; the transfer itself runs unlocked, so a read waiting for
//! data never holds up control lines, break or `close`.

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::{
    ChipProtocol, ChipVariant, ControlLines, DeviceId, Endpoints, LineConfig, ModemStatus,
    PortConfig, PortError, Result, Transport, TransportError,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    /// Device handle not held
    Closed,
    /// Interface claimed, chip not yet initialized
    Open,
    /// Chip initialized with the current line configuration
    Configured,
}

/// State guarded by the command channel lock
#[derive(Debug)]
struct PortInner {
    state: PortState,
    line: LineConfig,
    control: ControlLines,
    break_active: bool,
    firmware_version: Option<u16>,
    last_status: Option<ModemStatus>,
}

/// Serial port on top of a USB bridge chip
pub struct Port {
    transport: Box<dyn Transport>,
    device: DeviceId,
    chip: Option<Box<dyn ChipProtocol>>,
    endpoints: Option<Endpoints>,
    config: PortConfig,
    inner: RwLock<PortInner>,
}

impl Port {
    /// Create a closed port for the given device
    ///
    /// The chip family is resolved here and never changes. Devices missing
    /// from the lookup table still get a port, but every chip-specific
    /// operation on it fails with [`PortError::UnsupportedDevice`].
    pub fn new(transport: Box<dyn Transport>, device: DeviceId, config: PortConfig) -> Self {
        let variant = ChipVariant::from_device(device);
        match variant {
            Some(variant) => debug!("{} resolved to {:?}", device, variant),
            None => warn!("{} is not a supported bridge chip", device),
        }

        let chip = variant.map(|v| v.protocol(&config));
        let endpoints = config
            .endpoints
            .or_else(|| variant.map(ChipVariant::default_endpoints));

        Self {
            transport,
            device,
            chip,
            endpoints,
            inner: RwLock::new(PortInner {
                state: PortState::Closed,
                line: config.line,
                control: config.control_lines,
                break_active: false,
                firmware_version: None,
                last_status: None,
            }),
            config,
        }
    }

    /// Vendor/product pair the port was created for
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Chip family, `None` for unsupported devices
    pub fn chip(&self) -> Option<ChipVariant> {
        self.chip.as_ref().map(|c| c.variant())
    }

    /// Configuration the port was created with
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Current connection state
    pub async fn state(&self) -> PortState {
        self.inner.read().await.state
    }

    /// Last line configuration applied to the chip (or to be applied on init)
    pub async fn line_config(&self) -> LineConfig {
        self.inner.read().await.line
    }

    /// DTR/RTS as last applied
    pub async fn control_lines(&self) -> ControlLines {
        self.inner.read().await.control
    }

    /// Whether a break is currently on the line
    pub async fn break_active(&self) -> bool {
        self.inner.read().await.break_active
    }

    /// Firmware version reported during initialization
    pub async fn firmware_version(&self) -> Option<u16> {
        self.inner.read().await.firmware_version
    }

    /// Result of the most recent successful status read
    pub async fn last_status(&self) -> Option<ModemStatus> {
        self.inner.read().await.last_status
    }

    /// Open the device and claim its serial interface
    pub async fn open(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != PortState::Closed {
            return Err(PortError::ConnectionError("already open".to_string()));
        }

        info!("Opening {}", self.device);
        self.transport
            .open()
            .await
            .map_err(|e| PortError::ConnectionError(format!("open: {e}")))?;

        if let Err(e) = self.claim().await {
            warn!("Claiming {} failed: {}", self.device, e);
            if let Err(close_err) = self.transport.close().await {
                warn!("Closing {} after failed claim: {}", self.device, close_err);
            }
            return Err(e);
        }

        inner.state = PortState::Open;
        inner.break_active = false;
        inner.firmware_version = None;
        Ok(())
    }

    async fn claim(&self) -> Result<()> {
        let connection_error = |stage: &str, e: TransportError| {
            PortError::ConnectionError(format!("{stage}: {e}"))
        };

        if self.transport.configuration().is_none() {
            self.transport
                .select_configuration(self.config.configuration)
                .await
                .map_err(|e| connection_error("select configuration", e))?;
        }
        self.transport
            .claim_interface(self.config.interface)
            .await
            .map_err(|e| connection_error("claim interface", e))?;
        self.transport
            .select_alternate_interface(self.config.interface, self.config.alternate_setting)
            .await
            .map_err(|e| connection_error("select alternate interface", e))?;
        Ok(())
    }

    /// Release the device
    ///
    /// Waits for the operation in flight; operations queued behind it fail
    /// with [`PortError::PortClosed`]. Closing a closed port does nothing.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state == PortState::Closed {
            debug!("{} already closed", self.device);
            return Ok(());
        }

        info!("Closing {}", self.device);
        inner.state = PortState::Closed;
        inner.break_active = false;
        inner.firmware_version = None;
        self.transport.close().await?;
        Ok(())
    }

    /// Reset the device; the chip has to be initialized again afterwards
    pub async fn reset(&self) -> Result<()> {
        let (mut inner, _) = self.command().await?;
        info!("Resetting {}", self.device);
        let result = self.transport.reset().await.map_err(PortError::from);
        self.settle(&mut inner, "reset", result)?;
        inner.state = PortState::Open;
        inner.break_active = false;
        inner.firmware_version = None;
        Ok(())
    }

    /// Run the chip's initialization sequence with the current snapshot
    pub async fn initialize(&self) -> Result<()> {
        let (mut inner, chip) = self.command().await?;
        let (line, control) = (inner.line, inner.control);
        self.run_initialize(chip, &mut inner, line, control).await
    }

    /// Apply a full line configuration
    pub async fn set_line_config(&self, line: LineConfig) -> Result<()> {
        let (mut inner, chip) = self.command().await?;
        chip.validate(&line)?;

        if inner.state == PortState::Open {
            let control = inner.control;
            return self.run_initialize(chip, &mut inner, line, control).await;
        }

        let result = chip.set_line_config(self.transport.as_ref(), &line).await;
        self.settle(&mut inner, "set_line_config", result)?;
        inner.line = line;
        info!("{} line set to {}", self.device, line);
        Ok(())
    }

    /// Change the baud rate, keeping the rest of the line configuration
    pub async fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        let (mut inner, chip) = self.command().await?;
        let line = inner.line.with_baud_rate(baud_rate);
        chip.validate(&line)?;

        if inner.state == PortState::Open {
            let control = inner.control;
            return self.run_initialize(chip, &mut inner, line, control).await;
        }

        let result = chip.set_baud_rate(self.transport.as_ref(), &line).await;
        self.settle(&mut inner, "set_baud_rate", result)?;
        inner.line = line;
        Ok(())
    }

    /// Drive the DTR and RTS outputs
    pub async fn set_control_lines(&self, dtr: bool, rts: bool) -> Result<()> {
        let (mut inner, chip) = self.command().await?;
        let control = ControlLines { dtr, rts };

        if inner.state == PortState::Open {
            let line = inner.line;
            return self.run_initialize(chip, &mut inner, line, control).await;
        }

        let result = chip
            .set_control_lines(self.transport.as_ref(), control)
            .await;
        self.settle(&mut inner, "set_control_lines", result)?;
        inner.control = control;
        Ok(())
    }

    /// Start or stop a break condition on the line
    pub async fn send_break(&self, enable: bool) -> Result<()> {
        let (mut inner, chip) = self.command().await?;
        self.ensure_initialized(chip, &mut inner).await?;

        let result = chip.send_break(self.transport.as_ref(), enable).await;
        self.settle(&mut inner, "send_break", result)?;
        inner.break_active = enable;
        Ok(())
    }

    /// Read the modem status inputs
    pub async fn read_status(&self) -> Result<ModemStatus> {
        let (mut inner, chip) = self.command().await?;
        self.ensure_initialized(chip, &mut inner).await?;
        let endpoints = self.endpoints()?;

        let result = chip.read_status(self.transport.as_ref(), &endpoints).await;
        let status = self.settle(&mut inner, "read_status", result)?;
        inner.last_status = Some(status);
        Ok(status)
    }

    /// Line configuration as the chip currently reports it
    pub async fn read_line_config(&self) -> Result<LineConfig> {
        let (mut inner, chip) = self.command().await?;
        self.ensure_initialized(chip, &mut inner).await?;

        let result = chip.read_line_config(self.transport.as_ref()).await;
        self.settle(&mut inner, "read_line_config", result)
    }

    /// Send serial data on the bulk OUT endpoint
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let endpoints = self.data_path().await?;
        let result = self
            .transport
            .bulk_transfer_out(endpoints.bulk_out, data)
            .await;
        self.settle_data(result).await
    }

    /// Receive up to `max_length` bytes from the bulk IN endpoint
    ///
    /// Closing the port while a read is pending is left to the transport,
    /// which is expected to fail the outstanding transfer.
    pub async fn read(&self, max_length: usize) -> Result<Vec<u8>> {
        let endpoints = self.data_path().await?;
        let result = self
            .transport
            .bulk_transfer_in(endpoints.bulk_in, max_length)
            .await;
        self.settle_data(result).await
    }

    fn chip_protocol(&self) -> Result<&dyn ChipProtocol> {
        self.chip
            .as_deref()
            .ok_or(PortError::UnsupportedDevice {
                vendor_id: self.device.vendor_id,
                product_id: self.device.product_id,
            })
    }

    fn endpoints(&self) -> Result<Endpoints> {
        self.endpoints.ok_or(PortError::UnsupportedDevice {
            vendor_id: self.device.vendor_id,
            product_id: self.device.product_id,
        })
    }

    /// Take ownership of the command channel
    async fn command(&self) -> Result<(RwLockWriteGuard<'_, PortInner>, &dyn ChipProtocol)> {
        let inner = self.inner.write().await;
        if inner.state == PortState::Closed {
            return Err(PortError::PortClosed);
        }
        let chip = self.chip_protocol()?;
        Ok((inner, chip))
    }

    async fn ensure_initialized(
        &self,
        chip: &dyn ChipProtocol,
        inner: &mut PortInner,
    ) -> Result<()> {
        if inner.state == PortState::Open {
            let (line, control) = (inner.line, inner.control);
            self.run_initialize(chip, inner, line, control).await?;
        }
        Ok(())
    }

    /// Initialize the chip and commit the snapshot only if every step succeeded
    async fn run_initialize(
        &self,
        chip: &dyn ChipProtocol,
        inner: &mut PortInner,
        line: LineConfig,
        control: ControlLines,
    ) -> Result<()> {
        let result = chip
            .initialize(self.transport.as_ref(), &line, control)
            .await;
        let version = self.settle(inner, "initialize", result)?;

        inner.state = PortState::Configured;
        inner.line = line;
        inner.control = control;
        inner.break_active = false;
        inner.firmware_version = version;
        Ok(())
    }

    /// Log a failed operation and drop to `Closed` if the device went away
    fn settle<T>(&self, inner: &mut PortInner, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("{} on {} failed: {}", operation, self.device, e);
            if e.is_disconnect() {
                self.mark_lost(inner);
            }
        }
        result
    }

    fn mark_lost(&self, inner: &mut PortInner) {
        if inner.state != PortState::Closed {
            warn!("Lost transport for {}", self.device);
            inner.state = PortState::Closed;
            inner.break_active = false;
            inner.firmware_version = None;
        }
    }

    /// Endpoints for a bulk transfer, initializing the chip first if needed
    ///
    /// The lock is released before returning.
    async fn data_path(&self) -> Result<Endpoints> {
        let chip = self.chip_protocol()?;
        let endpoints = self.endpoints()?;

        loop {
            match self.inner.read().await.state {
                PortState::Closed => return Err(PortError::PortClosed),
                PortState::Configured => return Ok(endpoints),
                PortState::Open => {}
            }

            let mut inner = self.inner.write().await;
            if inner.state == PortState::Closed {
                return Err(PortError::PortClosed);
            }
            self.ensure_initialized(chip, &mut inner).await?;
        }
    }

    async fn settle_data<T>(&self, result: std::result::Result<T, TransportError>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Bulk transfer on {} failed: {}", self.device, e);
                if matches!(e, TransportError::Disconnected) {
                    let mut inner = self.inner.write().await;
                    self.mark_lost(&mut inner);
                }
                Err(e.into())
            }
        }
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("device", &self.device)
            .field("chip", &self.chip())
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}
