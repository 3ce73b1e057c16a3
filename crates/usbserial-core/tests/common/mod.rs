#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use usbserial_core::protocol::{
    RequestType, TransferDescriptor, Transport, TransportError, TransportResult,
};

pub const CH341: (u16, u16) = (0x1a86, 0x7523);
pub const CP210X: (u16, u16) = (0x067b, 0x2303);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything the port asked the transport to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Close,
    SelectConfiguration(u8),
    ClaimInterface(u8),
    SelectAlternate(u8, u8),
    Reset,
    ControlOut(TransferDescriptor, Vec<u8>),
    ControlIn(TransferDescriptor),
    BulkOut(u8, Vec<u8>),
    BulkIn(u8, usize),
}

/// Failure to inject, turned into a fresh `TransportError` each time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    Stall,
    Timeout,
    Disconnected,
}

impl Fail {
    fn error(self) -> TransportError {
        match self {
            Fail::Stall => TransportError::Stall,
            Fail::Timeout => TransportError::Timeout,
            Fail::Disconnected => TransportError::Disconnected,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    events: Vec<Event>,
    configuration: Option<u8>,
    /// CH341 register file
    registers: HashMap<u8, u8>,
    version: [u8; 2],
    /// CP210x line coding as last written
    line_coding: [u8; 7],
    status_notification: Vec<u8>,
    bulk_in: VecDeque<Vec<u8>>,
    control_count: usize,
    fail_control_at: Option<(usize, Fail)>,
    fail_claim: bool,
    fail_bulk: Option<Fail>,
    truncate_in: Option<usize>,
    short_ack: bool,
    in_flight: usize,
    max_in_flight: usize,
    bulk_in_flight: usize,
    max_bulk_in_flight: usize,
}

/// Scripted transport that simulates both bridge chips
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    gate: Option<Arc<Semaphore>>,
    bulk_gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let mock = Self::default();
        {
            let mut state = mock.state.lock().unwrap();
            state.version = [0x31, 0x00];
            state.line_coding = [0x80, 0x25, 0, 0, 0, 0, 8];
            // All modem inputs idle: the chip reports them active-low
            state.registers.insert(0x06, 0xff);
            state.registers.insert(0x07, 0xee);
        }
        mock
    }

    /// Control transfers wait for a permit before completing
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut mock = Self::new();
        mock.gate = Some(gate.clone());
        (mock, gate)
    }

    /// Bulk transfers wait for a permit before completing
    pub fn bulk_gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut mock = Self::new();
        mock.bulk_gate = Some(gate.clone());
        (mock, gate)
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    /// Only the control transfer descriptors, in submission order
    pub fn control_descriptors(&self) -> Vec<TransferDescriptor> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::ControlOut(desc, _) | Event::ControlIn(desc) => Some(desc),
                _ => None,
            })
            .collect()
    }

    pub fn set_configuration(&self, configuration: Option<u8>) {
        self.state.lock().unwrap().configuration = configuration;
    }

    pub fn register(&self, reg: u8) -> u8 {
        *self.state.lock().unwrap().registers.get(&reg).unwrap_or(&0)
    }

    pub fn set_register(&self, reg: u8, value: u8) {
        self.state.lock().unwrap().registers.insert(reg, value);
    }

    pub fn line_coding(&self) -> [u8; 7] {
        self.state.lock().unwrap().line_coding
    }

    pub fn set_status_notification(&self, data: Vec<u8>) {
        self.state.lock().unwrap().status_notification = data;
    }

    pub fn push_bulk_in(&self, data: Vec<u8>) {
        self.state.lock().unwrap().bulk_in.push_back(data);
    }

    /// Fail the `n`th control transfer from now on (1-based)
    pub fn fail_control_at(&self, n: usize, fail: Fail) {
        let mut state = self.state.lock().unwrap();
        state.control_count = 0;
        state.fail_control_at = Some((n, fail));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_control_at = None;
        state.fail_claim = false;
        state.fail_bulk = None;
        state.truncate_in = None;
        state.short_ack = false;
    }

    pub fn fail_claim(&self) {
        self.state.lock().unwrap().fail_claim = true;
    }

    pub fn fail_bulk(&self, fail: Fail) {
        self.state.lock().unwrap().fail_bulk = Some(fail);
    }

    /// Cut every IN control transfer down to `len` bytes
    pub fn truncate_in(&self, len: usize) {
        self.state.lock().unwrap().truncate_in = Some(len);
    }

    /// Acknowledge one byte less than every OUT payload
    pub fn short_ack(&self) {
        self.state.lock().unwrap().short_ack = true;
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight
    }

    pub fn bulk_in_flight(&self) -> usize {
        self.state.lock().unwrap().bulk_in_flight
    }

    pub fn max_bulk_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_bulk_in_flight
    }

    fn record(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }

    /// Record a control transfer and decide whether it fails
    async fn begin_control(&self, event: Event) -> TransportResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.events.push(event);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.control_count += 1;
        }

        tokio::task::yield_now().await;
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        match state.fail_control_at {
            Some((n, fail)) if n == state.control_count => Err(fail.error()),
            _ => Ok(()),
        }
    }

    /// Record a bulk transfer, hold it at the bulk gate, then apply failures
    async fn begin_bulk(&self, event: Event) -> TransportResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.events.push(event);
            state.bulk_in_flight += 1;
            state.max_bulk_in_flight = state.max_bulk_in_flight.max(state.bulk_in_flight);
        }

        if let Some(gate) = &self.bulk_gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let mut state = self.state.lock().unwrap();
        state.bulk_in_flight -= 1;
        match state.fail_bulk {
            Some(fail) => Err(fail.error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> TransportResult<()> {
        self.record(Event::Open);
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.record(Event::Close);
        Ok(())
    }

    fn configuration(&self) -> Option<u8> {
        self.state.lock().unwrap().configuration
    }

    async fn select_configuration(&self, configuration: u8) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::SelectConfiguration(configuration));
        state.configuration = Some(configuration);
        Ok(())
    }

    async fn claim_interface(&self, interface: u8) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::ClaimInterface(interface));
        if state.fail_claim {
            return Err(TransportError::Rejected("interface busy".to_string()));
        }
        Ok(())
    }

    async fn select_alternate_interface(
        &self,
        interface: u8,
        alternate_setting: u8,
    ) -> TransportResult<()> {
        self.record(Event::SelectAlternate(interface, alternate_setting));
        Ok(())
    }

    async fn reset(&self) -> TransportResult<()> {
        self.record(Event::Reset);
        Ok(())
    }

    async fn control_transfer_out(
        &self,
        descriptor: &TransferDescriptor,
        payload: &[u8],
    ) -> TransportResult<usize> {
        self.begin_control(Event::ControlOut(*descriptor, payload.to_vec()))
            .await?;

        let mut state = self.state.lock().unwrap();
        match (descriptor.request_type, descriptor.request) {
            // CH341 register pair write
            (RequestType::Vendor, 0x9a) => {
                let [hi, lo] = descriptor.value.to_be_bytes();
                let [index_hi, index_lo] = descriptor.index.to_be_bytes();
                state.registers.insert(lo, index_lo);
                state.registers.insert(hi, index_hi);
            }
            // CP210x line coding
            (RequestType::Class, 0x20) if payload.len() == 7 => {
                state.line_coding.copy_from_slice(payload);
            }
            _ => {}
        }

        if state.short_ack && !payload.is_empty() {
            return Ok(payload.len() - 1);
        }
        Ok(payload.len())
    }

    async fn control_transfer_in(
        &self,
        descriptor: &TransferDescriptor,
    ) -> TransportResult<Vec<u8>> {
        self.begin_control(Event::ControlIn(*descriptor)).await?;

        let state = self.state.lock().unwrap();
        let mut data = match (descriptor.request_type, descriptor.request) {
            (RequestType::Vendor, 0x5f) => state.version.to_vec(),
            (RequestType::Vendor, 0x95) => {
                let [hi, lo] = descriptor.value.to_be_bytes();
                let reg = |r: u8| *state.registers.get(&r).unwrap_or(&0);
                vec![reg(lo), reg(hi)]
            }
            (RequestType::Vendor, 0x01) => vec![0x02],
            (RequestType::Class, 0x21) => state.line_coding.to_vec(),
            _ => vec![0; descriptor.length as usize],
        };
        if let Some(len) = state.truncate_in {
            data.truncate(len);
        }
        Ok(data)
    }

    async fn bulk_transfer_out(&self, endpoint: u8, data: &[u8]) -> TransportResult<usize> {
        self.begin_bulk(Event::BulkOut(endpoint, data.to_vec())).await?;
        Ok(data.len())
    }

    async fn bulk_transfer_in(&self, endpoint: u8, max_length: usize) -> TransportResult<Vec<u8>> {
        self.begin_bulk(Event::BulkIn(endpoint, max_length)).await?;

        let mut state = self.state.lock().unwrap();
        if endpoint == 1 {
            return Ok(state.status_notification.clone());
        }
        let mut data = state.bulk_in.pop_front().unwrap_or_default();
        data.truncate(max_length);
        Ok(data)
    }
}
