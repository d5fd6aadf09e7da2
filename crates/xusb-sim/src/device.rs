use xusb_host::DeviceRequest;

/// Reply of a device to a control transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Data(Vec<u8>),
    Ack,
    Nak,
    Stall,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbInResult {
    Data(Vec<u8>),
    Nak,
    Stall,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbOutResult {
    Ack,
    Nak,
    Stall,
    Timeout,
}

/// A USB device attached to the simulated root port.
pub trait SimDevice {
    /// Bus reset.
    fn reset(&mut self) {}

    fn handle_control(&mut self, setup: DeviceRequest, data_stage: Option<&[u8]>)
        -> ControlResponse;

    fn handle_in(&mut self, ep: u8, max_len: usize) -> UsbInResult;

    fn handle_out(&mut self, ep: u8, data: &[u8]) -> UsbOutResult;
}
