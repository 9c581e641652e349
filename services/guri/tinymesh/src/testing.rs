//! A simulated radio module for tests.
//!
//! [`FakeDevice`] answers the configuration dialogue and get-NID requests
//! the way a TinyMesh module does, backed by in-memory pages. Plug its
//! [`responder`](FakeDevice::responder) into a
//! [`MockTransport`](guri_transport::testing::MockTransport).

use crate::identity::Identity;
use crate::memory::{MemoryPage, DEVICE_TYPE_GATEWAY, DEVICE_TYPE_OFFSET, NID_OFFSET, SID_OFFSET, UID_OFFSET};
use bytes::Bytes;
use guri_transport::Chunk;
use guri_wire::{
    Address, COMMAND_FRAME_LEN, CONFIG_PROMPT, DETAIL_NID_REPLY, GENERIC_EVENT_LEN, MEMORY_TERMINATOR,
    PACKET_TYPE_EVENT, PROBE,
};
use std::sync::{Arc, Mutex, MutexGuard};

const CONFIGURATION_SIZE: usize = 128;
const CALIBRATION_SIZE: usize = 64;

/// Module state visible to tests
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// Showing the configuration prompt
    pub in_config: bool,
    /// Whether the enter command works without a button press
    pub enters_on_command: bool,
    /// Configuration memory
    pub configuration: Vec<u8>,
    /// Calibration memory
    pub calibration: Vec<u8>,
    /// Page currently being written
    pub writing: Option<MemoryPage>,
    /// Detail code sent in get-NID replies
    pub nid_reply_detail: u8,
    /// Get-NID requests answered with an unrelated event first
    pub chatter_before_reply: usize,
    /// Ignore get-NID requests entirely
    pub silent: bool,
    /// Number of enter commands received
    pub enter_requests: usize,
    /// Print the prompt as soon as the enter command switches modes
    pub prompt_on_enter: bool,
    /// Send memory dumps in two chunks split at this offset, followed by
    /// the prompt
    pub dump_split: Option<usize>,
}

/// Shared handle to a simulated module
#[derive(Debug, Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

fn page_address(page: &[u8], offset: u8) -> Address {
    Address::from_slice(&page[offset as usize..]).unwrap_or_default()
}

fn put_address(page: &mut [u8], offset: u8, address: Address) {
    let start = offset as usize;
    page[start..start + 4].copy_from_slice(&address.octets());
}

fn prompt() -> Vec<Chunk> {
    vec![Chunk::Data(Bytes::from_static(&[CONFIG_PROMPT]))]
}

impl FakeDevice {
    /// A gateway with `identity`, outside configuration mode
    pub fn new(identity: &Identity) -> Self {
        let mut configuration = vec![0u8; CONFIGURATION_SIZE];
        let mut calibration = vec![0u8; CALIBRATION_SIZE];
        configuration[DEVICE_TYPE_OFFSET as usize] = DEVICE_TYPE_GATEWAY;
        put_address(&mut configuration, UID_OFFSET, identity.uid);
        put_address(&mut configuration, SID_OFFSET, identity.sid);
        put_address(&mut calibration, NID_OFFSET, identity.nid);

        Self {
            state: Arc::new(Mutex::new(DeviceState {
                in_config: false,
                enters_on_command: true,
                configuration,
                calibration,
                writing: None,
                nid_reply_detail: DETAIL_NID_REPLY,
                chatter_before_reply: 0,
                silent: false,
                enter_requests: 0,
                prompt_on_enter: false,
                dump_split: None,
            })),
        }
    }

    /// Lock the module state
    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Identity currently stored in memory
    pub fn identity(&self) -> Identity {
        let state = self.state();
        Identity {
            nid: page_address(&state.calibration, NID_OFFSET),
            sid: page_address(&state.configuration, SID_OFFSET),
            uid: page_address(&state.configuration, UID_OFFSET),
        }
    }

    /// Closure answering writes the way the module would
    pub fn responder(&self) -> impl FnMut(&[u8]) -> Vec<Chunk> + Send + 'static {
        let device = self.clone();
        move |buf: &[u8]| device.respond(buf)
    }

    fn respond(&self, buf: &[u8]) -> Vec<Chunk> {
        let identity = self.identity();
        let mut state = self.state();

        if let Some(page) = state.writing {
            if buf == [MEMORY_TERMINATOR] {
                state.writing = None;
                return prompt();
            }
            if let [offset, value] = *buf {
                let memory = match page {
                    MemoryPage::Configuration => &mut state.configuration,
                    MemoryPage::Calibration => &mut state.calibration,
                };
                memory[offset as usize] = value;
            }
            return Vec::new();
        }

        if buf.len() == COMMAND_FRAME_LEN {
            return match buf[7] {
                0x05 => {
                    state.enter_requests += 1;
                    if state.enters_on_command {
                        state.in_config = true;
                        if state.prompt_on_enter {
                            return prompt();
                        }
                    }
                    Vec::new()
                }
                0x10 if !state.in_config && !state.silent => {
                    let detail = if state.chatter_before_reply > 0 {
                        state.chatter_before_reply -= 1;
                        // Some other event from the mesh
                        0x02
                    } else {
                        state.nid_reply_detail
                    };
                    vec![Chunk::Data(Bytes::from(event(&identity, detail)))]
                }
                _ => Vec::new(),
            };
        }

        if buf == [PROBE] {
            return if state.in_config { prompt() } else { Vec::new() };
        }

        if !state.in_config {
            return Vec::new();
        }

        match buf {
            b"0" => dump(&state.configuration, state.dump_split),
            b"r" => dump(&state.calibration, state.dump_split),
            b"G" => {
                state.configuration[DEVICE_TYPE_OFFSET as usize] = DEVICE_TYPE_GATEWAY;
                prompt()
            }
            b"M" => {
                state.writing = Some(MemoryPage::Configuration);
                prompt()
            }
            b"HW" => {
                state.writing = Some(MemoryPage::Calibration);
                prompt()
            }
            b"X" => {
                state.in_config = false;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

fn dump(page: &[u8], split: Option<usize>) -> Vec<Chunk> {
    match split {
        Some(at) if at < page.len() => {
            let mut tail = page[at..].to_vec();
            tail.push(CONFIG_PROMPT);
            vec![
                Chunk::Data(Bytes::copy_from_slice(&page[..at])),
                Chunk::Data(Bytes::from(tail)),
            ]
        }
        _ => vec![Chunk::Data(Bytes::copy_from_slice(page))],
    }
}

/// A generic event carrying `identity` with the given detail code
pub fn event(identity: &Identity, detail: u8) -> Vec<u8> {
    let mut buf = vec![0u8; GENERIC_EVENT_LEN];
    buf[0] = GENERIC_EVENT_LEN as u8;
    buf[1..5].copy_from_slice(&identity.sid.octets());
    buf[5..9].copy_from_slice(&identity.uid.octets());
    buf[16] = PACKET_TYPE_EVENT;
    buf[17] = detail;
    buf[20..24].copy_from_slice(&identity.nid.octets());
    buf[24] = 128;
    buf
}
