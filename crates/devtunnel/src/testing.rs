//! Test doubles for the device and the dialer.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};

use crate::device::{Device, DeviceError, LocalPort, RemoteSocket};
use crate::dial::Dialer;
use crate::port::allocate_local_port;

/// Calls observed by [`MockDevice`] and [`ScriptedDialer`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Forward(LocalPort, RemoteSocket),
    RemoveForward(LocalPort),
    Dial(LocalPort),
}

/// Shared call log so device and dialer calls can be ordered against each other.
pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// In-memory device that records every call.
pub struct MockDevice {
    log: EventLog,
    active: Mutex<HashSet<LocalPort>>,
    fail_forward: bool,
    fail_remove: bool,
    remove_delay: Option<Duration>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::with_log(EventLog::default())
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            active: Mutex::new(HashSet::new()),
            fail_forward: false,
            fail_remove: false,
            remove_delay: None,
        }
    }

    pub const fn failing_forward(mut self) -> Self {
        self.fail_forward = true;
        self
    }

    pub const fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub const fn slow_remove(mut self, delay: Duration) -> Self {
        self.remove_delay = Some(delay);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn forwards(&self) -> Vec<(LocalPort, RemoteSocket)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Forward(port, remote) => Some((port, remote)),
                _ => None,
            })
            .collect()
    }

    pub fn removals(&self) -> Vec<LocalPort> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::RemoveForward(port) => Some(port),
                _ => None,
            })
            .collect()
    }

    pub fn is_forwarded(&self, port: LocalPort) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }

    fn record(&self, event: Event) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Device for MockDevice {
    fn serial(&self) -> &str {
        "mock-device"
    }

    async fn forward(&self, local: LocalPort, remote: &RemoteSocket) -> Result<(), DeviceError> {
        self.record(Event::Forward(local, remote.clone()));
        if self.fail_forward {
            return Err(DeviceError::Rejected("device offline".into()));
        }
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local);
        Ok(())
    }

    async fn remove_forward(&self, local: LocalPort) -> Result<(), DeviceError> {
        self.record(Event::RemoveForward(local));
        if let Some(delay) = self.remove_delay {
            tokio::time::sleep(delay).await;
        }
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&local);
        if self.fail_remove {
            return Err(DeviceError::Rejected("listener not found".into()));
        }
        Ok(())
    }
}

/// What a single scripted dial produces.
#[derive(Debug, Clone)]
pub enum Step {
    /// Connection refused.
    Refuse,
    /// Connected, then the bridge hangs up before any byte arrives.
    Hangup,
    /// Connected, but nothing is ever written.
    Silent,
    /// Connected and the service has already written these bytes.
    Ready(Vec<u8>),
}

/// Dialer that replays a script of [`Step`]s. Once the script runs out every
/// further dial is refused.
pub struct ScriptedDialer {
    steps: Mutex<VecDeque<Step>>,
    log: EventLog,
    // Far ends kept open so the probe never sees EOF on them.
    held: Mutex<Vec<DuplexStream>>,
    fail_allocation: bool,
}

impl ScriptedDialer {
    pub fn new(steps: impl IntoIterator<Item = Step>, log: EventLog) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            log,
            held: Mutex::new(Vec::new()),
            fail_allocation: false,
        }
    }

    /// Every port allocation fails as if the ephemeral range were exhausted.
    pub const fn failing_allocation(mut self) -> Self {
        self.fail_allocation = true;
        self
    }

    pub fn dials(&self) -> usize {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| matches!(e, Event::Dial(_)))
            .count()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    type Stream = DuplexStream;

    async fn allocate_port(&self) -> io::Result<LocalPort> {
        if self.fail_allocation {
            return Err(io::Error::from(io::ErrorKind::AddrInUse));
        }
        allocate_local_port().await
    }

    async fn dial(&self, port: LocalPort) -> io::Result<DuplexStream> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Event::Dial(port));
        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Step::Refuse);

        match step {
            Step::Refuse => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            Step::Hangup => {
                let (near, far) = tokio::io::duplex(64);
                drop(far);
                Ok(near)
            }
            Step::Silent => {
                let (near, far) = tokio::io::duplex(64);
                self.held
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(far);
                Ok(near)
            }
            Step::Ready(bytes) => {
                let (near, mut far) = tokio::io::duplex(bytes.len().max(64));
                far.write_all(&bytes).await?;
                self.held
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(far);
                Ok(near)
            }
        }
    }
}
