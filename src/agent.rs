//! Pairing agent: passkey entry on the local keyboard.
//!
//! `RequestPasskey` never blocks the bus. The D-Bus handler posts an
//! [`AgentCommand::Request`] carrying a oneshot responder and awaits it; the
//! collector task owns the pending request, consumes key presses from the
//! local input devices and answers once Enter is pressed (or `Cancel`
//! arrives).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use evdev::{InputEventKind, Key};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub const AGENT_PATH: &str = "/org/bluez/ble_hid_keyboard/agent";
pub const AGENT_CAPABILITY: &str = "KeyboardOnly";

/// Six decimal digits at most
pub const MAX_PASSKEY: u32 = 999_999;

const KEY_DOWN: i32 = 1;

const DIGIT_KEYS: [(Key, char); 20] = [
    (Key::KEY_0, '0'),
    (Key::KEY_1, '1'),
    (Key::KEY_2, '2'),
    (Key::KEY_3, '3'),
    (Key::KEY_4, '4'),
    (Key::KEY_5, '5'),
    (Key::KEY_6, '6'),
    (Key::KEY_7, '7'),
    (Key::KEY_8, '8'),
    (Key::KEY_9, '9'),
    (Key::KEY_KP0, '0'),
    (Key::KEY_KP1, '1'),
    (Key::KEY_KP2, '2'),
    (Key::KEY_KP3, '3'),
    (Key::KEY_KP4, '4'),
    (Key::KEY_KP5, '5'),
    (Key::KEY_KP6, '6'),
    (Key::KEY_KP7, '7'),
    (Key::KEY_KP8, '8'),
    (Key::KEY_KP9, '9'),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasskeyError {
    #[error("Passkey rejected: {0}")]
    Rejected(String),
    #[error("Pairing canceled")]
    Canceled,
}

pub type PasskeyReply = oneshot::Sender<Result<u32, PasskeyError>>;

/// Messages from the D-Bus agent object to the collector task
#[derive(Debug)]
pub enum AgentCommand {
    Request { device: String, reply: PasskeyReply },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Pending,
    Complete,
}

/// Digits typed so far for one passkey request
#[derive(Debug, Default, Clone)]
pub struct PasskeyBuffer {
    digits: String,
}

impl PasskeyBuffer {
    /// Apply one key press. Digits append, Backspace erases, Enter completes;
    /// everything else is ignored.
    pub fn feed(&mut self, key: Key) -> KeyOutcome {
        if key == Key::KEY_ENTER || key == Key::KEY_KPENTER {
            return KeyOutcome::Complete;
        }
        if key == Key::KEY_BACKSPACE {
            self.digits.pop();
        } else if let Some(&(_, digit)) = DIGIT_KEYS.iter().find(|(k, _)| *k == key) {
            self.digits.push(digit);
        }
        KeyOutcome::Pending
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn passkey(&self) -> Result<u32, PasskeyError> {
        if self.digits.is_empty() {
            return Err(PasskeyError::Rejected("no digits entered".to_string()));
        }
        match self.digits.parse::<u32>() {
            Ok(value) if value <= MAX_PASSKEY => Ok(value),
            _ => Err(PasskeyError::Rejected(format!(
                "{} is not a 6-digit passkey",
                self.digits
            ))),
        }
    }
}

struct PendingRequest {
    device: String,
    reply: PasskeyReply,
    buffer: PasskeyBuffer,
}

impl PendingRequest {
    fn finish(self, result: Result<u32, PasskeyError>) {
        match &result {
            Ok(_) => info!("Passkey entered for {}", self.device),
            Err(e) => info!("Passkey request for {} ended: {}", self.device, e),
        }
        if self.reply.send(result).is_err() {
            debug!("Passkey requester for {} went away", self.device);
        }
    }
}

/// Collector task. Runs until the command channel closes. `on_request` runs
/// before each new passkey prompt so input devices plugged in since the last
/// one can be picked up.
pub async fn collect_passkeys(
    mut commands: mpsc::Receiver<AgentCommand>,
    mut keys: mpsc::UnboundedReceiver<Key>,
    mut on_request: impl FnMut(),
) {
    let mut pending: Option<PendingRequest> = None;
    let mut keys_open = true;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None => break,
                Some(AgentCommand::Request { device, reply }) => {
                    on_request();
                    if let Some(previous) = pending.take() {
                        previous.finish(Err(PasskeyError::Canceled));
                    }
                    info!("Type the passkey for {} on the local keyboard, then press Enter", device);
                    pending = Some(PendingRequest {
                        device,
                        reply,
                        buffer: PasskeyBuffer::default(),
                    });
                }
                Some(AgentCommand::Cancel) => {
                    if let Some(request) = pending.take() {
                        request.finish(Err(PasskeyError::Canceled));
                    }
                }
            },
            key = keys.recv(), if keys_open => match key {
                None => {
                    warn!("Local keyboard input closed");
                    keys_open = false;
                }
                Some(key) => {
                    let complete = pending
                        .as_mut()
                        .is_some_and(|request| request.buffer.feed(key) == KeyOutcome::Complete);
                    if complete {
                        if let Some(request) = pending.take() {
                            let result = request.buffer.passkey();
                            request.finish(result);
                        }
                    }
                }
            },
        }
    }

    if let Some(request) = pending.take() {
        request.finish(Err(PasskeyError::Canceled));
    }
}

/// Local input devices that can type a passkey. Each device gets one
/// forwarding task; a device leaves the set when its task ends, so a later
/// [`KeyReaders::rescan`] picks it up again if it comes back.
#[derive(Clone)]
pub struct KeyReaders {
    keys: mpsc::UnboundedSender<Key>,
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl KeyReaders {
    pub fn new(keys: mpsc::UnboundedSender<Key>) -> Self {
        Self {
            keys,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start readers for devices not read yet. Returns how many were added.
    pub fn rescan(&self) -> usize {
        let mut added = 0;
        for (path, device) in evdev::enumerate() {
            let has_digits = device.supported_keys().is_some_and(|supported| {
                supported.contains(Key::KEY_ENTER) && supported.contains(Key::KEY_0)
            });
            if !has_digits || !self.claim(&path) {
                continue;
            }

            let name = device.name().unwrap_or("unnamed").to_string();
            match device.into_event_stream() {
                Ok(stream) => {
                    debug!("Passkey input from {} ({})", path.display(), name);
                    tokio::spawn(forward_keys(path, stream, self.clone()));
                    added += 1;
                }
                Err(e) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    self.release(&path);
                }
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `path` as read; false if a reader already owns it
    fn claim(&self, path: &Path) -> bool {
        match self.active.lock() {
            Ok(mut active) => active.insert(path.to_path_buf()),
            Err(_) => false,
        }
    }

    fn release(&self, path: &Path) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(path);
        }
    }
}

async fn forward_keys(path: PathBuf, mut stream: evdev::EventStream, readers: KeyReaders) {
    loop {
        match stream.next_event().await {
            Ok(event) => {
                if let InputEventKind::Key(key) = event.kind() {
                    if event.value() == KEY_DOWN && readers.keys.send(key).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                debug!("{} closed: {}", path.display(), e);
                break;
            }
        }
    }
    readers.release(&path);
}
