//! Firmware update state machine.
//!
//! Drives the bootloader through a strictly sequential, half-duplex
//! exchange. Every stage sends one request and waits for one acknowledging
//! line within its own budget:
//!
//! ```text
//! Init --ECHO/"Bootloader ready"--> Ready --SETSIZE--> SizeSet --UPDATE--> Updating
//!                                                                             |
//!        Done <--CHECK(crc)-- Verifying <--"OK!" after last chunk-- Streaming <+
//!                                                                   (raw chunks,
//!                                                                    one "OK!" each)
//! ```
//!
//! Any failed wait moves the updater to [`UpdateState::Failed`]. Nothing is
//! retried except the echo probe; the caller restarts from the beginning.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::{DEFAULT_CHUNK_SIZE, FirmwareImage};
use crate::observer::UpdateObserver;
use crate::port::Transport;
use crate::protocol::command::{Command, send_command};
use crate::protocol::crc::WordOrder;
use crate::protocol::response::{READY_TOKEN, await_ok, await_response};

/// Default number of echo probes before giving up.
pub const DEFAULT_PROBE_ATTEMPTS: usize = 2;

/// Delay after the handshake before the bootloader accepts commands.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Delay between discarding stale input and the init echo. Boards that
/// reset when the port opens need it to reach the bootloader.
pub const DEFAULT_OPEN_DELAY: Duration = Duration::from_millis(500);

/// Updater states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UpdateState {
    /// Handshake not finished.
    Init,
    /// Bootloader answered the handshake.
    Ready,
    /// Firmware size accepted.
    SizeSet,
    /// Bootloader erased flash and waits for data.
    Updating,
    /// Raw chunks are being sent.
    Streaming,
    /// All data acknowledged, checksum pending.
    Verifying,
    /// Checksum confirmed.
    Done,
    /// A stage failed; the run is over.
    Failed,
}

impl UpdateState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::SizeSet => "size set",
            Self::Updating => "updating",
            Self::Streaming => "streaming",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Protocol waits, each with its own timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Stage {
    /// Initial echo answered by "Bootloader ready".
    Handshake,
    /// Explicit echo probe.
    Probe,
    /// `SETSIZE` acknowledgement.
    SetSize,
    /// `UPDATE` acknowledgement (flash erase).
    UpdateStart,
    /// Per-chunk acknowledgement.
    Chunk,
    /// Acknowledgement after the last chunk.
    PostStream,
    /// `CHECK` acknowledgement.
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handshake => "handshake",
            Self::Probe => "echo probe",
            Self::SetSize => "set size",
            Self::UpdateStart => "update start",
            Self::Chunk => "chunk transfer",
            Self::PostStream => "post-transfer acknowledgement",
            Self::Verify => "checksum verification",
        })
    }
}

/// Timeout budget of every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    /// Wait for "Bootloader ready".
    pub handshake: Duration,
    /// Wait for each echo probe.
    pub probe: Duration,
    /// Wait for the `SETSIZE` ack.
    pub set_size: Duration,
    /// Wait for the `UPDATE` ack; covers the flash erase.
    pub update_start: Duration,
    /// Wait for each chunk ack.
    pub chunk: Duration,
    /// Wait after the last chunk.
    pub post_stream: Duration,
    /// Wait for the `CHECK` ack.
    pub verify: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_millis(5000),
            probe: Duration::from_millis(5000),
            set_size: Duration::from_millis(5000),
            update_start: Duration::from_millis(15_000),
            chunk: Duration::from_millis(10_000),
            post_stream: Duration::from_millis(2000),
            verify: Duration::from_millis(5000),
        }
    }
}

impl StageTimeouts {
    /// Budget for `stage`.
    pub fn get(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Handshake => self.handshake,
            Stage::Probe => self.probe,
            Stage::SetSize => self.set_size,
            Stage::UpdateStart => self.update_start,
            Stage::Chunk => self.chunk,
            Stage::PostStream => self.post_stream,
            Stage::Verify => self.verify,
        }
    }

    /// Same budget for every stage. Mostly useful in tests.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            handshake: timeout,
            probe: timeout,
            set_size: timeout,
            update_start: timeout,
            chunk: timeout,
            post_stream: timeout,
            verify: timeout,
        }
    }
}

/// Update configuration.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Stage budgets.
    pub timeouts: StageTimeouts,
    /// Bytes per streamed chunk, never zero.
    chunk_size: usize,
    /// Echo probes before reporting the bootloader as unresponsive.
    pub probe_attempts: usize,
    /// Pause between discarding input and the init echo.
    pub open_delay: Duration,
    /// Pause after the handshake.
    pub settle_delay: Duration,
    /// Word grouping for the checksum.
    pub word_order: WordOrder,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            timeouts: StageTimeouts::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            open_delay: DEFAULT_OPEN_DELAY,
            settle_delay: DEFAULT_SETTLE_DELAY,
            word_order: WordOrder::default(),
        }
    }
}

impl UpdateOptions {
    /// Set stage budgets.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the checksum word order.
    #[must_use]
    pub fn with_word_order(mut self, word_order: WordOrder) -> Self {
        self.word_order = word_order;
        self
    }

    /// Bytes per streamed chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Set the chunk size (at least one byte).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the pause between discarding stale input and the init echo.
    #[must_use]
    pub fn with_open_delay(mut self, open_delay: Duration) -> Self {
        self.open_delay = open_delay;
        self
    }

    /// Set the post-handshake pause.
    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Set the number of echo probes.
    #[must_use]
    pub fn with_probe_attempts(mut self, probe_attempts: usize) -> Self {
        self.probe_attempts = probe_attempts.max(1);
        self
    }
}

/// Progress of one streaming run. Lives only inside a single update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    /// Image length.
    pub total_size: usize,
    /// Bytes acknowledged by the bootloader.
    pub bytes_sent: usize,
    /// Bytes per chunk.
    pub chunk_size: usize,
    /// Chunks acknowledged.
    pub chunk_index: usize,
    /// `ceil(total_size / chunk_size)`.
    pub chunk_count: usize,
}

impl TransferSession {
    /// Start a session for `total_size` bytes. A zero `chunk_size` is
    /// treated as one.
    pub fn new(total_size: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            total_size,
            bytes_sent: 0,
            chunk_size,
            chunk_index: 0,
            chunk_count: total_size.div_ceil(chunk_size),
        }
    }

    /// Byte range of the next chunk, or `None` when done.
    pub fn next_range(&self) -> Option<std::ops::Range<usize>> {
        if self.is_complete() {
            return None;
        }
        let len = self.chunk_size.min(self.total_size - self.bytes_sent);
        Some(self.bytes_sent..self.bytes_sent + len)
    }

    /// Record an acknowledged chunk of `len` bytes.
    pub fn advance(&mut self, len: usize) {
        self.bytes_sent += len;
        self.chunk_index += 1;
    }

    /// Whether every byte was acknowledged.
    pub fn is_complete(&self) -> bool {
        self.bytes_sent >= self.total_size
    }
}

/// Summary of a successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UpdateReport {
    /// Bytes flashed.
    pub size: u32,
    /// Chunks streamed.
    pub chunks: usize,
    /// Checksum confirmed by the device.
    pub checksum: u32,
    /// Word order used for the checksum.
    pub word_order: WordOrder,
}

/// Bootloader session.
///
/// Borrows the transport for its whole lifetime; the observer receives
/// every device line, state change and chunk acknowledgement.
pub struct Updater<'a, T: Transport + ?Sized, O: UpdateObserver> {
    transport: &'a mut T,
    observer: O,
    options: UpdateOptions,
    state: UpdateState,
    bytes_acknowledged: usize,
}

impl<'a, T: Transport + ?Sized, O: UpdateObserver> Updater<'a, T, O> {
    /// Discard stale input, send the initial echo and wait for the
    /// bootloader banner.
    ///
    /// Every failure, I/O errors included, is reported to the observer as
    /// [`UpdateState::Failed`].
    pub fn connect(transport: &'a mut T, observer: O, options: UpdateOptions) -> Result<Self> {
        let mut updater = Self {
            transport,
            observer,
            options,
            state: UpdateState::Init,
            bytes_acknowledged: 0,
        };
        updater.observer.on_state(UpdateState::Init);

        if let Err(e) = updater.handshake() {
            return Err(updater.fail(e));
        }

        info!("Bootloader answered init");
        thread::sleep(updater.options.settle_delay);
        updater.enter(UpdateState::Ready);
        Ok(updater)
    }

    fn handshake(&mut self) -> Result<()> {
        self.transport.discard_input()?;
        thread::sleep(self.options.open_delay);

        info!("Sending init echo");
        send_command(self.transport, &Command::echo())?;

        let timeout = self.options.timeouts.handshake;
        let response = await_response(self.transport, READY_TOKEN, timeout, &mut self.observer)?;
        if response.is_matched() {
            Ok(())
        } else {
            Err(Error::HandshakeFailed(format!(
                "no \"{READY_TOKEN}\" within {} ms, check the board",
                timeout.as_millis()
            )))
        }
    }

    /// Current state.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Active options.
    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Bytes the bootloader acknowledged in the current or last transfer.
    pub fn bytes_acknowledged(&self) -> usize {
        self.bytes_acknowledged
    }

    /// Get a reference to the observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Consume the updater and return the observer.
    pub fn into_observer(self) -> O {
        self.observer
    }

    /// Run every stage after the handshake: probe, set size, stream, verify.
    pub fn run(&mut self, image: &FirmwareImage) -> Result<UpdateReport> {
        self.expect_state(UpdateState::Ready, "run the update")?;
        if let Err(e) = self.probe() {
            return Err(self.fail(e));
        }
        self.set_firmware_size(image.size())?;
        self.update_firmware(image)?;
        let checksum = self.verify_checksum(image)?;

        Ok(UpdateReport {
            size: image.size(),
            chunks: image.chunk_count(self.options.chunk_size),
            checksum,
            word_order: self.options.word_order,
        })
    }

    /// Check that the bootloader still answers, retrying up to
    /// `probe_attempts` times. Does not change state.
    pub fn probe(&mut self) -> Result<()> {
        self.expect_state(UpdateState::Ready, "probe the bootloader")?;

        let attempts = self.options.probe_attempts;
        info!("Sending echo");
        for attempt in 1..=attempts {
            send_command(self.transport, &Command::echo())?;
            if self.wait_ok(Stage::Probe)? {
                info!("Bootloader is ready to flash");
                return Ok(());
            }
            if attempt < attempts {
                warn!("No echo reply (attempt {attempt}/{attempts}), retrying...");
            }
        }

        warn!("Bootloader did not respond");
        Err(Error::ProbeFailed { attempts })
    }

    /// Announce the firmware length.
    pub fn set_firmware_size(&mut self, size: u32) -> Result<()> {
        self.expect_state(UpdateState::Ready, "set the firmware size")?;

        info!("Setting firmware size: 0x{size:X}");
        self.command_stage(&Command::set_size(size), Stage::SetSize)?;
        self.enter(UpdateState::SizeSet);
        Ok(())
    }

    /// Start the update and stream the image.
    pub fn update_firmware(&mut self, image: &FirmwareImage) -> Result<()> {
        self.expect_state(UpdateState::SizeSet, "start the update")?;

        self.command_stage(&Command::update(), Stage::UpdateStart)?;
        self.enter(UpdateState::Updating);

        self.stream(image)
    }

    /// Send `CHECK` with the image checksum and wait for confirmation.
    /// Returns the checksum.
    pub fn verify_checksum(&mut self, image: &FirmwareImage) -> Result<u32> {
        self.expect_state(UpdateState::Verifying, "verify the checksum")?;

        let checksum = image.checksum(self.options.word_order);
        info!(
            "Checksum of image: 0x{checksum:X} ({} words)",
            self.options.word_order
        );
        info!("Verifying flashed firmware...");

        let confirmed = send_command(self.transport, &Command::check(checksum))
            .and_then(|()| self.wait_ok(Stage::Verify));
        match confirmed {
            Ok(true) => {
                info!("Firmware verified");
                self.enter(UpdateState::Done);
                Ok(checksum)
            },
            Ok(false) => Err(self.fail(Error::ChecksumMismatch { checksum })),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Stream raw chunks; each must be acknowledged before the next one.
    fn stream(&mut self, image: &FirmwareImage) -> Result<()> {
        self.enter(UpdateState::Streaming);
        info!("Start update firmware...");

        let data = image.data();
        let mut session = TransferSession::new(data.len(), self.options.chunk_size);
        self.bytes_acknowledged = 0;

        while let Some(range) = session.next_range() {
            let chunk = &data[range];
            debug!("Sending {} bytes", chunk.len());

            if let Err(e) = self.transport.write_bytes(chunk) {
                return Err(self.fail(e));
            }
            match self.wait_ok(Stage::Chunk) {
                Ok(true) => {},
                Ok(false) => {
                    warn!(
                        "Bootloader did not acknowledge chunk {}/{}",
                        session.chunk_index + 1,
                        session.chunk_count
                    );
                    return Err(self.timeout(Stage::Chunk));
                },
                Err(e) => return Err(self.fail(e)),
            }

            session.advance(chunk.len());
            self.bytes_acknowledged = session.bytes_sent;
            self.observer.on_progress(
                session.chunk_index,
                session.chunk_count,
                session.bytes_sent,
                session.total_size,
            );
        }

        info!("Update finished, waiting for bootloader...");
        match self.wait_ok(Stage::PostStream) {
            Ok(true) => {
                self.enter(UpdateState::Verifying);
                Ok(())
            },
            Ok(false) => Err(self.timeout(Stage::PostStream)),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Send `command` and wait for "OK!" within the budget of `stage`.
    fn command_stage(&mut self, command: &Command, stage: Stage) -> Result<()> {
        let acknowledged =
            send_command(self.transport, command).and_then(|()| self.wait_ok(stage));
        match acknowledged {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.timeout(stage)),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn wait_ok(&mut self, stage: Stage) -> Result<bool> {
        let timeout = self.options.timeouts.get(stage);
        Ok(await_ok(self.transport, timeout, &mut self.observer)?.is_matched())
    }

    fn expect_state(&self, expected: UpdateState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn enter(&mut self, state: UpdateState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
        self.observer.on_state(state);
    }

    fn timeout(&mut self, stage: Stage) -> Error {
        self.fail(Error::StageTimeout {
            stage,
            timeout: self.options.timeouts.get(stage),
        })
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!("Update failed while {}: {error}", self.state);
        self.enter(UpdateState::Failed);
        error
    }
}
