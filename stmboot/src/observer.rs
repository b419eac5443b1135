//! Observability sink for update progress.
//!
//! The protocol layer never prints. Everything a user may want to see
//! (device output, state changes, chunk progress) goes through an
//! [`UpdateObserver`] supplied by the caller.

use log::{Level, debug, info, log};

use crate::updater::UpdateState;

/// Receives diagnostic events from the protocol layer.
pub trait UpdateObserver {
    /// A line was received from the bootloader, matched or not.
    fn on_line(&mut self, line: &str) {
        let _ = line;
    }

    /// The updater entered `state`.
    fn on_state(&mut self, state: UpdateState) {
        let _ = state;
    }

    /// A chunk was acknowledged.
    ///
    /// `chunk_index` is 1-based and equals `chunk_count` on the last chunk.
    fn on_progress(&mut self, chunk_index: usize, chunk_count: usize, bytes_sent: usize, total: usize) {
        let _ = (chunk_index, chunk_count, bytes_sent, total);
    }
}

impl<O: UpdateObserver + ?Sized> UpdateObserver for &mut O {
    fn on_line(&mut self, line: &str) {
        (**self).on_line(line);
    }

    fn on_state(&mut self, state: UpdateState) {
        (**self).on_state(state);
    }

    fn on_progress(&mut self, chunk_index: usize, chunk_count: usize, bytes_sent: usize, total: usize) {
        (**self).on_progress(chunk_index, chunk_count, bytes_sent, total);
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl UpdateObserver for NullObserver {}

/// Observer forwarding events to the `log` facade.
///
/// Device lines are logged at [`LogObserver::LINE_LEVEL`] so they show up
/// at the default `info` filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl LogObserver {
    /// Level used for lines received from the bootloader.
    pub const LINE_LEVEL: Level = Level::Info;
}

impl UpdateObserver for LogObserver {
    fn on_line(&mut self, line: &str) {
        log!(Self::LINE_LEVEL, "bootloader: {line}");
    }

    fn on_state(&mut self, state: UpdateState) {
        debug!("State -> {state}");
    }

    fn on_progress(&mut self, chunk_index: usize, chunk_count: usize, bytes_sent: usize, total: usize) {
        info!("Progress: {chunk_index}/{chunk_count} ({bytes_sent}/{total} bytes)");
    }
}
