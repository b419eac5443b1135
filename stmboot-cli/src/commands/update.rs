//! Firmware update command.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use std::path::Path;
use std::time::Duration;
use stmboot::port::DEFAULT_BAUD;
use stmboot::protocol::crc;
use stmboot::{
    FirmwareImage, LineTransport, LogObserver, NativePort, SerialConfig, StageTimeouts,
    UpdateObserver, UpdateOptions, UpdateState, Updater,
};

use crate::config::Config;
use crate::{Cli, get_port, use_fancy_output};

/// Observer driving the progress bar; device output still goes to the log.
struct ProgressObserver {
    pb: ProgressBar,
    log: LogObserver,
}

impl ProgressObserver {
    fn new(pb: ProgressBar) -> Self {
        Self {
            pb,
            log: LogObserver,
        }
    }
}

impl UpdateObserver for ProgressObserver {
    fn on_line(&mut self, line: &str) {
        let log = &mut self.log;
        self.pb.suspend(|| log.on_line(line));
    }

    fn on_state(&mut self, state: UpdateState) {
        let log = &mut self.log;
        self.pb.suspend(|| log.on_state(state));
        match state {
            UpdateState::Updating => self.pb.set_message("Erasing flash..."),
            UpdateState::Streaming => self.pb.set_message("Writing"),
            UpdateState::Verifying => self.pb.set_message("Verifying checksum..."),
            _ => {},
        }
    }

    fn on_progress(&mut self, chunk_index: usize, chunk_count: usize, bytes_sent: usize, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.set_position(bytes_sent as u64);
        self.pb.set_message(format!("chunk {chunk_index}/{chunk_count}"));
    }
}

/// Build updater options from CLI arguments over config values.
fn update_options(cli: &Cli, config: &Config) -> UpdateOptions {
    let mut timeouts = StageTimeouts::default();
    if let Some(ms) = cli.chunk_timeout.or(config.update.chunk_timeout_ms) {
        timeouts.chunk = Duration::from_millis(ms);
    }
    if let Some(ms) = config.update.update_timeout_ms {
        timeouts.update_start = Duration::from_millis(ms);
    }

    UpdateOptions::default()
        .with_timeouts(timeouts)
        .with_word_order(
            cli.word_order
                .or(config.update.word_order)
                .unwrap_or_default(),
        )
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Flash `firmware` through the bootloader.
pub(crate) fn cmd_update(cli: &Cli, config: &mut Config, firmware: &Path) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware: {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    info!("Firmware size: 0x{:X} ({} bytes)", image.size(), image.len());

    crc::self_test().context("Checksum self-test failed, refusing to flash")?;

    let port = get_port(cli, config)?;
    let baud = cli.baud.or(config.port.baud).unwrap_or(DEFAULT_BAUD);
    if !cli.quiet {
        eprintln!("{} Using port {port} @ {baud} baud", style("🔌").cyan());
    }

    let serial = NativePort::open(&SerialConfig::new(&port, baud))
        .with_context(|| format!("Failed to open serial port {port}"))?;
    let mut transport = LineTransport::new(serial);
    let options = update_options(cli, config);

    if !cli.quiet {
        eprintln!("{} Waiting for bootloader...", style("⏳").yellow());
    }
    let pb = progress_bar(cli);
    let mut updater = Updater::connect(&mut transport, ProgressObserver::new(pb.clone()), options)
        .context("Bootloader did not answer")?;
    if !cli.quiet {
        eprintln!("{} Connected", style("✓").green());
    }

    let report = match updater.run(&image) {
        Ok(report) => report,
        Err(e) => {
            pb.abandon();
            return Err(e).context("Firmware update failed");
        },
    };
    pb.finish_with_message("Complete");

    if !cli.quiet {
        eprintln!(
            "\n{} Flashed {} bytes in {} chunks, checksum 0x{:08X} ({} words)",
            style("🎉").green().bold(),
            report.size,
            report.chunks,
            report.checksum,
            report.word_order
        );
    }

    Ok(())
}
