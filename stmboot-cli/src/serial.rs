//! Interactive serial port selection.
//!
//! Ports are chosen in this order:
//! - explicit `--port` / `STMBOOT_PORT`
//! - `[port] serial` from the config file
//! - the single recognized board (ST-Link, known bridge, remembered device)
//! - an interactive dialoguer prompt
//!
//! Non-interactive mode never prompts and fails with a usage error unless
//! exactly one candidate is left.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::io::IsTerminal,
    stmboot::{DetectedPort, discover_ports},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
    /// Force confirmation even for a single recognized port.
    pub confirm_port: bool,
}

/// Selected port plus whether it matched a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

/// Exactly one candidate, or a usage error.
fn only_candidate(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    let mut ports = ports.into_iter();
    match (ports.next(), ports.next()) {
        (Some(port), None) => Ok(port),
        (Some(_), Some(_)) => Err(usage_err(
            "multiple serial ports found; pass --port to choose one",
        )),
        (None, _) => Err(usage_err("no serial ports available")),
    }
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    let port = only_candidate(selection_ports)?;
    Ok(SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    })
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, discover_ports()));
    }

    if let Some(port_name) = &config.port.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, discover_ports()));
    }

    let ports = discover_ports();
    if ports.is_empty() {
        return Err(usage_err("no serial ports found; connect the board or pass --port"));
    }

    let selection_ports = candidate_ports(ports, options.list_all_ports, config);

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    if selection_ports.len() > 1 {
        ensure_interactive_terminal()?;
        return select_port_interactive(selection_ports, config);
    }

    let port = only_candidate(selection_ports)?;
    let is_known = is_known_device(&port, config);
    if is_known && !options.confirm_port {
        info!("Auto-selected port: {} [{}]", port.name, port.device.name());
        Ok(SelectedPort { port, is_known })
    } else {
        ensure_interactive_terminal()?;
        confirm_single_port(port, is_known)
    }
}

/// Known devices first unless all ports were requested or none is known.
fn candidate_ports(ports: Vec<DetectedPort>, list_all: bool, config: &Config) -> Vec<DetectedPort> {
    if list_all {
        return ports;
    }
    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    if known.is_empty() { ports } else { known }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "port selection needs an interactive terminal; pass --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled()
            } else {
                usage_err(&format!("prompt failed: {io_err}"))
            }
        },
    }
}

/// Look `name` up among `ports`; unknown names are still used as given.
fn find_port_by_name(name: &str, ports: Vec<DetectedPort>) -> SelectedPort {
    let found = ports
        .iter()
        .position(|p| p.name == name)
        .or_else(|| ports.iter().position(|p| p.name.eq_ignore_ascii_case(name)));

    match found.and_then(|index| ports.into_iter().nth(index)) {
        Some(port) => SelectedPort {
            is_known: port.device.is_known(),
            port,
        },
        None => SelectedPort {
            port: DetectedPort::plain(name),
            is_known: false,
        },
    }
}

/// Check if a port matches a known device (built-in table or config).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.port.usb_device.iter().any(|d| d.matches(vid, pid)),
        _ => false,
    }
}

fn port_label(port: &DetectedPort, config: &Config) -> String {
    let name = if is_known_device(port, config) {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );
    eprintln!("{}", style("Recognized boards are shown in bold").dim());

    ports.sort_by_key(|p| !is_known_device(p, config));

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| {
            console::truncate_str(&port_label(port, config), max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the port connected to the bootloader")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    let index = selection.ok_or_else(cancelled)?;
    let port = ports
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
    let is_known = is_known_device(&port, config);
    Ok(SelectedPort { port, is_known })
}

fn confirm_single_port(port: DetectedPort, is_known: bool) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort { port, is_known })
    } else {
        Err(cancelled())
    }
}

/// Offer to remember an unrecognized USB bridge.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.port.usb_device.iter().any(|d| d.matches(vid, pid)) {
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember USB device {vid:04X}:{pid:04X} for auto-detection?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UsbDevice;
    use stmboot::DeviceKind;

    fn usb(name: &str, vid: u16, pid: u16) -> DetectedPort {
        DetectedPort {
            device: DeviceKind::from_vid_pid(vid, pid),
            vid: Some(vid),
            pid: Some(pid),
            ..DetectedPort::plain(name)
        }
    }

    fn usage_error(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_)))
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.list_all_ports);
        assert!(!options.non_interactive);
        assert!(!options.confirm_port);
    }

    #[test]
    fn test_explicit_port_is_used_even_when_undetected() {
        let selected = find_port_by_name("/dev/ttyACM9", vec![usb("/dev/ttyACM0", 0x0483, 0x374B)]);
        assert_eq!(selected.port.name, "/dev/ttyACM9");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_explicit_port_matches_case_insensitively() {
        let selected = find_port_by_name("com3", vec![usb("COM3", 0x0483, 0x374B)]);
        assert_eq!(selected.port.name, "COM3");
        assert_eq!(selected.port.device, DeviceKind::StLink);
        assert!(selected.is_known);
    }

    #[test]
    fn test_is_known_device_builtin_and_config() {
        let config = Config::default();
        assert!(is_known_device(&usb("/dev/ttyUSB0", 0x1A86, 0x7523), &config));

        let custom = usb("/dev/ttyUSB1", 0xABCD, 0x1234);
        assert!(!is_known_device(&custom, &config));

        let mut config = Config::default();
        config.port.usb_device.push(UsbDevice { vid: 0xABCD, pid: 0x1234 });
        assert!(is_known_device(&custom, &config));

        assert!(!is_known_device(&DetectedPort::plain("/dev/ttyS0"), &config));
    }

    #[test]
    fn test_candidate_ports_prefers_known() {
        let ports = vec![
            DetectedPort::plain("/dev/ttyS0"),
            usb("/dev/ttyACM0", 0x0483, 0x374B),
        ];
        let config = Config::default();

        let known = candidate_ports(ports.clone(), false, &config);
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].name, "/dev/ttyACM0");

        assert_eq!(candidate_ports(ports, true, &config).len(), 2);

        let unknown_only = vec![DetectedPort::plain("/dev/ttyS0"), DetectedPort::plain("/dev/ttyS1")];
        assert_eq!(candidate_ports(unknown_only, false, &config).len(), 2);
    }

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![DetectedPort::plain("/dev/ttyUSB0"), DetectedPort::plain("/dev/ttyUSB1")];
        let err = select_non_interactive_port(ports, &Config::default())
            .err()
            .unwrap();
        assert!(usage_error(&err));
        assert!(err.to_string().contains("multiple"));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![], &Config::default())
            .err()
            .unwrap();
        assert!(usage_error(&err));
    }

    #[test]
    fn test_select_non_interactive_single_port_returns_selected_port() {
        let ports = vec![usb("/dev/ttyACM0", 0x0483, 0x374B)];
        let selected = select_non_interactive_port(ports, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyACM0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_port_label_fits_after_truncation() {
        let mut port = usb("/dev/verylongttyusb0", 0x1A86, 0x7523);
        port.product = Some("Very Long Product Name That Would Wrap".to_string());
        let label = port_label(&port, &Config::default());

        let truncated = console::truncate_str(&label, 26, "\u{2026}");
        assert!(console::measure_text_width(&truncated) <= 26);
        assert!(console::strip_ansi_codes(&truncated).starts_with("/dev/verylong"));
    }
}
