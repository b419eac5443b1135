//! `--list-ports` implementation.

use console::style;
use stmboot::{DetectedPort, auto_detect_port, discover_ports, format_port_list};

/// Print detected ports; JSON goes to stdout, the human listing to stderr.
pub(crate) fn cmd_list_ports(json: bool) {
    let detected = discover_ports();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports_json(&detected)).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for line in listing_lines(&detected) {
        eprintln!("{line}");
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(&auto_port.name).cyan().bold()
        );
    }
}

/// Bulleted human listing, one line per port.
fn listing_lines(ports: &[DetectedPort]) -> Vec<String> {
    format_port_list(ports)
        .into_iter()
        .map(|line| format!("  {} {line}", style("•").green()))
        .collect()
}

fn ports_json(ports: &[DetectedPort]) -> serde_json::Value {
    ports
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "device": p.device.name(),
                "known": p.device.is_known(),
                "vid": p.vid,
                "pid": p.pid,
                "manufacturer": p.manufacturer,
                "product": p.product,
                "serial": p.serial,
            })
        })
        .collect()
}
