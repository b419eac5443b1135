//! Configuration file support for stmboot.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (STMBOOT_*)
//! 3. Local config file (./stmboot.toml, plus remembered devices in ./stmboot_ports.toml)
//! 4. Global config file (~/.config/stmboot/config.toml)
//!
//! `--config PATH` replaces steps 3 and 4. Remembered devices then live in
//! `stmboot_ports.toml` next to that file.

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use stmboot::WordOrder;

const LOCAL_CONFIG: &str = "stmboot.toml";
const LOCAL_PORTS: &str = "stmboot_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// `[port]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Extra USB devices treated as known during auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// `[update]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Checksum word order.
    pub word_order: Option<WordOrder>,
    /// Per-chunk acknowledgement timeout in milliseconds.
    pub chunk_timeout_ms: Option<u64>,
    /// Timeout for the erase that follows `UPDATE`, in milliseconds.
    pub update_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Update configuration.
    #[serde(default)]
    pub update: UpdateConfig,
    /// Ports file tied to an explicit `--config` path.
    #[serde(skip)]
    ports_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::parse_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::parse_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(ports) = Self::load_ports_config() {
            config.merge_port(ports);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        let mut config = if let Some(config) = Self::parse_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        };

        let ports_path = path.with_file_name(LOCAL_PORTS);
        if let Some(ports) = Self::parse_file(&ports_path) {
            debug!("Loaded ports config from {}", ports_path.display());
            config.merge_port(ports);
        }
        config.ports_path = Some(ports_path);
        config
    }

    /// Read and parse a TOML file, warning about (and ignoring) bad files.
    fn parse_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Load remembered ports, local file first.
    fn load_ports_config() -> Option<PortConfig> {
        if let Some(ports) = Self::parse_file(Path::new(LOCAL_PORTS)) {
            debug!("Loaded ports config from {LOCAL_PORTS}");
            return Some(ports);
        }

        let global_path = Self::global_config_dir()?.join("ports.toml");
        let ports = Self::parse_file(&global_path)?;
        debug!("Loaded ports config from {}", global_path.display());
        Some(ports)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "stmboot").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        self.merge_port(other.port);

        if other.update.word_order.is_some() {
            self.update.word_order = other.update.word_order;
        }
        if other.update.chunk_timeout_ms.is_some() {
            self.update.chunk_timeout_ms = other.update.chunk_timeout_ms;
        }
        if other.update.update_timeout_ms.is_some() {
            self.update.update_timeout_ms = other.update.update_timeout_ms;
        }
    }

    fn merge_port(&mut self, other: PortConfig) {
        if other.serial.is_some() {
            self.port.serial = other.serial;
        }
        if other.baud.is_some() {
            self.port.baud = other.baud;
        }
        for device in other.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let path = if let Some(path) = self.ports_path.clone() {
            path
        } else if Path::new(LOCAL_PORTS).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS)
        };

        self.remember_usb_device_at(vid, pid, &path)
    }

    fn remember_usb_device_at(&mut self, vid: u16, pid: u16, path: &Path) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        let mut ports: PortConfig = Self::parse_file(path).unwrap_or_default();
        if !ports.usb_device.contains(&device) {
            ports.usb_device.push(device.clone());
        }
        fs::write(path, toml::to_string_pretty(&ports)?)?;
        info!("Saved USB device {vid:04X}:{pid:04X} to {}", path.display());

        self.port.usb_device.push(device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.serial.is_none());
        assert!(config.port.baud.is_none());
        assert!(config.port.usb_device.is_empty());
        assert!(config.update.word_order.is_none());
        assert!(config.update.chunk_timeout_ms.is_none());
    }

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x0483,
            pid: 0x374B,
        };
        assert!(device.matches(0x0483, 0x374B));
        assert!(!device.matches(0x0483, 0x3752));
        assert!(!device.matches(0x10C4, 0x374B));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port]
serial = "/dev/ttyACM0"
baud = 57600

[[port.usb_device]]
vid = 1155
pid = 14155

[update]
word_order = "big"
chunk_timeout_ms = 4000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.port.baud, Some(57600));
        assert_eq!(config.port.usb_device, vec![UsbDevice { vid: 0x0483, pid: 0x374B }]);
        assert_eq!(config.update.word_order, Some(WordOrder::Big));
        assert_eq!(config.update.chunk_timeout_ms, Some(4000));
        assert!(config.update.update_timeout_ms.is_none());
    }

    #[test]
    fn test_config_rejects_unknown_word_order() {
        assert!(toml::from_str::<Config>("[update]\nword_order = \"middle\"\n").is_err());
    }

    #[test]
    fn test_config_merge_overrides_and_keeps() {
        let mut base = Config::default();
        base.port.serial = Some("/dev/ttyUSB0".to_string());
        base.port.baud = Some(115200);
        base.update.chunk_timeout_ms = Some(10_000);
        base.port.usb_device.push(UsbDevice { vid: 0x1A86, pid: 0x7523 });

        let mut other = Config::default();
        other.port.baud = Some(57600);
        other.update.word_order = Some(WordOrder::Native);
        other.port.usb_device.push(UsbDevice { vid: 0x1A86, pid: 0x7523 });
        other.port.usb_device.push(UsbDevice { vid: 0x10C4, pid: 0xEA60 });

        base.merge(other);

        assert_eq!(base.port.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.port.baud, Some(57600));
        assert_eq!(base.update.word_order, Some(WordOrder::Native));
        assert_eq!(base.update.chunk_timeout_ms, Some(10_000));
        assert_eq!(base.port.usb_device.len(), 2);
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[port]\nserial = \"COM7\"\n[update]\nupdate_timeout_ms = 20000\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.port.serial.as_deref(), Some("COM7"));
        assert_eq!(config.update.update_timeout_ms, Some(20_000));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.port.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.port.serial.is_none());
    }

    #[test]
    fn test_remember_usb_device_writes_ports_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCAL_PORTS);
        let mut config = Config::default();

        config.remember_usb_device_at(0xABCD, 0x1234, &path).unwrap();
        config.remember_usb_device_at(0xABCD, 0x1234, &path).unwrap();
        config.remember_usb_device_at(0x1111, 0x2222, &path).unwrap();

        assert_eq!(config.port.usb_device.len(), 2);
        let saved: PortConfig = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            saved.usb_device,
            vec![
                UsbDevice { vid: 0xABCD, pid: 0x1234 },
                UsbDevice { vid: 0x1111, pid: 0x2222 },
            ]
        );
    }

    #[test]
    fn test_explicit_config_keeps_ports_beside_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.toml");
        fs::write(&path, "[port]\nbaud = 115200\n").unwrap();

        let mut config = Config::load_from_path(&path);
        config.remember_usb_device(0x2E8A, 0x000A).unwrap();

        let ports_path = dir.path().join(LOCAL_PORTS);
        let saved: PortConfig = toml::from_str(&fs::read_to_string(&ports_path).unwrap()).unwrap();
        assert_eq!(saved.usb_device, vec![UsbDevice { vid: 0x2E8A, pid: 0x000A }]);

        let reloaded = Config::load_from_path(&path);
        assert_eq!(reloaded.port.baud, Some(115200));
        assert_eq!(reloaded.port.usb_device, vec![UsbDevice { vid: 0x2E8A, pid: 0x000A }]);
    }

    #[test]
    fn test_global_config_path_names_stmboot() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("stmboot"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
