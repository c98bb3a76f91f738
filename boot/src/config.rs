//! config.rs — `bootloader.cfg` key/value settings
//!
//! One `key=value` pair per line. Blank lines and lines starting with `#` are
//! ignored, surrounding whitespace is trimmed, and a key given twice takes
//! its last value. A missing file is the same as an empty one.
//!
//! Recognised keys:
//! - `boot` — `file` (default) or `network`
//! - `nodename` — netboot node name; defaults to one derived from the MAC
//! - `netboot_polls` — interface polls before falling back to disk

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use log::{debug, warn};

#[derive(Clone, Debug, Default)]
pub struct BootConfig {
    entries: Vec<(String, String)>,
}

/// Where the image comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootSource {
    File,
    Network,
}

impl BootConfig {
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    entries.push((key.trim().to_string(), value.trim().to_string()));
                }
                _ => warn!(target: "config", "line {}: expected key=value", n + 1),
            }
        }
        debug!(target: "config", "{} settings", entries.len());
        Self { entries }
    }

    /// Parse raw file contents; lines that are not UTF-8 are dropped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match core::str::from_utf8(bytes) {
            Ok(text) => Self::parse(text),
            Err(_) => {
                let text: String = bytes
                    .split(|&b| b == b'\n')
                    .filter_map(|line| core::str::from_utf8(line).ok())
                    .flat_map(|line| [line, "\n"])
                    .collect();
                Self::parse(&text)
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.lookup(key).unwrap_or(default)
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        let Some(raw) = self.lookup(key) else {
            return default;
        };
        let parsed = match raw.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => raw.parse(),
        };
        parsed.unwrap_or_else(|_| {
            warn!(target: "config", "{}: '{}' is not a number, using {}", key, raw, default);
            default
        })
    }

    pub fn boot_source(&self) -> BootSource {
        match self.get("boot", "file") {
            "network" => BootSource::Network,
            "file" => BootSource::File,
            other => {
                warn!(target: "config", "unknown boot source '{}', using file", other);
                BootSource::File
            }
        }
    }

    pub fn nodename(&self) -> Option<&str> {
        self.lookup("nodename").filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = BootConfig::default();
        assert_eq!(cfg.get("boot", "file"), "file");
        assert_eq!(cfg.boot_source(), BootSource::File);
        assert_eq!(cfg.nodename(), None);
    }

    #[test]
    fn parses_pairs_comments_and_whitespace() {
        let cfg = BootConfig::parse(
            "# uniboot\n\n  boot = network \r\nnodename=lab-7\nnonsense\n=orphan\n",
        );
        assert_eq!(cfg.boot_source(), BootSource::Network);
        assert_eq!(cfg.nodename(), Some("lab-7"));
        assert_eq!(cfg.lookup("nonsense"), None);
        assert_eq!(cfg.lookup(""), None);
    }

    #[test]
    fn later_keys_override() {
        let cfg = BootConfig::parse("boot=network\nboot=file\n");
        assert_eq!(cfg.boot_source(), BootSource::File);
    }

    #[test]
    fn values_may_contain_equals() {
        let cfg = BootConfig::parse("cmdline=console=ttyS0 quiet");
        assert_eq!(cfg.get("cmdline", ""), "console=ttyS0 quiet");
    }

    #[test]
    fn unknown_source_falls_back_to_file() {
        assert_eq!(BootConfig::parse("boot=usb").boot_source(), BootSource::File);
    }

    #[test]
    fn empty_nodename_is_unset() {
        assert_eq!(BootConfig::parse("nodename=").nodename(), None);
    }

    #[test]
    fn numbers() {
        let cfg = BootConfig::parse("a=42\nb=0x10\nc=lots");
        assert_eq!(cfg.get_u32("a", 0), 42);
        assert_eq!(cfg.get_u32("b", 0), 16);
        assert_eq!(cfg.get_u32("c", 7), 7);
        assert_eq!(cfg.get_u32("d", 9), 9);
    }

    #[test]
    fn invalid_utf8_lines_are_dropped() {
        let cfg = BootConfig::from_bytes(b"boot=network\nbad=\xff\xfe\nnodename=n1\n");
        assert_eq!(cfg.boot_source(), BootSource::Network);
        assert_eq!(cfg.nodename(), Some("n1"));
        assert_eq!(cfg.lookup("bad"), None);
    }
}
