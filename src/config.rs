//! Background configuration, loaded from `~/.config/bgce.conf`.
//!
//! The format is a small INI-like dialect (not TOML-compatible) with a
//! `[background]` section, matching the original configuration file this
//! server reads on startup.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundKind {
    Color(u32),
    Image { path: PathBuf, scaled: bool },
}

impl Default for BackgroundKind {
    fn default() -> Self {
        BackgroundKind::Color(0xAAAAAAAA)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub background: BackgroundKind,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| Path::new(&home).join(".config").join("bgce.conf"))
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e.into()),
        };
        parse(&text)
    }
}

fn parse(text: &str) -> Result<Config, ConfigError> {
    let mut section = String::new();
    let mut is_image = false;
    let mut color = 0xAAAA_AAAAu32;
    let mut image_path = PathBuf::new();
    let mut scaled = true;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.trim().to_string();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim();
        let value = value.trim();

        if section != "background" {
            continue;
        }
        match key {
            "type" => is_image = value.eq_ignore_ascii_case("image"),
            "color" => color = parse_hex_color(value)?,
            "path" => image_path = PathBuf::from(value),
            "mode" => scaled = value.eq_ignore_ascii_case("scaled"),
            _ => {}
        }
    }

    let background = if is_image {
        BackgroundKind::Image { path: image_path, scaled }
    } else {
        BackgroundKind::Color(color)
    };
    Ok(Config { background })
}

/// Parses `#RRGGBB` or `#RRGGBBAA` into a 0xAARRGGBB value. Bare `RRGGBB`
/// without the `#` is also accepted, matching the original parser.
fn parse_hex_color(value: &str) -> Result<u32, ConfigError> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    match hex.len() {
        6 => {
            let rgb = u32::from_str_radix(hex, 16)
                .map_err(|_| ConfigError::InvalidColor(value.to_string()))?;
            Ok(0xFF00_0000 | rgb)
        }
        8 => {
            let rgba = u32::from_str_radix(hex, 16)
                .map_err(|_| ConfigError::InvalidColor(value.to_string()))?;
            // stored value is 0xAARRGGBB; input is RRGGBBAA
            let r = (rgba >> 24) & 0xFF;
            let g = (rgba >> 16) & 0xFF;
            let b = (rgba >> 8) & 0xFF;
            let a = rgba & 0xFF;
            Ok((a << 24) | (r << 16) | (g << 8) | b)
        }
        _ => Err(ConfigError::InvalidColor(value.to_string())),
    }
}
