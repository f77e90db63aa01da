//! Raw evdev device enumeration, grounded in the original input
//! initialization routine: walk `/dev/input`, keep only nodes reporting key
//! or relative-motion capability, cap the device table at a small fixed size.

use std::fs;
use std::path::PathBuf;

use evdev::{Device, EventType};

use crate::error::InputError;

pub const MAX_INPUT_DEVICES: usize = 8;

pub struct EnumeratedDevice {
    pub id: u32,
    pub name: String,
    pub device: Device,
}

pub fn enumerate() -> Result<Vec<EnumeratedDevice>, InputError> {
    let mut paths: Vec<PathBuf> = fs::read_dir("/dev/input")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("event")))
        .collect();
    paths.sort();

    let mut devices = Vec::new();
    for path in paths {
        if devices.len() >= MAX_INPUT_DEVICES {
            break;
        }
        let Ok(device) = Device::open(&path) else { continue };
        let supports = device.supported_events();
        if !(supports.contains(EventType::KEY) || supports.contains(EventType::RELATIVE)) {
            continue;
        }
        let name = device.name().unwrap_or("Unknown").to_string();
        let id = devices.len() as u32;
        devices.push(EnumeratedDevice { id, name, device });
    }

    if devices.is_empty() {
        return Err(InputError::NoInputDevices);
    }
    Ok(devices)
}
