//! Output device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Description of an output device for listings and config files
#[derive(Debug, Clone, Serialize)]
pub struct OutputDeviceInfo {
    /// Stable id, `output:<name>`
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around a cpal output device
pub struct OutputDevice {
    inner: cpal::Device,
    pub name: String,
}

impl OutputDevice {
    fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    pub fn default_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_output_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }

    /// Largest channel count any supported configuration offers
    pub fn max_channels(&self) -> Result<u16, AudioError> {
        let configs = self
            .inner
            .supported_output_configs()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
        Ok(configs.map(|c| c.channels()).max().unwrap_or(0))
    }
}

/// List all output devices of the default host
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let (sample_rates, channels) = capabilities(&device);
            Some(OutputDeviceInfo {
                id: device_id(&name),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                sample_rates,
                channels,
            })
        })
        .collect()
}

fn device_id(name: &str) -> String {
    format!("output:{}", name)
}

fn capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate in [44100u32, 48000, 88200, 96000, 192000] {
                let sr = cpal::SampleRate(rate);
                if sr >= config.min_sample_rate()
                    && sr <= config.max_sample_rate()
                    && !sample_rates.contains(&rate)
                {
                    sample_rates.push(rate);
                }
            }
            if !channels.contains(&config.channels()) {
                channels.push(config.channels());
            }
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Find an output device by id; `None` selects the host default
pub fn get_output_device(id: Option<&str>) -> Result<OutputDevice, AudioError> {
    let host = cpal::default_host();

    let Some(id) = id else {
        return host
            .default_output_device()
            .map(OutputDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("no default output device".to_string()));
    };

    let name = id.strip_prefix("output:").unwrap_or(id);
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(OutputDevice::from_cpal(device));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}
