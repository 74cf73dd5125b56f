//! Output device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
    /// Whether the device offers a single-channel output layout.
    pub supports_mono: bool,
    /// Heuristic recommendation for speech playback.
    pub is_recommended: bool,
}

const VIRTUAL_KEYWORDS: &[&str] = &[
    "virtual",
    "loopback",
    "null",
    "dummy",
    "cable input",
    "voicemeeter",
    "blackhole",
    "soundflower",
    "hdmi",
    "displayport",
];

const SPEAKER_POSITIVE_KEYWORDS: &[&str] = &[
    "speaker",
    "headphone",
    "headset",
    "earphone",
    "built-in",
    "analog",
    "line out",
    "usb",
    "pulse",
    "pipewire",
];

/// Heuristic for sinks that do not reach a listener directly.
pub fn is_virtual_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    VIRTUAL_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score a device name for speech playback. Higher is better.
pub fn speaker_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = 0;
    if is_virtual_like_name(&lowered) {
        score -= 16;
    } else {
        score += 8;
    }
    if SPEAKER_POSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if lowered.contains("default") {
        score += 1;
    }
    score
}

/// Mark the best-scoring device as recommended and sort recommended first,
/// then default, then by name.
pub fn rank_devices(list: &mut [OutputDeviceInfo]) {
    for device in list.iter_mut() {
        device.is_recommended = false;
    }
    let best = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| {
            speaker_preference_score(&d.name)
                + if d.is_default { 2 } else { 0 }
                + if d.supports_mono { 1 } else { 0 }
        })
        .map(|(idx, _)| idx);
    if let Some(idx) = best {
        list[idx].is_recommended = true;
    }

    list.sort_by_key(|d| (!d.is_recommended, !d.is_default, d.name.to_ascii_lowercase()));
}

/// List all available audio output devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    let supports_mono = device
                        .supported_output_configs()
                        .map(|mut configs| configs.any(|c| c.channels() == 1))
                        .unwrap_or(false);
                    OutputDeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        name,
                        supports_mono,
                        is_recommended: false,
                    }
                })
                .collect::<Vec<_>>();
            rank_devices(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            default_name
                .map(|name| {
                    vec![OutputDeviceInfo {
                        is_recommended: !is_virtual_like_name(&name),
                        name,
                        is_default: true,
                        supports_mono: false,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_default: bool) -> OutputDeviceInfo {
        OutputDeviceInfo {
            name: name.into(),
            is_default,
            supports_mono: false,
            is_recommended: false,
        }
    }

    #[test]
    fn detects_virtual_sinks() {
        assert!(is_virtual_like_name("CABLE Input (VB-Audio Virtual Cable)"));
        assert!(is_virtual_like_name("BlackHole 2ch"));
        assert!(!is_virtual_like_name("Speakers (Realtek Audio)"));
    }

    #[test]
    fn scores_speakers_above_virtual_sinks() {
        let speakers = speaker_preference_score("Headphones (USB Audio)");
        let virt = speaker_preference_score("Null Output");
        assert!(speakers > virt);
    }

    #[test]
    fn ranking_puts_recommended_first() {
        let mut list = vec![
            info("HDMI Output", true),
            info("Built-in Speakers", false),
            info("Aux", false),
        ];
        rank_devices(&mut list);
        assert_eq!(list[0].name, "Built-in Speakers");
        assert!(list[0].is_recommended);
        assert_eq!(list[1].name, "HDMI Output");
        assert_eq!(list.iter().filter(|d| d.is_recommended).count(), 1);
    }
}
