//! Output device discovery.
//!
//! Every query runs the listing tool again; there is no cache to invalidate. The listing
//! format is a flat tree: a non-indented line names a device, the indented lines below it
//! describe it, and the next non-indented line starts a new device.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use super::tools::ToolConfig;
use super::traits::ToolRunner;
use super::types::{AudioDevice, DeviceCapabilities, SampleFormat, StableIdentifiers};

pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_LOW_LATENCY_MS: f64 = 50.0;
pub const DEFAULT_HIGH_LATENCY_MS: f64 = 200.0;

/// Meta and plugin devices nobody picks as a room output
const EXCLUDED_PREFIXES: &[&str] = &[
    "null",
    "dmix",
    "dsnoop",
    "lavrate",
    "samplerate",
    "speexrate",
    "upmix",
    "vdownmix",
    "usbstream",
    "jack",
    "oss",
    "pipewire",
    "pulse",
];

const EXCLUDED_NAMES: &[&str] = &["null", "default:loopback", "sysdefault:loopback", "speex", "a52", "plug"];

const TYPE_LABELS: &[(&str, &str)] = &[
    ("plughw:", "Hardware (Plugin)"),
    ("hw:", "Direct Hardware"),
    ("sysdefault:", "System Default"),
    ("default:", "System Default"),
    ("front:", "Front Speakers"),
    ("rear:", "Rear Speakers"),
    ("center_lfe:", "Center/LFE"),
    ("side:", "Side Speakers"),
    ("surround21:", "Surround 2.1"),
    ("surround40:", "Surround 4.0"),
    ("surround41:", "Surround 4.1"),
    ("surround50:", "Surround 5.0"),
    ("surround51:", "Surround 5.1"),
    ("surround71:", "Surround 7.1"),
    ("iec958:", "Digital (S/PDIF)"),
    ("hdmi:", "HDMI"),
];

const LAYOUTS: &[(&str, &[&str])] = &[
    ("surround21:", &["FL", "FR", "LFE"]),
    ("surround40:", &["FL", "FR", "RL", "RR"]),
    ("surround41:", &["FL", "FR", "RL", "RR", "LFE"]),
    ("surround50:", &["FL", "FR", "RL", "RR", "FC"]),
    ("surround51:", &["FL", "FR", "RL", "RR", "FC", "LFE"]),
    ("surround71:", &["FL", "FR", "RL", "RR", "FC", "LFE", "SL", "SR"]),
];

static RATE_HZ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{4,6})\s*hz\b").expect("valid regex"));
static RATE_KHZ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{2,3}(?:\.\d+)?)\s*khz\b").expect("valid regex"));
static CHANNELS_CH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*(?:ch|channels?)\b").expect("valid regex"));
static LAYOUT_DOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([2457])\.([01])\b").expect("valid regex"));
static CARD_NAMED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CARD=([^,\s]+)").expect("valid regex"));
static DEV_NAMED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)DEV=(\d+)").expect("valid regex"));
static CARD_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+:(\d+)(?:,(\d+))?$").expect("valid regex"));
static CARD_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+:([A-Za-z][\w-]*)$").expect("valid regex"));
static APLAY_CARD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^card (\d+): (\S+) \[").expect("valid regex"));
static PROC_CARD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s+\[(\S+)\s*\]:").expect("valid regex"));

/// One device block from the listing tool, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub id: String,
    pub descriptions: Vec<String>,
}

/// How a device identifier refers to its sound card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardRef {
    Index(u32),
    Name(String),
}

/// Split listing output into device blocks
pub fn parse_listing(output: &str) -> Vec<ListingEntry> {
    let mut entries: Vec<ListingEntry> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some(current) = entries.last_mut() {
                current.descriptions.push(line.trim().to_string());
            }
        } else {
            entries.push(ListingEntry {
                id: line.trim().to_string(),
                descriptions: Vec::new(),
            });
        }
    }

    entries
}

/// True for loopback, null, mix-sharing, resampler and other plugin devices
pub fn is_excluded(id: &str) -> bool {
    let lower = id.to_ascii_lowercase();
    if EXCLUDED_NAMES.contains(&lower.as_str()) {
        return true;
    }
    if lower.contains("card=loopback") {
        return true;
    }
    EXCLUDED_PREFIXES.iter().any(|prefix| {
        lower == *prefix
            || lower.starts_with(&format!("{}:", prefix))
            || lower.starts_with(&format!("{}_", prefix))
    })
}

/// Device-type label shown next to the name
pub fn device_type_label(id: &str) -> &'static str {
    let lower = id.to_ascii_lowercase();
    if lower == "default" || lower == "sysdefault" {
        return "System Default";
    }
    TYPE_LABELS
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, label)| *label)
        .unwrap_or("Custom")
}

/// Card a device identifier points at, if any
pub fn card_reference(id: &str) -> Option<CardRef> {
    if let Some(caps) = CARD_NAMED.captures(id) {
        let card = &caps[1];
        return Some(match card.parse::<u32>() {
            Ok(index) => CardRef::Index(index),
            Err(_) => CardRef::Name(card.to_string()),
        });
    }
    let lower = id.to_ascii_lowercase();
    if let Some(caps) = CARD_NUMERIC.captures(&lower) {
        return caps[1].parse().ok().map(CardRef::Index);
    }
    if let Some(caps) = CARD_BARE.captures(id) {
        return Some(CardRef::Name(caps[1].to_string()));
    }
    None
}

fn device_number(id: &str) -> Option<u32> {
    if let Some(caps) = DEV_NAMED.captures(id) {
        return caps[1].parse().ok();
    }
    CARD_NUMERIC
        .captures(&id.to_ascii_lowercase())
        .and_then(|caps| caps.get(2).and_then(|m| m.as_str().parse().ok()))
}

/// `zone_living-room` → `Zone Living Room`
pub fn prettify(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn synthesized_name(id: &str) -> String {
    match (card_reference(id), device_number(id)) {
        (Some(CardRef::Index(card)), Some(dev)) => format!("Card {}, Device {}", card, dev),
        (Some(CardRef::Index(card)), None) => format!("Card {}", card),
        (Some(CardRef::Name(card)), Some(dev)) => format!("{}, Device {}", card, dev),
        (Some(CardRef::Name(card)), None) => card,
        (None, _) => {
            let bare = id.rsplit(':').next().unwrap_or(id);
            prettify(bare)
        }
    }
}

/// Human readable name pairing the type label with a description or synthesized name
pub fn display_name(id: &str, descriptions: &[String]) -> String {
    let label = device_type_label(id);
    let name = descriptions
        .first()
        .filter(|d| !d.is_empty())
        .cloned()
        .unwrap_or_else(|| synthesized_name(id));
    format!("{} - {}", label, name)
}

/// Best-effort sample rate guess from free text
pub fn infer_sample_rate(descriptions: &[String]) -> u32 {
    for text in descriptions {
        if let Some(rate) = RATE_HZ.captures(text).and_then(|c| c[1].parse::<u32>().ok()) {
            return rate;
        }
        if let Some(khz) = RATE_KHZ.captures(text).and_then(|c| c[1].parse::<f64>().ok()) {
            return (khz * 1000.0).round() as u32;
        }
    }
    DEFAULT_SAMPLE_RATE
}

/// Best-effort channel count guess from the id layout and free text
pub fn infer_channels(id: &str, descriptions: &[String]) -> u16 {
    if let Some(map) = layout_for(id) {
        return map.len() as u16;
    }
    for text in descriptions {
        if let Some(ch) = CHANNELS_CH.captures(text).and_then(|c| c[1].parse::<u16>().ok()) {
            if ch > 0 {
                return ch;
            }
        }
        if let Some(caps) = LAYOUT_DOT.captures(text) {
            let main: u16 = caps[1].parse().unwrap_or(2);
            let lfe: u16 = caps[2].parse().unwrap_or(0);
            return main + lfe;
        }
        let lower = text.to_ascii_lowercase();
        if lower.contains("quad") {
            return 4;
        }
        if lower.contains("stereo") {
            return 2;
        }
        if lower.contains("mono") {
            return 1;
        }
    }
    DEFAULT_CHANNELS
}

fn layout_for(id: &str) -> Option<&'static [&'static str]> {
    let lower = id.to_ascii_lowercase();
    LAYOUTS
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, map)| *map)
}

fn capabilities_for(id: &str, channels: u16, rate: u32) -> DeviceCapabilities {
    let lower = id.to_ascii_lowercase();
    // Digital sinks reject float PCM
    let supported_formats = if lower.starts_with("hdmi:") || lower.starts_with("iec958:") {
        vec![SampleFormat::S16LE, SampleFormat::S24LE, SampleFormat::S32LE]
    } else {
        vec![
            SampleFormat::S16LE,
            SampleFormat::S24LE,
            SampleFormat::S32LE,
            SampleFormat::F32LE,
            SampleFormat::F64LE,
        ]
    };
    let mut supported_sample_rates = vec![44100, 48000, 96000, 192000];
    if !supported_sample_rates.contains(&rate) {
        supported_sample_rates.push(rate);
        supported_sample_rates.sort_unstable();
    }
    DeviceCapabilities {
        can_output: true,
        supported_formats,
        supported_sample_rates,
        max_channels: channels,
    }
}

/// Turn a listing into classified output devices, without card metadata
pub fn devices_from_listing(output: &str) -> Vec<AudioDevice> {
    let mut devices: Vec<AudioDevice> = parse_listing(output)
        .into_iter()
        .filter(|entry| !is_excluded(&entry.id))
        .enumerate()
        .map(|(index, entry)| {
            let channels = infer_channels(&entry.id, &entry.descriptions);
            let rate = infer_sample_rate(&entry.descriptions);
            let label = device_type_label(&entry.id);

            let mut device = AudioDevice::new(index, &entry.id, display_name(&entry.id, &entry.descriptions));
            device.max_channels = channels;
            device.default_sample_rate = rate;
            device.low_latency_ms = DEFAULT_LOW_LATENCY_MS;
            device.high_latency_ms = DEFAULT_HIGH_LATENCY_MS;
            device.is_default = entry.id.eq_ignore_ascii_case("default");
            device.capabilities = Some(capabilities_for(&entry.id, channels, rate));
            device.channel_map = layout_for(&entry.id).map(|m| m.iter().map(|s| s.to_string()).collect());
            if let Some(CardRef::Index(card)) = card_reference(&entry.id) {
                device.card_index = Some(card);
            }
            if label == "Custom" {
                device.alias = entry.descriptions.first().cloned();
            }
            device
        })
        .collect();

    if !devices.iter().any(|d| d.is_default) {
        if let Some(first) = devices
            .iter_mut()
            .find(|d| d.id.to_ascii_lowercase().starts_with("sysdefault"))
        {
            first.is_default = true;
        }
    }

    devices
}

/// Map card names to indices from `aplay -l` output
pub fn parse_card_table(output: &str) -> HashMap<String, u32> {
    output
        .lines()
        .filter_map(|line| APLAY_CARD_LINE.captures(line))
        .filter_map(|caps| Some((caps[2].to_ascii_lowercase(), caps[1].parse().ok()?)))
        .collect()
}

/// Long card names keyed by index from `/proc/asound/cards`
pub fn parse_proc_cards(contents: &str) -> HashMap<u32, String> {
    let mut names = HashMap::new();
    let mut lines = contents.lines().peekable();
    while let Some(line) = lines.next() {
        let Some(caps) = PROC_CARD_LINE.captures(line) else {
            continue;
        };
        let Ok(index) = caps[1].parse::<u32>() else {
            continue;
        };
        if let Some(next) = lines.peek() {
            if !PROC_CARD_LINE.is_match(next) && !next.trim().is_empty() {
                names.insert(index, next.trim().to_string());
                lines.next();
            }
        }
    }
    names
}

/// Lists and classifies output devices through an injected tool runner
pub struct DeviceEnumerator {
    tools: Arc<dyn ToolRunner>,
    config: ToolConfig,
}

impl DeviceEnumerator {
    pub fn new(tools: Arc<dyn ToolRunner>, config: ToolConfig) -> Self {
        Self { tools, config }
    }

    /// Current output devices; an unavailable tool yields an empty list
    pub async fn list_output_devices(&self) -> Vec<AudioDevice> {
        let Some(output) = self.tools.run(&self.config.aplay, &["-L"]).await else {
            tracing::warn!(tool = %self.config.aplay, "device listing unavailable");
            return Vec::new();
        };

        let mut devices = devices_from_listing(&output);
        if devices.is_empty() {
            return devices;
        }

        self.annotate_cards(&mut devices).await;
        tracing::debug!(count = devices.len(), "enumerated output devices");
        devices
    }

    /// Case-insensitive id match, then substring match on the display name
    pub async fn get_device(&self, id: &str) -> Option<AudioDevice> {
        let devices = self.list_output_devices().await;
        find_device(&devices, id)
    }

    /// First device flagged default, else the first listed
    pub async fn get_default_device(&self) -> Option<AudioDevice> {
        let devices = self.list_output_devices().await;
        devices
            .iter()
            .find(|d| d.is_default)
            .or_else(|| devices.first())
            .cloned()
    }

    /// Empty or absent ids are valid and mean "use the default device"
    pub async fn validate_device(&self, id: Option<&str>) -> Result<(), String> {
        let Some(id) = id.map(str::trim).filter(|id| !id.is_empty()) else {
            return Ok(());
        };
        match self.get_device(id).await {
            Some(_) => Ok(()),
            None => Err(format!("Audio device '{}' not found", id)),
        }
    }

    /// Every query is already live
    pub fn refresh_devices(&self) {}

    /// Numeric index for a card given as a number or a card name
    pub async fn card_index(&self, card: &CardRef) -> Option<u32> {
        match card {
            CardRef::Index(index) => Some(*index),
            CardRef::Name(name) => {
                let table = self.card_table().await;
                table.get(&name.to_ascii_lowercase()).copied()
            }
        }
    }

    async fn card_table(&self) -> HashMap<String, u32> {
        self.tools
            .run(&self.config.aplay, &["-l"])
            .await
            .map(|out| parse_card_table(&out))
            .unwrap_or_default()
    }

    async fn annotate_cards(&self, devices: &mut [AudioDevice]) {
        let needs_table = devices
            .iter()
            .any(|d| matches!(card_reference(&d.id), Some(CardRef::Name(_))));
        let table = if needs_table { self.card_table().await } else { HashMap::new() };

        for device in devices.iter_mut() {
            if device.card_index.is_none() {
                if let Some(CardRef::Name(name)) = card_reference(&device.id) {
                    device.card_index = table.get(&name.to_ascii_lowercase()).copied();
                }
            }
        }

        let mut cards: Vec<u32> = devices.iter().filter_map(|d| d.card_index).collect();
        cards.sort_unstable();
        cards.dedup();
        if cards.is_empty() {
            return;
        }

        let long_names = self
            .tools
            .read_file("/proc/asound/cards")
            .await
            .map(|c| parse_proc_cards(&c))
            .unwrap_or_default();

        let mut identifiers: HashMap<u32, StableIdentifiers> = HashMap::new();
        for card in cards {
            let mut ids = StableIdentifiers {
                long_name: long_names.get(&card).cloned(),
                ..Default::default()
            };
            if let Some(usbid) = self.tools.read_file(&format!("/proc/asound/card{}/usbid", card)).await {
                if let Some((vendor, product)) = usbid.trim().split_once(':') {
                    ids.vendor_id = Some(vendor.to_string());
                    ids.product_id = Some(product.to_string());
                }
            }
            if let Some(bus) = self.tools.read_file(&format!("/proc/asound/card{}/usbbus", card)).await {
                let bus = bus.trim();
                if !bus.is_empty() {
                    ids.bus_path = Some(bus.to_string());
                }
            }
            if !ids.is_empty() {
                identifiers.insert(card, ids);
            }
        }

        for device in devices.iter_mut() {
            if let Some(card) = device.card_index {
                device.stable_identifiers = identifiers.get(&card).cloned();
            }
        }
    }
}

/// Lookup shared by the enumerator and callers holding a device list
pub fn find_device(devices: &[AudioDevice], id: &str) -> Option<AudioDevice> {
    let needle = id.trim();
    if needle.is_empty() {
        return None;
    }
    devices
        .iter()
        .find(|d| d.id.eq_ignore_ascii_case(needle))
        .or_else(|| {
            let lower = needle.to_ascii_lowercase();
            devices
                .iter()
                .find(|d| d.display_name.to_ascii_lowercase().contains(&lower))
        })
        .cloned()
}
