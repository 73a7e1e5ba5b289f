use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};

use super::enumerator::{card_reference, DeviceEnumerator};
use super::tools::ToolConfig;
use super::traits::{AudioBackend, PcmBinding, ToolRunner};
use super::types::{is_hardware_id, AudioDevice};
use crate::engine::{Player, PlayerConfig, PlayerError};

/// Mixer controls tried in order when setting hardware volume
pub const VOLUME_CONTROLS: &[&str] = &["Master", "PCM", "Speaker", "Headphone"];

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d{1,3})%\]").expect("valid regex"));
static SIMPLE_CONTROL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Simple mixer control '([^']+)',\d+").expect("valid regex"));

/// First `[NN%]` in mixer tool output
pub fn parse_volume_percent(output: &str) -> Option<u8> {
    PERCENT
        .captures(output)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .map(|p| p.min(100))
}

/// Control names from `amixer scontrols`
pub fn parse_mixer_controls(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| SIMPLE_CONTROL.captures(line.trim()))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Direct-hardware backend over the native PCM binding and the ALSA command line tools
pub struct AlsaBackend {
    enumerator: DeviceEnumerator,
    tools: Arc<dyn ToolRunner>,
    tool_config: ToolConfig,
    binding: Arc<dyn PcmBinding>,
    player_config: PlayerConfig,
}

impl AlsaBackend {
    pub fn new(
        binding: Arc<dyn PcmBinding>,
        tools: Arc<dyn ToolRunner>,
        tool_config: ToolConfig,
        player_config: PlayerConfig,
    ) -> Self {
        Self {
            enumerator: DeviceEnumerator::new(tools.clone(), tool_config.clone()),
            tools,
            tool_config,
            binding,
            player_config,
        }
    }

    /// Backend wired to libasound and the system tools
    #[cfg(feature = "alsa")]
    pub fn system(tool_config: ToolConfig, player_config: PlayerConfig) -> Self {
        let tools = Arc::new(super::tools::SystemToolRunner::new(tool_config.timeout()));
        Self::new(
            Arc::new(super::drivers::AlsaBinding::new()),
            tools,
            tool_config,
            player_config,
        )
    }

    pub fn enumerator(&self) -> &DeviceEnumerator {
        &self.enumerator
    }

    async fn mixer_card(&self, device_id: &str) -> Option<u32> {
        if !is_hardware_id(device_id) {
            return None;
        }
        let card = card_reference(device_id)?;
        self.enumerator.card_index(&card).await
    }

    /// Current mixer level of the first readable control
    pub async fn hardware_volume(&self, device_id: &str) -> Option<u8> {
        let card = self.mixer_card(device_id).await?.to_string();
        for &control in VOLUME_CONTROLS {
            let output = self
                .tools
                .run(&self.tool_config.amixer, &["-c", &card, "sget", control])
                .await;
            if let Some(percent) = output.as_deref().and_then(parse_volume_percent) {
                return Some(percent);
            }
        }
        None
    }

    /// Simple mixer controls the device's card exposes
    pub async fn mixer_controls(&self, device_id: &str) -> Vec<String> {
        let Some(card) = self.mixer_card(device_id).await else {
            return Vec::new();
        };
        let card = card.to_string();
        self.tools
            .run(&self.tool_config.amixer, &["-c", &card, "scontrols"])
            .await
            .map(|out| parse_mixer_controls(&out))
            .unwrap_or_default()
    }
}

#[async_trait]
impl AudioBackend for AlsaBackend {
    fn backend_id(&self) -> &str {
        "alsa"
    }

    async fn output_devices(&self) -> Vec<AudioDevice> {
        self.enumerator.list_output_devices().await
    }

    async fn device(&self, id: &str) -> Option<AudioDevice> {
        self.enumerator.get_device(id).await
    }

    async fn default_device(&self) -> Option<AudioDevice> {
        self.enumerator.get_default_device().await
    }

    async fn validate_device(&self, id: Option<&str>) -> Result<(), String> {
        self.enumerator.validate_device(id).await
    }

    fn refresh_devices(&self) {
        self.enumerator.refresh_devices();
    }

    async fn set_hardware_volume(&self, device_id: &str, percent: u8) -> bool {
        if !is_hardware_id(device_id) {
            tracing::debug!(device = device_id, "no hardware mixer, use software volume");
            return false;
        }
        let Some(card) = self.mixer_card(device_id).await else {
            tracing::warn!(device = device_id, "could not resolve sound card");
            return false;
        };

        let card = card.to_string();
        let level = format!("{}%", percent.min(100));
        for &control in VOLUME_CONTROLS {
            let result = self
                .tools
                .run(&self.tool_config.amixer, &["-c", &card, "sset", control, &level])
                .await;
            if result.is_some() {
                tracing::debug!(device = device_id, control, level = %level, "hardware volume set");
                return true;
            }
        }
        tracing::warn!(device = device_id, card = %card, "no mixer control accepted the volume");
        false
    }

    async fn create_player(&self, device_id: Option<&str>) -> Result<Player, PlayerError> {
        self.player_config.validate()?;
        let id = match device_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self
                .enumerator
                .get_device(id)
                .await
                .map(|device| device.id)
                .ok_or_else(|| PlayerError::DeviceNotFound(id.to_string()))?,
            None => self
                .enumerator
                .get_default_device()
                .await
                .map(|device| device.id)
                .unwrap_or_else(|| "default".to_string()),
        };
        tracing::debug!(device = %id, "creating player");
        Ok(Player::new(self.binding.clone(), id, self.player_config.clone()))
    }
}
