use roomsink::engine::{PlayerConfig, PlayerError, PlayerState};
use roomsink::hal::mock::{MockPcm, ScriptedToolRunner};
use roomsink::hal::{AlsaBackend, AudioBackend, ToolConfig};
use std::sync::Arc;

const LISTING: &str = "\
default
    Default ALSA Output
hw:CARD=Device,DEV=0
    USB Audio Device, USB Audio
    Direct hardware device without any conversions
plughw:CARD=Device,DEV=0
    USB Audio Device, USB Audio
    Hardware device with all software conversions
zone_kitchen
    Kitchen zone
";

const CARD_TABLE: &str = "\
card 1: Device [USB Audio Device], device 0: USB Audio [USB Audio]
";

fn backend(tools: ScriptedToolRunner) -> (Arc<ScriptedToolRunner>, AlsaBackend) {
    let tools = Arc::new(tools);
    let backend = AlsaBackend::new(
        Arc::new(MockPcm::new()),
        tools.clone(),
        ToolConfig::default(),
        PlayerConfig::default(),
    );
    (tools, backend)
}

fn listed() -> ScriptedToolRunner {
    ScriptedToolRunner::new()
        .with_output("aplay -L", LISTING)
        .with_output("aplay -l", CARD_TABLE)
}

fn amixer_calls(tools: &ScriptedToolRunner) -> Vec<String> {
    tools
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("amixer"))
        .collect()
}

#[tokio::test]
async fn test_software_devices_have_no_hardware_volume() {
    let (tools, backend) = backend(listed().with_output("amixer -c 0 sset Master 50%", ""));

    assert!(!backend.set_hardware_volume("default", 50).await);
    assert!(!backend.set_hardware_volume("zone_kitchen", 50).await);
    assert!(!backend.set_hardware_volume("sysdefault:CARD=Device", 50).await);
    assert!(amixer_calls(&tools).is_empty());
}

#[tokio::test]
async fn test_volume_controls_tried_in_order() {
    let (tools, backend) = backend(listed().with_output("amixer -c 1 sset PCM 40%", ""));

    assert!(backend.set_hardware_volume("hw:1,0", 40).await);
    assert_eq!(
        amixer_calls(&tools),
        vec!["amixer -c 1 sset Master 40%", "amixer -c 1 sset PCM 40%"]
    );
}

#[tokio::test]
async fn test_named_card_resolved_through_listing() {
    let (tools, backend) = backend(listed().with_output("amixer -c 1 sset Master 75%", ""));

    assert!(backend.set_hardware_volume("plughw:CARD=Device,DEV=0", 75).await);
    assert!(tools.calls().contains(&"aplay -l".to_string()));
}

#[tokio::test]
async fn test_no_control_accepts_volume() {
    let (tools, backend) = backend(listed());

    assert!(!backend.set_hardware_volume("hw:1,0", 30).await);
    assert_eq!(
        amixer_calls(&tools),
        vec![
            "amixer -c 1 sset Master 30%",
            "amixer -c 1 sset PCM 30%",
            "amixer -c 1 sset Speaker 30%",
            "amixer -c 1 sset Headphone 30%",
        ]
    );
}

#[tokio::test]
async fn test_unknown_card_name_is_not_an_error() {
    let (tools, backend) = backend(listed());

    assert!(!backend.set_hardware_volume("hw:CARD=Missing,DEV=0", 30).await);
    assert!(amixer_calls(&tools).is_empty());
}

#[tokio::test]
async fn test_volume_percent_is_clamped() {
    let (tools, backend) = backend(listed().with_output("amixer -c 2 sset Master 100%", ""));

    assert!(backend.set_hardware_volume("hw:2", 150).await);
    assert_eq!(amixer_calls(&tools), vec!["amixer -c 2 sset Master 100%"]);
}

#[tokio::test]
async fn test_read_hardware_volume_and_controls() {
    let (_, backend) = backend(
        listed()
            .with_output(
                "amixer -c 1 sget Master",
                "Simple mixer control 'Master',0\n  Mono: Playback 20 [63%] [-11.00dB] [on]\n",
            )
            .with_output(
                "amixer -c 1 scontrols",
                "Simple mixer control 'Master',0\nSimple mixer control 'PCM',0\n",
            ),
    );

    assert_eq!(backend.hardware_volume("hw:1,0").await, Some(63));
    assert_eq!(backend.mixer_controls("hw:1,0").await, vec!["Master", "PCM"]);
    assert_eq!(backend.hardware_volume("default").await, None);
    assert!(backend.mixer_controls("zone_kitchen").await.is_empty());
}

#[tokio::test]
async fn test_queries_delegate_to_enumerator() {
    let (_, backend) = backend(listed());

    assert_eq!(backend.backend_id(), "alsa");
    assert_eq!(backend.output_devices().await.len(), 4);
    assert_eq!(backend.default_device().await.unwrap().id, "default");
    assert_eq!(backend.device("kitchen").await.unwrap().id, "zone_kitchen");
    assert!(backend.validate_device(Some("nonexistent-id-xyz")).await.is_err());
    assert!(backend.validate_device(None).await.is_ok());
}

#[tokio::test]
async fn test_create_player() {
    let (_, backend) = backend(listed());

    let player = backend.create_player(Some("hw:CARD=Device,DEV=0")).await.unwrap();
    assert_eq!(player.device_id(), "hw:CARD=Device,DEV=0");
    assert_eq!(player.state(), PlayerState::Uninitialized);

    let player = backend.create_player(Some("kitchen")).await.unwrap();
    assert_eq!(player.device_id(), "zone_kitchen");

    let player = backend.create_player(None).await.unwrap();
    assert_eq!(player.device_id(), "default");

    let err = backend.create_player(Some("nonexistent-id-xyz")).await.err().unwrap();
    assert!(matches!(err, PlayerError::DeviceNotFound(id) if id == "nonexistent-id-xyz"));
}

#[tokio::test]
async fn test_create_player_without_listing_uses_default() {
    let (_, backend) = backend(ScriptedToolRunner::new());

    let player = backend.create_player(Some("")).await.unwrap();
    assert_eq!(player.device_id(), "default");
}
