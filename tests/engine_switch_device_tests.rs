use roomsink::engine::{Player, PlayerConfig, PlayerError, PlayerEvent, PlayerState};
use roomsink::hal::mock::{ConstantSource, MockPcm};
use roomsink::hal::AudioFormat;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn setup() -> (Arc<MockPcm>, Player) {
    let pcm = Arc::new(MockPcm::new());
    pcm.add_unknown_device("hw:9,0");
    let player = Player::new(pcm.clone(), "hw:0,0", PlayerConfig::default());
    player.initialize(AudioFormat::new(48000, 2), None).unwrap();
    player.attach_source(Box::new(ConstantSource::new(0.3)));
    (pcm, player)
}

fn wait_for_writes(pcm: &MockPcm, more_than: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while pcm.write_count() <= more_than {
        assert!(Instant::now() < deadline, "no writes past {}", more_than);
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_switch_while_playing_resumes_on_new_device() {
    let (pcm, player) = setup();
    player.set_volume(0.4);
    player.play().unwrap();
    wait_for_writes(&pcm, 0);
    let old_thread = player.playback_thread_id();

    player.switch_device("hw:1,0").unwrap();

    assert_eq!(player.device_id(), "hw:1,0");
    assert_eq!(player.state(), PlayerState::Playing);
    assert_ne!(player.playback_thread_id(), old_thread);
    assert_eq!(pcm.opened(), vec!["hw:0,0", "hw:1,0"]);
    assert_eq!(pcm.open_handles(), 1);
    assert_eq!(player.volume(), 0.4);
    assert_eq!(player.format(), Some(AudioFormat::new(48000, 2)));

    // Source stays attached across the switch
    let count = pcm.write_count();
    wait_for_writes(&pcm, count);
    player.stop().unwrap();
}

#[test]
fn test_switch_while_paused_stays_paused() {
    let (pcm, player) = setup();
    player.play().unwrap();
    player.pause().unwrap();

    player.switch_device("hw:1,0").unwrap();
    assert_eq!(player.state(), PlayerState::Paused);
    assert_eq!(player.device_id(), "hw:1,0");

    player.play().unwrap();
    wait_for_writes(&pcm, 0);
    player.stop().unwrap();
}

#[test]
fn test_switch_while_stopped_stays_stopped() {
    let (pcm, player) = setup();

    player.switch_device("hw:1,0").unwrap();
    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(player.playback_thread_id(), None);
    assert_eq!(pcm.write_count(), 0);
}

#[test]
fn test_failed_switch_restores_previous_device() {
    let (pcm, player) = setup();
    let events = player.subscribe();
    player.play().unwrap();
    wait_for_writes(&pcm, 0);

    let err = player.switch_device("hw:9,0").unwrap_err();
    assert!(matches!(err, PlayerError::Pcm { op: "open", ref device, .. } if device == "hw:9,0"));

    assert_eq!(player.device_id(), "hw:0,0");
    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(pcm.opened(), vec!["hw:0,0", "hw:0,0"]);
    assert_eq!(pcm.open_handles(), 1);

    let count = pcm.write_count();
    wait_for_writes(&pcm, count);
    player.stop().unwrap();

    let errors = events
        .try_iter()
        .filter(|e| matches!(e, PlayerEvent::ErrorOccurred { .. }))
        .count();
    assert_eq!(errors, 1);
}

#[test]
fn test_failed_switch_while_paused_restores_pause() {
    let (_, player) = setup();
    player.play().unwrap();
    player.pause().unwrap();

    assert!(player.switch_device("hw:9,0").is_err());
    assert_eq!(player.device_id(), "hw:0,0");
    assert_eq!(player.state(), PlayerState::Paused);
}

#[test]
fn test_switch_before_initialize_only_rebinds() {
    let pcm = Arc::new(MockPcm::new());
    let player = Player::new(pcm.clone(), "hw:0,0", PlayerConfig::default());

    player.switch_device("hw:2,0").unwrap();
    assert_eq!(player.device_id(), "hw:2,0");
    assert_eq!(player.state(), PlayerState::Uninitialized);
    assert_eq!(pcm.open_count(), 0);

    player.initialize(AudioFormat::new(44100, 2), None).unwrap();
    assert_eq!(pcm.opened(), vec!["hw:2,0"]);
}
