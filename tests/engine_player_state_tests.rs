use roomsink::engine::{Player, PlayerConfig, PlayerError, PlayerEvent, PlayerState};
use roomsink::hal::format_converter::decode;
use roomsink::hal::mock::{ConstantSource, MockPcm, PcmCall, SineSource, StarvedSource};
use roomsink::hal::pcm::AccessMode;
use roomsink::hal::{from_fn, AudioFormat, AudioOutputFormat, SampleFormat};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn setup() -> (Arc<MockPcm>, Player) {
    let pcm = Arc::new(MockPcm::new());
    let player = Player::new(pcm.clone(), "hw:0,0", PlayerConfig::default());
    (pcm, player)
}

fn stereo() -> AudioFormat {
    AudioFormat::new(48000, 2)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn wait_for_writes(pcm: &MockPcm, more_than: usize) {
    assert!(
        wait_until(Duration::from_secs(5), || pcm.write_count() > more_than),
        "no writes past {}",
        more_than
    );
}

#[test]
fn test_new_player_is_uninitialized() {
    let (_, player) = setup();
    assert_eq!(player.state(), PlayerState::Uninitialized);
    assert!(matches!(player.play(), Err(PlayerError::NotInitialized)));
    assert!(player.pause().is_err());
    assert_eq!(player.playback_thread_id(), None);
}

#[test]
fn test_initialize_negotiates_defaults() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();

    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(pcm.opened(), vec!["hw:0,0"]);

    let params = pcm.last_params().unwrap();
    assert_eq!(params.format, SampleFormat::S32LE);
    assert_eq!(params.rate_hz, 48000);
    assert_eq!(params.channels, 2);
    assert_eq!(params.latency_us, 50_000);
    assert_eq!(params.access, AccessMode::RwInterleaved);
    assert!(params.allow_resample);

    // 2400 frames at 48 kHz plus the startup fill
    assert_eq!(player.output_latency(), Duration::from_millis(200));
    assert_eq!(player.format(), Some(stereo()));
}

#[test]
fn test_output_latency_uses_granted_buffer() {
    let (pcm, player) = setup();
    pcm.set_buffer_frames(4800);
    player.initialize(stereo(), None).unwrap();
    assert_eq!(player.output_latency(), Duration::from_millis(250));
}

#[test]
fn test_output_latency_uses_granted_rate() {
    let (pcm, player) = setup();
    pcm.grant_rate(Some(44100));
    pcm.set_buffer_frames(4410);
    player.initialize(stereo(), None).unwrap();
    assert_eq!(player.output_latency(), Duration::from_millis(250));
    assert_eq!(player.output_spec().unwrap().sample_rate, 48000);
}

#[test]
fn test_output_latency_falls_back_to_target() {
    let (pcm, player) = setup();
    pcm.fail_buffer_params(Some(roomsink::hal::PcmError::from_code(-22)));
    player.initialize(stereo(), None).unwrap();
    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(player.output_latency(), Duration::from_millis(200));
}

#[test]
fn test_output_override_replaces_rate_and_depth() {
    let (pcm, player) = setup();
    let output = AudioOutputFormat {
        sample_rate: 192_000,
        bit_depth: 24,
        channels: 8,
    };
    player.initialize(stereo(), Some(output)).unwrap();

    let params = pcm.last_params().unwrap();
    assert_eq!(params.rate_hz, 192_000);
    assert_eq!(params.format, SampleFormat::S24LE);
    // Channel count always follows the source
    assert_eq!(params.channels, 2);
    assert_eq!(player.output_spec().unwrap().encoding, SampleFormat::S24LE);
}

#[test]
fn test_unsupported_bit_depth_fails_initialize() {
    let (pcm, player) = setup();
    let events = player.subscribe();
    let output = AudioOutputFormat {
        sample_rate: 48000,
        bit_depth: 12,
        channels: 2,
    };

    let err = player.initialize(stereo(), Some(output)).unwrap_err();
    assert!(matches!(err, PlayerError::InvalidConfig(_)));
    assert_eq!(player.state(), PlayerState::Error);
    assert_eq!(pcm.open_count(), 0);

    let received: Vec<PlayerEvent> = events.try_iter().collect();
    assert_eq!(received[0], PlayerEvent::StateChanged(PlayerState::Error));
    assert!(matches!(received[1], PlayerEvent::ErrorOccurred { .. }));
}

#[test]
fn test_open_failure_surfaces_error() {
    let pcm = Arc::new(MockPcm::new());
    pcm.add_unknown_device("hw:7,0");
    let player = Player::new(pcm.clone(), "hw:7,0", PlayerConfig::default());
    let events = player.subscribe();

    let err = player.initialize(stereo(), None).unwrap_err();
    assert!(matches!(err, PlayerError::Pcm { op: "open", .. }));
    assert!(err.pcm_code().unwrap() < 0);
    assert_eq!(player.state(), PlayerState::Error);

    let errors: Vec<PlayerEvent> = events
        .try_iter()
        .filter(|e| matches!(e, PlayerEvent::ErrorOccurred { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
    if let PlayerEvent::ErrorOccurred { message, cause } = &errors[0] {
        assert!(message.contains("hw:7,0"));
        assert!(cause.is_some());
    }
}

#[test]
fn test_failed_negotiation_closes_handle() {
    let (pcm, player) = setup();
    pcm.fail_set_params(Some(roomsink::hal::PcmError::from_code(-22)));

    assert!(player.initialize(stereo(), None).is_err());
    assert_eq!(pcm.open_count(), 1);
    assert_eq!(pcm.open_handles(), 0);
    assert_eq!(player.state(), PlayerState::Error);

    pcm.fail_set_params(None);
    player.initialize(stereo(), None).unwrap();
    assert_eq!(player.state(), PlayerState::Stopped);
}

#[test]
fn test_play_pause_play_keeps_thread() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();
    player.attach_source(Box::new(SineSource::new(440.0, 48000, 2)));

    player.play().unwrap();
    assert_eq!(player.state(), PlayerState::Playing);
    let thread_id = player.playback_thread_id().expect("playback thread");
    assert_ne!(thread_id, thread::current().id());
    wait_for_writes(&pcm, 0);

    player.pause().unwrap();
    assert_eq!(player.state(), PlayerState::Paused);
    assert_eq!(player.playback_thread_id(), Some(thread_id));

    player.play().unwrap();
    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(player.playback_thread_id(), Some(thread_id));

    let count = pcm.write_count();
    wait_for_writes(&pcm, count);
    assert_eq!(pcm.write_threads(), vec![thread_id]);

    player.stop().unwrap();
}

#[test]
fn test_pause_stops_writing() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();
    player.attach_source(Box::new(ConstantSource::new(0.1)));
    player.play().unwrap();
    wait_for_writes(&pcm, 2);

    player.pause().unwrap();
    // Let an in-flight write finish
    thread::sleep(Duration::from_millis(30));
    let paused_at = pcm.write_count();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(pcm.write_count(), paused_at);

    player.play().unwrap();
    wait_for_writes(&pcm, paused_at);
    player.stop().unwrap();
}

#[test]
fn test_play_is_idempotent() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();
    player.play().unwrap();
    let thread_id = player.playback_thread_id();

    player.play().unwrap();
    assert_eq!(player.playback_thread_id(), thread_id);

    let prepares = pcm.calls().iter().filter(|c| **c == PcmCall::Prepare).count();
    assert_eq!(prepares, 1);
    player.stop().unwrap();
}

#[test]
fn test_stop_is_idempotent() {
    let (pcm, player) = setup();
    player.stop().unwrap();
    player.stop().unwrap();
    assert_eq!(player.state(), PlayerState::Uninitialized);

    player.initialize(stereo(), None).unwrap();
    player.stop().unwrap();
    assert_eq!(player.state(), PlayerState::Stopped);

    player.play().unwrap();
    player.stop().unwrap();
    player.stop().unwrap();
    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(player.playback_thread_id(), None);
    assert!(pcm.calls().contains(&PcmCall::Drop));
    // The device stays open for the next play
    assert_eq!(pcm.open_handles(), 1);
}

#[test]
fn test_stop_unblocks_stuck_write() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();
    player.attach_source(Box::new(ConstantSource::new(0.2)));
    pcm.block_writes(true);
    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(5), || pcm.write_attempts() > 0));

    let start = Instant::now();
    player.stop().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(player.state(), PlayerState::Stopped);

    // Drop is issued while the write is still blocked
    let calls = pcm.calls();
    let drop_at = calls.iter().position(|c| *c == PcmCall::Drop).unwrap();
    let write_at = calls.iter().position(|c| matches!(c, PcmCall::Write { .. })).unwrap();
    assert!(write_at < drop_at);
}

#[test]
fn test_stop_gives_up_on_a_stuck_thread() {
    let pcm = Arc::new(MockPcm::new());
    let config = PlayerConfig {
        stop_join_timeout_ms: 50,
        ..Default::default()
    };
    let player = Player::new(pcm.clone(), "hw:0,0", config);
    player.initialize(stereo(), None).unwrap();

    let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
    let mut first = true;
    player.attach_source(Box::new(from_fn(move |buffer: &mut [f32]| {
        if first {
            first = false;
            let _ = entered_tx.try_send(());
            thread::sleep(Duration::from_millis(500));
        }
        buffer.fill(0.1);
        buffer.len()
    })));

    player.play().unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let start = Instant::now();
    player.stop().unwrap();
    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(player.playback_thread_id(), None);

    // The detached thread exits on its own; the player stays usable
    player.initialize(stereo(), None).unwrap();
    player.play().unwrap();
    let count = pcm.write_count();
    wait_for_writes(&pcm, count);
    player.stop().unwrap();
}

#[test]
fn test_restart_after_stop_uses_new_thread() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();
    player.attach_source(Box::new(ConstantSource::new(0.1)));

    player.play().unwrap();
    let first = player.playback_thread_id().unwrap();
    wait_for_writes(&pcm, 0);
    player.stop().unwrap();

    player.play().unwrap();
    let second = player.playback_thread_id().unwrap();
    assert_ne!(first, second);
    let count = pcm.write_count();
    wait_for_writes(&pcm, count);
    player.stop().unwrap();

    let prepares = pcm.calls().iter().filter(|c| **c == PcmCall::Prepare).count();
    assert_eq!(prepares, 2);
}

#[test]
fn test_state_events_in_order() {
    let (_, player) = setup();
    let events = player.subscribe();

    player.initialize(stereo(), None).unwrap();
    player.play().unwrap();
    player.pause().unwrap();
    player.play().unwrap();
    player.stop().unwrap();

    let states: Vec<PlayerState> = events
        .try_iter()
        .filter_map(|e| match e {
            PlayerEvent::StateChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PlayerState::Stopped,
            PlayerState::Playing,
            PlayerState::Paused,
            PlayerState::Playing,
            PlayerState::Stopped,
        ]
    );
}

#[test]
fn test_volume_and_mute_scale_output() {
    let (pcm, player) = setup();
    let output = AudioOutputFormat {
        sample_rate: 48000,
        bit_depth: 16,
        channels: 2,
    };
    player.initialize(stereo(), Some(output)).unwrap();
    player.attach_source(Box::new(ConstantSource::new(1.0)));

    player.set_volume(0.5);
    player.play().unwrap();
    wait_for_writes(&pcm, 1);
    let samples = decode(&pcm.last_write(), SampleFormat::S16LE);
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| (s - 0.5).abs() < 1e-4));

    player.set_muted(true);
    let count = pcm.write_count();
    wait_for_writes(&pcm, count + 2);
    assert!(decode(&pcm.last_write(), SampleFormat::S16LE).iter().all(|s| *s == 0.0));

    player.set_muted(false);
    let count = pcm.write_count();
    wait_for_writes(&pcm, count + 2);
    let samples = decode(&pcm.last_write(), SampleFormat::S16LE);
    assert!(samples.iter().all(|s| (s - 0.5).abs() < 1e-4), "unmute restores 0.5");

    player.stop().unwrap();
}

#[test]
fn test_volume_is_clamped() {
    let (_, player) = setup();
    assert_eq!(player.volume(), 1.0);

    player.set_volume(3.0);
    assert_eq!(player.volume(), 1.0);
    player.set_volume(-1.0);
    assert_eq!(player.volume(), 0.0);
    player.set_volume(0.5);
    player.set_volume(f32::NAN);
    assert_eq!(player.volume(), 0.5);

    player.set_muted(true);
    assert!(player.is_muted());
    player.set_muted(false);
    assert_eq!(player.volume(), 0.5);
}

#[test]
fn test_starved_source_is_not_an_error() {
    let (pcm, player) = setup();
    let events = player.subscribe();
    player.initialize(stereo(), None).unwrap();
    player.attach_source(Box::new(StarvedSource));
    player.play().unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(pcm.write_attempts(), 0);
    assert_eq!(player.state(), PlayerState::Playing);

    player.attach_source(Box::new(ConstantSource::new(0.1)));
    wait_for_writes(&pcm, 0);
    player.stop().unwrap();

    assert!(!events.try_iter().any(|e| matches!(e, PlayerEvent::ErrorOccurred { .. })));
}

#[test]
fn test_partial_writes_complete_the_quantum() {
    let (pcm, player) = setup();
    pcm.limit_frames_per_write(Some(300));
    player.initialize(stereo(), None).unwrap();
    player.attach_source(Box::new(ConstantSource::new(0.1)));
    player.play().unwrap();
    wait_for_writes(&pcm, 4);
    player.stop().unwrap();

    let frames: Vec<usize> = pcm
        .calls()
        .iter()
        .filter_map(|c| match c {
            PcmCall::Write { frames } => Some(*frames),
            _ => None,
        })
        .take(4)
        .collect();
    assert_eq!(frames, vec![1024, 724, 424, 124]);
}

#[test]
fn test_reinitialize_while_playing() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();
    player.play().unwrap();

    player.initialize(AudioFormat::new(44100, 2), None).unwrap();
    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(player.playback_thread_id(), None);
    assert_eq!(pcm.open_count(), 2);
    assert_eq!(pcm.open_handles(), 1);
    assert_eq!(pcm.last_params().unwrap().rate_hz, 44100);
}

#[test]
fn test_dispose_releases_device() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();
    player.play().unwrap();

    player.dispose();
    player.dispose();
    assert!(player.is_disposed());
    assert_eq!(pcm.open_handles(), 0);
    assert!(matches!(player.play(), Err(PlayerError::Disposed)));
    assert!(matches!(player.initialize(stereo(), None), Err(PlayerError::Disposed)));
}

#[test]
fn test_drop_closes_device() {
    let (pcm, player) = setup();
    player.initialize(stereo(), None).unwrap();
    player.play().unwrap();
    drop(player);
    assert_eq!(pcm.open_handles(), 0);
}
