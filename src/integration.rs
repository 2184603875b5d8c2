//! End-to-end session tests against wat-built cores.

use std::path::Path;

use crate::callbacks::{NullCallbacks, PixelFormat};
use crate::config::{HostConfig, RewindConfig};
use crate::error::{BindingError, OpenError, SerializeError, SessionError};
use crate::savestate;
use crate::session::{Region, SessionController, SessionPhase};
use crate::test_utils::{
    core_bytes, RecordingCallbacks, BIG_STATE_CORE_WAT, BROKEN_SERIALIZE_CORE_WAT,
    COUNTER_CORE_WAT, EMPTY_STATE_CORE_WAT, MINIMAL_CORE_WAT, SIZE_DRIFT_CORE_WAT,
};

fn open_counter_core(config: HostConfig) -> SessionController {
    let controller = SessionController::new(config);
    controller.load_module(&core_bytes(COUNTER_CORE_WAT)).unwrap();
    controller
        .open_file(Path::new("game.bin"), b"content", Box::new(NullCallbacks))
        .unwrap();
    controller
}

/// Counter word of the core's state, observed through a savestate file.
fn counter_word(controller: &SessionController, dir: &Path) -> u32 {
    let path = dir.join("probe.state");
    controller.save_state_to(&path).unwrap();
    let snapshot = savestate::read(&path).unwrap();
    u32::from_le_bytes(snapshot.data()[0..4].try_into().unwrap())
}

// ============================================================================
// Lifecycle and phase machine
// ============================================================================

#[test]
fn phases_walk_the_lifecycle() {
    let controller = SessionController::new(HostConfig::default());
    assert_eq!(controller.phase(), SessionPhase::Unloaded);

    controller.load_module(&core_bytes(COUNTER_CORE_WAT)).unwrap();
    assert_eq!(controller.phase(), SessionPhase::Loaded);

    controller
        .open_file(Path::new("game.bin"), b"content", Box::new(NullCallbacks))
        .unwrap();
    assert_eq!(controller.phase(), SessionPhase::Open);

    controller.run_frame().unwrap();
    assert_eq!(controller.phase(), SessionPhase::Playing);

    controller.close_file().unwrap();
    assert_eq!(controller.phase(), SessionPhase::Loaded);

    controller.deinit();
    assert_eq!(controller.phase(), SessionPhase::Unloaded);
}

#[test]
fn load_module_is_idempotent() {
    let controller = SessionController::new(HostConfig::default());
    let bytes = core_bytes(COUNTER_CORE_WAT);
    controller.load_module(&bytes).unwrap();
    controller.load_module(&bytes).unwrap();
    assert_eq!(controller.phase(), SessionPhase::Loaded);
}

#[test]
fn deinit_is_safe_from_any_phase() {
    let controller = SessionController::new(HostConfig::default());
    controller.deinit();
    controller.deinit();
    assert_eq!(controller.phase(), SessionPhase::Unloaded);

    let controller = open_counter_core(HostConfig::default());
    controller.run_frame().unwrap();
    controller.deinit();
    controller.deinit();
    assert_eq!(controller.phase(), SessionPhase::Unloaded);
}

#[test]
fn close_and_reopen_works() {
    let controller = open_counter_core(HostConfig::default());
    controller.run_frame().unwrap();
    controller.close_file().unwrap();

    controller
        .open_file(Path::new("other.bin"), b"more content", Box::new(NullCallbacks))
        .unwrap();
    assert_eq!(controller.phase(), SessionPhase::Open);
    assert_eq!(controller.available_frames(), 0);
}

#[test]
fn second_open_fails_and_leaves_the_first_session_intact() {
    let controller = open_counter_core(HostConfig::default());
    controller.run_frame().unwrap();
    controller.run_frame().unwrap();

    let err = controller
        .open_file(Path::new("second.bin"), b"content", Box::new(NullCallbacks))
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::State(_)));

    let session = controller.session().unwrap();
    assert_eq!(session.content_path, Path::new("game.bin"));
    assert_eq!(controller.available_frames(), 2);
}

#[test]
fn operations_out_of_phase_are_state_errors() {
    let controller = SessionController::new(HostConfig::default());
    assert!(matches!(
        controller.run_frame(),
        Err(SessionError::State(e)) if e.phase == SessionPhase::Unloaded
    ));

    controller.load_module(&core_bytes(COUNTER_CORE_WAT)).unwrap();
    assert!(matches!(
        controller.run_frame(),
        Err(SessionError::State(e)) if e.phase == SessionPhase::Loaded
    ));
    assert!(matches!(
        controller.close_file(),
        Err(SessionError::State(_))
    ));
    assert!(matches!(
        controller.rewind_frames(1),
        Err(SessionError::State(_))
    ));
}

#[test]
fn session_reports_core_declared_timing() {
    let controller = open_counter_core(HostConfig::default());
    let session = controller.session().unwrap();
    assert!((session.frame_rate - 59.94).abs() < 1e-9);
    assert!((session.sample_rate - 32040.5).abs() < 1e-9);
    assert_eq!(session.region, Region::Pal);
    assert_eq!(session.pixel_format, PixelFormat::Rgb565);
    assert!(!session.is_playing());

    controller.run_frame().unwrap();
    assert!(controller.session().unwrap().is_playing());
}

#[test]
fn timing_defaults_apply_when_the_core_is_silent() {
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(MINIMAL_CORE_WAT)).unwrap();
    controller
        .open_file(Path::new("m.bin"), b"x", Box::new(NullCallbacks))
        .unwrap();

    let session = controller.session().unwrap();
    assert!((session.frame_rate - 60.0).abs() < 1e-9);
    assert!((session.sample_rate - 44_100.0).abs() < 1e-9);
    assert_eq!(session.region, Region::Ntsc);
    assert_eq!(session.pixel_format, PixelFormat::Xrgb1555);
}

// ============================================================================
// Load and open failures
// ============================================================================

#[test]
fn garbage_bytes_are_not_a_module() {
    let controller = SessionController::new(HostConfig::default());
    let err = controller.load_module(b"not wasm at all").err().unwrap();
    assert!(matches!(
        err,
        SessionError::Binding(BindingError::InvalidModule(_))
    ));
    assert_eq!(controller.phase(), SessionPhase::Unloaded);
}

#[test]
fn missing_required_export_fails_the_load() {
    let wat = r#"
        (module
            (memory (export "memory") 1)
            (func (export "init"))
            (func (export "deinit"))
            (func (export "load_content") (param i32 i32) (result i32) (i32.const 1))
            (func (export "unload_content"))
            (func (export "reset"))
        )
    "#;
    let controller = SessionController::new(HostConfig::default());
    let err = controller.load_module(&core_bytes(wat)).err().unwrap();
    assert!(matches!(
        err,
        SessionError::Binding(BindingError::MissingExport("run_frame"))
    ));
    assert_eq!(controller.phase(), SessionPhase::Unloaded);
}

#[test]
fn rejected_content_keeps_the_core_loaded() {
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(COUNTER_CORE_WAT)).unwrap();

    // The counter core rejects zero-length content.
    let err = controller
        .open_file(Path::new("empty.bin"), b"", Box::new(NullCallbacks))
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Open(OpenError::Rejected)));
    assert_eq!(controller.phase(), SessionPhase::Loaded);

    controller
        .open_file(Path::new("ok.bin"), b"content", Box::new(NullCallbacks))
        .unwrap();
    assert_eq!(controller.phase(), SessionPhase::Open);
}

// ============================================================================
// Frame stepping and rewind
// ============================================================================

#[test]
fn rewind_steps_back_through_played_frames() {
    let dir = tempfile::tempdir().unwrap();
    let controller = open_counter_core(HostConfig::default());

    for _ in 0..5 {
        controller.run_frame().unwrap();
    }
    assert_eq!(controller.available_frames(), 5);
    assert_eq!(counter_word(&controller, dir.path()), 5);

    assert_eq!(controller.rewind_frames(3).unwrap(), 3);
    assert_eq!(controller.available_frames(), 2);
    assert_eq!(counter_word(&controller, dir.path()), 2);
}

#[test]
fn rewind_to_the_start_restores_the_initial_state() {
    let dir = tempfile::tempdir().unwrap();
    let controller = open_counter_core(HostConfig::default());

    for _ in 0..4 {
        controller.run_frame().unwrap();
    }
    assert_eq!(controller.rewind_frames(4).unwrap(), 4);
    assert_eq!(counter_word(&controller, dir.path()), 0);
    assert_eq!(controller.available_frames(), 0);
}

#[test]
fn rewind_saturates_at_available_history() {
    let controller = open_counter_core(HostConfig::default());
    for _ in 0..3 {
        controller.run_frame().unwrap();
    }

    assert_eq!(controller.rewind_frames(10).unwrap(), 3);
    assert_eq!(controller.available_frames(), 0);
    assert_eq!(controller.rewind_frames(1).unwrap(), 0);
}

#[test]
fn history_is_capped_by_max_frames() {
    let config = HostConfig {
        rewind: RewindConfig {
            enabled: true,
            max_frames: 2,
        },
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let controller = open_counter_core(config);

    assert_eq!(controller.max_frames(), 2);
    for _ in 0..10 {
        controller.run_frame().unwrap();
    }
    assert_eq!(controller.available_frames(), 2);

    // Full rewind only reaches two frames back.
    assert_eq!(controller.rewind_frames(10).unwrap(), 2);
    assert_eq!(counter_word(&controller, dir.path()), 8);
}

#[test]
fn playing_resumes_after_a_rewind() {
    let dir = tempfile::tempdir().unwrap();
    let controller = open_counter_core(HostConfig::default());

    for _ in 0..5 {
        controller.run_frame().unwrap();
    }
    controller.rewind_frames(2).unwrap();
    controller.run_frame().unwrap();
    assert_eq!(counter_word(&controller, dir.path()), 4);
    assert_eq!(controller.available_frames(), 4);
}

#[test]
fn disabled_rewind_records_nothing() {
    let config = HostConfig {
        rewind: RewindConfig {
            enabled: false,
            max_frames: 600,
        },
        ..Default::default()
    };
    let controller = open_counter_core(config);

    for _ in 0..4 {
        controller.run_frame().unwrap();
    }
    assert_eq!(controller.available_frames(), 0);
    assert_eq!(controller.rewind_frames(2).unwrap(), 0);
}

#[test]
fn reset_restarts_history_from_the_reset_state() {
    let dir = tempfile::tempdir().unwrap();
    let controller = open_counter_core(HostConfig::default());

    for _ in 0..6 {
        controller.run_frame().unwrap();
    }
    controller.reset().unwrap();
    assert_eq!(controller.available_frames(), 0);
    assert_eq!(counter_word(&controller, dir.path()), 0);

    controller.run_frame().unwrap();
    assert_eq!(controller.rewind_frames(1).unwrap(), 1);
    assert_eq!(counter_word(&controller, dir.path()), 0);
}

#[test]
fn input_polls_feed_back_into_the_state() {
    let dir = tempfile::tempdir().unwrap();
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(COUNTER_CORE_WAT)).unwrap();

    let callbacks = RecordingCallbacks::with_input_value(3);
    let recording = callbacks.handle();
    controller
        .open_file(Path::new("game.bin"), b"content", Box::new(callbacks))
        .unwrap();

    // Each frame adds 1 + the polled button value.
    controller.run_frame().unwrap();
    controller.run_frame().unwrap();
    assert_eq!(counter_word(&controller, dir.path()), 8);

    let rec = recording.lock().unwrap();
    assert_eq!(rec.input_polls.len(), 2);
    assert_eq!(rec.input_polls[0], (0, 1, 0, 0));
}

#[test]
fn an_input_table_can_back_the_poll_callback() {
    struct TableCallbacks {
        table: crate::input::InputTable,
    }

    impl crate::callbacks::FrameCallbacks for TableCallbacks {
        fn video_frame(&mut self, _data: &[u8], _w: u32, _h: u32, _pitch: usize) {}
        fn audio_sample(&mut self, _l: i16, _r: i16) {}
        fn audio_sample_batch(&mut self, samples: &[i16]) -> usize {
            samples.len() / 2
        }
        fn input_state(&mut self, port: u32, device: u32, index: u32, id: u32) -> i16 {
            self.table.state(port, device, index, id)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(COUNTER_CORE_WAT)).unwrap();

    let mut table = crate::input::InputTable::new();
    table.set_button(0, 0, true);
    controller
        .open_file(
            Path::new("game.bin"),
            b"content",
            Box::new(TableCallbacks { table }),
        )
        .unwrap();

    // Held button adds 1 on top of the per-frame increment.
    for _ in 0..3 {
        controller.run_frame().unwrap();
    }
    assert_eq!(counter_word(&controller, dir.path()), 6);
}

#[test]
fn frame_callbacks_deliver_video_and_audio() {
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(COUNTER_CORE_WAT)).unwrap();

    let callbacks = RecordingCallbacks::new();
    let recording = callbacks.handle();
    controller
        .open_file(Path::new("game.bin"), b"content", Box::new(callbacks))
        .unwrap();

    controller.run_frame().unwrap();
    controller.run_frame().unwrap();

    let rec = recording.lock().unwrap();
    assert_eq!(rec.video_frames.len(), 2);
    assert_eq!(rec.video_frames[0], (2, 2, 4, 8));
    assert_eq!(rec.audio_samples, vec![(100, -100), (100, -100)]);
    // Two stereo frames per batch, two batches.
    assert_eq!(rec.batched_samples, 8);
}

#[test]
fn keyboard_events_reach_the_core() {
    let dir = tempfile::tempdir().unwrap();
    let controller = open_counter_core(HostConfig::default());

    controller.send_keyboard_event(true, 42, 0).unwrap();
    let path = dir.path().join("kb.state");
    controller.save_state_to(&path).unwrap();
    let snapshot = savestate::read(&path).unwrap();
    let scratch = u32::from_le_bytes(snapshot.data()[8..12].try_into().unwrap());
    assert_eq!(scratch, 42);
}

#[test]
fn set_device_tolerates_absent_export_and_bad_ports() {
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(MINIMAL_CORE_WAT)).unwrap();
    controller
        .open_file(Path::new("m.bin"), b"x", Box::new(NullCallbacks))
        .unwrap();

    controller.set_device(0, crate::input::DEVICE_JOYPAD).unwrap();
    controller.set_device(200, crate::input::DEVICE_JOYPAD).unwrap();
}

// ============================================================================
// Serialization edge cases
// ============================================================================

#[test]
fn core_without_serialization_plays_without_history() {
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(MINIMAL_CORE_WAT)).unwrap();
    controller
        .open_file(Path::new("m.bin"), b"x", Box::new(NullCallbacks))
        .unwrap();

    for _ in 0..3 {
        controller.run_frame().unwrap();
    }
    assert_eq!(controller.available_frames(), 0);
    assert_eq!(controller.rewind_frames(2).unwrap(), 0);

    let dir = tempfile::tempdir().unwrap();
    let err = controller
        .save_state_to(&dir.path().join("x.state"))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SessionError::Serialize(SerializeError::Unsupported)
    ));
}

#[test]
fn zero_size_state_records_empty_history() {
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(EMPTY_STATE_CORE_WAT)).unwrap();
    controller
        .open_file(Path::new("e.bin"), b"x", Box::new(NullCallbacks))
        .unwrap();

    for _ in 0..4 {
        controller.run_frame().unwrap();
    }
    assert_eq!(controller.available_frames(), 4);
    assert_eq!(controller.rewind_frames(2).unwrap(), 2);
}

#[test]
fn failing_serialize_disables_rewind_but_not_playback() {
    let controller = SessionController::new(HostConfig::default());
    controller
        .load_module(&core_bytes(BROKEN_SERIALIZE_CORE_WAT))
        .unwrap();
    controller
        .open_file(Path::new("b.bin"), b"x", Box::new(NullCallbacks))
        .unwrap();

    for _ in 0..3 {
        controller.run_frame().unwrap();
    }
    assert_eq!(controller.available_frames(), 0);
}

#[test]
fn drifting_state_size_is_a_serialize_error() {
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(SIZE_DRIFT_CORE_WAT)).unwrap();
    controller
        .open_file(Path::new("d.bin"), b"x", Box::new(NullCallbacks))
        .unwrap();

    // Frames still run; only snapshots are off the table.
    controller.run_frame().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let err = controller
        .save_state_to(&dir.path().join("d.state"))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SessionError::Serialize(SerializeError::SizeChanged { .. })
    ));
}

#[test]
fn large_states_grow_the_transfer_window() {
    let controller = SessionController::new(HostConfig::default());
    controller.load_module(&core_bytes(BIG_STATE_CORE_WAT)).unwrap();
    controller
        .open_file(Path::new("big.bin"), b"x", Box::new(NullCallbacks))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.state");
    controller.save_state_to(&path).unwrap();

    let snapshot = savestate::read(&path).unwrap();
    assert_eq!(snapshot.len(), 131072);
    assert!(snapshot.data().iter().all(|&b| b == 0x5A));
}

// ============================================================================
// Savestate files
// ============================================================================

#[test]
fn savestates_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let controller = open_counter_core(HostConfig::default());

    for _ in 0..3 {
        controller.run_frame().unwrap();
    }
    let slot = dir.path().join("slot1.state");
    controller.save_state_to(&slot).unwrap();

    controller.run_frame().unwrap();
    controller.run_frame().unwrap();
    assert_eq!(counter_word(&controller, dir.path()), 5);

    controller.load_state_from(&slot).unwrap();
    assert_eq!(counter_word(&controller, dir.path()), 3);
    // History restarts at the restored state.
    assert_eq!(controller.available_frames(), 0);
}

#[test]
fn loading_a_state_from_another_core_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let controller = open_counter_core(HostConfig::default());

    // A valid file whose payload length does not match this core.
    let alien = dir.path().join("alien.state");
    savestate::write(&alien, &crate::snapshot::StateSnapshot::zeroed(64)).unwrap();

    let err = controller.load_state_from(&alien).err().unwrap();
    assert!(matches!(
        err,
        SessionError::Serialize(SerializeError::LengthMismatch { .. })
    ));
}
