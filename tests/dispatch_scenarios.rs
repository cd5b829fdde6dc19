//! End-to-end dispatcher behavior: producer, blocking readers, housekeeping
//! worker and listener events together.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tokio_test::{assert_err, assert_ok};

use media_dispatch::dispatch::ReceiverOptions;
use media_dispatch::{
    BufferDispatcher, BufferReceiver, CodecId, DispatchError, DispatcherConfig, DispatcherEvent,
    Error, MediaData, MediaType, ReceiverEvent,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("media_dispatch=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

fn video(pts: u64, key: bool) -> MediaData {
    MediaData::video(pts, Bytes::from(vec![if key { 0x65 } else { 0x41 }; 32]), key)
}

fn audio(pts: u64) -> MediaData {
    MediaData::audio(pts, Bytes::from_static(&[0xFF, 0xF1, 0x50, 0x80]))
}

fn drain(receiver: &BufferReceiver, media_type: MediaType) -> Vec<MediaData> {
    let mut frames = Vec::new();
    while assert_ok!(receiver.try_read(media_type, |frame| frames.push(frame.clone()))) {}
    frames
}

#[test]
fn scenario_a_video_waits_for_first_keyframe() {
    init_tracing();
    let config = DispatcherConfig::default()
        .base_capacity(100)
        .capacity_increment(20);
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(config));
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    assert_ok!(dispatcher.attach_receiver(&receiver));

    for pts in 0..5 {
        assert_ok!(dispatcher.input_data(video(pts, false)));
    }
    assert!(dispatcher.is_empty());

    assert_ok!(dispatcher.input_data(video(5, true)));
    assert_ok!(dispatcher.input_data(video(6, false)));
    assert_ok!(dispatcher.input_data(video(7, false)));

    let stats = dispatcher.stats();
    assert_eq!(stats.counters.frames_dropped_waiting_key, 5);
    assert_eq!(stats.counters.frames_written, 3);
    assert!(!stats.waiting_key);

    let pts: Vec<u64> = drain(&receiver, MediaType::Av).iter().map(|f| f.pts).collect();
    assert_eq!(pts, vec![5, 6, 7]);
}

#[test]
fn scenario_b_late_joiner_starts_on_latest_keyframe() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (early, _early_events) = BufferReceiver::new(ReceiverOptions::default());
    let early_id = assert_ok!(dispatcher.attach_receiver(&early));

    // Three GOPs of ten frames: keyframes at 0, 10 and 20
    for i in 0..30 {
        assert_ok!(dispatcher.input_data(video(i, i % 10 == 0)));
    }

    let (late, _late_events) = BufferReceiver::new(ReceiverOptions::default());
    let late_id = assert_ok!(dispatcher.attach_receiver(&late));

    assert_eq!(dispatcher.receiver_stats(early_id).unwrap().cursor, 0);
    let late_stats = dispatcher.receiver_stats(late_id).unwrap();
    assert_eq!(late_stats.cursor, 20);
    assert_eq!(late_stats.owed, 10);

    let frames = drain(&late, MediaType::Av);
    assert_eq!(frames.len(), 10);
    assert!(frames[0].key_frame);
    assert_eq!(frames[0].pts, 20);
    assert_eq!(drain(&early, MediaType::Av).len(), 30);
}

#[test]
fn scenario_c_stalled_receiver_raises_write_timeout_once() {
    init_tracing();
    let config = DispatcherConfig::default()
        .base_capacity(10)
        .max_capacity(20)
        .capacity_increment(5)
        .write_timeout(Duration::from_millis(30));
    let (dispatcher, mut events) = assert_ok!(BufferDispatcher::new(config));
    let (stalled, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    let id = assert_ok!(dispatcher.attach_receiver(&stalled));

    for i in 0..30 {
        assert_ok!(dispatcher.input_data(video(i, i % 5 == 0)));
    }
    assert_eq!(dispatcher.capacity(), 20);
    assert!(dispatcher.len() <= 20);

    thread::sleep(Duration::from_millis(50));
    for i in 30..45 {
        assert_ok!(dispatcher.input_data(video(i, i % 5 == 0)));
    }

    let mut timeouts = Vec::new();
    while let Ok(event) = events.try_recv() {
        timeouts.push(event);
    }
    assert_eq!(timeouts.len(), 1);
    let DispatcherEvent::WriteTimeout { stalled_for } = &timeouts[0];
    assert!(*stalled_for >= Duration::from_millis(30));

    let stats = dispatcher.stats();
    assert!(stats.counters.gops_erased > 0);
    assert!(stats.counters.owed_slots_dropped > 0);
    assert_eq!(stats.counters.write_timeouts, 1);

    // Whole GOPs were dropped: the receiver resumes on a keyframe
    let receiver_stats = dispatcher.receiver_stats(id).unwrap();
    assert!(receiver_stats.cursor >= dispatcher.head_index());
    assert!(receiver_stats.released > 0);
    let mut first = None;
    assert!(assert_ok!(stalled.try_read(MediaType::Av, |f| first = Some(f.clone()))));
    assert!(first.unwrap().key_frame);
}

#[test]
fn indices_increase_and_frames_are_delivered_once() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (fast, _fast_events) = BufferReceiver::new(ReceiverOptions::default());
    let (slow, _slow_events) = BufferReceiver::new(ReceiverOptions::default());
    assert_ok!(dispatcher.attach_receiver(&fast));
    assert_ok!(dispatcher.attach_receiver(&slow));

    let mut fast_seen = Vec::new();
    let mut slow_seen = Vec::new();
    for i in 0..60u64 {
        let frame = if i % 3 == 2 { audio(i) } else { video(i, i % 15 == 0) };
        assert_ok!(dispatcher.input_data(frame));

        let indices = dispatcher.buffered_indices();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));

        assert_ok!(fast.try_read(MediaType::Av, |f| fast_seen.push(f.pts)));
        if i % 4 == 0 {
            assert_ok!(slow.try_read(MediaType::Av, |f| slow_seen.push(f.pts)));
        }
    }
    slow_seen.extend(drain(&slow, MediaType::Av).iter().map(|f| f.pts));

    let expected: Vec<u64> = (0..60).collect();
    assert_eq!(fast_seen, expected);
    assert_eq!(slow_seen, expected);
    assert_eq!(slow_seen.iter().collect::<HashSet<_>>().len(), slow_seen.len());
}

#[test]
fn capacity_stays_within_bounds() {
    init_tracing();
    let config = DispatcherConfig::default()
        .base_capacity(10)
        .max_capacity(30)
        .capacity_increment(7)
        .housekeeping_interval(Duration::from_millis(5));
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(config));
    let receivers: Vec<BufferReceiver> = (0..3)
        .map(|_| BufferReceiver::new(ReceiverOptions::default()).0)
        .collect();
    for receiver in &receivers {
        assert_ok!(dispatcher.attach_receiver(receiver));
    }

    let mut peak = 0;
    for i in 0..500u64 {
        assert_ok!(dispatcher.input_data(video(i, i % 12 == 0)));
        assert_ok!(receivers[0].try_read(MediaType::Av, |_| {}));
        if i % 5 == 0 {
            assert_ok!(receivers[1].try_read(MediaType::Av, |_| {}));
        }

        let stats = dispatcher.stats();
        assert!(stats.capacity >= 10 && stats.capacity <= 30);
        assert!(stats.buffered <= stats.capacity);
        peak = peak.max(stats.capacity);
    }
    assert!(peak > 10);

    // Everyone catches up: housekeeping reclaims old GOPs and shrinks back
    for receiver in &receivers {
        drain(receiver, MediaType::Av);
    }
    thread::sleep(Duration::from_millis(200));

    let stats = dispatcher.stats();
    assert!(stats.counters.capacity_grown > 0);
    assert!(stats.counters.capacity_shrunk > 0);
    assert_eq!(stats.capacity, 10);
    assert!(stats.buffered <= stats.capacity);
}

#[test]
fn stalled_receiver_beside_a_draining_one_keeps_its_data_until_max() {
    init_tracing();
    let config = DispatcherConfig::default()
        .base_capacity(10)
        .max_capacity(20)
        .capacity_increment(5)
        .write_timeout(Duration::from_millis(10));
    let (dispatcher, mut events) = assert_ok!(BufferDispatcher::new(config));
    let (fast, _fast_events) = BufferReceiver::new(ReceiverOptions::default());
    let (slow, _slow_events) = BufferReceiver::new(ReceiverOptions::default());
    assert_ok!(dispatcher.attach_receiver(&fast));
    assert_ok!(dispatcher.attach_receiver(&slow));

    let mut fast_seen = 0;
    for i in 0..200u64 {
        if i == 100 {
            thread::sleep(Duration::from_millis(30));
        }
        assert_ok!(dispatcher.input_data(video(i, i % 5 == 0)));
        if assert_ok!(fast.try_read(MediaType::Av, |_| {})) {
            fast_seen += 1;
        }

        if i == 19 {
            // Grown to the maximum without losing anything the slow one owes
            let stats = dispatcher.stats();
            assert_eq!(stats.capacity, 20);
            assert_eq!(stats.buffered, 20);
            assert_eq!(stats.counters.owed_slots_dropped, 0);
        }
    }
    assert_eq!(fast_seen, 200);

    let mut timeouts = Vec::new();
    while let Ok(event) = events.try_recv() {
        timeouts.push(event);
    }
    assert_eq!(timeouts.len(), 1);

    let stats = dispatcher.stats();
    assert_eq!(stats.capacity, 20);
    assert!(stats.counters.owed_slots_dropped > 0);
    assert_eq!(stats.counters.write_timeouts, 1);

    let mut first = None;
    assert!(assert_ok!(slow.try_read(MediaType::Av, |f| first = Some(f.clone()))));
    assert!(first.unwrap().key_frame);
}

#[test]
fn key_mode_receiver_gets_only_keyframes_and_all_audio() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (keyed, _keyed_events) = BufferReceiver::new(ReceiverOptions::default().key_mode(true));
    assert_ok!(dispatcher.attach_receiver(&keyed));

    let mut audio_written = 0;
    for i in 0..40u64 {
        if i % 2 == 1 {
            assert_ok!(dispatcher.input_data(audio(i)));
            audio_written += 1;
        } else {
            assert_ok!(dispatcher.input_data(video(i, i % 8 == 0)));
        }
    }

    let frames = drain(&keyed, MediaType::Av);
    let videos: Vec<&MediaData> = frames.iter().filter(|f| f.media_type == MediaType::Video).collect();
    assert_eq!(videos.len(), 5);
    assert!(videos.iter().all(|f| f.key_frame));
    assert_eq!(frames.iter().filter(|f| f.media_type == MediaType::Audio).count(), audio_written);
}

#[test]
fn requested_buffer_round_trips_unchanged() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    let id = assert_ok!(dispatcher.attach_receiver(&receiver));

    assert!(dispatcher.request_data_buffer(MediaType::Video, 0).is_none());

    let payload = [0u8, 0, 0, 1, 0x65, 0x88, 0x84, 0x21];
    let mut buffer = dispatcher.request_data_buffer(MediaType::Video, payload.len()).unwrap();
    assert!(buffer.capacity() >= payload.len());
    buffer.extend_from_slice(&payload);

    let frame = MediaData::from_buffer(MediaType::Video, CodecId::H264, 90_000, buffer).with_key_frame(true);
    assert_ok!(dispatcher.input_data(frame));

    let mut delivered = None;
    assert!(assert_ok!(dispatcher.read_buffer_data(id, MediaType::Video, |f| delivered = Some(f.clone()))));
    let delivered = delivered.unwrap();
    assert_eq!(delivered.data.as_ref(), &payload);
    assert_eq!(delivered.pts, 90_000);
    assert_eq!(delivered.codec_id, CodecId::H264);

    // Nothing new: non-blocking read reports no data
    assert!(!assert_ok!(dispatcher.read_buffer_data(id, MediaType::Video, |_| {})));
}

#[test]
fn blocked_read_wakes_on_write() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let dispatcher = Arc::new(dispatcher);
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::only(MediaType::Audio));
    assert_ok!(dispatcher.attach_receiver(&receiver));

    let reader = {
        let receiver = receiver.clone();
        thread::spawn(move || {
            let mut pts = None;
            let result = receiver.request_read(MediaType::Audio, |f| pts = Some(f.pts));
            result.map(|_| pts)
        })
    };

    thread::sleep(Duration::from_millis(20));
    // Video is not for this receiver and must not complete the read
    assert_ok!(dispatcher.input_data(video(1, true)));
    thread::sleep(Duration::from_millis(20));
    assert!(!reader.is_finished());

    assert_ok!(dispatcher.input_data(audio(2)));
    let result = reader.join().unwrap();
    assert_eq!(assert_ok!(result), Some(2));
}

#[test]
fn detach_cancels_blocked_read() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    let id = assert_ok!(dispatcher.attach_receiver(&receiver));

    let reader = {
        let receiver = receiver.clone();
        thread::spawn(move || receiver.request_read(MediaType::Av, |_| {}))
    };
    thread::sleep(Duration::from_millis(20));
    assert!(dispatcher.receiver_stats(id).unwrap().blocked);

    assert_ok!(dispatcher.detach_receiver(&receiver));
    let result = reader.join().unwrap();
    assert!(matches!(
        result,
        Err(Error::Dispatch(DispatchError::ReceiverNotFound(_)))
    ));

    assert!(!receiver.is_attached());
    assert_eq!(dispatcher.receiver_count(), 0);
    assert_err!(dispatcher.detach_receiver(&receiver));
}

#[test]
fn read_stop_and_start() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    assert_ok!(dispatcher.attach_receiver(&receiver));

    let reader = {
        let receiver = receiver.clone();
        thread::spawn(move || receiver.request_read(MediaType::Av, |_| {}))
    };
    thread::sleep(Duration::from_millis(20));
    assert_ok!(receiver.notify_read_stop());

    let result = reader.join().unwrap();
    assert!(matches!(result, Err(Error::Dispatch(DispatchError::ReadStopped))));

    assert_ok!(dispatcher.input_data(audio(0)));
    assert_ok!(receiver.notify_read_start());
    let mut pts = None;
    assert_ok!(receiver.request_read(MediaType::Av, |f| pts = Some(f.pts)));
    assert_eq!(pts, Some(0));
}

#[test]
fn stop_dispatch_releases_everyone() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    assert_ok!(dispatcher.attach_receiver(&receiver));

    let reader = {
        let receiver = receiver.clone();
        thread::spawn(move || receiver.request_read(MediaType::Av, |_| {}))
    };
    thread::sleep(Duration::from_millis(20));

    dispatcher.stop_dispatch();
    assert!(!dispatcher.is_running());
    let result = reader.join().unwrap();
    assert!(matches!(result, Err(Error::Dispatch(DispatchError::Stopped))));

    assert!(matches!(
        dispatcher.input_data(audio(0)),
        Err(Error::Dispatch(DispatchError::Stopped))
    ));
    let (another, _another_events) = BufferReceiver::new(ReceiverOptions::default());
    assert!(matches!(
        dispatcher.attach_receiver(&another),
        Err(Error::Dispatch(DispatchError::Stopped))
    ));
    // Stopping twice is harmless
    dispatcher.stop_dispatch();
}

#[test]
fn attach_twice_is_rejected() {
    init_tracing();
    let (first, _first_events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (second, _second_events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());

    let id = assert_ok!(first.attach_receiver(&receiver));
    assert!(matches!(
        second.attach_receiver(&receiver),
        Err(Error::Dispatch(DispatchError::AlreadyAttached(existing))) if existing == id
    ));
    assert!(matches!(
        second.detach_receiver(&receiver),
        Err(Error::Dispatch(DispatchError::ReceiverNotFound(_)))
    ));

    drop(receiver);
    assert_eq!(first.receiver_count(), 0);
}

#[test]
fn acceleration_handshake() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (receiver, mut receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    assert_ok!(dispatcher.attach_receiver(&receiver));

    // No keyframe yet: redirect stays armed and asks for acceleration
    assert_ok!(receiver.enable_key_redirect(true));
    assert!(assert_ok!(receiver.need_acceleration()));

    assert_ok!(dispatcher.input_data(video(0, true)));
    assert_ok!(dispatcher.input_data(video(1, false)));
    assert_ok!(receiver.send_acceleration_done());
    assert!(!assert_ok!(receiver.need_acceleration()));
    assert_eq!(receiver_events.try_recv().unwrap(), ReceiverEvent::AccelerationDone);

    assert_ok!(receiver.enable_key_redirect(true));
    assert_ok!(receiver.disable_acceleration());
    assert!(!assert_ok!(receiver.need_acceleration()));
}

#[test]
fn key_mode_without_keyframe_requests_idr() {
    init_tracing();
    let config = DispatcherConfig::default().disable_keyframe_wait();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(config));
    let (receiver, mut receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    assert_ok!(dispatcher.attach_receiver(&receiver));

    assert_ok!(dispatcher.input_data(video(0, false)));
    assert_ok!(receiver.enable_key_mode(true));
    assert_eq!(receiver_events.try_recv().unwrap(), ReceiverEvent::KeyModeNotify(true));
    assert!(drain(&receiver, MediaType::Av).is_empty());

    assert_ok!(dispatcher.input_data(video(1, true)));
    let frames = drain(&receiver, MediaType::Av);
    assert_eq!(frames.len(), 1);
    assert!(frames[0].key_frame);

    assert_ok!(receiver.enable_key_mode(false));
    assert_eq!(receiver_events.try_recv().unwrap(), ReceiverEvent::KeyModeNotify(false));
}

#[test]
fn disabling_key_mode_wakes_blocked_reader() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default().key_mode(true));
    assert_ok!(dispatcher.attach_receiver(&receiver));

    assert_ok!(dispatcher.input_data(video(0, true)));
    assert_eq!(drain(&receiver, MediaType::Av).len(), 1);
    assert_ok!(dispatcher.input_data(video(1, false)));

    let reader = {
        let receiver = receiver.clone();
        thread::spawn(move || {
            let mut pts = None;
            let result = receiver.request_read(MediaType::Av, |f| pts = Some(f.pts));
            result.map(|_| pts)
        })
    };
    thread::sleep(Duration::from_millis(20));
    assert!(!reader.is_finished());

    // No further write: turning key mode off alone must complete the read
    assert_ok!(receiver.enable_key_mode(false));
    for _ in 0..50 {
        if reader.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let finished = reader.is_finished();
    if !finished {
        assert_ok!(receiver.notify_read_stop());
    }
    let result = reader.join().unwrap();
    assert!(finished);
    assert_eq!(assert_ok!(result), Some(1));
}

#[test]
fn parameter_sets_are_cached() {
    init_tracing();
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(DispatcherConfig::default()));
    let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());
    assert_ok!(dispatcher.attach_receiver(&receiver));
    assert!(receiver.get_sps().is_none());

    let sps = MediaData::video(0, Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42]), false);
    let pps = MediaData::video(0, Bytes::from_static(&[0, 0, 0, 1, 0x68, 0xCE]), false);
    dispatcher.set_sps_nalu(sps.clone());
    dispatcher.set_pps_nalu(pps.clone());

    assert_eq!(receiver.get_sps(), Some(sps));
    assert_eq!(receiver.get_pps(), Some(pps));
}

#[test]
fn data_mode_rejects_excluded_type() {
    init_tracing();
    let config = DispatcherConfig::default().data_mode(media_dispatch::DataMode::VideoOnly);
    let (dispatcher, _events) = assert_ok!(BufferDispatcher::new(config));

    assert!(matches!(
        dispatcher.input_data(audio(0)),
        Err(Error::Dispatch(DispatchError::MediaTypeExcluded(MediaType::Audio)))
    ));
    assert!(matches!(
        dispatcher.input_data(MediaData::video(0, Bytes::new(), true)),
        Err(Error::Dispatch(DispatchError::InvalidArgument(_)))
    ));
    assert_ok!(dispatcher.input_data(video(0, true)));
    assert_eq!(dispatcher.stats().counters.frames_rejected, 1);
}
