use approx::assert_abs_diff_eq;
use featstream_core::{
    CmsMode, Compression, EndpointState, EpdFrame, FeatureConfig, FeatureFrame, FeatureStream,
    FrameClass, FrameStatus, NormalizerSeed,
};

fn stream(config: FeatureConfig) -> FeatureStream<f32> {
    let seed = NormalizerSeed::neutral(config.dim_mfcc - 1);
    FeatureStream::new(config, &seed).expect("stream")
}

fn epd(state: EndpointState, count: u64, class: FrameClass) -> EpdFrame {
    EpdFrame {
        state,
        frame_class: class,
        frame_count: count,
        start_frame: 0,
        end_frame: 0,
        start_detected: false,
        start_reset: false,
    }
}

/// Drives `frames` through the stream: leading silence before `onset`,
/// an onset confirmed at `onset` reaching back to `start`, speech after.
/// Ends with an end-of-input call and returns the utterance.
fn run(
    s: &mut FeatureStream<f32>,
    frames: &[(Vec<f32>, FrameClass)],
    onset: usize,
    start: u64,
) -> (Vec<FrameStatus>, Vec<FeatureFrame<f32>>) {
    let mut statuses = Vec::new();
    for (i, (frame, class)) in frames.iter().enumerate() {
        let state = if i < onset {
            EndpointState::LeadingSilence
        } else {
            EndpointState::CoreSpeech
        };
        let mut e = epd(state, i as u64 + 1, *class);
        e.start_frame = start;
        e.start_detected = i == onset;
        statuses.push(s.process(Some(frame.as_slice()), &e));
    }
    let end = epd(EndpointState::UtterEnd, frames.len() as u64, FrameClass::Silence);
    statuses.push(s.process(None, &end));
    (statuses, s.drain())
}

#[test]
fn two_to_one_compression_interpolates_pairs() {
    let mut s = stream(FeatureConfig {
        dim_mfcc: 3,
        compression: Compression::TwoToOne,
        acceleration: false,
        silence_drop: false,
        ..FeatureConfig::default()
    });
    let frame = |i: usize| vec![i as f32, 2.0 * i as f32, 10.0 + (i % 3) as f32];

    for i in 0..4 {
        let e = epd(EndpointState::LeadingSilence, i + 1, FrameClass::Silence);
        s.process(Some(frame(i as usize).as_slice()), &e);
    }
    let mut onset = epd(EndpointState::CoreSpeech, 5, FrameClass::Voiced);
    onset.start_frame = 4;
    onset.start_detected = true;
    s.process(Some(frame(4).as_slice()), &onset);
    for i in 5..24 {
        let e = epd(EndpointState::CoreSpeech, i + 1, FrameClass::Voiced);
        s.process(Some(frame(i as usize).as_slice()), &e);
    }
    let mut pause = epd(EndpointState::TrailingSilence, 25, FrameClass::Silence);
    pause.end_frame = 23;
    assert_eq!(s.process(Some(frame(24).as_slice()), &pause), FrameStatus::NothingYet);
    let end = epd(EndpointState::UtterEnd, 25, FrameClass::Silence);
    assert_eq!(s.process(None, &end), FrameStatus::Complete);

    let vectors = s.drain();
    assert_eq!(vectors.len(), 10);
    for (n, v) in vectors.iter().enumerate() {
        let k = 4 + 2 * n;
        assert_eq!(v.frame_index, k as u64);
        let (a, b) = (frame(k), frame(k + 1));
        assert_abs_diff_eq!(v.vector[0], 0.5 * (a[0] + b[0]), epsilon = 1e-6);
        assert_abs_diff_eq!(v.vector[1], 0.5 * (a[1] + b[1]), epsilon = 1e-6);
        assert_eq!(v.vector[2], a[2].max(b[2]));
    }
}

#[test]
fn constant_input_has_zero_derivatives() {
    let mut s = stream(FeatureConfig {
        dim_mfcc: 4,
        third_diff: true,
        ..FeatureConfig::default()
    });
    let constant = vec![1.5, -2.0, 0.25, 18.0];
    let frames: Vec<_> = (0..60)
        .map(|i| {
            let class = if i < 10 { FrameClass::Silence } else { FrameClass::Voiced };
            (constant.clone(), class)
        })
        .collect();
    let (_, vectors) = run(&mut s, &frames, 12, 9);
    assert_eq!(vectors.len(), 51);
    for v in &vectors {
        assert_eq!(v.vector.len(), 4 + 3 * 4);
        assert_eq!(v.vector[..4], constant[..]);
        assert!(v.vector[4..].iter().all(|x| *x == 0.0), "{:?}", v.vector);
    }
}

#[test]
fn cursors_stay_ordered() {
    let mut s = stream(FeatureConfig {
        dim_mfcc: 3,
        ring_capacity: 64,
        ..FeatureConfig::default()
    });
    let cap = s.buffer().capacity();
    let states = [
        (EndpointState::LeadingSilence, 20),
        (EndpointState::CoreSpeech, 30),
        (EndpointState::TrailingSilence, 40),
        (EndpointState::CoreSpeech, 10),
        (EndpointState::TrailingSilence, 15),
    ];
    let mut count = 0u64;
    for (state, len) in states {
        for _ in 0..len {
            count += 1;
            let mut e = epd(state, count, FrameClass::Voiced);
            e.start_frame = count.saturating_sub(8);
            e.start_detected = state == EndpointState::CoreSpeech && count == 21;
            e.end_frame = 55;
            s.process(Some(&[count as f32, 0.0, 1.0]), &e);
            let buf = s.buffer();
            assert!(buf.output() <= buf.written());
            assert!(buf.pending() <= cap, "pending {} at frame {count}", buf.pending());
        }
    }
    let indices: Vec<u64> = s.output().iter().map(|f| f.frame_index).collect();
    assert!(indices.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn long_leading_silence_stays_within_ring() {
    let mut s = stream(FeatureConfig {
        dim_mfcc: 3,
        ..FeatureConfig::default()
    });
    let cap = s.buffer().capacity();
    for count in 1..=200u64 {
        let e = epd(EndpointState::LeadingSilence, count, FrameClass::Silence);
        s.process(Some(&[count as f32, 0.0, 1.0]), &e);
        assert!(s.buffer().pending() <= cap, "pending {} at frame {count}", s.buffer().pending());
    }
    assert_eq!(s.buffer().written(), 200);
    assert_eq!(s.buffer().pending(), 0);
}

#[test]
fn pause_longer_than_ring_resumes_in_order() {
    let mut s = stream(FeatureConfig {
        dim_mfcc: 3,
        silence_drop: false,
        ..FeatureConfig::default()
    });
    let cap = s.buffer().capacity();
    let states = [
        (EndpointState::LeadingSilence, 5),
        (EndpointState::CoreSpeech, 15),
        (EndpointState::TrailingSilence, 150),
        (EndpointState::CoreSpeech, 10),
    ];
    let mut count = 0u64;
    for (state, len) in states {
        for _ in 0..len {
            count += 1;
            let mut e = epd(state, count, FrameClass::Voiced);
            e.start_frame = 3;
            e.start_detected = count == 6;
            e.end_frame = 20;
            s.process(Some(&[count as f32, 0.0, 1.0]), &e);
            assert!(s.buffer().pending() <= cap, "pending {} at frame {count}", s.buffer().pending());
        }
    }
    let end = epd(EndpointState::UtterEnd, count, FrameClass::Silence);
    assert_eq!(s.process(None, &end), FrameStatus::Complete);
    assert!(s.take_counts().overflowed > 0);

    let indices: Vec<u64> = s.drain().iter().map(|f| f.frame_index).collect();
    assert!(indices.windows(2).all(|w| w[0] < w[1]), "{indices:?}");
    assert_eq!(indices.first(), Some(&3));
    assert_eq!(indices.last(), Some(&(count - 1)));
    // Speech before the pause survives; the oldest pause frames were
    // given up to the ring.
    assert!((3..=20).all(|i| indices.contains(&i)));
    assert!(!indices.contains(&25));
}

#[test]
fn batch_normalization_is_a_fixed_point() {
    let config = FeatureConfig {
        dim_mfcc: 3,
        cms: CmsMode::Batch,
        silence_drop: false,
        ..FeatureConfig::default()
    };
    let frames: Vec<_> = (0..50)
        .map(|i| {
            let wobble = (i as f32 * 0.7).sin();
            if i < 10 {
                (vec![0.1 * wobble, -0.1, 12.0], FrameClass::Silence)
            } else if i % 3 == 0 {
                (vec![4.0 + wobble, -3.0 - wobble, 20.0], FrameClass::Unvoiced)
            } else {
                (vec![-2.0 + wobble, 6.0 + 0.5 * wobble, 22.0], FrameClass::Voiced)
            }
        })
        .collect();

    let mut first = stream(config.clone());
    let (statuses, once) = run(&mut first, &frames, 12, 9);
    assert!(!statuses.contains(&FrameStatus::Emitted));
    assert_eq!(statuses.last(), Some(&FrameStatus::Complete));
    assert_eq!(once.len(), 41);

    for class in [FrameClass::Unvoiced, FrameClass::Voiced] {
        let members: Vec<_> = once.iter().filter(|f| f.class == class).collect();
        assert!(!members.is_empty());
        for dim in 0..2 {
            let mean = members.iter().map(|f| f.vector[dim]).sum::<f32>() / members.len() as f32;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-4);
        }
    }

    // Feed the normalized utterance through a fresh stream.
    let mut again = frames.clone();
    for f in &once {
        again[f.frame_index as usize].0 = f.vector[..3].to_vec();
    }
    let mut second = stream(config);
    let (_, twice) = run(&mut second, &again, 12, 9);
    assert_eq!(twice.len(), once.len());
    for (a, b) in once.iter().zip(&twice) {
        assert_eq!(a.frame_index, b.frame_index);
        if a.class == FrameClass::Silence {
            continue;
        }
        for dim in 0..3 {
            assert_abs_diff_eq!(a.vector[dim], b.vector[dim], epsilon = 1e-4);
        }
    }
}
