use stackframe_sim::frame::{offset, range};
use stackframe_sim::{
    segment_at, Mitigations, Pattern, Phase, Segment, Session, SimConfig, Verdict, WritePlan,
    FRAME_LEN, LAYOUT,
};

fn session(seed: u64, mitigations: Mitigations) -> Session {
    let config = SimConfig {
        seed: Some(seed),
        stage_delay_ms: 0,
        mitigations,
        ..SimConfig::default()
    };
    Session::new(&config).unwrap()
}

#[test]
fn segments_partition_the_frame() {
    let mut covered = vec![0usize; FRAME_LEN];
    for entry in &LAYOUT {
        for index in range(entry.segment) {
            covered[index] += 1;
            assert_eq!(segment_at(index), Some(entry.segment));
        }
    }
    assert!(covered.iter().all(|c| *c == 1));
    assert_eq!(offset(Segment::Ret) + Segment::Ret.size(), FRAME_LEN);
}

#[test]
fn run_all_equals_sequential_steps() {
    for length in [0, 1, 16, 23, 40, 57] {
        let mut bulk = session(3, Mitigations::none());
        let mut stepped = session(3, Mitigations::none());
        bulk.set_plan(Pattern::RepeatingSequence, length).unwrap();
        stepped.set_plan(Pattern::RepeatingSequence, length).unwrap();

        let bulk_view = bulk.run_all();
        let mut step_view = stepped.snapshot();
        for _ in 0..length {
            step_view = stepped.step();
        }

        assert_eq!(bulk_view.frame_bytes, step_view.frame_bytes, "length {length}");
        assert_eq!(bulk_view.written_mask, step_view.written_mask, "length {length}");
        assert_eq!(bulk_view.cursor, step_view.cursor);
        assert_eq!(bulk_view.verdict, step_view.verdict);
    }
}

#[test]
fn writes_within_buffer_never_touch_guarded_segments() {
    for length in 0..=16 {
        for pattern in [
            Pattern::FixedByte,
            Pattern::RepeatingSequence,
            Pattern::Random,
            Pattern::custom("overflow"),
        ] {
            let mut s = session(17, Mitigations::all());
            s.set_plan(pattern, length).unwrap();
            let view = s.run_all();
            assert!(!view.status.canary_changed);
            assert!(!view.status.rbp_changed);
            assert!(!view.status.ret_changed);
            assert_eq!(view.verdict, Verdict::NoCorruption);
        }
    }
}

#[test]
fn twenty_four_fixed_bytes_overwrite_only_the_canary() {
    let mut s = session(5, Mitigations::none());
    s.set_plan(Pattern::FixedByte, 24).unwrap();
    let view = s.run_all();

    assert_eq!(hex::encode(&view.frame_bytes[16..24]), "4141414141414141");
    assert!(view.status.canary_changed);
    assert!(!view.status.rbp_changed);
    assert!(!view.status.ret_changed);
    assert!(view.written_mask[..24].iter().all(|w| *w));
    assert!(view.written_mask[24..].iter().all(|w| !*w));
}

#[test]
fn forty_repeating_bytes_overwrite_every_guarded_segment_in_phase() {
    let mut s = session(6, Mitigations::none());
    s.set_plan(Pattern::RepeatingSequence, 40).unwrap();
    let view = s.run_all();

    assert_eq!(hex::encode(&view.frame_bytes[16..24]), "4142434441424344");
    assert_eq!(hex::encode(&view.frame_bytes[24..32]), "4142434441424344");
    assert_eq!(hex::encode(&view.frame_bytes[32..40]), "4142434441424344");
    for (index, byte) in view.frame_bytes.iter().enumerate() {
        assert_eq!(*byte, [0x41, 0x42, 0x43, 0x44][index % 4]);
    }
    assert!(view.status.canary_changed && view.status.rbp_changed && view.status.ret_changed);
    assert_eq!(view.verdict, Verdict::ReturnAltered);
}

#[test]
fn toggling_canary_check_after_write_moves_between_blocked_and_done() {
    let mut s = session(9, Mitigations::none());
    s.set_plan(Pattern::FixedByte, 24).unwrap();
    s.run_all();
    assert_eq!(s.settle().phase, Phase::Done);

    let view = s.set_mitigations(Mitigations::none().with_canary_check(true));
    assert_eq!(view.phase, Phase::Blocked);
    assert_eq!(view.verdict, Verdict::Blocked);
    assert!(s.pending_phases().is_empty());
    assert_eq!(s.advance_phase().phase, Phase::Blocked);
    assert_eq!(s.step().phase, Phase::Blocked);
    assert_eq!(s.run_all().phase, Phase::Blocked);

    let view = s.set_mitigations(Mitigations::none());
    assert_eq!(view.phase, Phase::Return);
    assert_eq!(view.verdict, Verdict::AdjacentAlteredUndetected);
    assert_eq!(s.settle().phase, Phase::Done);
}

#[test]
fn reset_mid_write_starts_over_with_fresh_canary() {
    let mut s = session(12, Mitigations::none());
    s.set_plan(Pattern::FixedByte, 30).unwrap();
    for _ in 0..10 {
        s.step();
    }
    let old_canary = s.frame_snapshot().canary_u64();
    let old_generation = s.generation();

    let view = s.reset(Mitigations::none());
    assert_eq!(view.cursor, 0);
    assert!(view.written_mask.iter().all(|w| !*w));
    assert_eq!(view.phase, Phase::Write);
    assert!(view.generation > old_generation);
    assert_ne!(s.frame_snapshot().canary_u64(), old_canary);
    assert_eq!(view.plan, WritePlan::build(Pattern::FixedByte, 30));
    assert!(view.frame_bytes[..16].iter().all(|b| *b == 0));
}

#[test]
fn empty_custom_text_writes_question_marks() {
    let mut s = session(2, Mitigations::none());
    s.set_plan(Pattern::custom(""), 40).unwrap();
    let view = s.run_all();
    assert!(view.frame_bytes.iter().all(|b| *b == 0x3F));
}

#[test]
fn overlong_plan_runs_off_the_frame_without_further_effect() {
    let mut s = session(4, Mitigations::none());
    s.set_plan(Pattern::FixedByte, 64).unwrap();
    let view = s.run_all();
    assert_eq!(view.cursor, 64);
    assert_eq!(view.frame_bytes.len(), FRAME_LEN);
    assert!(view.written_mask.iter().all(|w| *w));
    assert!(view.log.iter().any(|e| e.text.contains("24 dropped")));
}

#[test]
fn checked_clean_run_narrates_check_return_done() {
    let mut s = session(1, Mitigations::none().with_canary_check(true));
    s.set_plan(Pattern::custom("hello"), 12).unwrap();
    assert_eq!(s.run_all().phase, Phase::Check);
    assert_eq!(s.advance_phase().phase, Phase::Return);
    let view = s.advance_phase();
    assert_eq!(view.phase, Phase::Done);
    assert!(view.log[0].text.starts_with("return -> done"));
    assert!(view.log.len() <= 6);
}

#[test]
fn nx_flag_only_rewords_the_return_verdict() {
    let mut s = session(10, Mitigations::none());
    s.set_plan(Pattern::FixedByte, 40).unwrap();
    let plain = s.run_all();
    let nx = s.set_mitigations(Mitigations::none().with_non_executable_stack(true));
    assert_eq!(plain.verdict, nx.verdict);
    assert_eq!(plain.phase, nx.phase);
    assert_ne!(plain.verdict_caption, nx.verdict_caption);
    assert_eq!(plain.frame_digest, nx.frame_digest);
}

#[test]
fn zero_length_plan_leaves_write_and_follows_flag_toggles() {
    let mut s = session(17, Mitigations::none());
    let view = s.set_plan(Pattern::custom("ignored"), 0).unwrap();
    assert_eq!(view.cursor, 0);
    assert_ne!(view.phase, Phase::Write);
    assert_eq!(view.verdict, Verdict::NoCorruption);

    let view = s.set_mitigations(Mitigations::none().with_canary_check(true));
    assert_ne!(view.phase, Phase::Write);
    assert_ne!(view.phase, Phase::Blocked);
    assert_eq!(s.settle().phase, Phase::Done);
}

#[test]
fn narration_never_exceeds_six_entries() {
    let mut s = session(5, Mitigations::none());
    for length in 0..10 {
        s.set_plan(Pattern::FixedByte, length).unwrap();
        s.run_all();
    }
    assert!(s.snapshot().log.len() <= 6);
}
