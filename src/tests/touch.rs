use crate::core::codes::{
    EventNature, MOTION_EVENT_ACTION_DOWN, MOTION_EVENT_ACTION_MOVE,
    MOTION_EVENT_ACTION_POINTER_DOWN, MOTION_EVENT_ACTION_POINTER_INDEX_SHIFT,
    MOTION_EVENT_ACTION_POINTER_UP, MOTION_EVENT_ACTION_UP, MOTION_EVENT_EDGE_FLAG_LEFT,
    MOTION_EVENT_EDGE_FLAG_NONE, ABS_MT_POSITION_X, ABS_MT_POSITION_Y, ABS_MT_TOUCH_MAJOR,
    ABS_PRESSURE, ABS_X, ABS_Y, BTN_TOUCH, PolicyActions, ROTATION_90,
};
use crate::tests::harness::{abs_event, key_event, mt_sync, sync, Notice, TestEnv};

fn push_single_touch_down(env: &TestEnv, device_id: i32, x: i32, y: i32) {
    env.source.push(abs_event(device_id, ABS_X, x));
    env.source.push(abs_event(device_id, ABS_Y, y));
    env.source.push(abs_event(device_id, ABS_PRESSURE, 50));
    env.source.push(key_event(device_id, BTN_TOUCH, 0, 1));
    env.source.push(sync(device_id));
}

fn push_single_touch_up(env: &TestEnv, device_id: i32) {
    env.source.push(key_event(device_id, BTN_TOUCH, 0, 0));
    env.source.push(sync(device_id));
}

#[test]
fn test_single_finger_tap() {
    let mut env = TestEnv::new();
    env.add_single_touch_device(1);

    push_single_touch_down(&env, 1, 100, 200);
    push_single_touch_up(&env, 1);
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 2);

    let Notice::Motion {
        when,
        action,
        nature,
        edge_flags,
        ref pointer_ids,
        ref pointer_coords,
        down_time,
        ..
    } = motions[0]
    else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_DOWN);
    assert_eq!(nature, EventNature::Touch);
    assert_eq!(edge_flags, MOTION_EVENT_EDGE_FLAG_NONE);
    assert_eq!(pointer_ids, &[0]);
    assert_eq!(pointer_coords[0].x, 100.0);
    assert_eq!(pointer_coords[0].y, 200.0);
    // The initial down stamps the gesture's down time.
    assert_eq!(down_time, when);

    let Notice::Motion {
        action,
        ref pointer_coords,
        down_time: up_down_time,
        ..
    } = motions[1]
    else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_UP);
    assert_eq!(pointer_coords[0].x, 100.0);
    assert_eq!(pointer_coords[0].y, 200.0);
    assert_eq!(up_down_time, down_time);
}

#[test]
fn test_move_emitted_when_ids_unchanged() {
    let mut env = TestEnv::new();
    env.add_single_touch_device(1);

    push_single_touch_down(&env, 1, 100, 200);
    env.source.push(abs_event(1, ABS_X, 110));
    env.source.push(sync(1));
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 2);
    let Notice::Motion {
        action,
        ref pointer_coords,
        ..
    } = motions[1]
    else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_MOVE);
    assert_eq!(pointer_coords[0].x, 110.0);
    // Y retains its previous value across the partial frame.
    assert_eq!(pointer_coords[0].y, 200.0);
}

#[test]
fn test_two_finger_sequence_with_driver_ids() {
    let mut env = TestEnv::new();
    env.add_multi_touch_device(1);

    env.push_mt_frame(1, &[(50, 50, 5, Some(3)), (200, 300, 5, Some(7))]);
    env.push_mt_frame(1, &[(50, 50, 5, Some(3))]);
    env.push_mt_lift_frame(1);
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 4);

    let actions: Vec<i32> = motions
        .iter()
        .map(|n| match n {
            Notice::Motion { action, .. } => *action,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(
        actions,
        vec![
            MOTION_EVENT_ACTION_DOWN,
            MOTION_EVENT_ACTION_POINTER_DOWN | (7 << MOTION_EVENT_ACTION_POINTER_INDEX_SHIFT),
            MOTION_EVENT_ACTION_POINTER_UP | (7 << MOTION_EVENT_ACTION_POINTER_INDEX_SHIFT),
            MOTION_EVENT_ACTION_UP,
        ]
    );

    // Pointers are reported in ascending id order.
    let Notice::Motion {
        ref pointer_ids,
        ref pointer_coords,
        ..
    } = motions[1]
    else {
        panic!("expected motion");
    };
    assert_eq!(pointer_ids, &[3, 7]);
    assert_eq!(pointer_coords[0].x, 50.0);
    assert_eq!(pointer_coords[1].x, 200.0);
    assert_eq!(pointer_coords[1].y, 300.0);

    let Notice::Motion { ref pointer_ids, .. } = motions[3] else {
        panic!("expected motion");
    };
    assert_eq!(pointer_ids, &[3]);
}

#[test]
fn test_touch_rotated_90_degrees() {
    let mut env = TestEnv::new();
    env.add_single_touch_device(1);
    env.policy.set_orientation(ROTATION_90);

    push_single_touch_down(&env, 1, 10, 20);
    env.drain();

    let motions = env.dispatcher.take_motions();
    let Notice::Motion {
        ref pointer_coords, ..
    } = motions[0]
    else {
        panic!("expected motion");
    };
    assert_eq!(pointer_coords[0].x, 20.0);
    assert_eq!(pointer_coords[0].y, 470.0);
}

#[test]
fn test_display_info_failure_drops_touches() {
    let mut env = TestEnv::new();
    env.add_single_touch_device(1);

    env.policy.set_display(None);
    push_single_touch_down(&env, 1, 100, 200);
    push_single_touch_up(&env, 1);
    env.drain();
    assert!(env.dispatcher.take_motions().is_empty());

    // Recovery: the next successful refresh lets events through again.
    env.policy.set_display(Some(crate::core::traits::DisplayInfo {
        width: 480,
        height: 800,
        orientation: 0,
    }));
    push_single_touch_down(&env, 1, 100, 200);
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 1);
    let Notice::Motion { action, .. } = motions[0] else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_DOWN);
}

#[test]
fn test_pointer_id_continuity_without_driver_ids() {
    let mut env = TestEnv::new();
    env.add_multi_touch_device(1);

    env.push_mt_frame(1, &[(100, 100, 5, None)]);
    env.push_mt_frame(1, &[(110, 110, 5, None)]);
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 2);
    let Notice::Motion {
        action,
        ref pointer_ids,
        ..
    } = motions[1]
    else {
        panic!("expected motion");
    };
    // Same synthesized id across frames, hence a move rather than a new down.
    assert_eq!(action, MOTION_EVENT_ACTION_MOVE);
    assert_eq!(pointer_ids, &[0]);
}

#[test]
fn test_pointer_overflow_is_capped() {
    let mut env = TestEnv::new();
    env.add_multi_touch_device(1);

    let pointers: Vec<(i32, i32, i32, Option<i32>)> =
        (0..11).map(|i| (10 * i + 10, 100, 5, None)).collect();
    env.push_mt_frame(1, &pointers);
    env.drain();

    // One initial down plus nine secondary downs; the eleventh pointer was
    // dropped at the protocol boundary.
    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 10);
    let Notice::Motion { ref pointer_ids, .. } = motions[9] else {
        panic!("expected motion");
    };
    assert_eq!(pointer_ids.len(), 10);
}

#[test]
fn test_policy_drop_clears_touch_history() {
    let mut env = TestEnv::new();
    env.add_single_touch_device(1);

    *env.policy.touch_actions.lock().unwrap() = PolicyActions::empty();
    push_single_touch_down(&env, 1, 100, 200);
    env.drain();
    assert!(env.dispatcher.take_motions().is_empty());

    // The dropped frame must not be diffed against: the finger is already
    // down, yet the next accepted frame opens a fresh gesture.
    *env.policy.touch_actions.lock().unwrap() = PolicyActions::DISPATCH;
    env.source.push(abs_event(1, ABS_X, 110));
    env.source.push(sync(1));
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 1);
    let Notice::Motion { action, .. } = motions[0] else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_DOWN);
}

#[test]
fn test_partial_multi_touch_pointer_still_reported() {
    let mut env = TestEnv::new();
    env.add_multi_touch_device(1);

    // No width-major packet; the pointer is used as-is with a zero size.
    env.source.push(abs_event(1, ABS_MT_POSITION_X, 60));
    env.source.push(abs_event(1, ABS_MT_POSITION_Y, 70));
    env.source.push(abs_event(1, ABS_MT_TOUCH_MAJOR, 5));
    env.source.push(mt_sync(1));
    env.source.push(sync(1));
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 1);
    let Notice::Motion {
        action,
        ref pointer_coords,
        ..
    } = motions[0]
    else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_DOWN);
    assert_eq!(pointer_coords[0].x, 60.0);
    assert_eq!(pointer_coords[0].size, 0.0);
}

#[test]
fn test_edge_flag_on_initial_down_only() {
    let mut env = TestEnv::new();
    env.add_single_touch_device(1);

    push_single_touch_down(&env, 1, 0, 400);
    env.source.push(abs_event(1, ABS_X, 5));
    env.source.push(sync(1));
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 2);
    let Notice::Motion { edge_flags, .. } = motions[0] else {
        panic!("expected motion");
    };
    assert_eq!(edge_flags, MOTION_EVENT_EDGE_FLAG_LEFT);
    let Notice::Motion { edge_flags, .. } = motions[1] else {
        panic!("expected motion");
    };
    assert_eq!(edge_flags, MOTION_EVENT_EDGE_FLAG_NONE);
}
