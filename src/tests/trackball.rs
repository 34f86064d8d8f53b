use crate::core::codes::{
    EventNature, BTN_MOUSE, MOTION_EVENT_ACTION_DOWN, MOTION_EVENT_ACTION_MOVE,
    MOTION_EVENT_ACTION_UP, REL_X, REL_Y, ROTATION_90,
};
use crate::tests::harness::{key_event, rel_event, sync, Notice, TestEnv};

const DEVICE_ID: i32 = 1;

#[test]
fn test_trackball_move_scales_by_threshold() {
    let mut env = TestEnv::new();
    env.add_trackball_device(DEVICE_ID);

    env.source.push(rel_event(DEVICE_ID, REL_X, 6));
    env.source.push(rel_event(DEVICE_ID, REL_Y, -3));
    env.source.push(sync(DEVICE_ID));
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 1);
    let Notice::Motion {
        action,
        nature,
        ref pointer_ids,
        ref pointer_coords,
        x_precision,
        y_precision,
        ..
    } = motions[0]
    else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_MOVE);
    assert_eq!(nature, EventNature::Trackball);
    assert_eq!(pointer_ids, &[0]);
    assert_eq!(pointer_coords[0].x, 1.0);
    assert_eq!(pointer_coords[0].y, -0.5);
    assert_eq!(pointer_coords[0].pressure, 1.0);
    assert_eq!(pointer_coords[0].size, 0.0);
    assert_eq!(x_precision, 6.0);
    assert_eq!(y_precision, 6.0);
}

#[test]
fn test_trackball_button_down_and_up() {
    let mut env = TestEnv::new();
    env.add_trackball_device(DEVICE_ID);

    env.source.push(key_event(DEVICE_ID, BTN_MOUSE, 0, 1));
    env.source.push(sync(DEVICE_ID));
    env.source.push(key_event(DEVICE_ID, BTN_MOUSE, 0, 0));
    env.source.push(sync(DEVICE_ID));
    env.drain();

    let motions = env.dispatcher.take_motions();
    assert_eq!(motions.len(), 2);

    let Notice::Motion {
        when,
        action,
        down_time,
        ..
    } = motions[0]
    else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_DOWN);
    assert_eq!(down_time, when);

    let Notice::Motion { action, .. } = motions[1] else {
        panic!("expected motion");
    };
    assert_eq!(action, MOTION_EVENT_ACTION_UP);
}

#[test]
fn test_trackball_deltas_rotate_with_sign_flips() {
    let mut env = TestEnv::new();
    env.add_trackball_device(DEVICE_ID);
    env.policy.set_orientation(ROTATION_90);

    env.source.push(rel_event(DEVICE_ID, REL_X, 6));
    env.source.push(sync(DEVICE_ID));
    env.drain();

    let motions = env.dispatcher.take_motions();
    let Notice::Motion {
        ref pointer_coords, ..
    } = motions[0]
    else {
        panic!("expected motion");
    };
    // (1, 0) becomes (0, -1) at a quarter turn.
    assert_eq!(pointer_coords[0].x, 0.0);
    assert_eq!(pointer_coords[0].y, -1.0);
}
