//! End-to-end tests against the simulated board.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use wjmotion::api::WjApi;
use wjmotion::protocol::commands::{cmd_get_axes_num, cmd_get_param};
use wjmotion::protocol::frame::{STATUS_OK, encode_frame};
use wjmotion::protocol::Opcode;
use wjmotion::{
    AxisField, Board, BoardBuilder, Dispatcher, DispatcherConfig, Error, LinkState, MotionEvent,
    status,
};
use wjmotion_test_harness::{MockTransport, SimHandle};

async fn open_board(handle: &SimHandle) -> Board {
    BoardBuilder::new()
        .command_timeout(Duration::from_millis(100))
        .build_with_connector(&handle.connector())
        .await
        .unwrap()
}

#[tokio::test]
async fn vendor_api_session() {
    let handle = SimHandle::new(4, 8);
    let mut api = WjApi::with_connector(handle.connector(), BoardBuilder::new());

    assert_eq!(api.wj_open(0).await, status::OK);

    let mut axes = 0;
    assert_eq!(api.wj_get_axes_num(&mut axes).await, status::OK);
    assert_eq!(axes, 4);

    assert_eq!(api.wj_set_axis_vel(1, 500).await, status::OK);
    let mut vel = 0;
    assert_eq!(api.wj_get_axis_vel(1, &mut vel).await, status::OK);
    assert_eq!(vel, 500);

    assert_eq!(api.wj_move_axis_pulses(1, 1000).await, status::OK);
    let mut pulses = 0;
    assert_eq!(api.wj_get_axis_pulses(1, &mut pulses).await, status::OK);
    assert_eq!(pulses, 1000);

    assert_eq!(api.wj_close().await, status::OK);
    assert_eq!(api.wj_get_axis_vel(1, &mut vel).await, status::NOT_CONNECTED);
}

#[tokio::test]
async fn board_session_with_events() {
    let handle = SimHandle::new(4, 8);
    let board = open_board(&handle).await;
    let mut events = board.subscribe();

    assert_eq!(board.get_axes_num().await.unwrap(), 4);
    board.set_axis_vel(1, 500).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        MotionEvent::ParameterChanged {
            axis: 1,
            field: AxisField::Velocity,
            value: 500
        }
    );
    assert_eq!(board.get_axis_vel(1).await.unwrap(), 500);

    board.move_axis_pulses(1, 1000).await.unwrap();
    assert_eq!(board.get_axis_pulses(1).await.unwrap(), 1000);
    assert_eq!(
        events.recv().await.unwrap(),
        MotionEvent::PositionChanged {
            axis: 1,
            pulses: 1000
        }
    );

    board.close().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), MotionEvent::Disconnected);
    assert_eq!(board.state(), LinkState::Closed);
    assert!(matches!(board.get_axis_vel(1).await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn eight_axis_board() {
    let handle = SimHandle::new(8, 8);
    let board = open_board(&handle).await;
    assert_eq!(board.axis_count(), 8);

    let deltas: Vec<i32> = (1..=8).map(|n| n * 100).collect();
    board.move_axes_pulses(&deltas).await.unwrap();
    assert_eq!(board.get_axes_pulses().await.unwrap(), deltas);
    board.set_axis_pulses_zero(8).await.unwrap();
    assert_eq!(board.get_axis_pulses(8).await.unwrap(), 0);
    assert!(board.get_axis_acc(8).await.is_ok());
    assert!(matches!(board.get_axis_acc(9).await, Err(Error::Validation(_))));
}

#[tokio::test]
async fn concurrent_callers_are_served_fifo() {
    let handle = SimHandle::new(4, 8);
    handle.set_reply_delay(Duration::from_millis(1));
    let board = Arc::new(open_board(&handle).await);
    let completed = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for n in 1..=10 {
        let board = board.clone();
        let completed = completed.clone();
        tasks.push(tokio::spawn(async move {
            board.set_axis_vel(1, n).await.unwrap();
            completed.lock().unwrap().push(n);
        }));
        tokio::task::yield_now().await;
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(*completed.lock().unwrap(), (1..=10).collect::<Vec<_>>());
    assert_eq!(handle.axis(1).velocity, 10);
    assert_eq!(board.cached(1, AxisField::Velocity).unwrap().value, 10);
}

#[tokio::test]
async fn emergency_stop_preempts_queued_moves() {
    let handle = SimHandle::new(4, 8);
    handle.set_reply_delay(Duration::from_millis(10));
    let board = Arc::new(open_board(&handle).await);
    let before = handle.received_opcodes().len();

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let board = board.clone();
        tasks.push(tokio::spawn(
            async move { board.move_axis_pulses(2, 10).await },
        ));
    }
    // Let every move queue up and the first one go out.
    tokio::time::sleep(Duration::from_millis(3)).await;
    board.emergency_stop(2).await.unwrap();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    let sent = handle.received_opcodes()[before..].to_vec();
    let mv = Opcode::MovePulses as u8;
    assert_eq!(
        sent,
        vec![mv, Opcode::EmergencyStop as u8, mv, mv, mv, mv]
    );
}

#[tokio::test]
async fn silent_board_times_out_after_max_retries_plus_one_writes() {
    let mock = MockTransport::silent();
    let log = mock.sent_log();
    let (event_tx, _) = tokio::sync::broadcast::channel(16);
    let dispatcher = Dispatcher::spawn(
        Box::new(mock),
        DispatcherConfig {
            command_timeout: Duration::from_millis(10),
            max_retries: 2,
        },
        event_tx,
    );

    let result = dispatcher.request(cmd_get_axes_num()).await;
    assert!(matches!(result, Err(Error::Timeout)));
    assert_eq!(log.len(), 3);
    assert_eq!(dispatcher.state(), LinkState::Open);
}

#[tokio::test]
async fn scripted_wire_traffic() {
    let mut mock = MockTransport::new();
    let log = mock.sent_log();
    mock.expect(
        &cmd_get_axes_num().encode(),
        &encode_frame(Opcode::GetAxesNum as u8, 0, STATUS_OK, &[4]),
    );
    let query = cmd_get_param(3, AxisField::Subdivision).unwrap().encode();
    mock.expect(
        &query,
        &encode_frame(Opcode::GetSubdivision as u8, 3, STATUS_OK, &[32]),
    );

    let board = BoardBuilder::new()
        .build_with_transport(Box::new(mock))
        .await
        .unwrap();
    assert_eq!(board.get_axis_subdivision(3).await.unwrap(), 32);
    assert_eq!(log.writes()[1], query);

    // No bytes for an out-of-range axis.
    assert!(matches!(
        board.get_axis_subdivision(5).await,
        Err(Error::Validation(_))
    ));
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn recovers_from_corrupt_and_dropped_replies() {
    let handle = SimHandle::new(4, 8);
    let board = BoardBuilder::new()
        .command_timeout(Duration::from_millis(20))
        .max_retries(1)
        .build_with_connector(&handle.connector())
        .await
        .unwrap();

    handle.corrupt_next_replies(1);
    board.set_axis_dec(1, 1500).await.unwrap();

    handle.drop_next_replies(1);
    assert_eq!(board.get_axis_dec(1).await.unwrap(), 1500);

    handle.corrupt_next_replies(2);
    assert!(matches!(board.get_axis_dec(1).await, Err(Error::Protocol(_))));
    assert_eq!(board.state(), LinkState::Open);
}

#[tokio::test]
async fn reopen_after_fault() {
    let handle = SimHandle::new(4, 8);
    let board = open_board(&handle).await;
    handle.fail_next_send();
    assert!(board.led_twinkle().await.unwrap_err().is_fatal());
    assert_eq!(board.state(), LinkState::Faulted);

    let board = open_board(&handle).await;
    board.led_twinkle().await.unwrap();
    assert_eq!(handle.led_twinkles(), 1);
    assert_eq!(handle.opened_ports().len(), 2);
}
