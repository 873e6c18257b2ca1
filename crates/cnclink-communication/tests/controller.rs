mod common;

use cnclink_communication::{
    MarlinController, SimulatedFirmware, SimulatedOpener, SimulatorOptions, NOT_CONNECTED,
    NO_RESPONSE,
};
use cnclink_core::{Axis, ConnectionError, MachinePosition};
use common::{board, connected, fast_config, sent_after_probe, wait_until};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_jog_sends_relative_move_and_refresh() {
    let sim = board(0);
    let controller = connected(sim.clone(), fast_config()).await;

    controller.jog(Axis::X, 10.0, 1000.0).unwrap();

    assert_eq!(
        sent_after_probe(&sim),
        vec!["G91", "G1 X10 F1000", "G90", "M114"]
    );
    assert!(
        wait_until(Duration::from_secs(2), || controller.state().position().x == 10.0).await,
        "position refresh was not applied"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rotary_jog_is_inverted() {
    let sim = board(0);
    let controller = connected(sim.clone(), fast_config()).await;
    controller.jog(Axis::A, 5.0, 500.0).unwrap();
    assert_eq!(sent_after_probe(&sim)[1], "G1 A-5 F500");

    let sim = board(0);
    let mut config = fast_config();
    config.motion.invert_rotary_axis = false;
    let controller = connected(sim.clone(), config).await;
    controller.jog(Axis::A, 5.0, 500.0).unwrap();
    assert_eq!(sent_after_probe(&sim)[1], "G1 A5 F500");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jog_xy_is_one_diagonal_move() {
    let sim = board(0);
    let controller = connected(sim.clone(), fast_config()).await;
    controller.jog_xy(3.0, -4.0, 800.0).unwrap();

    assert_eq!(
        sent_after_probe(&sim),
        vec!["G91", "G1 X3 Y-4 F800", "G90", "M114"]
    );
    assert!(
        wait_until(Duration::from_secs(2), || {
            controller.state().position() == MachinePosition::new(3.0, -4.0, 0.0, 0.0)
        })
        .await
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_post_connect_commands_sent_once() {
    let sim = board(0);
    let mut config = fast_config();
    config.post_connect_commands = vec!["M114".into(), "M204 P1000 T1000".into()];
    let controller = connected(sim.clone(), config).await;

    assert_eq!(controller.state().status_text(), "Idle");
    assert_eq!(sent_after_probe(&sim), vec!["M114", "M204 P1000 T1000"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_home_axis_sets_status_and_restores_idle() {
    let sim = board(0);
    let mut config = fast_config();
    config.motion.home_axis_settle_ms = 200;
    let controller = Arc::new(connected(sim.clone(), config).await);
    controller.jog(Axis::X, 7.0, 1000.0).unwrap();

    let homing = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.home_axis(Axis::X).await })
    };
    assert!(
        wait_until(Duration::from_secs(1), || {
            controller.state().status_text() == "Homing X..."
        })
        .await
    );
    assert!(controller.state().is_busy());

    homing.await.unwrap().unwrap();
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status_text, "Idle");
    assert!(snapshot.is_idle());
    assert!(sent_after_probe(&sim).ends_with(&["G28 X".to_string(), "M114".to_string()]));
    assert!(wait_until(Duration::from_secs(2), || controller.state().position().x == 0.0).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_home_all_zeroes_rotary() {
    let sim = board(0);
    let controller = connected(sim.clone(), fast_config()).await;
    controller.home_all().await.unwrap();

    assert_eq!(sent_after_probe(&sim), vec!["G28", "G92 E0", "M114"]);
    assert_eq!(controller.state().status_text(), "Idle");

    let sim = board(0);
    let mut config = fast_config();
    config.motion.zero_rotary_after_home_all = false;
    let controller = connected(sim.clone(), config).await;
    controller.home_all().await.unwrap();
    assert_eq!(sent_after_probe(&sim), vec!["G28", "M114"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_motion_rejected_when_busy() {
    let sim = board(0);
    let controller = connected(sim.clone(), fast_config()).await;
    controller.state().set_status("Running", true, false);

    controller.home_axis(Axis::Z).await.unwrap();
    controller.home_all().await.unwrap();
    controller.jog(Axis::X, 1.0, 100.0).unwrap();
    controller.jog_xy(1.0, 1.0, 100.0).unwrap();

    assert!(sent_after_probe(&sim).is_empty());
    assert_eq!(controller.state().status_text(), "Running");
    assert!(controller.state().is_busy());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exchange_returns_answer_with_ack() {
    let sim = board(10);
    let controller = connected(sim, fast_config()).await;

    let answer = controller
        .send_command_with_response("M115", Duration::from_secs(2))
        .await;
    let lines: Vec<&str> = answer.lines().collect();
    assert!(lines[0].contains("FIRMWARE_NAME"));
    assert_eq!(lines.last(), Some(&"ok"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exchange_timeout_sentinel() {
    let sim = board(0);
    let controller = connected(sim.clone(), fast_config()).await;
    sim.set_silent(true);

    let answer = controller
        .send_command_with_response("M114", Duration::from_millis(100))
        .await;
    assert_eq!(answer, NO_RESPONSE);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exchange_recovers_after_lost_jog_ack() {
    let sim = board(10);
    let controller = connected(sim.clone(), fast_config()).await;
    sim.drop_ack_for("G90");

    controller.jog(Axis::X, 1.0, 500.0).unwrap();
    for _ in 0..2 {
        let answer = controller
            .send_command_with_response("M114", Duration::from_secs(2))
            .await;
        let lines: Vec<&str> = answer.lines().collect();
        assert!(lines[0].starts_with("X:1.00"), "got {:?}", lines);
        assert_eq!(lines.last(), Some(&"ok"));
        assert_eq!(controller.flow_counters().unwrap().in_flight(), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exchanges_do_not_interleave() {
    let sim = board(15);
    let controller = Arc::new(connected(sim, fast_config()).await);

    let mut tasks = Vec::new();
    for command in ["M21", "M114", "M21", "M114"] {
        let controller = controller.clone();
        tasks.push(tokio::spawn(async move {
            let answer = controller
                .send_command_with_response(command, Duration::from_secs(2))
                .await;
            (command, answer)
        }));
    }
    for task in tasks {
        let (command, answer) = task.await.unwrap();
        let lines: Vec<&str> = answer.lines().collect();
        assert_eq!(lines.len(), 2, "{} got {:?}", command, lines);
        match command {
            "M21" => assert_eq!(lines[0], "echo:SD card ok"),
            _ => assert!(lines[0].starts_with("X:")),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnect_makes_motion_noop() {
    let sim = board(0);
    let controller = connected(sim.clone(), fast_config()).await;
    controller.disconnect().await;

    assert!(!controller.is_connected());
    assert_eq!(controller.state().status_text(), "Disconnected");
    controller.jog(Axis::Y, 1.0, 100.0).unwrap();
    assert!(sent_after_probe(&sim).is_empty());
    assert_eq!(
        controller
            .send_command_with_response("M114", Duration::from_millis(50))
            .await,
        NOT_CONNECTED
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_failure_marks_disconnected() {
    let silent = Arc::new(SimulatedFirmware::new(SimulatorOptions::named("SIM0").silent()));
    let controller = MarlinController::new(fast_config());
    let opener = SimulatedOpener::new().with_board(silent);

    let err = controller.connect(&opener).await.unwrap_err();
    assert_eq!(err, ConnectionError::NotFound { tried: 1 });
    assert!(!controller.is_connected());
    assert_eq!(controller.state().status_text(), "Disconnected");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sd_card_offload() {
    let sim = board(0);
    let controller = connected(sim.clone(), fast_config()).await;

    assert!(controller.sd_init().await.contains("SD card ok"));
    let program = vec!["G1 X1".to_string(), "; comment".to_string(), "G1 X2".to_string()];
    assert_eq!(controller.sd_upload("job.gco", &program).await.unwrap(), 2);
    assert_eq!(sim.sd_file("job.gco").unwrap(), vec!["G1 X1", "G1 X2"]);
    assert_eq!(controller.sd_list_files().await, vec!["JOB.GCO"]);

    controller.sd_start("job.gco").await.unwrap();
    assert_eq!(controller.state().status_text(), "Running (SD)");
    assert!(sim.is_sd_printing());
    assert_eq!(controller.sd_progress().await, Some(0.25));
    assert_eq!(controller.state().progress(), 0.25);

    controller.sd_pause().unwrap();
    assert!(controller.state().is_paused());
    assert_eq!(controller.state().status_text(), "Paused (SD)");
    controller.resume_job();
    assert_eq!(controller.state().status_text(), "Paused (SD)");
    controller.sd_resume().unwrap();
    assert!(controller.state().is_running());

    controller.sd_stop().unwrap();
    assert!(controller.state().is_idle());
    assert_eq!(controller.state().status_text(), "Stopped");
    assert!(sent_after_probe(&sim).contains(&"M524".to_string()));
}
