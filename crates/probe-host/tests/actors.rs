//! Integration tests for the actor hierarchy, driven against simulated
//! motor controllers speaking the real TCP protocol.

use approx::assert_relative_eq;
use motion::builder::SpaceConfig;
use motion::exclusions::{CircleSide, ExclusionSpec};
use motion::layers::LayerSpec;
use motion::space::SpaceDim;
use motion::transform::TransformSpec;
use motion::units::LengthUnit;
use probe_host::{
    ActorError, AxisConfig, BuilderConfig, Drive, DriveConfig, MlTarget, MotionGroup,
    MotionGroupConfig, MotorSettings, RunLoop, RunManager,
};
use sim::{SimMotor, SimMotorHandle, SimMotorSettings};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sim_motor(last_octet: u8) -> SimMotorHandle {
    SimMotor::spawn(SimMotorSettings {
        bind_ip: Ipv4Addr::new(127, 0, 0, last_octet),
        steps_per_sec: 1e9,
        ..Default::default()
    })
    .expect("sim motor failed to start")
}

fn axis_config(name: &str, handle: &SimMotorHandle) -> AxisConfig {
    AxisConfig {
        name: name.to_string(),
        ip: handle.addr().ip().to_string(),
        units: LengthUnit::Cm,
        units_per_rev: 0.254,
        motor_settings: Some(MotorSettings {
            port: handle.port(),
            steps_per_rev: 20_000,
        }),
        user: Default::default(),
    }
}

fn drive_config(name: &str, handles: &[&SimMotorHandle]) -> DriveConfig {
    DriveConfig {
        name: name.to_string(),
        axes: handles
            .iter()
            .enumerate()
            .map(|(i, h)| axis_config(&format!("ax{i}"), h))
            .collect(),
        user: Default::default(),
    }
}

fn run_loop() -> Arc<RunLoop> {
    Arc::new(RunLoop::spawn("test").expect("run loop failed to start"))
}

fn space_1d() -> SpaceConfig {
    SpaceConfig::Dims(vec![SpaceDim {
        label: "x".to_string(),
        range: [-10.0, 10.0],
        num: 21,
    }])
}

/// Waits until the sim's command log satisfies `predicate`, up to the
/// deadline.
fn wait_for(handle: &SimMotorHandle, deadline: Duration, predicate: impl Fn(&[String]) -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate(&handle.commands()) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn drive_with_duplicate_ips_fails_construction() {
    let run_loop = run_loop();
    let config = DriveConfig {
        name: "twins".to_string(),
        axes: vec![
            AxisConfig {
                name: "x".to_string(),
                ip: "192.168.6.103".to_string(),
                units: LengthUnit::Cm,
                units_per_rev: 0.254,
                motor_settings: None,
                user: Default::default(),
            },
            AxisConfig {
                name: "y".to_string(),
                ip: "192.168.6.103".to_string(),
                units: LengthUnit::Cm,
                units_per_rev: 0.254,
                motor_settings: None,
                user: Default::default(),
            },
        ],
        user: Default::default(),
    };

    // Validation fires before any connection attempt.
    let err = Drive::new(run_loop.clone(), &config).unwrap_err();
    assert!(matches!(err, ActorError::ConfigInvalid(_)));
    run_loop.terminate(false);
}

#[test]
fn drive_with_duplicate_axis_names_fails_construction() {
    let run_loop = run_loop();
    let mut config = DriveConfig {
        name: "twins".to_string(),
        axes: vec![
            AxisConfig {
                name: "x".to_string(),
                ip: "192.168.6.103".to_string(),
                units: LengthUnit::Cm,
                units_per_rev: 0.254,
                motor_settings: None,
                user: Default::default(),
            },
            AxisConfig {
                name: "x".to_string(),
                ip: "192.168.6.104".to_string(),
                units: LengthUnit::Cm,
                units_per_rev: 0.254,
                motor_settings: None,
                user: Default::default(),
            },
        ],
        user: Default::default(),
    };
    assert!(Drive::new(run_loop.clone(), &config).is_err());

    config.axes[1].name = "y".to_string();
    config.axes[1].units_per_rev = 0.0;
    assert!(Drive::new(run_loop.clone(), &config).is_err());
    run_loop.terminate(false);
}

#[test]
fn composite_move_dispatches_one_command_per_axis() {
    let sim_x = sim_motor(1);
    let sim_y = sim_motor(2);
    let run_loop = run_loop();
    let drive = Drive::new(run_loop.clone(), &drive_config("xy", &[&sim_x, &sim_y])).unwrap();

    drive.move_to(&[1.0, 2.0], None).unwrap();

    // 1 cm at 0.254 cm/rev and 20000 steps/rev.
    let steps_x = (1.0 / 0.254 * 20_000.0) as i64;
    let steps_y = (2.0 / 0.254 * 20_000.0) as i64;

    let x_commands = sim_x.commands();
    let y_commands = sim_y.commands();
    let x_targets: Vec<String> = x_commands
        .iter()
        .filter(|c| c.starts_with("DI"))
        .cloned()
        .collect();
    let y_targets: Vec<String> = y_commands
        .iter()
        .filter(|c| c.starts_with("DI"))
        .cloned()
        .collect();
    assert_eq!(x_targets, vec![format!("DI{steps_x}")]);
    assert_eq!(y_targets, vec![format!("DI{steps_y}")]);
    assert_eq!(x_commands.iter().filter(|c| c.as_str() == "FP").count(), 1);

    drive.terminate();
    run_loop.terminate(false);
}

#[test]
fn position_round_trips_through_axis_units() {
    let sim = sim_motor(1);
    let run_loop = run_loop();
    let drive = Drive::new(run_loop.clone(), &drive_config("x", &[&sim])).unwrap();

    drive.move_to(&[1.0], None).unwrap();
    // The sim slews effectively instantly.
    std::thread::sleep(Duration::from_millis(50));

    let pos = drive.position().unwrap();
    // Truncation to whole steps costs at most one step of accuracy.
    assert_relative_eq!(pos[0], 1.0, epsilon = 2.0 * 0.254 / 20_000.0);

    drive.terminate();
    run_loop.terminate(false);
}

#[test]
fn stop_returns_fast_and_reaches_every_axis() {
    let sim_x = sim_motor(1);
    let sim_y = sim_motor(2);
    let run_loop = run_loop();
    let drive = Drive::new(run_loop.clone(), &drive_config("xy", &[&sim_x, &sim_y])).unwrap();

    let started = Instant::now();
    drive.stop(false);
    assert!(
        started.elapsed() < Duration::from_millis(50),
        "stop took {:?}",
        started.elapsed()
    );

    // The stop sequence lands on both motors shortly after.
    for sim in [&sim_x, &sim_y] {
        assert!(
            wait_for(sim, Duration::from_secs(2), |cmds| {
                cmds.iter().any(|c| c == "SK")
            }),
            "stop command never reached the motor"
        );
    }

    drive.terminate();
    run_loop.terminate(false);
}

#[test]
fn motion_group_walks_the_motion_list() {
    let sim = sim_motor(1);
    let run_loop = run_loop();
    let config = MotionGroupConfig {
        name: "probe".to_string(),
        drive: drive_config("x", &[&sim]),
        motion_builder: BuilderConfig {
            space: space_1d(),
            layers: vec![LayerSpec::Grid {
                limits: vec![vec![-5.0, 5.0]],
                steps: vec![11],
            }],
            exclusions: vec![],
            user: Default::default(),
        },
        transform: TransformSpec::Identity,
        user: Default::default(),
    };

    let mut group = MotionGroup::new(run_loop.clone(), &config, false).unwrap();
    assert_eq!(group.move_to_index(MlTarget::First).unwrap(), 0);
    assert_eq!(group.move_to_index(MlTarget::Next).unwrap(), 1);
    assert_eq!(group.move_to_index(MlTarget::Last).unwrap(), 10);
    assert!(group.move_to_index(MlTarget::Index(11)).is_err());

    std::thread::sleep(Duration::from_millis(50));
    let pos = group.position().unwrap();
    assert_relative_eq!(pos[0], 5.0, epsilon = 1e-3);

    group.terminate();
    run_loop.terminate(false);
}

#[test]
fn masked_targets_are_rejected_before_any_motor_command() {
    let sim_x = sim_motor(1);
    let sim_y = sim_motor(2);
    let run_loop = run_loop();
    let config = MotionGroupConfig {
        name: "probe".to_string(),
        drive: drive_config("xy", &[&sim_x, &sim_y]),
        motion_builder: BuilderConfig {
            space: SpaceConfig::Dims(vec![
                SpaceDim {
                    label: "x".to_string(),
                    range: [-10.0, 10.0],
                    num: 21,
                },
                SpaceDim {
                    label: "y".to_string(),
                    range: [-10.0, 10.0],
                    num: 21,
                },
            ]),
            layers: vec![],
            // Only the central disk of radius 3 stays reachable.
            exclusions: vec![ExclusionSpec::Circle {
                radius: 3.0,
                center: None,
                exclude: CircleSide::Outside,
            }],
            user: Default::default(),
        },
        transform: TransformSpec::Identity,
        user: Default::default(),
    };

    let group = MotionGroup::new(run_loop.clone(), &config, false).unwrap();

    let before = sim_x.commands().len();
    let err = group.move_to(&[8.0, 0.0], None).unwrap_err();
    assert!(matches!(err, ActorError::OutOfReach(_)));
    // No move command was issued for the rejected target.
    let after: Vec<String> = sim_x.commands()[before..].to_vec();
    assert!(after.iter().all(|c| !c.starts_with("DI") && c != "FP"));

    // An in-mask target goes through.
    group.move_to(&[1.0, -1.0], None).unwrap();
    assert!(sim_y.commands().iter().any(|c| c.starts_with("DI")));

    group.terminate();
    run_loop.terminate(false);
}

#[test]
fn reply_timeout_leaves_the_actor_ready() {
    let sim = SimMotor::spawn(SimMotorSettings {
        bind_ip: Ipv4Addr::new(127, 0, 0, 1),
        reply_delay: Some(Duration::from_secs(6)),
        steps_per_sec: 1e9,
    })
    .unwrap();

    let run_loop = run_loop();
    let drive = Drive::new(run_loop.clone(), &drive_config("x", &[&sim])).unwrap();

    let err = drive.move_to(&[1.0], None).unwrap_err();
    assert!(
        matches!(err, ActorError::Timeout(..)),
        "expected a timeout, got {err:?}"
    );

    // The actor stays Ready: not terminated, connection still up.
    let axis = &drive.axes()[0];
    assert!(!axis.terminated());
    assert!(axis.connected());

    drive.terminate();
    run_loop.terminate(false);
}

#[test]
fn run_manager_terminates_within_the_drain_budget() {
    let sim_x = sim_motor(1);
    let sim_y = sim_motor(2);

    let group = MotionGroupConfig {
        name: "probe".to_string(),
        drive: drive_config("xy", &[&sim_x, &sim_y]),
        motion_builder: BuilderConfig {
            space: SpaceConfig::Dims(vec![
                SpaceDim {
                    label: "x".to_string(),
                    range: [-10.0, 10.0],
                    num: 21,
                },
                SpaceDim {
                    label: "y".to_string(),
                    range: [-10.0, 10.0],
                    num: 21,
                },
            ]),
            layers: vec![],
            exclusions: vec![],
            user: Default::default(),
        },
        transform: TransformSpec::Identity,
        user: Default::default(),
    };
    let config = probe_host::RunConfig {
        name: Some("drain test".to_string()),
        date: None,
        motion_groups: vec![group],
        user: Default::default(),
    };

    let mut manager = RunManager::new(config, false).unwrap();
    assert_eq!(manager.len(), 1);
    assert!(!manager.is_moving());

    let started = Instant::now();
    manager.terminate(false);
    assert!(
        started.elapsed() < Duration::from_secs(7),
        "terminate took {:?}",
        started.elapsed()
    );
}

#[test]
fn run_manager_rejects_cross_group_ip_collisions() {
    let sim = sim_motor(1);

    let group = |name: &str, handle: &SimMotorHandle| MotionGroupConfig {
        name: name.to_string(),
        drive: drive_config(name, &[handle]),
        motion_builder: BuilderConfig {
            space: space_1d(),
            layers: vec![],
            exclusions: vec![],
            user: Default::default(),
        },
        transform: TransformSpec::Identity,
        user: Default::default(),
    };

    let config = probe_host::RunConfig {
        name: Some("collisions".to_string()),
        date: None,
        motion_groups: vec![group("first", &sim), group("second", &sim)],
        user: Default::default(),
    };

    // Non-build mode: the collision aborts the run.
    assert!(RunManager::new(config.clone(), false).is_err());

    // Build mode: the first group survives, the duplicate is dropped.
    let mut manager = RunManager::new(config, true).unwrap();
    assert_eq!(manager.len(), 1);
    manager.terminate(false);
}

#[test]
fn validate_motion_group_is_a_pure_dry_run() {
    let config = MotionGroupConfig {
        name: "probe".to_string(),
        drive: DriveConfig {
            name: "x".to_string(),
            axes: vec![AxisConfig {
                name: "x".to_string(),
                // Nothing listens here; validation must not connect.
                ip: "192.0.2.1".to_string(),
                units: LengthUnit::Cm,
                units_per_rev: 0.254,
                motor_settings: None,
                user: Default::default(),
            }],
            user: Default::default(),
        },
        motion_builder: BuilderConfig {
            space: space_1d(),
            layers: vec![],
            exclusions: vec![],
            user: Default::default(),
        },
        transform: TransformSpec::Identity,
        user: Default::default(),
    };

    let empty = probe_host::RunConfig {
        name: Some("validator".to_string()),
        date: None,
        motion_groups: vec![],
        user: Default::default(),
    };
    let mut manager = RunManager::new(empty, false).unwrap();

    let started = Instant::now();
    assert!(manager.validate_motion_group(&config));
    assert!(started.elapsed() < Duration::from_millis(500));

    let mut bad = config;
    bad.drive.axes[0].units_per_rev = -1.0;
    assert!(!manager.validate_motion_group(&bad));

    manager.terminate(false);
}
