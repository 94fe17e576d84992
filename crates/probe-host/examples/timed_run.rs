//! Drives a two-axis motion group through a small grid against
//! simulated motors.
//!
//! ```bash
//! cargo run -p probe-host --example timed_run
//! ```

use anyhow::Result;
use motion::builder::SpaceConfig;
use motion::layers::LayerSpec;
use motion::space::SpaceDim;
use motion::transform::TransformSpec;
use motion::units::LengthUnit;
use probe_host::{
    AxisConfig, BuilderConfig, DriveConfig, MlTarget, MotionGroupConfig, MotorSettings,
    RunConfig, RunManager,
};
use sim::{SimMotor, SimMotorHandle, SimMotorSettings};
use std::net::Ipv4Addr;
use std::time::Duration;

fn axis(name: &str, handle: &SimMotorHandle) -> AxisConfig {
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

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let sim_x = SimMotor::spawn(SimMotorSettings {
        bind_ip: Ipv4Addr::new(127, 0, 0, 1),
        steps_per_sec: 500_000.0,
        ..Default::default()
    })?;
    let sim_y = SimMotor::spawn(SimMotorSettings {
        bind_ip: Ipv4Addr::new(127, 0, 0, 2),
        steps_per_sec: 500_000.0,
        ..Default::default()
    })?;

    let config = RunConfig {
        name: Some("timed demo run".to_string()),
        date: None,
        motion_groups: vec![MotionGroupConfig {
            name: "demo XY".to_string(),
            drive: DriveConfig {
                name: "xy".to_string(),
                axes: vec![axis("x", &sim_x), axis("y", &sim_y)],
                user: Default::default(),
            },
            motion_builder: BuilderConfig {
                space: SpaceConfig::Dims(vec![
                    SpaceDim {
                        label: "x".to_string(),
                        range: [-10.0, 10.0],
                        num: 41,
                    },
                    SpaceDim {
                        label: "y".to_string(),
                        range: [-10.0, 10.0],
                        num: 41,
                    },
                ]),
                layers: vec![LayerSpec::Grid {
                    limits: vec![vec![-2.0, 2.0]],
                    steps: vec![3],
                }],
                exclusions: vec![],
                user: Default::default(),
            },
            transform: TransformSpec::Identity,
            user: Default::default(),
        }],
        user: Default::default(),
    };

    let mut manager = RunManager::new(config, false)?;
    println!("run {:?} started", manager.name());

    let key = manager.keys().next().expect("one group configured");
    let group = manager.get_mut(key).expect("group exists");

    let mut target = MlTarget::First;
    loop {
        let index = group.move_to_index(target)?;
        // Give the heartbeat a beat to observe the move before waiting
        // on the cached motion flag.
        std::thread::sleep(Duration::from_millis(1200));
        group.wait_until_stopped(Duration::from_secs(5))?;
        let position = group.position()?;
        println!("point {index}: probe at ({:.2}, {:.2}) cm", position[0], position[1]);

        target = MlTarget::Next;
        if index + 1 >= 9 {
            break;
        }
    }

    manager.stop_all();
    manager.terminate(false);
    println!("run complete");
    Ok(())
}
