//! Simulated Motor Controller
//!
//! Implements a minimal subset of the drive's ASCII command set over
//! the real wire framing: status requests, position and velocity
//! queries, target/feed moves, stops, enable/disable, and the various
//! setup commands, plus an optional artificial reply delay for timeout
//! testing.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use probe_proto::MotorCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Behavior knobs for a simulated motor.
#[derive(Debug, Clone)]
pub struct SimMotorSettings {
    /// Loopback address to bind. Distinct addresses in 127.0.0.0/8 let
    /// several simulated motors present unique IPs to a drive.
    pub bind_ip: std::net::Ipv4Addr,
    /// Artificial delay before every reply (for timeout tests).
    pub reply_delay: Option<Duration>,
    /// Slew rate of the simulated motion, in steps per second.
    pub steps_per_sec: f64,
}

impl Default for SimMotorSettings {
    fn default() -> Self {
        Self {
            bind_ip: std::net::Ipv4Addr::LOCALHOST,
            reply_delay: None,
            steps_per_sec: 100_000.0,
        }
    }
}

/// Kinematic state of the simulated stepper.
#[derive(Debug)]
struct DriveState {
    start_position: f64,
    target: f64,
    move_started: Option<Instant>,
    steps_per_sec: f64,
    enabled: bool,
}

impl DriveState {
    fn new(steps_per_sec: f64) -> Self {
        Self {
            start_position: 0.0,
            target: 0.0,
            move_started: None,
            steps_per_sec,
            enabled: false,
        }
    }

    fn position(&self) -> f64 {
        let Some(started) = self.move_started else {
            return self.start_position;
        };
        let travelled = started.elapsed().as_secs_f64() * self.steps_per_sec;
        let distance = (self.target - self.start_position).abs();
        if travelled >= distance {
            self.target
        } else {
            self.start_position + travelled * (self.target - self.start_position).signum()
        }
    }

    fn is_moving(&self) -> bool {
        self.move_started.is_some() && self.position() != self.target
    }

    fn begin_move(&mut self) {
        self.start_position = self.position();
        self.move_started = Some(Instant::now());
    }

    fn halt(&mut self) {
        self.start_position = self.position();
        self.target = self.start_position;
        self.move_started = None;
    }
}

/// A simulated motor controller bound to a local TCP port.
pub struct SimMotor;

impl SimMotor {
    /// Starts the simulator on its own thread and returns a handle
    /// with the bound address, the command log, and shutdown control.
    pub fn spawn(settings: SimMotorSettings) -> Result<SimMotorHandle> {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(Mutex::new(DriveState::new(settings.steps_per_sec)));
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let server_commands = commands.clone();
        let server_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("sim-motor".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        warn!(%err, "sim motor runtime failed to build");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let bind_addr = SocketAddr::from((settings.bind_ip, 0));
                    let listener = match TcpListener::bind(bind_addr).await {
                        Ok(l) => l,
                        Err(err) => {
                            warn!(%err, "sim motor failed to bind");
                            return;
                        }
                    };
                    let addr = match listener.local_addr() {
                        Ok(a) => a,
                        Err(err) => {
                            warn!(%err, "sim motor has no local address");
                            return;
                        }
                    };
                    let _ = addr_tx.send(addr);
                    info!(%addr, "sim motor listening");

                    tokio::select! {
                        _ = stop_rx => {}
                        _ = serve(listener, settings, server_commands, server_state) => {}
                    }
                });
            })
            .context("spawning sim motor thread")?;

        let addr = addr_rx
            .recv_timeout(Duration::from_secs(2))
            .context("waiting for sim motor to bind")?;

        Ok(SimMotorHandle {
            addr,
            commands,
            state,
            shutdown: Some((stop_tx, thread)),
        })
    }
}

/// Handle to a running simulated motor.
pub struct SimMotorHandle {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    state: Arc<Mutex<DriveState>>,
    shutdown: Option<(oneshot::Sender<()>, std::thread::JoinHandle<()>)>,
}

impl SimMotorHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command body received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Current simulated position in steps.
    pub fn position_steps(&self) -> f64 {
        self.state.lock().position()
    }

    pub fn is_moving(&self) -> bool {
        self.state.lock().is_moving()
    }

    pub fn shutdown(mut self) {
        if let Some((stop_tx, thread)) = self.shutdown.take() {
            let _ = stop_tx.send(());
            let _ = thread.join();
        }
    }
}

impl Drop for SimMotorHandle {
    fn drop(&mut self) {
        if let Some((stop_tx, thread)) = self.shutdown.take() {
            let _ = stop_tx.send(());
            let _ = thread.join();
        }
    }
}

/// Accepts connections one at a time, forever.
async fn serve(
    listener: TcpListener,
    settings: SimMotorSettings,
    commands: Arc<Mutex<Vec<String>>>,
    state: Arc<Mutex<DriveState>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "sim motor accepted connection");
                if let Err(err) =
                    handle_connection(stream, &settings, &commands, &state).await
                {
                    debug!(%err, "sim motor connection ended");
                }
            }
            Err(err) => {
                warn!(%err, "sim motor accept failed");
                return;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    settings: &SimMotorSettings,
    commands: &Arc<Mutex<Vec<String>>>,
    state: &Arc<Mutex<DriveState>>,
) -> Result<()> {
    let mut framed = Framed::new(stream, MotorCodec::new());

    while let Some(frame) = framed.next().await {
        let body = frame?;
        commands.lock().push(body.clone());
        debug!(command = %body, "sim motor received");

        if let Some(delay) = settings.reply_delay {
            tokio::time::sleep(delay).await;
        }

        let reply = respond(&body, state);
        framed.send(reply).await?;
    }
    Ok(())
}

/// Builds the reply text for one command body.
fn respond(body: &str, state: &Arc<Mutex<DriveState>>) -> String {
    // Three-letter commands first; everything else is mnemonic + arg.
    if body == "IFD" {
        return "%".to_string();
    }
    if body.len() < 2 {
        return "?".to_string();
    }
    let (mnemonic, arg) = body.split_at(2);

    let mut state = state.lock();
    match mnemonic {
        "RS" => {
            let flags = if !state.enabled {
                "D"
            } else if state.is_moving() {
                "RM"
            } else {
                "RP"
            };
            format!("RS={flags}")
        }
        "IE" | "IP" => format!("IE={}", state.position().trunc() as i64),
        "IV" => {
            let rpm = if state.is_moving() {
                // Report rev/min assuming the default gearing.
                state.steps_per_sec / 20_000.0 * 60.0
            } else {
                0.0
            };
            format!("IV={rpm:.1}")
        }
        "DI" => match arg.parse::<f64>() {
            Ok(target) => {
                state.target = target;
                "%".to_string()
            }
            Err(_) => "?".to_string(),
        },
        "FP" => {
            state.begin_move();
            "%".to_string()
        }
        "SJ" | "SK" | "ST" => {
            state.halt();
            "%".to_string()
        }
        "ME" => {
            state.enabled = true;
            "%".to_string()
        }
        "MD" => {
            state.enabled = false;
            "%".to_string()
        }
        "AL" => "AL=0000".to_string(),
        "AR" | "VE" | "AC" | "DE" | "EG" => "%".to_string(),
        "EP" | "SP" => match arg.parse::<f64>() {
            Ok(position) => {
                state.start_position = position;
                state.target = position;
                state.move_started = None;
                "%".to_string()
            }
            Err(_) => "?".to_string(),
        },
        _ => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(framed: &mut Framed<TcpStream, MotorCodec>, body: &str) -> String {
        framed.send(body.to_string()).await.unwrap();
        framed.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn answers_status_and_moves() {
        let handle = SimMotor::spawn(SimMotorSettings {
            steps_per_sec: 1e9,
            ..Default::default()
        })
        .unwrap();

        let stream = TcpStream::connect(handle.addr()).await.unwrap();
        let mut framed = Framed::new(stream, MotorCodec::new());

        assert_eq!(roundtrip(&mut framed, "ME").await, "%");
        assert_eq!(roundtrip(&mut framed, "RS").await, "RS=RP");
        assert_eq!(roundtrip(&mut framed, "IE").await, "IE=0");

        assert_eq!(roundtrip(&mut framed, "DI4000").await, "%");
        assert_eq!(roundtrip(&mut framed, "FP").await, "%");
        // The slew rate is effectively instant.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(roundtrip(&mut framed, "IE").await, "IE=4000");

        assert_eq!(roundtrip(&mut framed, "XX").await, "?");
        assert_eq!(handle.commands()[0], "ME");
        handle.shutdown();
    }
}
