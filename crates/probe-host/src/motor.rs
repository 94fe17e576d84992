//! The motor actor: one TCP session to one stepper-motor controller.
//!
//! A `Motor` is a synchronous facade over a link task living on the run
//! loop. The link task owns the framed TCP stream and serializes
//! commands on it: command K+1 is not written until command K's reply
//! arrived or timed out. A biased stop channel bypasses the command
//! queue so `stop` reaches the wire ahead of queued work, and a
//! heartbeat refreshes the cached status and position.

use crate::runloop::{RunLoop, TaskHandle};
use crate::{ActorError, CONNECT_TIMEOUT, HEARTBEAT_INTERVAL, REPLY_TIMEOUT};
use futures::{SinkExt, StreamExt};
use motion::units::{Equivalence, LengthUnit, Quantity, Unit};
use parking_lot::Mutex;
use probe_proto::{CommandTable, MotorCodec, MotorUnit, ProtocolError, Reply, StatusFlags};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

fn default_port() -> u16 {
    7776
}

fn default_steps_per_rev() -> u32 {
    20_000
}

/// Optional per-motor settings carried in the axis configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorSettings {
    /// TCP port of the motor controller.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Motor steps per full revolution.
    #[serde(default = "default_steps_per_rev")]
    pub steps_per_rev: u32,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            steps_per_rev: default_steps_per_rev(),
        }
    }
}

/// Cached view of the motor's last known state, refreshed by the
/// heartbeat and by explicit queries.
#[derive(Debug, Clone, Default)]
pub struct MotorStatus {
    pub connected: bool,
    pub flags: StatusFlags,
    pub position_steps: Option<f64>,
}

/// What a command returned, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// A bare acknowledgement.
    Ack,
    /// A value in the unit the command table declares.
    Value(Quantity),
    /// Raw reply text for commands without a declared result unit.
    Text(String),
}

/// How urgently to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// Decelerate and kill the command buffer.
    Soft,
    /// Immediate halt: jog stop, buffer kill, and stop.
    Hard,
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The TCP session dropped; reconnect.
    Lost,
    /// All actor handles are gone; the task can exit.
    Closed,
}

enum LinkRequest {
    Command {
        name: String,
        arg: Option<f64>,
        reply: oneshot::Sender<Result<Reply, ActorError>>,
    },
}

struct Channels {
    cmd_tx: mpsc::Sender<LinkRequest>,
    stop_tx: mpsc::Sender<StopKind>,
    task: TaskHandle,
}

/// Synchronous handle to one motor controller.
pub struct Motor {
    name: String,
    ip: Ipv4Addr,
    settings: MotorSettings,
    table: CommandTable,
    run_loop: Arc<RunLoop>,
    status: Arc<Mutex<MotorStatus>>,
    channels: Mutex<Option<Channels>>,
}

impl std::fmt::Debug for Motor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Motor")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Motor {
    /// Connects to the motor and brings the actor to Ready. Fails with
    /// `ConnectionLost` if the first connection cannot be established
    /// within the connect timeout.
    pub fn new(
        name: String,
        ip: Ipv4Addr,
        settings: MotorSettings,
        run_loop: Arc<RunLoop>,
    ) -> Result<Self, ActorError> {
        if settings.steps_per_rev == 0 {
            return Err(ActorError::ConfigInvalid(format!(
                "motor {name:?} has steps_per_rev = 0"
            )));
        }
        let motor = Self {
            name,
            ip,
            settings,
            table: CommandTable::default(),
            run_loop,
            status: Arc::new(Mutex::new(MotorStatus::default())),
            channels: Mutex::new(None),
        };
        motor.run()?;
        Ok(motor)
    }

    /// (Re)starts the link task. A no-op while the actor is already
    /// Ready; after `terminate` this reconnects and returns the actor
    /// to Ready.
    pub fn run(&self) -> Result<(), ActorError> {
        let mut channels = self.channels.lock();
        if let Some(existing) = channels.as_ref() {
            if !existing.task.is_finished() {
                return Ok(());
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = mpsc::channel(4);
        let (connected_tx, connected_rx) = oneshot::channel();

        let link = MotorLink {
            addr: SocketAddr::from((self.ip, self.settings.port)),
            name: self.name.clone(),
            table: self.table.clone(),
            status: self.status.clone(),
        };
        let task = self
            .run_loop
            .spawn_task(link.run(cmd_rx, stop_rx, connected_tx));

        *channels = Some(Channels {
            cmd_tx,
            stop_tx,
            task,
        });
        drop(channels);

        // Block until the first connection attempt resolves.
        let wait = CONNECT_TIMEOUT + Duration::from_secs(1);
        match self
            .run_loop
            .submit("motor connect", async move { connected_rx.await })
            .result(Some(wait))
        {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => {
                self.terminate();
                Err(err)
            }
            Ok(Err(_)) | Err(_) => {
                self.terminate();
                Err(ActorError::ConnectionLost(self.addr().to_string()))
            }
        }
    }

    /// Cancels the link task. The TCP session drops with it; `run`
    /// brings the actor back.
    pub fn terminate(&self) {
        if let Some(channels) = self.channels.lock().take() {
            channels.task.abort();
        }
        self.status.lock().connected = false;
    }

    pub fn terminated(&self) -> bool {
        self.channels.lock().is_none()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.settings.port))
    }

    pub fn settings(&self) -> &MotorSettings {
        &self.settings
    }

    pub fn steps_per_rev(&self) -> u32 {
        self.settings.steps_per_rev
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Whether the TCP session is currently up.
    pub fn connected(&self) -> bool {
        self.status.lock().connected
    }

    /// Last heartbeat's view of whether the motor is in motion.
    pub fn is_moving(&self) -> bool {
        self.status.lock().flags.is_moving()
    }

    pub fn status(&self) -> MotorStatus {
        self.status.lock().clone()
    }

    /// Steps/rev equivalence for motor-level conversions. Length
    /// relations need the axis pitch; the axis converts lengths before
    /// they reach the motor.
    fn equivalence(&self) -> Equivalence {
        Equivalence::new(self.settings.steps_per_rev as f64, 1.0, LengthUnit::Cm)
            .unwrap_or_else(|_| unreachable!("steps_per_rev validated nonzero"))
    }

    /// Queues a command on the link task; the returned future resolves
    /// with the decoded reply. Safe to hold across other submissions;
    /// the link serializes execution order by arrival.
    pub(crate) fn submit_command(
        &self,
        name: String,
        arg: Option<f64>,
    ) -> impl Future<Output = Result<Reply, ActorError>> + Send + 'static {
        let cmd_tx = self.channels.lock().as_ref().map(|c| c.cmd_tx.clone());
        async move {
            let Some(cmd_tx) = cmd_tx else {
                return Err(ActorError::Terminated);
            };
            let (tx, rx) = oneshot::channel();
            cmd_tx
                .send(LinkRequest::Command {
                    name,
                    arg,
                    reply: tx,
                })
                .await
                .map_err(|_| ActorError::Terminated)?;
            rx.await.map_err(|_| ActorError::Terminated)?
        }
    }

    /// Sends a named command with an optional argument quantity and
    /// decodes the reply per the command table.
    pub fn send_command(
        &self,
        name: &str,
        arg: Option<Quantity>,
    ) -> Result<CommandReply, ActorError> {
        let spec = *self.table.get(name)?;

        let arg_value = match (arg, spec.arg_unit) {
            (Some(q), Some(unit)) => Some(q.to(motor_unit(unit), &self.equivalence())?.value),
            (Some(q), None) => Some(q.value),
            (None, _) => None,
        };

        let fut = self.submit_command(name.to_string(), arg_value);
        let reply = self
            .run_loop
            .submit(name, fut)
            .result(Some(2 * REPLY_TIMEOUT))??;
        decode_reply(&spec, reply)
    }

    /// Current encoder position.
    pub fn position(&self) -> Result<Quantity, ActorError> {
        match self.send_command("get_position", None)? {
            CommandReply::Value(q) => {
                self.status.lock().position_steps = Some(q.value);
                Ok(q)
            }
            other => Err(ActorError::Protocol(ProtocolError::BadValue(format!(
                "{other:?}"
            )))),
        }
    }

    /// Immediate motor velocity.
    pub fn velocity(&self) -> Result<Quantity, ActorError> {
        match self.send_command("velocity", None)? {
            CommandReply::Value(q) => Ok(q),
            other => Err(ActorError::Protocol(ProtocolError::BadValue(format!(
                "{other:?}"
            )))),
        }
    }

    /// The absolute-position move: set the target, then feed to it.
    pub fn move_to(&self, target: Quantity) -> Result<(), ActorError> {
        let steps = target.to(Unit::Steps, &self.equivalence())?.value;
        let fut = self.move_to_future(steps);
        self.run_loop
            .submit("move_to", fut)
            .result(Some(3 * REPLY_TIMEOUT))?
    }

    /// Async form of [`move_to`](Self::move_to) for concurrent
    /// multi-axis dispatch; `steps` is already in motor steps.
    pub(crate) fn move_to_future(
        &self,
        steps: f64,
    ) -> impl Future<Output = Result<(), ActorError>> + Send + 'static {
        let set = self.submit_command("set_target".to_string(), Some(steps));
        let feed = self.submit_command("feed".to_string(), None);
        async move {
            set.await?;
            feed.await?;
            Ok(())
        }
    }

    /// Issues the stop sequence on the fast path, bypassing the command
    /// queue. Never raises; at worst the stop is a no-op on a
    /// terminated actor.
    pub fn stop(&self, soft: bool) {
        let kind = if soft { StopKind::Soft } else { StopKind::Hard };
        let channels = self.channels.lock();
        match channels.as_ref() {
            Some(c) => {
                if c.stop_tx.try_send(kind).is_err() {
                    warn!(motor = %self.name, "stop channel full or closed; stop not queued");
                }
            }
            None => debug!(motor = %self.name, "stop on terminated motor ignored"),
        }
    }

    /// Enables or disables the drive output.
    pub fn enable(&self, on: bool) -> Result<(), ActorError> {
        let name = if on { "enable" } else { "disable" };
        self.send_command(name, None).map(|_| ())
    }

    /// Zeroes the encoder and the commanded position, reading the
    /// encoder back to confirm it took.
    pub fn set_zero(&self) -> Result<(), ActorError> {
        let zero = Quantity::new(0.0, Unit::Steps);
        self.send_command("set_encoder_position", Some(zero))?;
        let read_back = self.position()?;
        if read_back.value != 0.0 {
            return Err(ActorError::Protocol(ProtocolError::BadValue(format!(
                "encoder did not zero, reads {}",
                read_back.value
            ))));
        }
        self.send_command("set_position", Some(zero))?;
        Ok(())
    }

    /// Sets the move speed.
    pub fn set_speed(&self, speed: Quantity) -> Result<(), ActorError> {
        self.send_command("set_speed", Some(speed)).map(|_| ())
    }

    /// Sets the move acceleration.
    pub fn set_acceleration(&self, accel: Quantity) -> Result<(), ActorError> {
        self.send_command("set_accel", Some(accel)).map(|_| ())
    }

    /// Sets the move deceleration.
    pub fn set_deceleration(&self, decel: Quantity) -> Result<(), ActorError> {
        self.send_command("set_decel", Some(decel)).map(|_| ())
    }

    /// Queries the current alarm code.
    pub fn alarm(&self) -> Result<String, ActorError> {
        match self.send_command("alarm", None)? {
            CommandReply::Text(code) => Ok(code),
            CommandReply::Ack => Ok(String::new()),
            CommandReply::Value(q) => Ok(q.value.to_string()),
        }
    }

    /// Clears a latched alarm condition.
    pub fn clear_alarm(&self) -> Result<(), ActorError> {
        self.send_command("clear_alarm", None).map(|_| ())
    }
}

/// Maps the drive's native units into the unit algebra.
fn motor_unit(unit: MotorUnit) -> Unit {
    match unit {
        MotorUnit::Steps => Unit::Steps,
        MotorUnit::Rev => Unit::Rev,
        MotorUnit::RevPerSec => Unit::RevPerSec,
        MotorUnit::RevPerSec2 => Unit::RevPerSec2,
    }
}

fn decode_reply(
    spec: &probe_proto::CommandSpec,
    reply: Reply,
) -> Result<CommandReply, ActorError> {
    if let Some(unit) = spec.reply_unit {
        let value = reply.value(spec)?;
        return Ok(CommandReply::Value(Quantity::new(value, motor_unit(unit))));
    }
    if reply.is_ack() {
        return Ok(CommandReply::Ack);
    }
    Ok(CommandReply::Text(reply.text().to_string()))
}

/// The task that owns the TCP session.
struct MotorLink {
    addr: SocketAddr,
    name: String,
    table: CommandTable,
    status: Arc<Mutex<MotorStatus>>,
}

impl MotorLink {
    async fn run(
        self,
        mut cmd_rx: mpsc::Receiver<LinkRequest>,
        mut stop_rx: mpsc::Receiver<StopKind>,
        connected_tx: oneshot::Sender<Result<(), ActorError>>,
    ) {
        let mut first_connect = Some(connected_tx);

        loop {
            let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => {
                    warn!(motor = %self.name, addr = %self.addr, %err, "motor connect failed");
                    if let Some(tx) = first_connect.take() {
                        let _ = tx.send(Err(ActorError::ConnectionLost(self.addr.to_string())));
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
                Err(_) => {
                    warn!(motor = %self.name, addr = %self.addr, "motor connect timed out");
                    if let Some(tx) = first_connect.take() {
                        let _ = tx.send(Err(ActorError::Timeout(
                            CONNECT_TIMEOUT,
                            format!("connect to {}", self.addr),
                        )));
                        return;
                    }
                    continue;
                }
            };

            info!(motor = %self.name, addr = %self.addr, "motor connected");
            let mut framed = Framed::new(stream, MotorCodec::new());
            let mut stale_replies = 0usize;

            self.status.lock().connected = true;
            if let Some(tx) = first_connect.take() {
                let _ = tx.send(Ok(()));
            }

            // Connect-time setup: decimal reply format, enable the
            // drive, prime the status cache. Best effort; a drive that
            // answers slowly still comes up.
            let mut setup_lost = false;
            for setup in ["format_decimal", "enable", "status"] {
                match self
                    .execute(&mut framed, &mut stale_replies, setup, None)
                    .await
                {
                    Ok(_) => {}
                    Err(ActorError::ConnectionLost(_)) => {
                        setup_lost = true;
                        break;
                    }
                    Err(err) => {
                        warn!(motor = %self.name, command = setup, %err, "connect setup failed");
                    }
                }
            }

            if !setup_lost {
                let end = self
                    .session(&mut framed, &mut stale_replies, &mut cmd_rx, &mut stop_rx)
                    .await;
                if end == SessionEnd::Closed {
                    // Every handle to this actor is gone.
                    self.status.lock().connected = false;
                    return;
                }
            }

            self.status.lock().connected = false;
            warn!(motor = %self.name, addr = %self.addr, "motor connection lost, reconnecting");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    /// Pumps stop requests, queued commands, and the heartbeat until
    /// the connection drops or every actor handle is gone.
    async fn session(
        &self,
        framed: &mut Framed<TcpStream, MotorCodec>,
        stale_replies: &mut usize,
        cmd_rx: &mut mpsc::Receiver<LinkRequest>,
        stop_rx: &mut mpsc::Receiver<StopKind>,
    ) -> SessionEnd {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                stop = stop_rx.recv() => {
                    let Some(kind) = stop else { return SessionEnd::Closed };
                    if self.issue_stop(framed, stale_replies, kind).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }

                request = cmd_rx.recv() => {
                    let Some(LinkRequest::Command { name, arg, reply }) = request else {
                        return SessionEnd::Closed;
                    };
                    let result = self.execute(framed, stale_replies, &name, arg).await;
                    let lost = matches!(result, Err(ActorError::ConnectionLost(_)));
                    let _ = reply.send(result);
                    if lost {
                        return SessionEnd::Lost;
                    }
                }

                _ = heartbeat.tick() => {
                    if self.refresh_status(framed, stale_replies).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }

    /// Writes one command and reads its reply, consuming stale replies
    /// left over from earlier timeouts first.
    async fn execute(
        &self,
        framed: &mut Framed<TcpStream, MotorCodec>,
        stale_replies: &mut usize,
        name: &str,
        arg: Option<f64>,
    ) -> Result<Reply, ActorError> {
        let command = self.table.encode(name, arg)?;
        debug!(motor = %self.name, body = %command.body, "sending command");

        framed
            .send(command.body.clone())
            .await
            .map_err(|err| self.map_protocol_error(err))?;

        while *stale_replies > 0 {
            match self.read_reply(framed, &command.body).await {
                Ok(stale) => {
                    debug!(motor = %self.name, reply = %stale.text(), "discarding stale reply");
                    *stale_replies -= 1;
                }
                Err(err) => {
                    if matches!(err, ActorError::Timeout(..)) {
                        *stale_replies += 1;
                    }
                    return Err(err);
                }
            }
        }

        match self.read_reply(framed, &command.body).await {
            Ok(reply) => {
                if reply.is_rejected() {
                    return Err(ActorError::Protocol(ProtocolError::Rejected(
                        reply.text().to_string(),
                    )));
                }
                Ok(reply)
            }
            Err(err) => {
                if matches!(err, ActorError::Timeout(..)) {
                    *stale_replies += 1;
                }
                Err(err)
            }
        }
    }

    async fn read_reply(
        &self,
        framed: &mut Framed<TcpStream, MotorCodec>,
        what: &str,
    ) -> Result<Reply, ActorError> {
        match timeout(REPLY_TIMEOUT, framed.next()).await {
            Err(_) => Err(ActorError::Timeout(
                REPLY_TIMEOUT,
                format!("reply to {what}"),
            )),
            Ok(None) => Err(ActorError::ConnectionLost(self.addr.to_string())),
            Ok(Some(Err(err))) => Err(self.map_protocol_error(err)),
            Ok(Some(Ok(text))) => Ok(Reply::new(text)),
        }
    }

    fn map_protocol_error(&self, err: ProtocolError) -> ActorError {
        match err {
            ProtocolError::Io(_) => ActorError::ConnectionLost(self.addr.to_string()),
            other => ActorError::Protocol(other),
        }
    }

    async fn issue_stop(
        &self,
        framed: &mut Framed<TcpStream, MotorCodec>,
        stale_replies: &mut usize,
        kind: StopKind,
    ) -> Result<(), ActorError> {
        let sequence: &[&str] = match kind {
            StopKind::Soft => &["stop_kill"],
            StopKind::Hard => &["stop_jog", "stop_kill", "stop"],
        };
        for &name in sequence {
            match self.execute(framed, stale_replies, name, None).await {
                Ok(_) => {}
                Err(err @ ActorError::ConnectionLost(_)) => return Err(err),
                Err(err) => warn!(motor = %self.name, command = name, %err, "stop command failed"),
            }
        }
        Ok(())
    }

    async fn refresh_status(
        &self,
        framed: &mut Framed<TcpStream, MotorCodec>,
        stale_replies: &mut usize,
    ) -> Result<(), ActorError> {
        match self.execute(framed, stale_replies, "status", None).await {
            Ok(reply) => {
                let flags = StatusFlags::parse(reply.payload());
                if flags.alarm {
                    warn!(motor = %self.name, "motor reports an alarm condition");
                }
                self.status.lock().flags = flags;
            }
            Err(err @ ActorError::ConnectionLost(_)) => return Err(err),
            Err(err) => {
                debug!(motor = %self.name, %err, "status heartbeat failed");
                return Ok(());
            }
        }

        match self
            .execute(framed, stale_replies, "get_position", None)
            .await
        {
            Ok(reply) => {
                if let Ok(spec) = self.table.get("get_position") {
                    if let Ok(value) = reply.value(spec) {
                        self.status.lock().position_steps = Some(value);
                    }
                }
            }
            Err(err @ ActorError::ConnectionLost(_)) => return Err(err),
            Err(_) => {}
        }
        Ok(())
    }
}
