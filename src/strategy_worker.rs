//! One side of one match: a worker instance driven through the line protocol.
//!
//! The host writes the opponent's previous move (`C` or `D` followed by a newline) before every
//! turn except the first, then waits for the worker to print its own move. Everything the worker
//! prints is read by a background task which only publishes how many lines were printed so far
//! and the most recent one. A turn considers the lines printed since the previous turn.
//!
//! Output is read as raw bytes: invalid UTF-8 is replaced, and lines longer than
//! [`MAX_LINE_LEN`] are truncated, so neither can be mistaken for a move.
//!
//! A worker misbehaving (too slow, printing garbage, exiting) never fails the match: the
//! [`Reply`] carries no move and the [`Anomaly`] explaining why.

use std::fmt::Display;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    sync::watch,
    task::JoinHandle,
    time::{timeout_at, Duration, Instant},
};
use tracing::{debug, error, instrument, trace, warn};

use crate::{
    configuration::Configuration,
    error::{Error, Result},
    launcher::{Instance, Launcher},
    payoff::Move,
};

/// Bytes of a printed line kept by the host, the rest of the line is discarded.
pub const MAX_LINE_LEN: usize = 64;

/// A protocol violation observed during one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// No new line before the move timeout.
    Timeout,
    /// The most recent new line is not a move.
    Unparseable(String),
    /// Several new lines arrived during the turn, only the last one was considered.
    MultipleOutputs(usize),
    /// The previous move could not be written to the worker.
    InputClosed,
    /// The worker closed its output (it most likely exited).
    OutputClosed,
}

impl Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::Timeout => write!(f, "no answer before the move timeout"),
            Anomaly::Unparseable(line) => write!(f, "unparseable answer '{line}'"),
            Anomaly::MultipleOutputs(n) => write!(f, "{n} answers for one turn"),
            Anomaly::InputClosed => write!(f, "input closed"),
            Anomaly::OutputClosed => write!(f, "output closed"),
        }
    }
}

/// Outcome of [`StrategyWorker::request_move`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    /// The parsed move, `None` when the worker did not give a usable one.
    pub choice: Option<Move>,
    /// Protocol violations observed during the turn, in order.
    pub anomalies: Vec<Anomaly>,
}

/// Owns a worker instance for the lifetime of one match side.
pub struct StrategyWorker {
    name: String,
    image: String,
    instance: Option<Box<dyn Instance>>,
    reader: Option<JoinHandle<()>>,
    output: watch::Receiver<Output>,
    lines_read: usize,
    move_timeout: Duration,
    noise: f64,
    rng: StdRng,
}

impl std::fmt::Debug for StrategyWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyWorker")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("running", &self.instance.is_some())
            .field("lines_read", &self.lines_read)
            .finish()
    }
}

/// What the output reader publishes.
#[derive(Debug, Default)]
struct Output {
    /// Lines printed since the start.
    count: usize,
    last: Option<String>,
}

/// Read one line into `line`, keeping at most [`MAX_LINE_LEN`] bytes of it.
///
/// Returns `false` at end of stream when nothing was read.
async fn read_bounded_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut read_any = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read_any);
        }
        read_any = true;
        let (content, used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..end], end + 1, true),
            None => (available, available.len(), false),
        };
        let room = MAX_LINE_LEN.saturating_sub(line.len());
        line.extend_from_slice(&content[..content.len().min(room)]);
        reader.consume(used);
        if complete {
            return Ok(true);
        }
    }
}

async fn collect_lines(
    output: Box<dyn AsyncRead + Send + Unpin>,
    log: watch::Sender<Output>,
    name: String,
) {
    let mut reader = BufReader::new(output);
    let mut raw = Vec::with_capacity(MAX_LINE_LEN);
    loop {
        match read_bounded_line(&mut reader, &mut raw).await {
            Ok(true) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches('\r').to_string();
                trace!("{name} printed '{line}'");
                log.send_modify(|output| {
                    output.count += 1;
                    output.last = Some(line);
                });
            }
            Ok(false) => {
                debug!("{name} closed its output");
                break;
            }
            Err(e) => {
                debug!("could not read output of {name}: {e}");
                break;
            }
        }
    }
}

impl StrategyWorker {
    /// Launch `image` as `instance_name` and start collecting its output.
    ///
    /// A failure of the launcher, or an instance without output stream, is an [`Error::Launch`];
    /// whatever was started is stopped before returning.
    #[instrument(skip(launcher, config))]
    pub async fn start(
        launcher: &dyn Launcher,
        image: &str,
        instance_name: &str,
        config: &Configuration,
    ) -> Result<StrategyWorker> {
        let launch_error = |source| Error::Launch {
            instance: instance_name.to_string(),
            image: image.to_string(),
            source,
        };

        let mut instance = launcher
            .start(image, instance_name)
            .await
            .map_err(launch_error)?;
        let Some(output) = instance.take_output() else {
            if let Err(e) = instance.force_stop().await {
                error!("could not stop {instance_name} after a partial start: {e:#}");
            }
            return Err(launch_error(anyhow::anyhow!("instance has no output stream")));
        };

        let (log, receiver) = watch::channel(Output::default());
        let reader = tokio::spawn(collect_lines(output, log, instance_name.to_string()));
        debug!("worker {instance_name} started");

        Ok(StrategyWorker {
            name: instance_name.to_string(),
            image: image.to_string(),
            instance: Some(instance),
            reader: Some(reader),
            output: receiver,
            lines_read: 0,
            move_timeout: config.move_timeout,
            noise: config.noise,
            rng: StdRng::from_entropy(),
        })
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image the instance was launched from.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Play one turn: forward the opponent's previous move (if any) and read the worker's answer.
    ///
    /// The write and the read share one deadline of `move_timeout`.
    pub async fn request_move(&mut self, previous_opponent_move: Option<Move>) -> Reply {
        let deadline = Instant::now() + self.move_timeout;
        let mut reply = Reply::default();

        if let Some(previous) = previous_opponent_move {
            let token = self.transmit(previous);
            if let Some(anomaly) = self.send(token, deadline).await {
                self.report(&mut reply, anomaly);
                return reply;
            }
        }

        let seen = self.lines_read;
        let printed = match timeout_at(deadline, self.output.wait_for(|o| o.count > seen)).await {
            Ok(Ok(output)) => Ok((output.count, output.last.clone())),
            Ok(Err(_closed)) => Err(Anomaly::OutputClosed),
            Err(_elapsed) => Err(Anomaly::Timeout),
        };
        let (count, last) = match printed {
            Ok(printed) => printed,
            Err(anomaly) => {
                self.report(&mut reply, anomaly);
                return reply;
            }
        };
        self.lines_read = count;

        let new_lines = count - seen;
        if new_lines > 1 {
            self.report(&mut reply, Anomaly::MultipleOutputs(new_lines));
        }
        // `wait_for` only returns once at least one line is new
        if let Some(last) = last {
            match last.parse::<Move>() {
                Ok(choice) => reply.choice = Some(choice),
                Err(_) => self.report(&mut reply, Anomaly::Unparseable(last)),
            }
        }
        reply
    }

    /// Noise policy: a cooperation may reach the worker as a defection.
    fn transmit(&mut self, previous: Move) -> Move {
        if previous == Move::Cooperate && self.noise > 0.0 && self.rng.gen_bool(self.noise) {
            trace!("noise flipped the move sent to {}", self.name);
            Move::Defect
        } else {
            previous
        }
    }

    async fn send(&mut self, token: Move, deadline: Instant) -> Option<Anomaly> {
        let Some(instance) = self.instance.as_mut() else {
            return Some(Anomaly::InputClosed);
        };
        let line = format!("{token}\n");
        let write = async {
            let input = instance.input();
            input.write_all(line.as_bytes()).await?;
            input.flush().await
        };
        match timeout_at(deadline, write).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                debug!("could not write to {}: {e}", self.name);
                Some(Anomaly::InputClosed)
            }
            Err(_elapsed) => Some(Anomaly::Timeout),
        }
    }

    fn report(&self, reply: &mut Reply, anomaly: Anomaly) {
        warn!(worker = %self.name, image = %self.image, "{anomaly}");
        reply.anomalies.push(anomaly);
    }

    /// Stop the instance and the output collection. Idempotent; failures are logged.
    pub async fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut instance) = self.instance.take() {
            match instance.force_stop().await {
                Ok(()) => debug!("worker {} stopped", self.name),
                Err(e) => error!("could not stop worker {}: {e:#}", self.name),
            }
        }
    }

    /// Whether [`teardown`](Self::teardown) already ran.
    pub fn is_torn_down(&self) -> bool {
        self.instance.is_none()
    }
}

impl Drop for StrategyWorker {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.instance.is_some() {
            error!("worker {} dropped without teardown", self.name);
        }
    }
}
