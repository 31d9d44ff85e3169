//! In-process strategies for tests, talking over `tokio::io::duplex` pipes.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::bail;
use async_trait::async_trait;
use tokio::{
    io::{duplex, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream},
    task::JoinHandle,
};

use super::{Instance, Launcher};
use crate::payoff::Move;

/// Behaviour of a scripted strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    /// Plays the same move every turn.
    Always(Move),
    /// Cooperates first, then copies the last received move.
    TitForTat,
    /// Never answers.
    Silent,
    /// Answers with a token that is not a move.
    Gibberish,
    /// Answers `D` then `C` on every turn.
    Chatty,
    /// Exits right away.
    Crash,
    /// Prints a line of invalid UTF-8 first, then defects.
    Garbled,
    /// Floods its first answer with many lines and an oversized one, then defects.
    Flood,
}

/// Lines printed before the oversized one by [`Script::Flood`].
pub(crate) const FLOOD_LINES: usize = 1000;

impl Script {
    async fn play(self, input: DuplexStream, mut output: DuplexStream) -> std::io::Result<()> {
        let mut lines = BufReader::new(input).lines();
        let mut last_received = None;
        let mut turn = 0;
        loop {
            let answer = match self {
                Script::Always(m) => format!("{m}\n").into_bytes(),
                Script::TitForTat => {
                    format!("{}\n", last_received.unwrap_or(Move::Cooperate)).into_bytes()
                }
                Script::Silent => vec![],
                Script::Gibberish => b"maybe\n".to_vec(),
                Script::Chatty => b"D\nC\n".to_vec(),
                Script::Crash => return Ok(()),
                Script::Garbled if turn == 0 => b"\xff\n".to_vec(),
                Script::Flood if turn == 0 => {
                    let mut flood = b"C\n".repeat(FLOOD_LINES);
                    flood.extend(std::iter::repeat(b'D').take(100_000));
                    flood.push(b'\n');
                    flood
                }
                Script::Garbled | Script::Flood => b"D\n".to_vec(),
            };
            turn += 1;
            output.write_all(&answer).await?;
            match lines.next_line().await? {
                Some(line) => last_received = line.parse().ok(),
                None => return Ok(()),
            }
        }
    }
}

/// Launches [`Script`]s by image name and records every start and stop.
#[derive(Default)]
pub(crate) struct ScriptedLauncher {
    scripts: HashMap<String, Script>,
    /// Images failing to start.
    broken: Vec<String>,
    pub(crate) started: Arc<Mutex<Vec<String>>>,
    pub(crate) stopped: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, image: &str, script: Script) -> Self {
        self.scripts.insert(image.to_string(), script);
        self
    }

    pub(crate) fn with_broken(mut self, image: &str) -> Self {
        self.broken.push(image.to_string());
        self
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub(crate) fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn start(&self, image: &str, instance_name: &str) -> anyhow::Result<Box<dyn Instance>> {
        if self.broken.iter().any(|b| b == image) {
            bail!("image {image} is broken");
        }
        let Some(script) = self.scripts.get(image).copied() else {
            bail!("unknown image {image}");
        };
        // yield so that concurrent starts interleave like real ones
        tokio::task::yield_now().await;

        let (input, worker_input) = duplex(1024);
        let (worker_output, output) = duplex(1024);
        let task = tokio::spawn(async move {
            let _ = script.play(worker_input, worker_output).await;
        });
        self.started.lock().unwrap().push(instance_name.to_string());
        Ok(Box::new(ScriptedInstance {
            name: instance_name.to_string(),
            input,
            output: Some(output),
            task,
            stopped: Arc::clone(&self.stopped),
            stopped_once: false,
        }))
    }
}

struct ScriptedInstance {
    name: String,
    input: DuplexStream,
    output: Option<DuplexStream>,
    task: JoinHandle<()>,
    stopped: Arc<Mutex<Vec<String>>>,
    stopped_once: bool,
}

#[async_trait]
impl Instance for ScriptedInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn input(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.input
    }

    fn take_output(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.output
            .take()
            .map(|o| Box::new(o) as Box<dyn AsyncRead + Send + Unpin>)
    }

    async fn force_stop(&mut self) -> anyhow::Result<()> {
        self.task.abort();
        if !self.stopped_once {
            self.stopped_once = true;
            self.stopped.lock().unwrap().push(self.name.clone());
        }
        Ok(())
    }
}

impl Drop for ScriptedInstance {
    fn drop(&mut self) {
        self.task.abort();
    }
}
