// src/exec/output.rs

//! Merged stdout/stderr relay.
//!
//! One task reads both pipes line by line and forwards every line as
//! [`RunEvent::LineCaptured`]. Draining both pipes continuously is what
//! keeps a chatty child from blocking on a full OS pipe buffer. A line
//! longer than [`MAX_LINE_BYTES`] is forwarded in pieces of at most that
//! size.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{EngineEvent, RunEvent};
use crate::exec::RunInfo;

/// Longest line held in memory before it is flushed as is.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Spawn the reader for one run. Finishes when both streams reach
/// end-of-stream (or fail).
pub fn spawn_output_reader(
    info: &RunInfo,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    events: mpsc::Sender<EngineEvent>,
) -> JoinHandle<()> {
    let task_id = info.task_id;
    let run_id = info.run_id;
    tokio::spawn(async move {
        relay_lines(task_id, run_id, stdout, stderr, events).await;
        debug!(task_id, run_id, "output reader finished");
    })
}

async fn relay_lines<O, E>(
    task_id: u64,
    run_id: u64,
    stdout: Option<O>,
    stderr: Option<E>,
    events: mpsc::Sender<EngineEvent>,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = stdout.map(BufReader::new);
    let mut err = stderr.map(BufReader::new);
    // Partial lines survive a lost `select!` race in these buffers.
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    while out.is_some() || err.is_some() {
        let (line, from_stdout) = tokio::select! {
            res = next_line(&mut out, &mut out_buf), if out.is_some() => (res, true),
            res = next_line(&mut err, &mut err_buf), if err.is_some() => (res, false),
        };

        let event = match line {
            Ok(Some(line)) => RunEvent::LineCaptured {
                task_id,
                run_id,
                line,
            },
            Ok(None) => {
                close(&mut out, &mut err, from_stdout);
                continue;
            }
            Err(e) => {
                warn!(task_id, run_id, error = %e, "output stream failed");
                close(&mut out, &mut err, from_stdout);
                RunEvent::StreamFailed {
                    task_id,
                    run_id,
                    error: e.to_string(),
                }
            }
        };

        if events.send(EngineEvent::Run(event)).await.is_err() {
            debug!(task_id, run_id, "engine gone; stopping output relay");
            return;
        }
    }
}

fn close<O, E>(out: &mut Option<O>, err: &mut Option<E>, from_stdout: bool) {
    if from_stdout {
        *out = None;
    } else {
        *err = None;
    }
}

/// Read one line, or the first [`MAX_LINE_BYTES`] of a longer one.
/// `Ok(None)` at end-of-stream or when the stream is closed.
///
/// Only `fill_buf` is awaited, so a cancelled call loses nothing: bytes
/// already consumed sit in `buf`.
async fn next_line<R>(
    reader: &mut Option<BufReader<R>>,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader.as_mut() else {
        return Ok(None);
    };
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }
        let room = MAX_LINE_BYTES - buf.len();
        match chunk.iter().position(|&b| b == b'\n') {
            Some(end) if end < room => {
                buf.extend_from_slice(&chunk[..=end]);
                reader.consume(end + 1);
                break;
            }
            _ => {
                let take = chunk.len().min(room);
                buf.extend_from_slice(&chunk[..take]);
                reader.consume(take);
                if buf.len() >= MAX_LINE_BYTES {
                    break;
                }
            }
        }
    }
    let line = decode_line(buf);
    buf.clear();
    Ok(Some(line))
}

/// Lossy UTF-8 with the line terminator stripped.
fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
