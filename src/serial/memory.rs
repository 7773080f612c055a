//! In-memory link for exercising delivery without hardware: records every
//! frame written and can be scripted to fail opens or writes.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Link, LinkConnector, LinkError};

/// What the next `write` call on a scripted link does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// Accept the whole buffer.
    Ok,
    /// Accept only this many bytes.
    Short(usize),
    /// Fail with an I/O error.
    Fail,
}

#[derive(Debug, Default)]
struct State {
    opens: u32,
    failing_opens: u32,
    write_calls: u32,
    script: VecDeque<WriteStep>,
    fallback: Option<WriteStep>,
    frames: Vec<Vec<u8>>,
}

/// Connector whose links share one recorded state. Clones observe the same
/// state, so a test keeps one clone and hands the other to the manager.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<State>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps consumed in order by successive writes; afterwards writes succeed
    /// unless [`always`](Self::always) set another fallback.
    pub fn script(self, steps: impl IntoIterator<Item = WriteStep>) -> Self {
        self.lock().script.extend(steps);
        self
    }

    pub fn always(self, step: WriteStep) -> Self {
        self.lock().fallback = Some(step);
        self
    }

    /// Fail the first `count` open calls.
    pub fn fail_opens(self, count: u32) -> Self {
        self.lock().failing_opens = count;
        self
    }

    pub fn opens(&self) -> u32 {
        self.lock().opens
    }

    pub fn write_calls(&self) -> u32 {
        self.lock().write_calls
    }

    /// Bytes of every accepted write, one entry per write.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LinkConnector for ScriptedConnector {
    fn open(&self) -> Result<Link, LinkError> {
        let mut state = self.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(LinkError::SerialPortUnavailable {
                port: "memory".to_string(),
                reason: "scripted open failure".to_string(),
            });
        }
        state.opens += 1;
        Ok(Box::new(ScriptedLink {
            state: Arc::clone(&self.state),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

struct ScriptedLink {
    state: Arc<Mutex<State>>,
}

impl Write for ScriptedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.write_calls += 1;
        let step = state
            .script
            .pop_front()
            .or(state.fallback)
            .unwrap_or(WriteStep::Ok);
        match step {
            WriteStep::Ok => {
                state.frames.push(buf.to_vec());
                Ok(buf.len())
            }
            WriteStep::Short(n) => {
                let n = n.min(buf.len());
                state.frames.push(buf[..n].to_vec());
                Ok(n)
            }
            WriteStep::Fail => Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write fault")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
