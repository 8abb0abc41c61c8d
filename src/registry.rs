//! C3: pending-command registry and its timeout alarm.
//!
//! Grounded on the original's `command_credits`/`commands_pending_response`
//! pair plus `transmit_command_timeout_alarm` and `command_timed_out`. The
//! original uses one global mutex, one `list_t`, and a single `alarm_t`
//! armed for the list head; this keeps that shape — one [`Mutex`] guarding a
//! [`VecDeque`], one background thread standing in for the alarm.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::collaborators::FatalFaultReporter;
use crate::packet::Packet;

pub type CompleteCallback = Box<dyn FnOnce(Packet) + Send>;
pub type StatusCallback = Box<dyn FnOnce(u8, Packet) + Send>;

/// One command the registry is waiting on a response for.
///
/// `command_buffer` is the registry's own copy, held so a timeout can log
/// the opcode; the copy actually written to the wire is cloned off of this
/// one before transmission (see DESIGN.md, "command buffer ownership").
pub struct WaitingCommand {
    pub opcode: u16,
    pub command_buffer: Packet,
    pub on_complete: Option<CompleteCallback>,
    pub on_status: Option<StatusCallback>,
}

impl WaitingCommand {
    pub fn new(opcode: u16, command_buffer: Packet) -> Self {
        WaitingCommand { opcode, command_buffer, on_complete: None, on_status: None }
    }
}

struct Inner {
    queue: VecDeque<WaitingCommand>,
    /// Bumped every time the head of `queue` changes, so a timer thread that
    /// wakes up after the head has already been answered can tell its wakeup
    /// is stale and go back to sleep instead of misfiring (§4.3).
    generation: u64,
}

/// The registry itself: credit-gated FIFO of in-flight commands plus the
/// alarm that fires if the head goes unanswered too long.
pub struct PendingCommands {
    inner: Mutex<Inner>,
    condvar: Condvar,
    config_timeout: Duration,
    fault_reporter: Arc<dyn FatalFaultReporter>,
    alarm_thread: Mutex<Option<JoinHandle<()>>>,
    shutting_down: Mutex<bool>,
}

impl PendingCommands {
    pub fn new(
        timeout: Duration,
        fault_reporter: Arc<dyn FatalFaultReporter>,
    ) -> Arc<Self> {
        let this = Arc::new_cyclic(|weak: &Weak<PendingCommands>| {
            let alarm_thread = spawn_alarm_thread(weak.clone(), timeout);
            PendingCommands {
                inner: Mutex::new(Inner { queue: VecDeque::new(), generation: 0 }),
                condvar: Condvar::new(),
                config_timeout: timeout,
                fault_reporter,
                alarm_thread: Mutex::new(Some(alarm_thread)),
                shutting_down: Mutex::new(false),
            }
        });
        this
    }

    pub fn push(&self, command: WaitingCommand) {
        let mut inner = self.inner.lock().unwrap();
        let was_empty = inner.queue.is_empty();
        inner.queue.push_back(command);
        if was_empty {
            inner.generation += 1;
            self.condvar.notify_all();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn head_opcode(&self) -> Option<u16> {
        self.inner.lock().unwrap().queue.front().map(|c| c.opcode)
    }

    /// Removes and returns the waiting command for `opcode`, wherever it
    /// sits in the queue (the original scans `commands_pending_response`
    /// linearly in `get_waiting_command`).
    pub fn take_by_opcode(&self, opcode: u16) -> Option<WaitingCommand> {
        let mut inner = self.inner.lock().unwrap();
        let was_head = inner.queue.front().map(|c| c.opcode) == Some(opcode);
        let pos = inner.queue.iter().position(|c| c.opcode == opcode)?;
        let command = inner.queue.remove(pos);
        if was_head {
            inner.generation += 1;
            self.condvar.notify_all();
        }
        command
    }

    pub fn drain(&self) -> Vec<WaitingCommand> {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        self.condvar.notify_all();
        inner.queue.drain(..).collect()
    }

    pub fn shut_down(&self) {
        *self.shutting_down.lock().unwrap() = true;
        self.condvar.notify_all();
        if let Some(handle) = self.alarm_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PendingCommands {
    fn drop(&mut self) {
        *self.shutting_down.lock().unwrap() = true;
        self.condvar.notify_all();
    }
}

/// Background thread standing in for the original's single `alarm_t`
/// rearmed against the queue head. Parks on the condvar for `timeout`
/// (or until woken by a head change), and reports a fault only if it wakes
/// up by timing out *and* the generation it observed going to sleep is
/// still current.
fn spawn_alarm_thread(weak: Weak<PendingCommands>, timeout: Duration) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let pending = match weak.upgrade() {
            Some(p) => p,
            None => return,
        };

        let mut inner = pending.inner.lock().unwrap();
        loop {
            if *pending.shutting_down.lock().unwrap() {
                return;
            }
            if inner.queue.is_empty() {
                let (guard, timeout_result) =
                    pending.condvar.wait_timeout(inner, Duration::from_millis(50)).unwrap();
                inner = guard;
                if timeout_result.timed_out() && inner.queue.is_empty() {
                    continue;
                }
                continue;
            }

            let seen_generation = inner.generation;
            let deadline_wait = timeout;
            let (guard, timeout_result) =
                pending.condvar.wait_timeout(inner, deadline_wait).unwrap();
            inner = guard;

            if *pending.shutting_down.lock().unwrap() {
                return;
            }
            if timeout_result.timed_out() && inner.generation == seen_generation {
                if let Some(head) = inner.queue.front() {
                    let opcode = head.opcode;
                    drop(inner);
                    pending.fault_reporter.report(opcode);
                    return;
                }
            }
            break;
        }
        drop(inner);
    })
}

/// Process-terminating [`FatalFaultReporter`] used in production, matching
/// the original's `LOG_FATAL` + abort behavior for a wedged command.
pub struct ProcessTerminator;

impl FatalFaultReporter for ProcessTerminator {
    fn report(&self, opcode: u16) {
        log::error!(
            "command 0x{opcode:04x} timed out waiting for a response; terminating",
        );
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::EventTag;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder(Arc<AtomicUsize>);
    impl FatalFaultReporter for Recorder {
        fn report(&self, _opcode: u16) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn take_by_opcode_removes_regardless_of_position() {
        let count = Arc::new(AtomicUsize::new(0));
        let reg = PendingCommands::new(Duration::from_secs(60), Arc::new(Recorder(count)));
        reg.push(WaitingCommand::new(1, Packet::new(EventTag::Command, vec![1])));
        reg.push(WaitingCommand::new(2, Packet::new(EventTag::Command, vec![2])));
        let taken = reg.take_by_opcode(2).unwrap();
        assert_eq!(taken.opcode, 2);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.head_opcode(), Some(1));
        reg.shut_down();
    }

    #[test]
    fn fires_fault_reporter_after_timeout_on_unanswered_head() {
        let count = Arc::new(AtomicUsize::new(0));
        let reg = PendingCommands::new(Duration::from_millis(50), Arc::new(Recorder(count.clone())));
        reg.push(WaitingCommand::new(7, Packet::new(EventTag::Command, vec![7])));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn answering_before_timeout_suppresses_the_fault() {
        let count = Arc::new(AtomicUsize::new(0));
        let reg = PendingCommands::new(Duration::from_millis(100), Arc::new(Recorder(count.clone())));
        reg.push(WaitingCommand::new(9, Packet::new(EventTag::Command, vec![9])));
        thread::sleep(Duration::from_millis(20));
        reg.take_by_opcode(9);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        reg.shut_down();
    }
}
