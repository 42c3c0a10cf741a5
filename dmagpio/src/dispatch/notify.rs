//! Notification registry.
//!
//! A fixed table of handles. Each open handle owns a report queue that the
//! dispatch engine appends to and a [`NotifyReader`] drains as a byte
//! stream of 12-byte records.
//!
//! The producer never blocks: a full queue drops its oldest report. The
//! sequence number counts every report generated for the handle since it
//! was opened, so dropped reports show up as gaps.

use dmagpio_common::consts::{NOTIFY_SLOTS, REPORT_SIZE};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::report::{Report, ReportFlags};
use dmagpio_common::types::pin_bit;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ─── Queue ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct QueueInner {
    reports: VecDeque<Report>,
    closed: bool,
    dropped: u64,
}

/// Bounded report queue with drop-oldest overflow.
#[derive(Debug)]
pub struct ReportQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
    capacity: usize,
}

impl ReportQueue {
    /// Create a queue holding `capacity` reports.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                reports: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            cond: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, report: Report) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if inner.reports.len() >= self.capacity {
            inner.reports.pop_front();
            inner.dropped += 1;
            if inner.dropped.is_power_of_two() {
                warn!("Notification reader lagging: {} reports dropped", inner.dropped);
            }
        }
        inner.reports.push_back(report);
        self.cond.notify_one();
    }

    /// Take the oldest report, waiting up to `timeout` (forever if `None`).
    ///
    /// Returns `None` on timeout or once the queue is closed and empty.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<Report> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        loop {
            if let Some(report) = inner.reports.pop_front() {
                return Some(report);
            }
            if inner.closed {
                return None;
            }
            match deadline {
                Some(d) => {
                    if self.cond.wait_until(&mut inner, d).timed_out() {
                        return inner.reports.pop_front();
                    }
                }
                None => self.cond.wait(&mut inner),
            }
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.cond.notify_all();
    }

    /// Reports waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().reports.len()
    }

    /// True when no report is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reports discarded on overflow.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

// ─── Reader ─────────────────────────────────────────────────────────

/// Consumer side of a handle.
///
/// Implements [`io::Read`]: each report is 12 little-endian bytes, and a
/// read blocks until at least one byte is available or the handle closes
/// (end of stream).
#[derive(Debug)]
pub struct NotifyReader {
    handle: u32,
    queue: Arc<ReportQueue>,
    partial: Vec<u8>,
}

impl NotifyReader {
    /// Handle this reader drains.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Next whole report, waiting up to `timeout`.
    pub fn read_report(&mut self, timeout: Duration) -> Option<Report> {
        self.queue.pop(Some(timeout))
    }

    /// Next whole report if one is queued.
    pub fn try_read_report(&mut self) -> Option<Report> {
        self.queue.pop(Some(Duration::ZERO))
    }

    /// Reports queued and not yet read.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Reports lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

impl io::Read for NotifyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.partial.is_empty() {
            match self.queue.pop(None) {
                Some(report) => self.partial.extend_from_slice(&report.to_bytes()),
                None => return Ok(0),
            }
            while self.partial.len() + REPORT_SIZE <= buf.len() {
                match self.queue.pop(Some(Duration::ZERO)) {
                    Some(report) => self.partial.extend_from_slice(&report.to_bytes()),
                    None => break,
                }
            }
        }
        let n = buf.len().min(self.partial.len());
        buf[..n].copy_from_slice(&self.partial[..n]);
        self.partial.drain(..n);
        Ok(n)
    }
}

// ─── Registry ───────────────────────────────────────────────────────

/// Lifecycle state of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Opened, no reports yet.
    Opened,
    /// Receiving reports for its mask.
    Running,
    /// Suspended; sequence number preserved.
    Paused,
}

#[derive(Debug)]
struct Slot {
    state: HandleState,
    mask: u32,
    seqno: u16,
    queue: Arc<ReportQueue>,
}

impl Slot {
    fn emit(&mut self, flags: ReportFlags, tick: u32, level: u32) {
        self.queue.push(Report {
            seqno: self.seqno,
            flags: flags.bits(),
            tick,
            level,
        });
        self.seqno = self.seqno.wrapping_add(1);
    }
}

/// Table of notification handles.
#[derive(Debug)]
pub struct NotifyRegistry {
    slots: Mutex<Vec<Option<Slot>>>,
    active_mask: AtomicU32,
    queue_depth: usize,
}

impl NotifyRegistry {
    /// Create an empty table whose queues hold `queue_depth` reports.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            slots: Mutex::new((0..NOTIFY_SLOTS).map(|_| None).collect()),
            active_mask: AtomicU32::new(0),
            queue_depth,
        }
    }

    /// Allocate a handle.
    ///
    /// # Errors
    /// `NoHandle` when every slot is in use.
    pub fn open(&self) -> GpioResult<u32> {
        let mut slots = self.slots.lock();
        let index = slots
            .iter()
            .position(Option::is_none)
            .ok_or(GpioError::NoHandle)?;
        slots[index] = Some(Slot {
            state: HandleState::Opened,
            mask: 0,
            seqno: 0,
            queue: Arc::new(ReportQueue::new(self.queue_depth)),
        });
        debug!("Notify handle {} opened", index);
        Ok(index as u32)
    }

    /// Start (or resume) reporting changes on the pins in `mask`.
    ///
    /// # Errors
    /// `BadHandle` if `handle` is not open.
    pub fn begin(&self, handle: u32, mask: u32) -> GpioResult<()> {
        let mut slots = self.slots.lock();
        let slot = slot_mut(&mut slots, handle)?;
        slot.mask = mask;
        slot.state = HandleState::Running;
        self.refresh_mask(&slots);
        debug!("Notify handle {} running, mask {:#010x}", handle, mask);
        Ok(())
    }

    /// Suspend reporting.
    ///
    /// # Errors
    /// `BadHandle` if `handle` is not open.
    pub fn pause(&self, handle: u32) -> GpioResult<()> {
        let mut slots = self.slots.lock();
        slot_mut(&mut slots, handle)?.state = HandleState::Paused;
        self.refresh_mask(&slots);
        Ok(())
    }

    /// Release `handle`. Its reader sees end of stream once drained.
    ///
    /// # Errors
    /// `BadHandle` if `handle` is not open.
    pub fn close(&self, handle: u32) -> GpioResult<()> {
        let mut slots = self.slots.lock();
        slot_mut(&mut slots, handle)?;
        if let Some(slot) = slots[handle as usize].take() {
            slot.queue.close();
        }
        self.refresh_mask(&slots);
        debug!("Notify handle {} closed", handle);
        Ok(())
    }

    /// Reader for `handle`.
    ///
    /// # Errors
    /// `BadHandle` if `handle` is not open.
    pub fn reader(&self, handle: u32) -> GpioResult<NotifyReader> {
        let mut slots = self.slots.lock();
        let slot = slot_mut(&mut slots, handle)?;
        Ok(NotifyReader {
            handle,
            queue: Arc::clone(&slot.queue),
            partial: Vec::new(),
        })
    }

    /// State of `handle`.
    ///
    /// # Errors
    /// `BadHandle` if `handle` is not open.
    pub fn state(&self, handle: u32) -> GpioResult<HandleState> {
        let mut slots = self.slots.lock();
        Ok(slot_mut(&mut slots, handle)?.state)
    }

    /// Union of the masks of every running handle.
    pub fn active_mask(&self) -> u32 {
        self.active_mask.load(Ordering::Acquire)
    }

    /// Close every handle.
    pub fn close_all(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut().filter_map(Option::take) {
            slot.queue.close();
        }
        self.refresh_mask(&slots);
    }

    fn refresh_mask(&self, slots: &[Option<Slot>]) {
        let mask = slots
            .iter()
            .flatten()
            .filter(|s| s.state == HandleState::Running)
            .fold(0, |acc, s| acc | s.mask);
        self.active_mask.store(mask, Ordering::Release);
    }

    /// Report one sample whose changed pins are `changed`.
    pub(crate) fn publish_change(&self, changed: u32, tick: u32, level: u32) {
        if changed & self.active_mask() == 0 {
            return;
        }
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut().flatten() {
            if slot.state == HandleState::Running && slot.mask & changed != 0 {
                slot.emit(ReportFlags::empty(), tick, level);
            }
        }
    }

    /// Report a watchdog timeout on `pin`.
    pub(crate) fn publish_watchdog(&self, pin: u8, tick: u32, level: u32) {
        let bit = pin_bit(pin) as u32;
        if bit & self.active_mask() == 0 {
            return;
        }
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut().flatten() {
            if slot.state == HandleState::Running && slot.mask & bit != 0 {
                slot.emit(ReportFlags::watchdog(pin), tick, level);
            }
        }
    }
}

fn slot_mut(slots: &mut [Option<Slot>], handle: u32) -> GpioResult<&mut Slot> {
    slots
        .get_mut(handle as usize)
        .and_then(Option::as_mut)
        .ok_or(GpioError::BadHandle(handle))
}
