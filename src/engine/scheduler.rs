use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

use tracing::{debug, trace};

/// Simulated time, in the same unit as the configured rates.
pub type SimTime = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

type Activity = Pin<Box<dyn Future<Output = ()>>>;

/// A timer registered by a suspended future. Ties on `time` are broken by
/// `seq`, the registration order.
struct Wakeup {
    time: SimTime,
    seq: u64,
    waker: Waker,
}

impl PartialEq for Wakeup {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Wakeup {}

impl PartialOrd for Wakeup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Wakeup {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Tasks woken since the last poll, in wake order. Shared with the wakers,
/// which must be `Send + Sync`, hence the mutex.
#[derive(Default)]
struct ReadyQueue(Mutex<VecDeque<TaskId>>);

impl ReadyQueue {
    fn push(&self, id: TaskId) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
    }

    fn pop(&self) -> Option<TaskId> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

struct TaskWaker {
    id: TaskId,
    ready: Arc<ReadyQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.ready.push(self.id);
    }
}

#[derive(Default)]
struct ClockState {
    now: SimTime,
    next_seq: u64,
    next_task: u64,
    timers: BinaryHeap<Reverse<Wakeup>>,
    cancelled: HashSet<u64>,
    tasks: HashMap<TaskId, Activity>,
}

impl ClockState {
    /// Pops the earliest live wakeup due no later than `horizon`.
    fn pop_due(&mut self, horizon: SimTime) -> Option<Wakeup> {
        while let Some(Reverse(next)) = self.timers.peek() {
            if self.cancelled.remove(&next.seq) {
                self.timers.pop();
                continue;
            }
            if next.time > horizon {
                return None;
            }
            return self.timers.pop().map(|Reverse(w)| w);
        }
        None
    }
}

/// Continuous-time cooperative scheduler.
///
/// Activities are plain futures spawned onto the clock. They suspend on
/// [`Sleep`], on channel acquisition or on a [race](super::race::race), and
/// simulated time only moves forward between polls. The clock is cheap to
/// clone; clones share the same timeline.
#[derive(Clone, Default)]
pub struct EventClock {
    state: Rc<RefCell<ClockState>>,
    ready: Arc<ReadyQueue>,
}

impl EventClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.state.borrow().now
    }

    /// Schedules a detached activity. It is first polled at the current
    /// instant, after the tasks that are already ready.
    pub fn spawn<F>(&self, activity: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = TaskId(state.next_task);
            state.next_task += 1;
            state.tasks.insert(id, Box::pin(activity));
            id
        };
        self.ready.push(id);
        trace!(?id, "Spawned activity");
        id
    }

    /// Number of activities that have not finished yet.
    pub fn pending_tasks(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    pub fn sleep(&self, delay: SimTime) -> Sleep {
        let deadline = self.now() + delay.max(0.0);
        self.sleep_until(deadline)
    }

    pub fn sleep_until(&self, deadline: SimTime) -> Sleep {
        Sleep {
            clock: self.clone(),
            deadline,
            wakeup: None,
        }
    }

    fn register_wakeup(&self, time: SimTime, waker: Waker) -> u64 {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.push(Reverse(Wakeup { time, seq, waker }));
        seq
    }

    fn cancel_wakeup(&self, seq: u64) {
        self.state.borrow_mut().cancelled.insert(seq);
    }

    fn poll_ready(&self) {
        while let Some(id) = self.ready.pop() {
            // The activity is taken out of the map while it runs so that it
            // can spawn, sleep or cancel timers without re-entrant borrows.
            let activity = self.state.borrow_mut().tasks.remove(&id);
            let Some(mut activity) = activity else {
                continue;
            };
            let waker = Waker::from(Arc::new(TaskWaker {
                id,
                ready: self.ready.clone(),
            }));
            let mut cx = Context::from_waker(&waker);
            match activity.as_mut().poll(&mut cx) {
                Poll::Ready(()) => trace!(?id, "Activity finished"),
                Poll::Pending => {
                    self.state.borrow_mut().tasks.insert(id, activity);
                }
            }
        }
    }

    /// Runs until the next wakeup lies beyond `horizon` or nothing is left to
    /// do. A finite horizon is where the clock stands afterwards.
    pub fn run_until(&self, horizon: SimTime) -> SimTime {
        let mut fired = 0u64;
        loop {
            self.poll_ready();
            let due = self.state.borrow_mut().pop_due(horizon);
            let Some(wakeup) = due else {
                break;
            };
            self.state.borrow_mut().now = wakeup.time;
            wakeup.waker.wake();
            fired += 1;
        }
        let mut state = self.state.borrow_mut();
        if horizon.is_finite() && state.now < horizon {
            state.now = horizon;
        }
        debug!(
            fired,
            now = state.now,
            pending = state.tasks.len(),
            "Clock reached horizon"
        );
        state.now
    }

    /// Runs until no wakeup remains.
    pub fn run(&self) -> SimTime {
        self.run_until(SimTime::INFINITY)
    }

    /// Drops every unfinished activity.
    pub fn shutdown(&self) {
        let activities = std::mem::take(&mut self.state.borrow_mut().tasks);
        debug!(dropped = activities.len(), "Shutting down clock");
        drop(activities);
    }
}

/// Future returned by [`EventClock::sleep`]. An infinite deadline never fires.
/// Dropping a pending `Sleep` cancels its wakeup.
pub struct Sleep {
    clock: EventClock,
    deadline: SimTime,
    wakeup: Option<u64>,
}

impl Sleep {
    pub fn deadline(&self) -> SimTime {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.clock.now() >= self.deadline {
            self.wakeup = None;
            return Poll::Ready(());
        }
        if self.wakeup.is_none() && self.deadline.is_finite() {
            let seq = self.clock.register_wakeup(self.deadline, cx.waker().clone());
            self.wakeup = Some(seq);
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(seq) = self.wakeup.take() {
            self.clock.cancel_wakeup(seq);
        }
    }
}
