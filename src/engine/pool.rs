use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::parser::yaml_parser::Capacity;

struct PoolState {
    capacity: Capacity,
    in_use: usize,
    waiting: VecDeque<u64>,
    wakers: HashMap<u64, Waker>,
    granted: HashSet<u64>,
    next_ticket: u64,
}

/// Fixed-size set of service channels with a FIFO line of pending
/// acquisitions. The pool never turns anybody away; bounding the line is the
/// caller's business.
#[derive(Clone)]
pub struct ChannelPool {
    state: Rc<RefCell<PoolState>>,
}

impl ChannelPool {
    pub fn new(capacity: Capacity) -> Self {
        Self {
            state: Rc::new(RefCell::new(PoolState {
                capacity,
                in_use: 0,
                waiting: VecDeque::new(),
                wakers: HashMap::new(),
                granted: HashSet::new(),
                next_ticket: 0,
            })),
        }
    }

    pub fn capacity(&self) -> Capacity {
        self.state.borrow().capacity
    }

    /// Resolves to a guard once a channel is assigned to the caller.
    pub fn acquire(&self) -> Acquire {
        Acquire {
            pool: self.clone(),
            ticket: None,
        }
    }

    /// Frees the guard's channel; the longest waiting acquisition gets it.
    pub fn release(&self, guard: ChannelGuard) {
        drop(guard);
    }

    pub fn available_count(&self) -> Capacity {
        let state = self.state.borrow();
        match state.capacity {
            Capacity::Finite(n) => Capacity::Finite(n - state.in_use),
            Capacity::Unbounded => Capacity::Unbounded,
        }
    }

    pub fn in_use_count(&self) -> usize {
        self.state.borrow().in_use
    }

    pub fn queue_length(&self) -> usize {
        self.state.borrow().waiting.len()
    }

    /// True when an `acquire` issued now would complete without waiting.
    pub fn has_free_channel(&self) -> bool {
        let state = self.state.borrow();
        state.waiting.is_empty() && state.capacity.admits(state.in_use)
    }

    /// Gives a channel back. If somebody is waiting the slot passes straight
    /// to them, so `in_use` never drops in between.
    fn release_slot(&self) {
        let next = {
            let mut state = self.state.borrow_mut();
            match state.waiting.pop_front() {
                Some(ticket) => {
                    state.granted.insert(ticket);
                    trace!(ticket, "Channel handed over");
                    state.wakers.remove(&ticket)
                }
                None => {
                    state.in_use -= 1;
                    None
                }
            }
        };
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

/// Future returned by [`ChannelPool::acquire`]. Dropping it while queued
/// withdraws from the line; dropping it after a channel was handed over
/// returns that channel.
pub struct Acquire {
    pool: ChannelPool,
    ticket: Option<u64>,
}

impl Future for Acquire {
    type Output = ChannelGuard;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ChannelGuard> {
        let this = self.get_mut();
        let mut state = this.pool.state.borrow_mut();
        match this.ticket {
            Some(ticket) => {
                if state.granted.remove(&ticket) {
                    this.ticket = None;
                    return Poll::Ready(ChannelGuard {
                        pool: this.pool.clone(),
                    });
                }
                state.wakers.insert(ticket, cx.waker().clone());
                Poll::Pending
            }
            None => {
                if state.waiting.is_empty() && state.capacity.admits(state.in_use) {
                    state.in_use += 1;
                    return Poll::Ready(ChannelGuard {
                        pool: this.pool.clone(),
                    });
                }
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.waiting.push_back(ticket);
                state.wakers.insert(ticket, cx.waker().clone());
                this.ticket = Some(ticket);
                Poll::Pending
            }
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        let was_granted = {
            let mut state = self.pool.state.borrow_mut();
            state.wakers.remove(&ticket);
            if state.granted.remove(&ticket) {
                true
            } else {
                state.waiting.retain(|t| *t != ticket);
                false
            }
        };
        if was_granted {
            self.pool.release_slot();
        }
    }
}

/// A held channel. Dropping the guard releases it.
pub struct ChannelGuard {
    pool: ChannelPool,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.pool.release_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::race::{race, Race};
    use crate::engine::scheduler::EventClock;

    type Log = Rc<RefCell<Vec<(usize, f64)>>>;

    fn holder(clock: &EventClock, pool: &ChannelPool, hold: f64, log: Log, id: usize) {
        let clock_ = clock.clone();
        let pool = pool.clone();
        clock.spawn(async move {
            let guard = pool.acquire().await;
            log.borrow_mut().push((id, clock_.now()));
            clock_.sleep(hold).await;
            pool.release(guard);
        });
    }

    #[test]
    fn waiters_are_served_in_fifo_order() {
        let clock = EventClock::new();
        let pool = ChannelPool::new(Capacity::Finite(1));
        let log = Rc::new(RefCell::new(vec![]));
        for id in 0..4 {
            holder(&clock, &pool, 1.0, log.clone(), id);
        }
        clock.run();
        assert_eq!(*log.borrow(), vec![(0, 0.0), (1, 1.0), (2, 2.0), (3, 3.0)]);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.queue_length(), 0);
    }

    #[test]
    fn counters_track_holders_and_queue() {
        let clock = EventClock::new();
        let pool = ChannelPool::new(Capacity::Finite(2));
        let log = Rc::new(RefCell::new(vec![]));
        for id in 0..5 {
            holder(&clock, &pool, 10.0, log.clone(), id);
        }
        clock.run_until(1.0);
        assert_eq!(pool.in_use_count(), 2);
        assert_eq!(pool.queue_length(), 3);
        assert_eq!(pool.available_count(), Capacity::Finite(0));
        assert!(!pool.has_free_channel());

        clock.run_until(10.0);
        // Both releases at t=10 hand their slots straight to the next two.
        assert_eq!(pool.in_use_count(), 2);
        assert_eq!(pool.queue_length(), 1);
        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn withdrawn_acquisition_leaves_the_line() {
        let clock = EventClock::new();
        let pool = ChannelPool::new(Capacity::Finite(1));
        let log = Rc::new(RefCell::new(vec![]));
        holder(&clock, &pool, 5.0, log.clone(), 0);

        let clock_ = clock.clone();
        let pool_ = pool.clone();
        let gave_up = Rc::new(RefCell::new(false));
        let gave_up_ = gave_up.clone();
        clock.spawn(async move {
            match race(pool_.acquire(), clock_.sleep(1.0)).await {
                Race::First(guard, _) => drop(guard),
                Race::Second(pending, ()) => {
                    drop(pending);
                    *gave_up_.borrow_mut() = true;
                }
            }
        });
        holder(&clock, &pool, 1.0, log.clone(), 2);

        clock.run_until(2.0);
        assert!(*gave_up.borrow());
        assert_eq!(pool.queue_length(), 1);
        clock.run();
        assert_eq!(*log.borrow(), vec![(0, 0.0), (2, 5.0)]);
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn unbounded_pool_never_blocks() {
        let clock = EventClock::new();
        let pool = ChannelPool::new(Capacity::Unbounded);
        let log = Rc::new(RefCell::new(vec![]));
        for id in 0..100 {
            holder(&clock, &pool, 1.0, log.clone(), id);
        }
        clock.run_until(0.5);
        assert_eq!(pool.in_use_count(), 100);
        assert_eq!(pool.queue_length(), 0);
        assert_eq!(pool.available_count(), Capacity::Unbounded);
        clock.run();
        assert!(log.borrow().iter().all(|(_, t)| *t == 0.0));
    }

    #[test]
    fn shutdown_releases_held_channels() {
        let clock = EventClock::new();
        let pool = ChannelPool::new(Capacity::Finite(1));
        let first = pool.clone();
        clock.spawn(async move {
            let guard = first.acquire().await;
            drop(guard);
        });
        let second = pool.clone();
        let task_clock = clock.clone();
        clock.spawn(async move {
            let _guard = second.acquire().await;
            task_clock.sleep(100.0).await;
        });
        clock.run_until(1.0);
        assert_eq!(pool.in_use_count(), 1);
        clock.shutdown();
        assert_eq!(pool.in_use_count(), 0);
    }

    struct NoopWaker;

    impl std::task::Wake for NoopWaker {
        fn wake(self: std::sync::Arc<Self>) {}
    }

    #[test]
    fn granted_but_unobserved_acquisition_passes_the_channel_on() {
        let pool = ChannelPool::new(Capacity::Finite(1));
        let waker = Waker::from(std::sync::Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);

        let mut first = pool.acquire();
        let guard = match Pin::new(&mut first).poll(&mut cx) {
            Poll::Ready(guard) => guard,
            Poll::Pending => panic!("free channel must be granted at once"),
        };
        let mut second = pool.acquire();
        let mut third = pool.acquire();
        assert!(Pin::new(&mut second).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut third).poll(&mut cx).is_pending());

        pool.release(guard);
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.queue_length(), 1);

        drop(second);
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.queue_length(), 0);

        match Pin::new(&mut third).poll(&mut cx) {
            Poll::Ready(guard) => drop(guard),
            Poll::Pending => panic!("third in line should hold the channel"),
        }
        assert_eq!(pool.in_use_count(), 0);
    }
}
