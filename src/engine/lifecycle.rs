use std::rc::Rc;

use tracing::trace;

use super::pool::ChannelGuard;
use super::race::{race, Race};
use super::request::Request;
use super::station::SimulationContext;
use crate::parser::yaml_parser::Capacity;

/// Poisson arrival stream: one new lifecycle per exponential gap, forever.
pub(crate) async fn arrivals(ctx: Rc<SimulationContext>) {
    loop {
        let gap = ctx.sample_interarrival();
        ctx.clock.sleep(gap).await;
        let id = ctx.next_request_id();
        ctx.clock.spawn(request_lifecycle(Rc::clone(&ctx), id));
    }
}

/// Takes one request from arrival to its terminal state and records it.
pub async fn request_lifecycle(ctx: Rc<SimulationContext>, id: u64) {
    let arrived = ctx.clock.now();
    let mut request = Request::arrive(id, arrived);
    let seen = ctx.observe_arrival();
    trace!(id, time = arrived, processing = seen.processing, waiting = seen.waiting, "Arrived");

    let Some(guard) = admit(&ctx, &mut request).await else {
        ctx.finish(request);
        return;
    };

    ctx.clock.sleep(ctx.sample_service()).await;
    ctx.pool.release(guard);
    let now = ctx.clock.now();
    request.complete(now);
    trace!(id, time = now, "Completed");
    ctx.finish(request);
}

/// Gets the request a channel, or leaves it rejected or abandoned.
async fn admit(ctx: &SimulationContext, request: &mut Request) -> Option<ChannelGuard> {
    let id = request.id;
    let pool = &ctx.pool;

    if pool.has_free_channel() {
        let guard = pool.acquire().await;
        request.begin_service(ctx.clock.now());
        trace!(id, time = ctx.clock.now(), "Serving");
        return Some(guard);
    }

    let now = ctx.clock.now();
    match ctx.station.queue_capacity {
        Capacity::Finite(limit) if pool.queue_length() >= limit => {
            request.reject(now);
            trace!(id, time = now, limit, "Rejected");
            None
        }
        Capacity::Finite(_) => {
            request.enter_queue(now);
            trace!(id, time = now, position = pool.queue_length() + 1, "Waiting");
            let patience = ctx.clock.sleep(ctx.sample_patience());
            match race(pool.acquire(), patience).await {
                Race::First(guard, timer) => {
                    drop(timer);
                    request.begin_service(ctx.clock.now());
                    trace!(id, time = ctx.clock.now(), "Serving");
                    Some(guard)
                }
                Race::Second(pending, ()) => {
                    drop(pending);
                    request.abandon(ctx.clock.now());
                    trace!(id, time = ctx.clock.now(), "Abandoned");
                    None
                }
            }
        }
        Capacity::Unbounded => {
            request.enter_queue(now);
            trace!(id, time = now, "Waiting");
            let guard = pool.acquire().await;
            request.begin_service(ctx.clock.now());
            trace!(id, time = ctx.clock.now(), "Serving");
            Some(guard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::request::{LifecycleState, Outcome};
    use crate::parser::yaml_parser::StationConfig;

    fn context(channels: usize, queue: usize, abandonment: f64) -> Rc<SimulationContext> {
        let station = StationConfig::new(
            Capacity::Finite(channels),
            Capacity::Finite(queue),
            1.0,
            1.0,
            abandonment,
        )
        .unwrap();
        SimulationContext::new(&station, 17).unwrap()
    }

    fn occupy_channel(ctx: &Rc<SimulationContext>, hold: f64) {
        let pool = ctx.pool.clone();
        let clock = ctx.clock.clone();
        ctx.clock.spawn(async move {
            let guard = pool.acquire().await;
            clock.sleep(hold).await;
            drop(guard);
        });
    }

    #[test]
    fn impatient_request_abandons_busy_station() {
        let ctx = context(1, 1, 1e6);
        occupy_channel(&ctx, 100.0);
        ctx.clock.spawn(request_lifecycle(Rc::clone(&ctx), 0));
        ctx.clock.run_until(1.0);

        assert_eq!(ctx.pool.in_use_count(), 1);
        assert_eq!(ctx.pool.queue_length(), 0);
        ctx.clock.shutdown();
        let collector = ctx.take_collector();
        let request = &collector.requests()[0];
        assert_eq!(request.id, 0);
        assert_eq!(request.outcome(), Some(Outcome::Abandoned));
        assert_eq!(request.service_start_time, None);
        assert!(request.visited(LifecycleState::Waiting));
    }

    #[test]
    fn full_line_rejects_on_arrival() {
        let ctx = context(1, 0, 0.0);
        occupy_channel(&ctx, 100.0);
        ctx.clock.spawn(request_lifecycle(Rc::clone(&ctx), 0));
        ctx.clock.run_until(0.5);
        ctx.clock.shutdown();
        let collector = ctx.take_collector();
        let request = &collector.requests()[0];
        assert_eq!(request.outcome(), Some(Outcome::Rejected));
        assert_eq!(request.path, vec![LifecycleState::Arrived, LifecycleState::Rejected]);
        assert_eq!(collector.observations()[0].processing, 1);
    }

    #[test]
    fn free_channel_skips_the_line() {
        let ctx = context(2, 2, 1.0);
        ctx.clock.spawn(request_lifecycle(Rc::clone(&ctx), 0));
        ctx.clock.run();
        let collector = ctx.take_collector();
        let request = &collector.requests()[0];
        assert_eq!(
            request.path,
            vec![
                LifecycleState::Arrived,
                LifecycleState::Serving,
                LifecycleState::Completed
            ]
        );
        assert_eq!(request.waiting_time(), Some(0.0));
        assert_eq!(ctx.pool.in_use_count(), 0);
    }

    #[test]
    fn waiting_request_is_served_after_release() {
        let ctx = context(1, 1, 0.0);
        occupy_channel(&ctx, 2.0);
        ctx.clock.spawn(request_lifecycle(Rc::clone(&ctx), 0));
        ctx.clock.run();
        let collector = ctx.take_collector();
        let request = &collector.requests()[0];
        assert_eq!(request.outcome(), Some(Outcome::Completed));
        assert_eq!(request.service_start_time, Some(2.0));
        assert_eq!(request.waiting_time(), Some(2.0));
    }
}
