use super::scheduler::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Arrived,
    Rejected,
    Waiting,
    Serving,
    Completed,
    Abandoned,
}

impl LifecycleState {
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Arrived, Rejected)
                | (Arrived, Waiting)
                | (Arrived, Serving)
                | (Waiting, Serving)
                | (Waiting, Abandoned)
                | (Serving, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self.outcome().is_some()
    }

    pub fn outcome(self) -> Option<Outcome> {
        match self {
            LifecycleState::Completed => Some(Outcome::Completed),
            LifecycleState::Rejected => Some(Outcome::Rejected),
            LifecycleState::Abandoned => Some(Outcome::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Completed,
    Rejected,
    Abandoned,
}

/// One request's history. Only its own lifecycle writes to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub arrival_time: SimTime,
    pub queue_entry_time: Option<SimTime>,
    pub service_start_time: Option<SimTime>,
    pub completion_time: Option<SimTime>,
    pub departure_time: Option<SimTime>,
    pub path: Vec<LifecycleState>,
}

impl Request {
    pub fn arrive(id: u64, time: SimTime) -> Request {
        Request {
            id,
            arrival_time: time,
            queue_entry_time: None,
            service_start_time: None,
            completion_time: None,
            departure_time: None,
            path: vec![LifecycleState::Arrived],
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.path.last().unwrap_or(&LifecycleState::Arrived)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.state().outcome()
    }

    pub fn visited(&self, state: LifecycleState) -> bool {
        self.path.contains(&state)
    }

    fn advance(&mut self, next: LifecycleState, time: SimTime) {
        debug_assert!(
            self.state().can_advance_to(next),
            "request {}: illegal transition {:?} -> {:?}",
            self.id,
            self.state(),
            next
        );
        self.path.push(next);
        if next.is_terminal() {
            self.departure_time = Some(time);
        }
    }

    pub fn reject(&mut self, time: SimTime) {
        self.advance(LifecycleState::Rejected, time);
    }

    pub fn enter_queue(&mut self, time: SimTime) {
        self.queue_entry_time = Some(time);
        self.advance(LifecycleState::Waiting, time);
    }

    pub fn begin_service(&mut self, time: SimTime) {
        self.service_start_time = Some(time);
        self.advance(LifecycleState::Serving, time);
    }

    pub fn abandon(&mut self, time: SimTime) {
        self.advance(LifecycleState::Abandoned, time);
    }

    pub fn complete(&mut self, time: SimTime) {
        self.completion_time = Some(time);
        self.advance(LifecycleState::Completed, time);
    }

    /// Time between arrival and leaving the line, by service or abandonment.
    /// `None` for rejected or unfinished requests.
    pub fn waiting_time(&self) -> Option<SimTime> {
        match self.outcome()? {
            Outcome::Rejected => None,
            Outcome::Completed => Some(self.service_start_time? - self.arrival_time),
            Outcome::Abandoned => Some(self.departure_time? - self.arrival_time),
        }
    }

    /// Arrival to departure for admitted requests.
    pub fn time_in_system(&self) -> Option<SimTime> {
        match self.outcome()? {
            Outcome::Rejected => None,
            _ => Some(self.departure_time? - self.arrival_time),
        }
    }
}
