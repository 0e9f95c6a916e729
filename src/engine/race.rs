use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Result of [`race`]: the winner's output together with the losing future.
///
/// Dropping the loser cancels it.
pub enum Race<A: Future, B: Future> {
    First(A::Output, B),
    Second(A, B::Output),
}

impl<A: Future, B: Future> Race<A, B> {
    pub fn first_won(&self) -> bool {
        matches!(self, Race::First(..))
    }
}

/// Polls both futures and resolves with whichever completes first. When both
/// are ready at the same poll the first one wins.
pub fn race<A, B>(first: A, second: B) -> RaceFuture<A, B>
where
    A: Future + Unpin,
    B: Future + Unpin,
{
    RaceFuture {
        contenders: Some((first, second)),
    }
}

pub struct RaceFuture<A, B> {
    contenders: Option<(A, B)>,
}

impl<A, B> Future for RaceFuture<A, B>
where
    A: Future + Unpin,
    B: Future + Unpin,
{
    type Output = Race<A, B>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let (first, second) = self
            .contenders
            .as_mut()
            .expect("race polled after completion");

        if let Poll::Ready(output) = Pin::new(first).poll(cx) {
            let (_, loser) = self.contenders.take().expect("contenders present");
            return Poll::Ready(Race::First(output, loser));
        }
        if let Poll::Ready(output) = Pin::new(second).poll(cx) {
            let (loser, _) = self.contenders.take().expect("contenders present");
            return Poll::Ready(Race::Second(loser, output));
        }
        Poll::Pending
    }
}
