//! Timed visual hand-off between views.

use crate::Session;
use clock_gate::Clock;
use persistence::KvStore;
use std::time::Duration;
use tokio::time::sleep;

/// How long the outgoing view fades before the new one is shown.
pub const HANDOFF: Duration = Duration::from_millis(220);

/// Wait out the hand-off of the pending transition, then settle the session.
///
/// Returns immediately when nothing is in flight.
pub async fn play_handoff<K, C>(session: &mut Session<K, C>)
where
    K: KvStore + Clone,
    C: Clock,
{
    if !session.is_transitioning() {
        return;
    }
    sleep(HANDOFF).await;
    session.settle();
}
