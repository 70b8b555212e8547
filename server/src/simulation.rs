//! Fixed-rate simulation loop: one dequeued input, one state update, one
//! published snapshot per tick.

use crate::input_queue::InputQueue;
use log::info;
use shared::{Input, State};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

pub struct Simulation {
    state: State,
    queue: Arc<InputQueue>,
    tick: Duration,
    snapshot_tx: mpsc::Sender<State>,
}

impl Simulation {
    /// Returns the simulation together with the receive end of its
    /// snapshot channel.
    pub fn new(queue: Arc<InputQueue>, tick: Duration) -> (Self, mpsc::Receiver<State>) {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(1);
        (
            Self {
                state: State::default(),
                queue,
                tick,
                snapshot_tx,
            },
            snapshot_rx,
        )
    }

    /// Ticks at the fixed rate until the input queue closes and drains.
    pub async fn run(&mut self) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let Some(input) = self.queue.dequeue().await else {
                info!("input queue closed, stopping simulation");
                break;
            };

            apply(&mut self.state, input);

            if self.snapshot_tx.send(self.state).await.is_err() {
                // Snapshot consumer is gone; no point simulating on.
                break;
            }
        }
    }
}

/// Moves the position one unit along the normalized input direction.
fn apply(state: &mut State, input: Input) {
    let mut dx = 0.0_f32;
    let mut dy = 0.0_f32;
    if input.up {
        dy -= 1.0;
    }
    if input.left {
        dx -= 1.0;
    }
    if input.down {
        dy += 1.0;
    }
    if input.right {
        dx += 1.0;
    }

    let magnitude = (dx * dx + dy * dy).sqrt();
    if magnitude > 0.0 {
        dx /= magnitude;
        dy /= magnitude;
    }

    state.x += dx;
    state.y += dy;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::net::SocketAddr;

    fn directional(index: u32, up: bool, down: bool, left: bool, right: bool) -> Input {
        Input {
            index,
            up,
            down,
            left,
            right,
        }
    }

    #[test]
    fn test_apply_cardinal_moves_one_unit() {
        let mut state = State::default();
        apply(&mut state, directional(1, false, false, false, true));
        assert_approx_eq!(state.x, 1.0, 1e-6);
        assert_approx_eq!(state.y, 0.0, 1e-6);

        apply(&mut state, directional(2, true, false, false, false));
        assert_approx_eq!(state.x, 1.0, 1e-6);
        assert_approx_eq!(state.y, -1.0, 1e-6);
    }

    #[test]
    fn test_apply_diagonal_is_normalized() {
        let mut state = State::default();
        apply(&mut state, directional(1, false, true, false, true));

        let expected = 1.0_f32 / 2.0_f32.sqrt();
        assert_approx_eq!(state.x, expected, 1e-6);
        assert_approx_eq!(state.y, expected, 1e-6);
    }

    #[test]
    fn test_apply_opposing_directions_cancel() {
        let mut state = State { x: 3.0, y: 4.0 };
        apply(&mut state, directional(1, true, true, true, true));
        assert_approx_eq!(state.x, 3.0, 1e-6);
        assert_approx_eq!(state.y, 4.0, 1e-6);
    }

    #[tokio::test]
    async fn test_run_consumes_queue_and_publishes_snapshots() {
        let sender: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        let queue = Arc::new(InputQueue::with_timeout(Duration::from_secs(5)));
        queue
            .process_inputs(
                sender,
                &[
                    directional(1, false, false, false, true),
                    directional(2, false, false, false, true),
                ],
            )
            .await;
        queue.close().await;

        let (mut simulation, mut snapshots) =
            Simulation::new(Arc::clone(&queue), Duration::from_millis(1));
        let task = tokio::spawn(async move { simulation.run().await });

        let first = snapshots.recv().await.unwrap();
        assert_approx_eq!(first.x, 1.0, 1e-6);
        let second = snapshots.recv().await.unwrap();
        assert_approx_eq!(second.x, 2.0, 1e-6);

        // Queue is closed and drained, so the loop stops on its own.
        task.await.unwrap();
        assert!(snapshots.recv().await.is_none());
    }
}
