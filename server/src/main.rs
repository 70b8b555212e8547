use clap::Parser;
use log::{error, info, warn};
use server::input_queue::InputQueue;
use server::mux::Mux;
use server::simulation::Simulation;
use server::transport::{Envelope, Transport};
use shared::{Input, Message, State, LABEL_INPUT, LABEL_STATE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SEND_TIMEOUT: Duration = Duration::from_secs(1);
const INPUT_TOPIC_CAPACITY: usize = 32;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (simulation updates per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let (transport, inbox) = Transport::bind(&addr).await?;
    let transport = Arc::new(transport);

    let mut mux = Mux::new(inbox);
    let input_topic = mux.subscribe(LABEL_INPUT, INPUT_TOPIC_CAPACITY);
    let mux_task = tokio::spawn(async move {
        mux.run().await;
        mux.close();
    });

    let queue = Arc::new(InputQueue::new());
    let feed_task = {
        let queue = Arc::clone(&queue);
        tokio::spawn(feed_inputs(input_topic, queue))
    };

    let tick = Duration::from_secs_f32(1.0 / args.tick_rate as f32);
    let (mut simulation, snapshots) = Simulation::new(Arc::clone(&queue), tick);
    let simulation_task = tokio::spawn(async move { simulation.run().await });

    let broadcast_task = {
        let transport = Arc::clone(&transport);
        tokio::spawn(broadcast_snapshots(snapshots, transport))
    };

    info!("server running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    // Shutdown order follows the pipeline: closing the transport ends the
    // mux, which ends the input feed; only then is the queue closed so
    // the simulation drains what is left and stops.
    if let Err(e) = transport.close(SEND_TIMEOUT).await {
        error!("transport close: {}", e);
    }
    let _ = tokio::join!(mux_task, feed_task);
    queue.close().await;
    let _ = tokio::join!(simulation_task, broadcast_task);

    Ok(())
}

/// Decodes input batches arriving on the input topic and hands them to
/// the admission queue.
async fn feed_inputs(mut topic: mpsc::Receiver<Envelope>, queue: Arc<InputQueue>) {
    while let Some(envelope) = topic.recv().await {
        match bincode::deserialize::<Vec<Input>>(&envelope.message.body) {
            Ok(inputs) => queue.process_inputs(envelope.sender, &inputs).await,
            Err(e) => warn!(
                "failed to decode input batch from {}: {}",
                envelope.sender, e
            ),
        }
    }
}

/// Forwards each simulation snapshot to every known client.
async fn broadcast_snapshots(mut snapshots: mpsc::Receiver<State>, transport: Arc<Transport>) {
    while let Some(state) = snapshots.recv().await {
        let payload = match bincode::serialize(&state) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to serialize state snapshot: {}", e);
                continue;
            }
        };

        let message = Message::with_label(LABEL_STATE, &payload);
        if let Err(e) = transport.broadcast(&message, SEND_TIMEOUT).await {
            warn!("state broadcast: {}", e);
        }
    }
}
