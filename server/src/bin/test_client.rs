use shared::{Input, Message, State, FLAG_GOODBYE, FLAG_HELLO, LABEL_INPUT, LABEL_STATE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    // Server address
    let server_addr = "127.0.0.1:8080".parse::<SocketAddr>()?;

    // Announce ourselves so the server adds us to its client registry
    println!("Sending hello to {}", server_addr);
    socket
        .send_to(&Message::control(FLAG_HELLO).encode(), server_addr)
        .await?;

    let mut buf = [0u8; 1024];
    let mut index = 1u32;

    // Send an input batch every 100ms for 5 seconds, alternating direction
    for i in 0..50 {
        let right = i % 2 == 0;
        let batch = vec![Input {
            index,
            up: false,
            down: false,
            left: !right,
            right,
        }];
        index += 1;

        let payload = bincode::serialize(&batch)?;
        let message = Message::with_label(LABEL_INPUT, &payload);
        socket.send_to(&message.encode(), server_addr).await?;

        // Print whatever state snapshots come back in the meantime
        while let Ok(Ok((len, _))) =
            timeout(Duration::from_millis(20), socket.recv_from(&mut buf)).await
        {
            match Message::decode(&buf[..len]) {
                Ok(message) if !message.body.is_empty() && message.body[0] == LABEL_STATE => {
                    match bincode::deserialize::<State>(&message.body[1..]) {
                        Ok(state) => println!("State update: x={:.2} y={:.2}", state.x, state.y),
                        Err(e) => println!("Failed to decode state: {}", e),
                    }
                }
                Ok(other) => println!("Unexpected message: {:?}", other),
                Err(e) => println!("Failed to decode datagram: {}", e),
            }
        }

        sleep(Duration::from_millis(100)).await;
    }

    // Say goodbye so the server forgets us
    println!("Sending goodbye");
    socket
        .send_to(&Message::control(FLAG_GOODBYE).encode(), server_addr)
        .await?;

    println!("Test client finished");
    Ok(())
}
