use clap::Parser;
use log::{info, warn};
use shared::{encode, FrameDecoder, Message, MoveInput, Transform, Vec3};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval, Instant};

/// Smoke-test client: connects, spawns, walks in a circle and logs every
/// message the server sends back.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:1935")]
    server: String,
    /// Session ticket presented in `Connect`
    #[clap(short, long, default_value = "test-ticket")]
    ticket: String,
    /// How long to keep sending input, in seconds
    #[clap(short, long, default_value = "10")]
    duration: u64,
}

async fn send(stream: &mut TcpStream, message: &Message) -> Result<(), Box<dyn std::error::Error>> {
    stream.write_all(&encode(message)?).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.server).await?;
    stream.set_nodelay(true)?;
    info!("Connected to {}", args.server);

    send(&mut stream, &Message::Connect { ticket: args.ticket.clone() }).await?;
    send(
        &mut stream,
        &Message::Spawn {
            transform: Transform::at(Vec3::new(10.0, 0.0, 10.0)),
        },
    )
    .await?;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut input_timer = interval(Duration::from_millis(50));
    let started = Instant::now();
    let end = Duration::from_secs(args.duration);
    let mut step = 0u32;

    while started.elapsed() < end {
        tokio::select! {
            _ = input_timer.tick() => {
                let angle = step as f32 * 0.05;
                step += 1;
                send(&mut stream, &Message::PlayerInput {
                    input: MoveInput::new(angle.sin(), angle.cos()),
                }).await?;
            }
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    warn!("Server closed the connection");
                    return Ok(());
                }
                decoder.extend(&buf[..n]);
                for message in decoder.decode_all()? {
                    match message {
                        Message::PositionOwn { transform, .. } => info!(
                            "Own position ({:.2}, {:.2}, {:.2})",
                            transform.position.x, transform.position.y, transform.position.z
                        ),
                        Message::Reject { reason } => {
                            warn!("Rejected: {}", reason);
                            return Ok(());
                        }
                        Message::Disconnect => {
                            info!("Server ended the session");
                            return Ok(());
                        }
                        other => info!("Received {:?}", other),
                    }
                }
            }
        }
    }

    send(&mut stream, &Message::Disconnect).await?;
    info!("Test client finished");
    Ok(())
}
