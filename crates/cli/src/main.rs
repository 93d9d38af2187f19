use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use std::{fs, thread};

use camstream::pool::DEFAULT_POOL_FRAMES;
use camstream::{Credentials, FrameFormat, FramePool, FrameRate, StreamConfig, StreamServer};
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "camstream-server",
    about = "Standalone RTSP server that loops JPEG files as an MJPEG stream"
)]
struct Args {
    /// Address advertised to clients in the stream description
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// RTSP control port
    #[arg(long, short, default_value_t = 8554)]
    port: u16,

    /// Stream path under rtsp://host:port/
    #[arg(long, default_value = "mjpeg/1")]
    path: String,

    /// Frame width in pixels
    #[arg(long, default_value_t = 640)]
    width: u16,

    /// Frame height in pixels
    #[arg(long, default_value_t = 480)]
    height: u16,

    /// Frame rate: 5, 10 or 20 fps
    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// Require Basic authentication, given as user:password
    #[arg(long)]
    auth: Option<String>,

    /// JPEG files streamed in a loop
    #[arg(required = true)]
    frames: Vec<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let frame_rate = match args.fps {
        5 => FrameRate::Fps5,
        10 => FrameRate::Fps10,
        20 => FrameRate::Fps20,
        other => {
            eprintln!("Unsupported frame rate {}: pick 5, 10 or 20", other);
            return;
        }
    };
    let interval = Duration::from_millis(frame_rate.interval_ms());

    let credentials = match args.auth.as_deref() {
        None => None,
        Some(auth) => match auth.split_once(':') {
            Some((username, password)) => Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
            None => {
                eprintln!("--auth expects user:password");
                return;
            }
        },
    };

    let mut frames = Vec::with_capacity(args.frames.len());
    for path in &args.frames {
        match fs::read(path) {
            Ok(data) => frames.push(data),
            Err(e) => {
                eprintln!("Cannot read {}: {}", path.display(), e);
                return;
            }
        }
    }

    let capacity = frames.iter().map(Vec::len).max().unwrap_or(0);
    let pool = FramePool::new(DEFAULT_POOL_FRAMES, capacity);

    let config = StreamConfig {
        host: args.host,
        port: args.port,
        suffix: args.path,
        width: args.width,
        height: args.height,
        frame_rate,
        credentials,
        ..StreamConfig::default()
    };
    let mut server = StreamServer::new(pool.clone(), config);

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    // Feed the pool at the stream rate, looping over the input files.
    thread::spawn(move || {
        let epoch = Instant::now();
        for frame in frames.iter().cycle() {
            let timestamp = epoch.elapsed().as_millis() as u64;
            pool.submit(timestamp, FrameFormat::Jpeg, frame);
            thread::sleep(interval);
        }
    });

    println!("Streaming at {} — press Enter to stop", server.url());
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    server.stop();
}
