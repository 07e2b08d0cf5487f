use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, ImageEncoder, Rgb, RgbImage};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const IMAGE_WIDTH: u32 = 640;
const IMAGE_HEIGHT: u32 = 480;
const IMAGE_FILL: Rgb<u8> = Rgb([73, 109, 137]);
const JPEG_QUALITY: u8 = 85;
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("websocket error: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("jpeg encode failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("timestamp format failed: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for CliError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(error))
    }
}

#[derive(Parser, Debug)]
#[command(name = "relay-cli", about = "Frame relay producer and viewer test client")]
struct Cli {
    #[arg(long, env = "RELAY_WS_URL", default_value = "ws://localhost:3000/ws")]
    ws_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Act as a camera: send metadata + JPEG pairs.
    Send(SendArgs),
    /// Act as a viewer: print every relayed frame.
    View,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long, env = "RELAY_CAM_ID", default_value = "e8a76237-df96-4a6a-9375-baa4d74f5f12")]
    cam_id: String,

    #[arg(long, env = "RELAY_TOKEN", default_value = "257c87b4-9469-44fe-9132-8937f69723bd")]
    token: String,

    #[arg(long, env = "RELAY_SOURCE_ID", default_value = "CAM001")]
    source_id: String,

    #[arg(long, default_value_t = 5)]
    count: u32,

    #[arg(long, default_value_t = 2000, help = "Pause between frames in milliseconds")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Send(args) => run_send(&cli.ws_url, args).await,
        Command::View => run_view(&cli.ws_url).await,
    }
}

async fn run_send(ws_url: &str, args: SendArgs) -> Result<(), CliError> {
    let url = format!(
        "{ws_url}?role=pi&source_id={}&cam_id={}&token={}",
        args.source_id, args.cam_id, args.token
    );
    eprintln!("connecting to {url}");
    let (mut stream, _) = connect_async(url).await?;
    eprintln!("connected as producer cam_id={}", args.cam_id);

    for frame_id in 1..=args.count {
        let metadata = frame_metadata(frame_id, &args.cam_id, OffsetDateTime::now_utc())?;
        stream
            .send(Message::Text(serde_json::to_string(&metadata)?.into()))
            .await?;
        eprintln!("sent metadata for frame {frame_id}");

        tokio::time::sleep(Duration::from_millis(100)).await;

        let jpeg = dummy_jpeg()?;
        let bytes = jpeg.len();
        stream.send(Message::Binary(jpeg.into())).await?;
        eprintln!("sent image for frame {frame_id} ({bytes} bytes)");

        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    stream.close(None).await?;
    eprintln!("sent {} frames", args.count);
    Ok(())
}

async fn run_view(ws_url: &str) -> Result<(), CliError> {
    let url = format!("{ws_url}?role=viewer");
    eprintln!("connecting to {url}");
    let (mut stream, _) = connect_async(url).await?;
    eprintln!("connected as viewer, waiting for frames");

    let mut received = 0_usize;
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(value) if value.get("kind").and_then(Value::as_str) == Some("frame") => {
                    received = received.saturating_add(1);
                    println!("frame {received}:");
                    for line in describe_frame(&value) {
                        println!("  {line}");
                    }
                }
                Ok(value) => println!("message: {value}"),
                Err(_) => println!("non-JSON message: {}", preview(text.as_str())),
            },
            Message::Binary(bytes) => println!("binary message ({} bytes)", bytes.len()),
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    eprintln!("closed by relay: {} {}", u16::from(frame.code), frame.reason.as_str());
                }
                break;
            }
            _ => {}
        }
    }

    eprintln!("received {received} frames");
    Ok(())
}

fn frame_metadata(frame_id: u32, cam_id: &str, now: OffsetDateTime) -> Result<Value, CliError> {
    let n = f64::from(frame_id);
    Ok(serde_json::json!({
        "fram_id": frame_id.to_string(),
        "cam_id": cam_id,
        "timestamp": now.format(&Rfc3339)?,
        "image_info": { "width": IMAGE_WIDTH, "height": IMAGE_HEIGHT },
        "objects": [
            {
                "obj_id": format!("DRONE_{frame_id}_001"),
                "type": "quadcopter",
                "lat": 13.7563 + n * 0.0001,
                "lng": 100.5018 + n * 0.0001,
                "alt": 50.0 + n * 0.5,
                "speed_kt": 15.0 + n * 0.1,
            },
            {
                "obj_id": format!("DRONE_{frame_id}_002"),
                "type": "fixed-wing",
                "lat": 13.7563 - n * 0.0001,
                "lng": 100.5018 - n * 0.0001,
                "alt": 100.0 + n * 0.3,
                "speed_kt": 25.0 + n * 0.2,
            },
        ],
    }))
}

fn dummy_jpeg() -> Result<Vec<u8>, CliError> {
    let img: RgbImage = ImageBuffer::from_pixel(IMAGE_WIDTH, IMAGE_HEIGHT, IMAGE_FILL);
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).write_image(
        img.as_raw(),
        IMAGE_WIDTH,
        IMAGE_HEIGHT,
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg)
}

fn describe_frame(value: &Value) -> Vec<String> {
    let meta = value.get("meta").unwrap_or(&Value::Null);
    let field = |key: &str| meta.get(key).and_then(Value::as_str).unwrap_or("-").to_owned();
    let objects = meta.get("objects").and_then(Value::as_array).map_or(0, Vec::len);
    let image_chars = value
        .get("image_jpeg_base64")
        .and_then(Value::as_str)
        .map_or(0, str::len);

    let mut lines = vec![
        format!("fram_id: {}", field("fram_id")),
        format!("cam_id: {}", field("cam_id")),
        format!("timestamp: {}", field("timestamp")),
        format!("objects: {objects}"),
        format!("image size: {image_chars} chars (base64)"),
    ];

    if let Some(camera) = meta.pointer("/token_id/camera_info") {
        let part = |key: &str| camera.get(key).and_then(Value::as_str).unwrap_or("-");
        lines.push(format!("camera: {} @ {}", part("name"), part("location")));
    }
    lines
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
