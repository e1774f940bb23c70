//! Telescene stream recorder.
//!
//! Connects to a running server, validates the incoming packet stream and
//! writes it to numbered `<prefix>NNN.3es` files, patching the frame count
//! on close. The fastest mode is passthrough (`-m -`), which stores bytes
//! exactly as they arrive apart from CRC validation; the other modes
//! decode collation and re-pack or store the stream uncompressed.
//!
//! # Usage
//!
//! ```bash
//! # Record one session from a local server
//! telescene-rec --ip 127.0.0.1 --port 33500 session
//!
//! # Keep recording across reconnects, recollating with compression
//! telescene-rec --persist -m c
//! ```

use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    net::TcpStream,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use telescene_proto::{
    CollatedPacketDecoder, CollatedPacketWriter, CompressionLevel, Packet, PacketStreamReader,
    ServerInfoMessage, replay,
    messages::{ControlMessageId, RoutingId},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How incoming packets are processed before hitting the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Decode collation, re-collate with compression.
    CollateAndCompress,
    /// Decode collation, re-collate without compression.
    CollateOnly,
    /// Decode collation, compress at the file level (stored as
    /// collate-and-compress).
    FileCompression,
    /// Decode collation, store the inner packets uncompressed.
    Uncompressed,
    /// Store bytes exactly as received.
    Passthrough,
}

fn parse_mode(arg: &str) -> Result<Mode, String> {
    match arg {
        "c" => Ok(Mode::CollateAndCompress),
        "C" => Ok(Mode::CollateOnly),
        "z" => Ok(Mode::FileCompression),
        "u" => Ok(Mode::Uncompressed),
        "-" => Ok(Mode::Passthrough),
        other => Err(format!("unknown mode '{other}' (expected c, C, z, u or -)")),
    }
}

/// Telescene stream recorder
#[derive(Parser, Debug)]
#[command(name = "telescene-rec")]
#[command(about = "Record a Telescene server stream to .3es files")]
#[command(version)]
struct Args {
    /// Server IP address to connect to
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Server port to connect on
    #[arg(long, default_value_t = 33500)]
    port: u16,

    /// Persist beyond the first connection, awaiting reconnects
    #[arg(short, long)]
    persist: bool,

    /// Overwrite existing files using the current prefix
    #[arg(short = 'w', long)]
    overwrite: bool,

    /// Disable non-critical logging
    #[arg(short, long)]
    quiet: bool,

    /// Packet mode: c collate+compress, C collate only, z file compression,
    /// u uncompressed, - passthrough
    #[arg(short = 'm', default_value = "-", value_parser = parse_mode, allow_hyphen_values = true)]
    mode: Mode,

    /// Output file prefix; recordings are named <prefix>NNN.3es
    #[arg(default_value = "tes")]
    prefix: String,
}

/// First free `<prefix>NNN.3es` path, counting up from `next`.
fn next_output_file(prefix: &str, next: &mut u32, overwrite: bool) -> Option<PathBuf> {
    const MAX_FILES: u32 = 1000;
    for _ in 0..MAX_FILES {
        let number = *next % MAX_FILES;
        *next = number + 1;
        let path = PathBuf::from(format!("{prefix}{number:03}.3es"));
        if overwrite || !path.exists() {
            return Some(path);
        }
    }
    None
}

fn attempt_connection(args: &Args) -> Option<TcpStream> {
    let socket = TcpStream::connect((args.ip.as_str(), args.port)).ok()?;
    socket.set_nodelay(true).ok()?;
    socket.set_read_timeout(Some(Duration::from_millis(100))).ok()?;
    Some(socket)
}

struct Recorder {
    mode: Mode,
    file: BufWriter<std::fs::File>,
    collator: Option<CollatedPacketWriter>,
    decoder: CollatedPacketDecoder,
    frames: u32,
}

impl Recorder {
    fn create(path: &Path, mode: Mode) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut file = BufWriter::new(file);
        replay::initialise_stream(&mut file, &ServerInfoMessage::default())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        let collator = match mode {
            Mode::CollateAndCompress | Mode::FileCompression => {
                Some(CollatedPacketWriter::new(CompressionLevel::Medium))
            }
            Mode::CollateOnly => Some(CollatedPacketWriter::new(CompressionLevel::None)),
            Mode::Uncompressed | Mode::Passthrough => None,
        };
        Ok(Self { mode, file, collator, decoder: CollatedPacketDecoder::new(), frames: 0 })
    }

    fn is_frame_boundary(bytes: &[u8]) -> bool {
        telescene_proto::PacketReader::new(bytes).is_ok_and(|reader| {
            reader.routing_id() == RoutingId::Control as u16
                && reader.message_id() == ControlMessageId::Frame as u16
        })
    }

    fn flush_collator(&mut self) -> std::io::Result<()> {
        if let Some(collator) = &mut self.collator {
            if !collator.is_empty() {
                let envelope = collator
                    .finalise()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
                self.file.write_all(envelope.bytes())?;
            }
        }
        Ok(())
    }

    /// Store one inner (decoded) packet according to the mode.
    fn store_inner(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if Self::is_frame_boundary(bytes) {
            self.frames += 1;
            // Frame boundaries go out naked so passthrough readers of the
            // recording can count frames too.
            self.flush_collator()?;
            return self.file.write_all(bytes);
        }
        if self.collator.is_none() {
            return self.file.write_all(bytes);
        }
        let Ok(packet) = Packet::from_bytes(bytes.to_vec()) else {
            return Ok(());
        };
        if self.collator.as_mut().is_some_and(|c| c.append(&packet).is_ok()) {
            return Ok(());
        }
        // Full envelope: flush and retry; a packet too big for any
        // envelope is stored stand-alone.
        self.flush_collator()?;
        if self.collator.as_mut().is_some_and(|c| c.append(&packet).is_ok()) {
            return Ok(());
        }
        self.file.write_all(packet.bytes())
    }

    fn record_packet(&mut self, packet: &Packet) -> std::io::Result<()> {
        if self.mode == Mode::Passthrough {
            if Self::is_frame_boundary(packet.bytes()) {
                self.frames += 1;
            }
            return self.file.write_all(packet.bytes());
        }

        // Decode collation so the stream can be re-packed.
        if self.decoder.set_packet(packet.bytes()).is_err() {
            tracing::warn!("skipping undecodable packet");
            return Ok(());
        }
        loop {
            let inner = match self.decoder.next() {
                Ok(Some(frame)) => frame.to_vec(),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("abandoning collated packet: {e}");
                    break;
                }
            };
            self.store_inner(&inner)?;
        }
        Ok(())
    }

    fn finalise(mut self) -> std::io::Result<u32> {
        self.flush_collator()?;
        self.file.write_all(
            replay::end_packet()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?
                .bytes(),
        )?;
        replay::finalise_stream(&mut self.file, self.frames)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        self.file.flush()?;
        Ok(self.frames)
    }
}

fn record_session(args: &Args, socket: TcpStream, path: &Path, quit: &AtomicBool) -> std::io::Result<u32> {
    use std::io::Read;

    let mut socket = socket;
    let mut recorder = Recorder::create(path, args.mode)?;
    let mut packets = PacketStreamReader::new();
    let mut buf = vec![0u8; 4 * 1024 * 1024];

    if !args.quiet {
        tracing::info!("recording to {}", path.display());
    }

    while !quit.load(Ordering::Acquire) {
        let read = match socket.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("connection read ended: {e}");
                break;
            }
        };
        packets.feed(&buf[..read]);
        while let Some(packet) = packets.next() {
            recorder.record_packet(&packet)?;
        }
    }

    let frames = recorder.finalise()?;
    if !args.quiet {
        tracing::info!("finalised {} with {frames} frames", path.display());
    }
    Ok(frames)
}

fn run(args: &Args, quit: &AtomicBool) -> std::io::Result<()> {
    let mut next_file = 0u32;
    let mut once = true;

    while !quit.load(Ordering::Acquire) && (args.persist || once) {
        once = false;

        let socket = loop {
            if quit.load(Ordering::Acquire) {
                return Ok(());
            }
            match attempt_connection(args) {
                Some(socket) => break socket,
                None => thread::sleep(Duration::from_millis(250)),
            }
        };
        if !args.quiet {
            tracing::info!("connected to {}:{}", args.ip, args.port);
        }

        let Some(path) = next_output_file(&args.prefix, &mut next_file, args.overwrite) else {
            tracing::error!(
                "no free output file names for prefix '{}'; clean up the output directory",
                args.prefix
            );
            return Err(std::io::ErrorKind::AlreadyExists.into());
        };
        record_session(args, socket, &path, quit)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Usage and version requests are clean exits.
            if e.use_stderr() {
                let _ = e.print();
                return ExitCode::from(1);
            }
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    let default_level = if args.quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let quit = Arc::new(AtomicBool::new(false));
    let handler_quit = Arc::clone(&quit);
    if let Err(e) = ctrlc::set_handler(move || handler_quit.store(true, Ordering::Release)) {
        tracing::warn!("failed to install signal handler: {e}");
    }

    match run(&args, &quit) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("recording failed: {e}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_arguments_parse() {
        assert_eq!(parse_mode("c"), Ok(Mode::CollateAndCompress));
        assert_eq!(parse_mode("C"), Ok(Mode::CollateOnly));
        assert_eq!(parse_mode("z"), Ok(Mode::FileCompression));
        assert_eq!(parse_mode("u"), Ok(Mode::Uncompressed));
        assert_eq!(parse_mode("-"), Ok(Mode::Passthrough));
        assert!(parse_mode("x").is_err());
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let args = Args::try_parse_from(["telescene-rec"]).unwrap();
        assert_eq!(args.ip, "127.0.0.1");
        assert_eq!(args.port, 33500);
        assert_eq!(args.prefix, "tes");
        assert_eq!(args.mode, Mode::Passthrough);
        assert!(!args.persist && !args.overwrite && !args.quiet);
    }

    #[test]
    fn short_flags_parse() {
        let args =
            Args::try_parse_from(["telescene-rec", "-p", "-w", "-q", "-m", "c", "run"]).unwrap();
        assert!(args.persist && args.overwrite && args.quiet);
        assert_eq!(args.mode, Mode::CollateAndCompress);
        assert_eq!(args.prefix, "run");
    }

    #[test]
    fn output_numbering_skips_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cap").display().to_string();
        std::fs::write(format!("{prefix}000.3es"), b"x").unwrap();

        let mut next = 0;
        let path = next_output_file(&prefix, &mut next, false).unwrap();
        assert!(path.display().to_string().ends_with("cap001.3es"));

        // Overwrite mode reuses the first name.
        let mut next = 0;
        let path = next_output_file(&prefix, &mut next, true).unwrap();
        assert!(path.display().to_string().ends_with("cap000.3es"));
    }

    #[test]
    fn passthrough_recorder_counts_naked_frames() {
        use telescene_proto::{ControlMessage, PacketWriter};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec000.3es");
        let mut recorder = Recorder::create(&path, Mode::Passthrough).unwrap();

        for _ in 0..17 {
            let mut writer =
                PacketWriter::new(RoutingId::Control as u16, ControlMessageId::Frame as u16);
            ControlMessage::default().write(&mut writer).unwrap();
            recorder.record_packet(&writer.finalise().unwrap()).unwrap();
        }
        assert_eq!(recorder.finalise().unwrap(), 17);

        // The patched prelude reports the recorded frame count.
        let bytes = std::fs::read(&path).unwrap();
        let mut stream = PacketStreamReader::new();
        stream.feed(&bytes);
        let info = stream.next().unwrap();
        assert_eq!(info.routing_id(), RoutingId::ServerInfo as u16);
        let count = stream.next().unwrap();
        assert_eq!(count.message_id(), ControlMessageId::FrameCount as u16);
        let message = ControlMessage::read(&mut count.reader().unwrap()).unwrap();
        assert_eq!(message.value32, 17);
    }
}
