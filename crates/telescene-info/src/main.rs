//! Telescene replay file inspector.
//!
//! Reads a `.3es` file and reports, per (routing id, message id) pair, the
//! packet count and byte totals as CSV on stdout. Collated envelopes are
//! decoded so the report covers both the envelopes and the packets inside
//! them.
//!
//! # Usage
//!
//! ```bash
//! telescene-info session000.3es
//! telescene-info --du KiB session000.3es
//! ```

use std::{collections::BTreeMap, fmt, path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use telescene_proto::{
    CollatedPacketDecoder, PacketReader, PacketStreamReader,
    messages::{ControlMessageId, MeshMessageId, RoutingId, ShapeMessageId},
};
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Unit used to display byte totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ByteUnit {
    /// Bytes.
    #[value(name = "B")]
    Bytes,
    /// Kibibytes.
    #[value(name = "KiB")]
    Kibibytes,
    /// Mebibytes.
    #[value(name = "MiB")]
    Mebibytes,
    /// Gibibytes.
    #[value(name = "GiB")]
    Gibibytes,
    /// Tebibytes.
    #[value(name = "TiB")]
    Tebibytes,
}

impl ByteUnit {
    fn divisor(self) -> u64 {
        match self {
            Self::Bytes => 1,
            Self::Kibibytes => 1 << 10,
            Self::Mebibytes => 1 << 20,
            Self::Gibibytes => 1 << 30,
            Self::Tebibytes => 1 << 40,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Bytes => "B",
            Self::Kibibytes => "KiB",
            Self::Mebibytes => "MiB",
            Self::Gibibytes => "GiB",
            Self::Tebibytes => "TiB",
        }
    }
}

/// A byte total rendered in a fixed or self-selected unit.
struct ByteValue {
    bytes: u64,
    unit: Option<ByteUnit>,
}

impl ByteValue {
    fn new(bytes: u64, unit: Option<ByteUnit>) -> Self {
        Self { bytes, unit }
    }

    /// Largest unit keeping the value above one.
    fn succinct_unit(bytes: u64) -> ByteUnit {
        [ByteUnit::Tebibytes, ByteUnit::Gibibytes, ByteUnit::Mebibytes, ByteUnit::Kibibytes]
            .into_iter()
            .find(|unit| bytes >= unit.divisor())
            .unwrap_or(ByteUnit::Bytes)
    }
}

impl fmt::Display for ByteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit.unwrap_or_else(|| Self::succinct_unit(self.bytes));
        if unit == ByteUnit::Bytes {
            return write!(f, "{}B", self.bytes);
        }
        let value = self.bytes as f64 / unit.divisor() as f64;
        write!(f, "{value:.2}{}", unit.suffix())
    }
}

/// Telescene replay file inspector
#[derive(Parser, Debug)]
#[command(name = "telescene-info")]
#[command(about = "Report packet statistics for a .3es file as CSV")]
#[command(version)]
struct Args {
    /// Replay file to inspect (.3es)
    file: PathBuf,

    /// Size display unit; omit to pick per value
    #[arg(long = "du", value_enum)]
    display_unit: Option<ByteUnit>,
}

#[derive(Default)]
struct PacketInfo {
    count: u64,
    total_size: u64,
    total_payload_size: u64,
    crc_count: u64,
}

type InfoMap = BTreeMap<(u16, u16), PacketInfo>;

fn routing_name(routing_id: u16) -> &'static str {
    match RoutingId::from_u16(routing_id) {
        Some(RoutingId::Null) => "Null",
        Some(RoutingId::ServerInfo) => "ServerInfo",
        Some(RoutingId::Control) => "Control",
        Some(RoutingId::CollatedPacket) => "CollatedPacket",
        Some(RoutingId::Mesh) => "Mesh",
        Some(RoutingId::Camera) => "Camera",
        Some(RoutingId::Category) => "Category",
        Some(RoutingId::Material) => "Material",
        Some(RoutingId::Sphere) => "Sphere",
        Some(RoutingId::Box) => "Box",
        Some(RoutingId::Cone) => "Cone",
        Some(RoutingId::Cylinder) => "Cylinder",
        Some(RoutingId::Capsule) => "Capsule",
        Some(RoutingId::Plane) => "Plane",
        Some(RoutingId::Star) => "Star",
        Some(RoutingId::Arrow) => "Arrow",
        Some(RoutingId::MeshShape) => "MeshShape",
        Some(RoutingId::MeshSet) => "MeshSet",
        Some(RoutingId::PointCloud) => "PointCloud",
        Some(RoutingId::Text3D) => "Text3D",
        Some(RoutingId::Text2D) => "Text2D",
        Some(RoutingId::Pose) => "Pose",
        None => "",
    }
}

fn control_name(message_id: u16) -> &'static str {
    match ControlMessageId::from_u16(message_id) {
        Some(ControlMessageId::Null) => "Null",
        Some(ControlMessageId::Frame) => "Frame",
        Some(ControlMessageId::CoordinateFrame) => "CoordinateFrame",
        Some(ControlMessageId::FrameCount) => "FrameCount",
        Some(ControlMessageId::ForceFrameFlush) => "ForceFrameFlush",
        Some(ControlMessageId::Reset) => "Reset",
        Some(ControlMessageId::Keyframe) => "Keyframe",
        Some(ControlMessageId::End) => "End",
        None => "",
    }
}

fn mesh_name(message_id: u16) -> &'static str {
    match MeshMessageId::from_u16(message_id) {
        Some(MeshMessageId::Invalid) => "Invalid",
        Some(MeshMessageId::Destroy) => "Destroy",
        Some(MeshMessageId::Create) => "Create",
        Some(MeshMessageId::Vertex) => "Vertex",
        Some(MeshMessageId::Index) => "Index",
        Some(MeshMessageId::VertexColour) => "VertexColour",
        Some(MeshMessageId::Normal) => "Normal",
        Some(MeshMessageId::Uv) => "Uv",
        Some(MeshMessageId::SetMaterial) => "SetMaterial",
        Some(MeshMessageId::Redefine) => "Redefine",
        Some(MeshMessageId::Finalise) => "Finalise",
        None => "",
    }
}

fn shape_name(message_id: u16) -> &'static str {
    match ShapeMessageId::from_u16(message_id) {
        Some(ShapeMessageId::Null) => "Null",
        Some(ShapeMessageId::Create) => "Create",
        Some(ShapeMessageId::Update) => "Update",
        Some(ShapeMessageId::Destroy) => "Destroy",
        Some(ShapeMessageId::Data) => "Data",
        None => "",
    }
}

fn message_name(routing_id: u16, message_id: u16) -> &'static str {
    match RoutingId::from_u16(routing_id) {
        Some(RoutingId::Control) => control_name(message_id),
        Some(RoutingId::Mesh) => mesh_name(message_id),
        Some(RoutingId::Category) => {
            if message_id == 0 { "Name" } else { "" }
        }
        _ if RoutingId::is_shape(routing_id) => shape_name(message_id),
        _ => "",
    }
}

fn tally(info: &mut InfoMap, reader: &PacketReader<'_>) {
    let entry = info.entry((reader.routing_id(), reader.message_id())).or_default();
    entry.count += 1;
    entry.total_size += reader.packet_size() as u64;
    entry.total_payload_size += reader.payload_size() as u64;
    entry.crc_count += u64::from(reader.header().has_crc());
}

fn scan(bytes: &[u8]) -> (InfoMap, u64) {
    let mut info = InfoMap::new();
    let mut stream = PacketStreamReader::new();
    let mut decoder = CollatedPacketDecoder::new();
    stream.feed(bytes);

    while let Some(packet) = stream.next() {
        if let Ok(reader) = packet.reader() {
            tally(&mut info, &reader);
        }
        // Unpack collated envelopes so their content is reported too; the
        // envelope row already covers the outer packet.
        if packet.routing_id() != RoutingId::CollatedPacket as u16 {
            continue;
        }
        if decoder.set_packet(packet.bytes()).is_err() {
            continue;
        }
        while let Ok(Some(inner)) = decoder.next() {
            if let Ok(reader) = PacketReader::new(inner) {
                tally(&mut info, &reader);
            }
        }
    }
    (info, stream.warnings())
}

fn report(info: &InfoMap, unit: Option<ByteUnit>, out: &mut impl std::io::Write) -> std::io::Result<()> {
    writeln!(
        out,
        "routing_id,message_id,routing_name,message_name,count,total_size,\
         total_payload_size,average_size,average_payload_size"
    )?;
    for (&(routing_id, message_id), entry) in info {
        writeln!(
            out,
            "{routing_id},{message_id},{},{},{},{},{},{},{}",
            routing_name(routing_id),
            message_name(routing_id, message_id),
            entry.count,
            ByteValue::new(entry.total_size, unit),
            ByteValue::new(entry.total_payload_size, unit),
            ByteValue::new(entry.total_size / entry.count.max(1), unit),
            ByteValue::new(entry.total_payload_size / entry.count.max(1), unit),
        )?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if e.use_stderr() {
                let _ = e.print();
                return ExitCode::from(1);
            }
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(tracing_fmt::layer()).with(filter).init();

    let bytes = match std::fs::read(&args.file) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("cannot read {}: {e}", args.file.display());
            return ExitCode::from(1);
        }
    };

    let (info, warnings) = scan(&bytes);
    if warnings > 0 {
        tracing::warn!("{warnings} framing warnings while scanning");
    }
    let mut stdout = std::io::stdout().lock();
    match report(&info, args.display_unit, &mut stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("write failed: {e}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use telescene_proto::{
        CollatedPacketWriter, CompressionLevel, ControlMessage, PacketWriter, ServerInfoMessage,
        replay,
    };

    use super::*;

    fn sample_stream() -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        replay::initialise_stream(&mut out, &ServerInfoMessage::default()).unwrap();

        let mut collator = CollatedPacketWriter::new(CompressionLevel::Medium);
        for value in 0..4u32 {
            let mut writer = PacketWriter::new(RoutingId::Sphere as u16, 1);
            writer.write_u32(value).unwrap();
            collator.append(&writer.finalise().unwrap()).unwrap();
        }
        let envelope = collator.finalise().unwrap();
        let mut bytes = out.into_inner();
        bytes.extend_from_slice(envelope.bytes());

        let mut writer =
            PacketWriter::new(RoutingId::Control as u16, ControlMessageId::Frame as u16);
        ControlMessage::default().write(&mut writer).unwrap();
        bytes.extend_from_slice(writer.finalise().unwrap().bytes());
        bytes
    }

    #[test]
    fn scan_counts_inner_and_outer_packets() {
        let (info, warnings) = scan(&sample_stream());
        assert_eq!(warnings, 0);
        assert_eq!(info[&(RoutingId::Sphere as u16, 1)].count, 4);
        assert_eq!(info[&(RoutingId::CollatedPacket as u16, 0)].count, 1);
        assert_eq!(info[&(RoutingId::Control as u16, ControlMessageId::Frame as u16)].count, 1);
        assert_eq!(info[&(RoutingId::ServerInfo as u16, 0)].count, 1);
    }

    #[test]
    fn report_emits_one_row_per_key() {
        let (info, _) = scan(&sample_stream());
        let mut out = Vec::new();
        report(&info, None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), info.len() + 1);
        assert!(lines[0].starts_with("routing_id,message_id"));
        assert!(text.contains("Sphere,Create"));
        assert!(text.contains("Control,Frame"));
    }

    #[test]
    fn byte_values_format_in_requested_units() {
        assert_eq!(ByteValue::new(512, Some(ByteUnit::Bytes)).to_string(), "512B");
        assert_eq!(ByteValue::new(2048, Some(ByteUnit::Kibibytes)).to_string(), "2.00KiB");
        assert_eq!(ByteValue::new(3 << 20, Some(ByteUnit::Mebibytes)).to_string(), "3.00MiB");
    }

    #[test]
    fn succinct_formatting_picks_a_sensible_unit() {
        assert_eq!(ByteValue::new(100, None).to_string(), "100B");
        assert_eq!(ByteValue::new(4096, None).to_string(), "4.00KiB");
        assert_eq!(ByteValue::new(5 << 30, None).to_string(), "5.00GiB");
    }

    #[test]
    fn display_unit_argument_parses() {
        let args = Args::try_parse_from(["telescene-info", "--du", "KiB", "x.3es"]).unwrap();
        assert_eq!(args.display_unit, Some(ByteUnit::Kibibytes));
        let args = Args::try_parse_from(["telescene-info", "x.3es"]).unwrap();
        assert_eq!(args.display_unit, None);
    }
}
