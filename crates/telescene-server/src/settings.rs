//! Server configuration.

use telescene_proto::CompressionLevel;

/// Behaviour flag bits for [`ServerSettings::flags`].
pub struct ServerFlag;

impl ServerFlag {
    /// Batch outgoing packets into collated envelopes.
    pub const COLLATE: u32 = 1 << 0;
    /// Deflate collated envelopes. Implies collation when set.
    pub const COMPRESS: u32 = 1 << 1;
    /// Emit frame boundary control messages outside collation, so
    /// recorders can count frames without decoding envelopes.
    pub const NAKED_FRAME_MESSAGES: u32 = 1 << 2;
}

/// Tunables for a [`crate::Server`].
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port the monitor listens on first.
    pub listen_port: u16,
    /// Additional ports to fall back through when binding fails.
    pub port_range: u16,
    /// [`ServerFlag`] bits.
    pub flags: u32,
    /// Compression level for collated envelopes.
    pub compression: CompressionLevel,
    /// Byte budget for a single resource transfer packet.
    pub transfer_byte_limit: usize,
    /// How long an asynchronous monitor start waits for the worker thread.
    pub async_timeout_ms: u64,
}

impl ServerSettings {
    /// Default listen port.
    pub const DEFAULT_PORT: u16 = 33500;

    /// Whether outgoing packets are collated.
    #[must_use]
    pub fn collate(&self) -> bool {
        self.flags & (ServerFlag::COLLATE | ServerFlag::COMPRESS) != 0
    }

    /// Whether collated envelopes are compressed.
    #[must_use]
    pub fn compress(&self) -> bool {
        self.flags & ServerFlag::COMPRESS != 0
    }

    /// Whether frame boundaries bypass collation.
    #[must_use]
    pub fn naked_frames(&self) -> bool {
        self.flags & ServerFlag::NAKED_FRAME_MESSAGES != 0
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_port: Self::DEFAULT_PORT,
            port_range: 4,
            flags: ServerFlag::COLLATE | ServerFlag::COMPRESS | ServerFlag::NAKED_FRAME_MESSAGES,
            compression: CompressionLevel::default(),
            transfer_byte_limit: 0xE000,
            async_timeout_ms: 5000,
        }
    }
}
