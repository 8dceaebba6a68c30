//! Shared protocol constants for the quicsync stream transport

// ALPN token negotiated by both peers during the QUIC handshake
pub const ALPN: &[u8] = b"quicsync/1";

// Fixed header: 8-byte big-endian payload length + 4-byte big-endian type tag
pub const HEADER_LEN: usize = 12;

// Fixed-width prefix of a FileContent payload (declared content length)
pub const CONTENT_LEN_FIELD: usize = 8;

// Maximum framed payload size (64MB) - prevents DoS via memory exhaustion.
// Raw file bytes following a FileContent header are streamed and not bound by this.
pub const MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

// Chunk size used when streaming file bytes in either direction
pub const CHUNK_SIZE: usize = 256 * 1024;

// Streams a peer may have open at once; the client caps in-flight transfers to match
pub const MAX_CONCURRENT_STREAMS: u32 = 128;

// Default listen/connect port
pub const DEFAULT_PORT: u16 = 8773;
pub const DEFAULT_BIND: &str = "0.0.0.0:8773";

// Packet type tags (keep numeric stable)
pub mod packet {
    pub const MANIFEST: u32 = 0;
    pub const FILE_CONTENT: u32 = 1;
    pub const DELETE_BATCH: u32 = 2;
}

// Acknowledgment written by the server at the end of a FileContent or DeleteBatch stream.
// Success is exactly ACK_OK; a rejection is ACK_REJECT followed by a UTF-8 reason.
pub mod ack {
    pub const ACK_OK: &[u8; 2] = b"ok";
    pub const ACK_REJECT: &[u8; 2] = b"no";

    // Upper bound on how much acknowledgment text a client will read
    pub const MAX_ACK_LEN: usize = 64 * 1024;

    // Longest reason a delete acknowledgment carries for one failed path
    pub const MAX_REASON_LEN: usize = 256;

    // Room per failed path beyond the path's own bytes: JSON keys and
    // punctuation plus a fully escaped reason
    pub const FAILURE_ENTRY_ALLOWANCE: usize = 32 + 6 * MAX_REASON_LEN;
}
