//! File type guesses for dumped archive slices.

/// Known leading-byte signatures, checked in order.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"VTF\0", "vtf"),
    (b"IDST", "mdl"),
    (b"VBSP", "bsp"),
    (b"DDS ", "dds"),
    (b"RIFF", "wav"),
    (b"OggS", "ogg"),
    (b"ID3", "mp3"),
    (b"\x89PNG\r\n\x1a\n", "png"),
    (b"\xff\xd8\xff", "jpg"),
    (b"GIF8", "gif"),
    (b"BM", "bmp"),
    (b"PK\x03\x04", "zip"),
    (b"\x1f\x8b", "gz"),
    (b"MZ", "exe"),
];

/// Longest signature length; callers need at most this many leading bytes.
pub const MAX_SIGNATURE: usize = 8;

/// Guess a file extension from the leading bytes of a slice.
pub fn extension_of(data: &[u8]) -> &'static str {
    SIGNATURES
        .iter()
        .find(|(signature, _)| data.starts_with(signature))
        .map(|&(_, extension)| extension)
        .unwrap_or("bin")
}
