// Current version of the FlatCityBuf encoding
pub(crate) const VERSION: u8 = 1;

// Magic bytes: "fcb", version, "fcb", NUL
pub(crate) const MAGIC_BYTES: [u8; 8] = [b'f', b'c', b'b', VERSION, b'f', b'c', b'b', 0];

// Upper bound for the encoded header, to reject absurd size prefixes before
// allocating
pub(crate) const HEADER_MAX_BUFFER_SIZE: usize = 1024 * 1024 * 512; // 512MB

pub(crate) const MAGIC_BYTES_SIZE: usize = 8;

// u32 length prefix in front of the header and every feature record
pub(crate) const SIZE_PREFIX_SIZE: usize = 4;
