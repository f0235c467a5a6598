use std::fmt::Write;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unpacking Error: {0}")]
    UnpackError(String),
}

pub fn u64(bytevec: &[u8]) -> Result<u64, Error> {
    let bytes: [u8; 8] = bytevec.get(0..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::UnpackError("Expected at least 8 bytes!".into()))?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn u32(bytevec: &[u8]) -> Result<u32, Error> {
    let bytes: [u8; 4] = bytevec.get(0..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::UnpackError("Expected at least 4 bytes!".into()))?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn u64_chk(bytevec: &[u8]) -> Result<u64, Error> {
    if bytevec.len() != 8 {
        return Err(Error::UnpackError("Expected slice of len 8!".into()));
    }
    u64(bytevec)
}

pub fn p64(val: u64) -> Vec<u8> {
    val.to_le_bytes().to_vec()
}

pub fn p32(val: u32) -> Vec<u8> {
    val.to_le_bytes().to_vec()
}

/// Classic 16 bytes per row hexdump with an ascii column
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "    {:08x}  ", row * 16);
        for idx in 0..16 {
            match chunk.get(idx) {
                Some(byte) => { let _ = write!(out, "{:02x} ", byte); }
                None => out.push_str("   "),
            }
            if idx == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        for byte in chunk {
            let c = *byte as char;
            out.push(if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        out.push_str("|\n");
    }
    out
}
