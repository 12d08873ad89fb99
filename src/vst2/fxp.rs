//! FXP/FXB preset codec.
//!
//! Big-endian container format for V2 programs and banks. Two payload
//! forms exist: a parameter list (one f32 per declared parameter) and an
//! opaque chunk the plugin round-trips itself; which one applies is the
//! plugin's `has_chunk_data` capability. The byte layout is fixed:
//!
//! ```text
//! program header (56 bytes):
//!   'CcnK'  byteSize  'FxCk'|'FPCh'  version=1  fxID  fxVersion
//!   numParams  name[28]
//! bank header (156 bytes):
//!   'CcnK'  byteSize  'FxBk'|'FBCh'  version=1  fxID  fxVersion
//!   numPrograms  currentProgram  reserved[124]
//! ```
//!
//! `byteSize` excludes the first 8 bytes. A bank in parameter form is
//! followed by `numPrograms` complete program images back to back; in
//! chunk form by an i32 chunk size and that many opaque bytes.

use crate::backend::PluginBackend;
use crate::error::{HostError, Result};

pub const CHUNK_MAGIC: [u8; 4] = *b"CcnK";
pub const PROGRAM_MAGIC: [u8; 4] = *b"FxCk";
pub const PROGRAM_CHUNK_MAGIC: [u8; 4] = *b"FPCh";
pub const BANK_MAGIC: [u8; 4] = *b"FxBk";
pub const BANK_CHUNK_MAGIC: [u8; 4] = *b"FBCh";

pub const FORMAT_VERSION: i32 = 1;
pub const PROGRAM_HEADER_SIZE: usize = 56;
pub const BANK_HEADER_SIZE: usize = 156;
const PROGRAM_NAME_SIZE: usize = 28;
const BANK_RESERVED_SIZE: usize = 124;

fn bad(msg: impl Into<String>) -> HostError {
    HostError::BadPreset(msg.into())
}

// ---------------------------------------------------------------------
// big-endian cursor helpers
// ---------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(bad("truncated preset data"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn tag(&mut self) -> Result<[u8; 4]> {
        let slice = self.take(4)?;
        Ok([slice[0], slice[1], slice[2], slice[3]])
    }

    fn expect_tag(&mut self, expected: [u8; 4]) -> Result<()> {
        let tag = self.tag()?;
        if tag != expected {
            return Err(bad(format!(
                "magic mismatch: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expected),
                String::from_utf8_lossy(&tag)
            )));
        }
        Ok(())
    }

    fn i32(&mut self) -> Result<i32> {
        let slice = self.take(4)?;
        Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        let slice = self.take(4)?;
        Ok(f32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn name(&mut self) -> Result<String> {
        let slice = self.take(PROGRAM_NAME_SIZE)?;
        let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        Ok(String::from_utf8_lossy(&slice[..end]).into_owned())
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn tag(&mut self, tag: [u8; 4]) {
        self.buf.extend_from_slice(&tag);
    }

    fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn name(&mut self, name: &str) {
        let mut field = [0u8; PROGRAM_NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(PROGRAM_NAME_SIZE - 1);
        field[..len].copy_from_slice(&bytes[..len]);
        self.buf.extend_from_slice(&field);
    }
}

// ---------------------------------------------------------------------
// programs
// ---------------------------------------------------------------------

/// Parse an FXP image and apply it to the backend.
pub fn read_program<B: PluginBackend + ?Sized>(backend: &mut B, data: &[u8]) -> Result<()> {
    if data.len() < PROGRAM_HEADER_SIZE {
        return Err(bad("program data smaller than header"));
    }
    let mut r = Reader::new(data);
    r.expect_tag(CHUNK_MAGIC)?;
    let byte_size = r.i32()?;
    if byte_size < 0 || byte_size as usize > data.len() - 8 {
        return Err(bad("declared size exceeds supplied data"));
    }
    let sub_magic = r.tag()?;
    let _version = r.i32()?;
    let _fx_id = r.i32()?;
    let _fx_version = r.i32()?;
    let num_params = r.i32()?;
    let name = r.name()?;

    if num_params < 0 {
        return Err(bad("negative parameter count"));
    }
    let num_params = num_params as usize;

    match sub_magic {
        PROGRAM_MAGIC => {
            if backend.has_chunk_data() {
                return Err(bad("parameter-list program for a chunk plugin"));
            }
            if data.len() - PROGRAM_HEADER_SIZE != num_params * 4 {
                return Err(bad("parameter body size mismatch"));
            }
            if num_params != backend.info().num_parameters {
                return Err(bad(format!(
                    "program has {} parameters, plugin has {}",
                    num_params,
                    backend.info().num_parameters
                )));
            }
            backend.set_program_name(&name);
            for i in 0..num_params {
                let value = r.f32()?;
                backend.set_parameter(i, value);
            }
            Ok(())
        }
        PROGRAM_CHUNK_MAGIC => {
            if !backend.has_chunk_data() {
                return Err(bad("chunk program for a non-chunk plugin"));
            }
            let chunk_size = r.i32()?;
            if chunk_size < 0 || r.pos + chunk_size as usize > data.len() {
                return Err(bad("chunk size exceeds supplied data"));
            }
            let chunk = r.take(chunk_size as usize)?;
            backend.set_program_name(&name);
            backend.set_program_chunk(chunk)
        }
        other => Err(bad(format!(
            "unknown program sub-magic {:?}",
            String::from_utf8_lossy(&other)
        ))),
    }
}

/// Serialize the backend's current program as an FXP image.
pub fn write_program<B: PluginBackend + ?Sized>(backend: &mut B) -> Result<Vec<u8>> {
    let info = backend.info();
    let fx_id = info.unique_id.as_i32();
    let fx_version = info.version_num;
    let num_params = info.num_parameters;
    let chunked = backend.has_chunk_data();
    let name = backend.program_name();

    let mut w = Writer::default();
    w.tag(CHUNK_MAGIC);
    if chunked {
        let chunk = backend.program_chunk()?;
        w.i32((PROGRAM_HEADER_SIZE - 8 + 4 + chunk.len()) as i32);
        w.tag(PROGRAM_CHUNK_MAGIC);
        w.i32(FORMAT_VERSION);
        w.i32(fx_id);
        w.i32(fx_version);
        w.i32(num_params as i32);
        w.name(&name);
        w.i32(chunk.len() as i32);
        w.bytes(&chunk);
    } else {
        w.i32((PROGRAM_HEADER_SIZE - 8 + num_params * 4) as i32);
        w.tag(PROGRAM_MAGIC);
        w.i32(FORMAT_VERSION);
        w.i32(fx_id);
        w.i32(fx_version);
        w.i32(num_params as i32);
        w.name(&name);
        for i in 0..num_params {
            w.f32(backend.parameter(i));
        }
    }
    Ok(w.buf)
}

// ---------------------------------------------------------------------
// banks
// ---------------------------------------------------------------------

/// Parse an FXB image and apply it to the backend.
pub fn read_bank<B: PluginBackend + ?Sized>(backend: &mut B, data: &[u8]) -> Result<()> {
    if data.len() < BANK_HEADER_SIZE {
        return Err(bad("bank data smaller than header"));
    }
    let mut r = Reader::new(data);
    r.expect_tag(CHUNK_MAGIC)?;
    let byte_size = r.i32()?;
    if byte_size < 0 || byte_size as usize > data.len() - 8 {
        return Err(bad("declared size exceeds supplied data"));
    }
    let sub_magic = r.tag()?;
    let _version = r.i32()?;
    let _fx_id = r.i32()?;
    let _fx_version = r.i32()?;
    let num_programs = r.i32()?;
    let current_program = r.i32()?;
    r.take(BANK_RESERVED_SIZE)?;

    if num_programs < 0 || current_program < 0 {
        return Err(bad("negative program count"));
    }
    let num_programs = num_programs as usize;

    match sub_magic {
        BANK_MAGIC => {
            if backend.has_chunk_data() {
                return Err(bad("parameter-list bank for a chunk plugin"));
            }
            if num_programs != backend.info().num_programs {
                return Err(bad(format!(
                    "bank has {} programs, plugin has {}",
                    num_programs,
                    backend.info().num_programs
                )));
            }
            let program_size = PROGRAM_HEADER_SIZE + backend.info().num_parameters * 4;
            if data.len() - BANK_HEADER_SIZE != num_programs * program_size {
                return Err(bad("bank body size mismatch"));
            }
            if num_programs > 0 && current_program as usize >= num_programs {
                return Err(bad("current program out of range"));
            }
            for i in 0..num_programs {
                backend.set_program(i);
                let blob = r.take(program_size)?;
                read_program(backend, blob)?;
            }
            if num_programs > 0 {
                backend.set_program(current_program as usize);
            }
            Ok(())
        }
        BANK_CHUNK_MAGIC => {
            if !backend.has_chunk_data() {
                return Err(bad("chunk bank for a non-chunk plugin"));
            }
            let chunk_size = r.i32()?;
            if chunk_size < 0 || r.pos + chunk_size as usize > data.len() {
                return Err(bad("chunk size exceeds supplied data"));
            }
            let chunk = r.take(chunk_size as usize)?;
            backend.set_bank_chunk(chunk)?;
            if current_program as usize
                <= backend.info().num_programs.saturating_sub(1)
            {
                backend.set_program(current_program as usize);
            }
            Ok(())
        }
        other => Err(bad(format!(
            "unknown bank sub-magic {:?}",
            String::from_utf8_lossy(&other)
        ))),
    }
}

/// Serialize the backend's bank as an FXB image.
///
/// In parameter form this walks every program to capture its snapshot
/// and restores the originally active program afterwards.
pub fn write_bank<B: PluginBackend + ?Sized>(backend: &mut B) -> Result<Vec<u8>> {
    let info = backend.info();
    let fx_id = info.unique_id.as_i32();
    let fx_version = info.version_num;
    let num_programs = info.num_programs;
    let chunked = backend.has_chunk_data();
    let current_program = backend.program();

    let mut w = Writer::default();
    w.tag(CHUNK_MAGIC);
    if chunked {
        let chunk = backend.bank_chunk()?;
        w.i32((BANK_HEADER_SIZE - 8 + 4 + chunk.len()) as i32);
        w.tag(BANK_CHUNK_MAGIC);
        w.i32(FORMAT_VERSION);
        w.i32(fx_id);
        w.i32(fx_version);
        w.i32(num_programs as i32);
        w.i32(current_program as i32);
        w.bytes(&[0u8; BANK_RESERVED_SIZE]);
        w.i32(chunk.len() as i32);
        w.bytes(&chunk);
    } else {
        let mut programs = Vec::new();
        for i in 0..num_programs {
            backend.set_program(i);
            programs.push(write_program(backend)?);
        }
        backend.set_program(current_program);

        let body: usize = programs.iter().map(Vec::len).sum();
        w.i32((BANK_HEADER_SIZE - 8 + body) as i32);
        w.tag(BANK_MAGIC);
        w.i32(FORMAT_VERSION);
        w.i32(fx_id);
        w.i32(fx_version);
        w.i32(num_programs as i32);
        w.i32(current_program as i32);
        w.bytes(&[0u8; BANK_RESERVED_SIZE]);
        for program in &programs {
            w.bytes(program);
        }
    }
    Ok(w.buf)
}
