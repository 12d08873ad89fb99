//! V3 preset container codec.
//!
//! Little-endian (the format's native byte order) header plus a
//! trailing chunk list:
//!
//! ```text
//! header (48 bytes):
//!   'VST3'  version:i32  classId: 32 ASCII hex chars  listOffset:i64
//! body:
//!   component-state and controller-state blobs at recorded offsets
//! chunk list (at listOffset):
//!   'List'  count:i32  count × { chunkId, offset:i64, size:i64 }
//! ```
//!
//! Reading verifies the class id against the plugin's 128-bit unique id
//! and dispatches `Comp` chunks to the component state, `Cont` chunks to
//! the controller state. Writing records both blob offsets, emits the
//! trailing list and patches the header's list offset last.

use crate::error::{HostError, Result};

pub const HEADER_MAGIC: [u8; 4] = *b"VST3";
pub const CHUNK_LIST_MAGIC: [u8; 4] = *b"List";
pub const COMPONENT_CHUNK: [u8; 4] = *b"Comp";
pub const CONTROLLER_CHUNK: [u8; 4] = *b"Cont";

pub const FORMAT_VERSION: i32 = 1;
pub const CLASS_ID_SIZE: usize = 32;
/// magic + version + class id + list offset
pub const HEADER_SIZE: usize = 4 + 4 + CLASS_ID_SIZE + 8;
const LIST_OFFSET_POS: usize = HEADER_SIZE - 8;

fn bad(msg: impl Into<String>) -> HostError {
    HostError::BadPreset(msg.into())
}

/// Encode a 128-bit class id as the 32 ASCII hex chars the container uses.
pub fn class_id_to_ascii(id: &[u8; 16]) -> [u8; CLASS_ID_SIZE] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = [0u8; CLASS_ID_SIZE];
    for (i, byte) in id.iter().enumerate() {
        out[i * 2] = HEX[(byte >> 4) as usize];
        out[i * 2 + 1] = HEX[(byte & 0x0F) as usize];
    }
    out
}

/// Decode the 32 ASCII hex chars back into a 128-bit class id.
pub fn class_id_from_ascii(text: &[u8]) -> Option<[u8; 16]> {
    if text.len() != CLASS_ID_SIZE {
        return None;
    }
    let nibble = |c: u8| -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'A'..=b'F' => Some(c - b'A' + 10),
            b'a'..=b'f' => Some(c - b'a' + 10),
            _ => None,
        }
    };
    let mut id = [0u8; 16];
    for i in 0..16 {
        id[i] = (nibble(text[i * 2])? << 4) | nibble(text[i * 2 + 1])?;
    }
    Some(id)
}

/// Decoded preset payload: the two state blobs, where present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vst3Preset {
    pub component: Option<Vec<u8>>,
    pub controller: Option<Vec<u8>>,
}

fn read_i32(data: &[u8], pos: usize) -> Result<i32> {
    let bytes = data
        .get(pos..pos + 4)
        .ok_or_else(|| bad("truncated preset data"))?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i64(data: &[u8], pos: usize) -> Result<i64> {
    let bytes = data
        .get(pos..pos + 8)
        .ok_or_else(|| bad("truncated preset data"))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

fn read_tag(data: &[u8], pos: usize) -> Result<[u8; 4]> {
    let bytes = data
        .get(pos..pos + 4)
        .ok_or_else(|| bad("truncated preset data"))?;
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Parse a preset image, verifying it targets the given class id.
pub fn read(data: &[u8], class_id: &[u8; 16]) -> Result<Vst3Preset> {
    if data.len() < HEADER_SIZE {
        return Err(bad("preset smaller than header"));
    }
    if read_tag(data, 0)? != HEADER_MAGIC {
        return Err(bad("bad header chunk id"));
    }
    let _version = read_i32(data, 4)?;
    let stored_id = &data[8..8 + CLASS_ID_SIZE];
    if stored_id != class_id_to_ascii(class_id) {
        return Err(bad("wrong class id"));
    }
    let list_offset = read_i64(data, LIST_OFFSET_POS)?;
    if list_offset < 0 || list_offset as usize + 8 > data.len() {
        return Err(bad("chunk list offset out of range"));
    }
    let mut pos = list_offset as usize;
    if read_tag(data, pos)? != CHUNK_LIST_MAGIC {
        return Err(bad("bad chunk list id"));
    }
    pos += 4;
    let count = read_i32(data, pos)?;
    pos += 4;
    if count < 0 {
        return Err(bad("negative chunk count"));
    }

    let mut preset = Vst3Preset::default();
    for _ in 0..count {
        let id = read_tag(data, pos)?;
        let offset = read_i64(data, pos + 4)?;
        let size = read_i64(data, pos + 12)?;
        pos += 20;
        if offset < 0 || size < 0 || (offset as usize + size as usize) > data.len() {
            return Err(bad("chunk out of range"));
        }
        let blob = data[offset as usize..offset as usize + size as usize].to_vec();
        match id {
            COMPONENT_CHUNK => preset.component = Some(blob),
            CONTROLLER_CHUNK => preset.controller = Some(blob),
            other => {
                tracing::debug!(
                    "ignoring unknown preset chunk {:?}",
                    String::from_utf8_lossy(&other)
                );
            }
        }
    }
    Ok(preset)
}

/// Build a preset image from the two captured state blobs.
pub fn write(class_id: &[u8; 16], component: &[u8], controller: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + component.len() + controller.len() + 52);
    buf.extend_from_slice(&HEADER_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&class_id_to_ascii(class_id));
    buf.extend_from_slice(&0i64.to_le_bytes()); // list offset, patched below

    let mut entries: Vec<([u8; 4], i64, i64)> = Vec::with_capacity(2);

    let component_offset = buf.len() as i64;
    buf.extend_from_slice(component);
    entries.push((COMPONENT_CHUNK, component_offset, component.len() as i64));

    let controller_offset = buf.len() as i64;
    buf.extend_from_slice(controller);
    entries.push((CONTROLLER_CHUNK, controller_offset, controller.len() as i64));

    let list_offset = buf.len() as i64;
    buf.extend_from_slice(&CHUNK_LIST_MAGIC);
    buf.extend_from_slice(&(entries.len() as i32).to_le_bytes());
    for (id, offset, size) in &entries {
        buf.extend_from_slice(id);
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
    }

    buf[LIST_OFFSET_POS..LIST_OFFSET_POS + 8].copy_from_slice(&list_offset.to_le_bytes());
    buf
}
