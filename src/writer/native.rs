//! Native parts of a managed image: the `mscoree` import, the startup stub, base
//! relocations and the debug directory.

use crate::{
    file::io::push_le,
    writer::{
        config::{DebugPayload, Machine},
        parts::Placement,
    },
    Error, Result,
};

/// The runtime shim every managed image imports from
pub const MSCOREE_DLL: &str = "mscoree.dll";
/// Entry of a managed EXE
pub const COR_EXE_MAIN: &str = "_CorExeMain";
/// Entry of a managed DLL
pub const COR_DLL_MAIN: &str = "_CorDllMain";

/// Size of one import descriptor
const IMPORT_DESCRIPTOR_SIZE: u32 = 20;
/// Size of an `IMAGE_DEBUG_DIRECTORY` entry
pub const DEBUG_DIRECTORY_SIZE: u32 = 28;
/// Size of the startup stub: 2 bytes of padding, `FF 25` and a 32-bit operand
pub const STARTUP_STUB_SIZE: u32 = 8;
/// Offset of the stub's first instruction within the stub part
pub const STARTUP_STUB_ENTRY: u32 = 2;
/// Offset of the stub's 32-bit operand within the stub part
const STARTUP_STUB_OPERAND: u32 = 4;

/// `IMAGE_REL_BASED_HIGHLOW`
const REL_BASED_HIGHLOW: u16 = 3;
/// `IMAGE_REL_BASED_ABSOLUTE`, used as block padding
const REL_BASED_ABSOLUTE: u16 = 0;

fn entry_name(is_dll: bool) -> &'static str {
    if is_dll {
        COR_DLL_MAIN
    } else {
        COR_EXE_MAIN
    }
}

fn thunk_size(pe32_plus: bool) -> u32 {
    if pe32_plus {
        8
    } else {
        4
    }
}

fn push_thunk(buffer: &mut Vec<u8>, pe32_plus: bool, rva: u32) {
    if pe32_plus {
        push_le(buffer, u64::from(rva));
    } else {
        push_le(buffer, rva);
    }
}

/// Size of the import address table: one thunk and the terminator
#[must_use]
pub fn iat_size(pe32_plus: bool) -> u32 {
    2 * thunk_size(pe32_plus)
}

/// Layout of the import directory part, relative to its start.
struct ImportLayout {
    lookup_table: u32,
    hint_name: u32,
    dll_name: u32,
    size: u32,
}

fn import_layout(pe32_plus: bool, is_dll: bool) -> ImportLayout {
    let lookup_table = 2 * IMPORT_DESCRIPTOR_SIZE;
    let hint_name = lookup_table + iat_size(pe32_plus);
    // hint, name, terminator, padded to even
    let hint_name_size = (2 + entry_name(is_dll).len() as u32 + 1).next_multiple_of(2);
    let dll_name = hint_name + hint_name_size;
    ImportLayout {
        lookup_table,
        hint_name,
        dll_name,
        size: dll_name + MSCOREE_DLL.len() as u32 + 1,
    }
}

/// Size of the import directory part
#[must_use]
pub fn import_directory_size(pe32_plus: bool, is_dll: bool) -> u32 {
    import_layout(pe32_plus, is_dll).size
}

/// RVA of the hint/name entry when the import directory is at `import_rva`
#[must_use]
pub fn hint_name_rva(import_rva: u32, pe32_plus: bool, is_dll: bool) -> u32 {
    import_rva + import_layout(pe32_plus, is_dll).hint_name
}

/// Encode the import address table; its thunk names the hint/name entry.
#[must_use]
pub fn import_address_table(pe32_plus: bool, hint_name_rva: u32) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(iat_size(pe32_plus) as usize);
    push_thunk(&mut buffer, pe32_plus, hint_name_rva);
    push_thunk(&mut buffer, pe32_plus, 0);
    buffer
}

/// Encode the import directory placed at `import_rva` for an IAT at `iat_rva`.
#[must_use]
pub fn import_directory(import_rva: u32, iat_rva: u32, pe32_plus: bool, is_dll: bool) -> Vec<u8> {
    let layout = import_layout(pe32_plus, is_dll);
    let mut buffer = Vec::with_capacity(layout.size as usize);

    push_le(&mut buffer, import_rva + layout.lookup_table);
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, import_rva + layout.dll_name);
    push_le(&mut buffer, iat_rva);
    buffer.extend_from_slice(&[0u8; IMPORT_DESCRIPTOR_SIZE as usize]);

    push_thunk(&mut buffer, pe32_plus, import_rva + layout.hint_name);
    push_thunk(&mut buffer, pe32_plus, 0);

    push_le(&mut buffer, 0u16);
    buffer.extend_from_slice(entry_name(is_dll).as_bytes());
    buffer.push(0);
    buffer.resize(layout.dll_name as usize, 0);

    buffer.extend_from_slice(MSCOREE_DLL.as_bytes());
    buffer.push(0);
    buffer
}

/// Size of the startup stub for `machine`, 0 if it has none
#[must_use]
pub fn startup_stub_size(machine: Machine) -> u32 {
    if machine.has_startup_stub() {
        STARTUP_STUB_SIZE
    } else {
        0
    }
}

/// Encode the startup stub placed at `stub_rva`.
///
/// x86 jumps through the absolute address of the IAT slot, which needs a base
/// relocation. x64 addresses the slot relative to the next instruction.
///
/// # Errors
/// Returns [`Error::LayoutFailed`] if the IAT is out of reach of the jump, or the
/// machine has no stub.
pub fn startup_stub(machine: Machine, image_base: u64, stub_rva: u32, iat_rva: u32) -> Result<Vec<u8>> {
    let operand = match machine {
        Machine::I386 => u32::try_from(image_base + u64::from(iat_rva)).map_err(|_| {
            Error::LayoutFailed(format!("IAT address 0x{image_base:X}+0x{iat_rva:X} exceeds 32 bits"))
        })?,
        Machine::Amd64 => {
            let next = i64::from(stub_rva) + i64::from(STARTUP_STUB_SIZE);
            let displacement = i32::try_from(i64::from(iat_rva) - next)
                .map_err(|_| Error::LayoutFailed("IAT out of reach of the startup stub".to_string()))?;
            displacement as u32
        }
        Machine::Arm64 => {
            return Err(Error::LayoutFailed("ARM64 images have no startup stub".to_string()))
        }
    };

    let mut buffer = Vec::with_capacity(STARTUP_STUB_SIZE as usize);
    buffer.extend_from_slice(&[0x00, 0x00, 0xFF, 0x25]);
    push_le(&mut buffer, operand);
    Ok(buffer)
}

/// RVA of the native entry point for a stub placed at `stub`
#[must_use]
pub fn stub_entry_rva(stub: &Placement) -> u32 {
    stub.rva + STARTUP_STUB_ENTRY
}

/// Size of the base relocations for `machine`; only the x86 stub needs one
#[must_use]
pub fn relocations_size(machine: Machine) -> u32 {
    if machine == Machine::I386 {
        12
    } else {
        0
    }
}

/// Encode the relocation block fixing up the stub placed at `stub_rva`
#[must_use]
pub fn relocations(stub_rva: u32) -> Vec<u8> {
    let target = stub_rva + STARTUP_STUB_OPERAND;
    let page = target & !0xFFF;

    let mut buffer = Vec::with_capacity(12);
    push_le(&mut buffer, page);
    push_le(&mut buffer, 12u32);
    #[allow(clippy::cast_possible_truncation)]
    let entry = (REL_BASED_HIGHLOW << 12) | (target & 0xFFF) as u16;
    push_le(&mut buffer, entry);
    push_le(&mut buffer, REL_BASED_ABSOLUTE);
    buffer
}

/// Size of the debug directory part
#[must_use]
pub fn debug_directory_size(debug: Option<&DebugPayload>) -> u32 {
    debug.map_or(0, |payload| DEBUG_DIRECTORY_SIZE + payload.data.len() as u32)
}

/// Encode the debug directory placed at `placement`; the payload follows the entry.
#[must_use]
pub fn debug_directory(payload: &DebugPayload, placement: &Placement, timestamp: u32) -> Vec<u8> {
    let mut buffer = Vec::with_capacity((DEBUG_DIRECTORY_SIZE as usize) + payload.data.len());
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, timestamp);
    push_le(&mut buffer, payload.major_version);
    push_le(&mut buffer, payload.minor_version);
    push_le(&mut buffer, payload.kind);
    push_le(&mut buffer, payload.data.len() as u32);
    push_le(&mut buffer, placement.rva + DEBUG_DIRECTORY_SIZE);
    push_le(&mut buffer, placement.offset + DEBUG_DIRECTORY_SIZE);
    buffer.extend_from_slice(&payload.data);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_pe32() {
        assert_eq!(import_directory_size(false, false), 74);
        assert_eq!(import_directory_size(true, true), 82);

        let bytes = import_directory(0x2100, 0x2000, false, false);
        assert_eq!(bytes.len(), 74);

        #[rustfmt::skip]
        let descriptor = [
            0x28, 0x21, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x3E, 0x21, 0x00, 0x00,
            0x00, 0x20, 0x00, 0x00,
        ];
        assert_eq!(&bytes[..20], &descriptor);
        assert_eq!(&bytes[40..44], &[0x30, 0x21, 0x00, 0x00]);
        assert_eq!(&bytes[50..61], b"_CorExeMain");
        assert_eq!(&bytes[62..73], b"mscoree.dll");

        let iat = import_address_table(false, hint_name_rva(0x2100, false, false));
        assert_eq!(iat, [0x30, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn stubs() {
        let x86 = startup_stub(Machine::I386, 0x40_0000, 0x2200, 0x2000).unwrap();
        assert_eq!(x86, [0x00, 0x00, 0xFF, 0x25, 0x00, 0x20, 0x40, 0x00]);

        let x64 = startup_stub(Machine::Amd64, 0x1_4000_0000, 0x2200, 0x2000).unwrap();
        // next instruction at 0x2208, IAT at 0x2000
        assert_eq!(x64, [0x00, 0x00, 0xFF, 0x25, 0xF8, 0xFD, 0xFF, 0xFF]);

        assert!(startup_stub(Machine::I386, 0xFFFF_0000, 0x2200, 0x1_0000).is_err());
        assert!(startup_stub(Machine::Arm64, 0, 0, 0).is_err());
        assert_eq!(startup_stub_size(Machine::Arm64), 0);
    }

    #[test]
    fn relocation_block() {
        assert_eq!(
            relocations(0x2FFE),
            [0x00, 0x30, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x02, 0x30, 0x00, 0x00]
        );
        assert_eq!(relocations_size(Machine::Amd64), 0);
    }

    #[test]
    fn debug_entry() {
        let payload = DebugPayload::codeview([0x11; 16], 1, "a.pdb");
        assert_eq!(payload.data.len(), 30);
        assert_eq!(debug_directory_size(Some(&payload)), 58);
        assert_eq!(debug_directory_size(None), 0);

        let placement = Placement {
            padding: 0,
            size: 58,
            offset: 0x400,
            rva: 0x2400,
        };
        let bytes = debug_directory(&payload, &placement, 0x1234_5678);
        assert_eq!(bytes.len(), 58);
        assert_eq!(&bytes[12..16], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[20..24], &[0x1C, 0x24, 0x00, 0x00]);
        assert_eq!(&bytes[24..28], &[0x1C, 0x04, 0x00, 0x00]);
        assert_eq!(&bytes[28..32], b"RSDS");
    }
}
