use std::path::PathBuf;

use thiserror::Error;
use xmas_elf::{program, ElfFile};

use crate::config::ram_config;
use crate::ram::Ram;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid elf image: {0}")]
    InvalidElf(String),
}

/// What the loader learned about an image.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    pub entry: u32,
    /// Address of the `.tohost` section when the image carries one.
    pub tohost_addr: Option<u32>,
}

/// Copy every PT_LOAD segment of an ELF32 image into RAM and return the
/// entry point. The BSS remainder of each segment is zero-filled.
pub fn load_elf(ram: &mut Ram, bytes: &[u8]) -> Result<LoadedImage, LoadError> {
    let elf = ElfFile::new(bytes).map_err(|e| LoadError::InvalidElf(e.to_string()))?;

    for i in 0..elf.header.pt2.ph_count() {
        let ph = elf
            .program_header(i)
            .map_err(|e| LoadError::InvalidElf(e.to_string()))?;
        let ty = ph
            .get_type()
            .map_err(|e| LoadError::InvalidElf(e.to_string()))?;
        if ty != program::Type::Load {
            continue;
        }

        let paddr = ph.physical_addr() as u32;
        let file_start = ph.offset() as usize;
        let file_end = file_start + ph.file_size() as usize;
        if file_end > bytes.len() {
            return Err(LoadError::InvalidElf(format!(
                "segment {} exceeds the file ({} > {})",
                i,
                file_end,
                bytes.len()
            )));
        }

        log::debug!(
            "loading segment {}: paddr = {:#x}, filesz = {:#x}, memsz = {:#x}",
            i,
            paddr,
            ph.file_size(),
            ph.mem_size()
        );
        ram.insert_section(&bytes[file_start..file_end], paddr);

        let bss_len = (ph.mem_size() - ph.file_size()) as usize;
        if bss_len > 0 {
            ram.insert_section(&vec![0u8; bss_len], paddr.wrapping_add(ph.file_size() as u32));
        }
    }

    let tohost_addr = elf
        .find_section_by_name(".tohost")
        .map(|section| section.address() as u32);

    Ok(LoadedImage {
        entry: elf.header.pt2.entry_point() as u32,
        tohost_addr,
    })
}

/// Load a flat kernel image at the DRAM base, with an optional device tree
/// blob at `dtb_addr`. Execution starts at the base.
pub fn load_kernel(ram: &mut Ram, kernel: &[u8], dtb: Option<&[u8]>, dtb_addr: u32) -> LoadedImage {
    ram.insert_section(kernel, ram_config::BASE_ADDR);
    if let Some(blob) = dtb {
        ram.insert_section(blob, dtb_addr);
    }
    LoadedImage {
        entry: ram_config::BASE_ADDR,
        tohost_addr: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::WordBus;

    #[test]
    fn test_load_kernel_places_image_and_dtb() {
        let mut ram = Ram::new();
        let kernel = [0x13u8, 0x00, 0x00, 0x00, 0x73, 0x00, 0x00, 0x00];
        let dtb = [0xD0, 0x0D, 0xFE, 0xED];
        let dtb_addr = ram_config::BASE_ADDR + 0x8000;

        let image = load_kernel(&mut ram, &kernel, Some(&dtb), dtb_addr);
        assert_eq!(image.entry, ram_config::BASE_ADDR);
        assert_eq!(ram.read_word(0), 0x0000_0013);
        assert_eq!(ram.read_word(1), 0x0000_0073);
        assert_eq!(ram.read_word(0x8000 >> 2), 0xEDFE_0DD0);
    }

    #[test]
    fn test_load_elf_rejects_garbage() {
        let mut ram = Ram::new();
        assert!(load_elf(&mut ram, &[0u8; 16]).is_err());
    }
}
