use object::read::elf::{ElfFile32, ProgramHeader};
use object::{Object, ObjectSegment};

/// ELF files start with this magic.
const ELF_MAGIC: &[u8] = b"\x7fELF";

pub fn is_elf(data: &[u8]) -> bool {
    data.starts_with(ELF_MAGIC)
}

/// Flatten the loadable segments of an ELF into a binary starting at `base_addr`.
///
/// Gaps between segments are filled with `0xff`, as if left erased.
pub fn objcopy(file: &ElfFile32, base_addr: u32) -> anyhow::Result<Vec<u8>> {
    let mut last_paddr = 0;
    let mut segments = vec![];
    for segment in file.segments() {
        let filesz = segment.elf_program_header().p_filesz(file.endianness());
        let memsz = segment.elf_program_header().p_memsz(file.endianness());

        if filesz == 0 {
            // Skip bss, it is cleared during startup anyway.
            continue;
        }

        if filesz > memsz {
            return Err(anyhow::anyhow!("p_filesz larger than p_memsz"));
        }

        let paddr = segment.elf_program_header().p_paddr(file.endianness());
        if paddr < base_addr {
            return Err(anyhow::anyhow!(
                "Segment at 0x{paddr:0x} lies before the image base 0x{base_addr:0x}"
            ));
        }
        if paddr < last_paddr {
            return Err(anyhow::anyhow!(
                "Segments not in order of physical address or overlapping segments"
            ));
        }
        last_paddr = paddr + filesz;

        segments.push((paddr, segment));
    }

    if segments.is_empty() {
        return Err(anyhow::anyhow!("ELF holds no loadable data"));
    }

    let output_size = (last_paddr - base_addr) as usize;
    log::debug!("Image base address: 0x{base_addr:0x}");
    log::debug!("Image entry address: 0x{:0x}", file.entry());
    log::debug!("Image output size: 0x{output_size:0x}");

    let mut image = vec![0xff; output_size];
    for (paddr, segment) in segments {
        let data = segment.data()?;
        let start = (paddr - base_addr) as usize;
        image[start..start + data.len()].copy_from_slice(data);
    }

    Ok(image)
}
