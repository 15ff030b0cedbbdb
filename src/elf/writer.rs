//! Bit-exact ELF64 relocatable object serializer.
//!
//! Emits, in order, the ten sections documented below. Every multi-byte
//! field is little-endian; the writer only ever produces `ELFCLASS64` /
//! `ELFDATA2LSB` output regardless of the Assembly's origin.

use std::io::Write;

use log::trace;
use scroll::Pwrite;

use crate::assembly::{Assembly, Binding, RelocKind, Section};
use crate::error::{Error, Result};
use crate::linker::{TargetArch, Word};

use super::header::{Header, EM_AARCH64, EM_X86_64};
use super::pad_to;
use super::reloc::{r_info, Rela, R_X86_64_PC16, R_X86_64_PC32, R_X86_64_PC64, R_X86_64_PC8, SIZEOF_RELA};
use super::section_header::{
    SectionHeader, SectionIndex, SECTION_NAMES, SHF_ALLOC, SHF_EXECINSTR, SHF_INFO_LINK,
    SHF_MERGE, SHF_STRINGS, SHF_WRITE, SHN_UNDEF, SHT_NULL, SHT_PROGBITS, SHT_RELA, SHT_STRTAB,
    SHT_SYMTAB, SIZEOF_SHDR,
};
use super::strtab::StrtabBuilder;
use super::sym::{st_info, Sym, STB_GLOBAL, STB_LOCAL, STT_NOTYPE, STV_DEFAULT, SIZEOF_SYM};

const SECTION_PAD: usize = super::SECTION_PAD;
const HEADER_SIZE: usize = 64;
const SHDR_TABLE_SIZE: usize = SIZEOF_SHDR * 10;
const FIRST_SECTION_OFFSET: usize = HEADER_SIZE + SHDR_TABLE_SIZE;

/// Emission-time configuration: which machine to target, and the host word
/// size. Only `Word::W64` is actually emittable, `Word::W32` is carried for
/// API completeness and is rejected at the top of [`write_elf_object`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitConfig {
    pub target: TargetArch,
    pub word: Word,
}

struct SymbolInfo {
    name_offset: u32,
    defined: bool,
    section: Section,
    offset: u64,
    global: bool,
}

/// Serialize `asm` as an ELF64 relocatable object and write it to `out`.
///
/// `out` need only implement [`std::io::Write`]: a real file, a `Vec<u8>`
/// in tests, or any other sink.
pub fn write_elf_object<W: Write>(asm: &Assembly, config: &EmitConfig, out: &mut W) -> Result<()> {
    if config.word != Word::W64 {
        return Err(Error::UnsupportedHost("only ELFCLASS64 objects can be emitted"));
    }

    let e_machine = match config.target {
        TargetArch::X86_64 => EM_X86_64,
        TargetArch::Aarch64 => EM_AARCH64,
    };

    // --- .shstrtab ---
    let mut shstrtab = StrtabBuilder::new();
    let mut name_offsets = [0u32; 9];
    for (i, name) in SECTION_NAMES.iter().enumerate() {
        name_offsets[i] = shstrtab.push(name.as_bytes());
    }
    let mut shstrtab_bytes = shstrtab.into_bytes();
    let shstrtab_size = shstrtab_bytes.len() as u64;
    pad_to(&mut shstrtab_bytes, SECTION_PAD);

    // --- .text / .rodata / .data payloads ---
    let mut text = asm.code.clone();
    let text_size = text.len() as u64;
    pad_to(&mut text, SECTION_PAD);

    let mut rodata = asm.data.clone();
    let rodata_size = rodata.len() as u64;
    pad_to(&mut rodata, SECTION_PAD);

    let mut data = asm.stat.clone();
    let data_size = data.len() as u64;
    pad_to(&mut data, SECTION_PAD);

    // --- merge symbols: defs first, then any reloc-only symbol, each in
    // first-seen order ---
    let mut order = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for def in &asm.defs {
        if seen.insert(def.symbol) {
            order.push(def.symbol);
        }
    }
    for reloc in &asm.relocs {
        if seen.insert(reloc.symbol) {
            order.push(reloc.symbol);
        }
    }

    let mut strtab = StrtabBuilder::new();
    let mut infos = Vec::with_capacity(order.len());
    for &symbol in &order {
        let def = asm.defs.iter().find(|d| d.symbol == symbol);
        let name_offset = strtab.push(asm.symtab.name(symbol));
        match def {
            Some(def) => infos.push(SymbolInfo {
                name_offset,
                defined: true,
                section: def.section,
                offset: def.offset,
                global: def.binding == Binding::Global,
            }),
            None => infos.push(SymbolInfo {
                name_offset,
                defined: false,
                section: Section::Code,
                offset: 0,
                global: true,
            }),
        }
    }
    let mut strtab_bytes = strtab.into_bytes();
    let strtab_size = strtab_bytes.len() as u64;
    pad_to(&mut strtab_bytes, SECTION_PAD);

    // symbol -> 1-based index into .symtab, for r_info.
    let mut symbol_index = std::collections::HashMap::new();
    for (i, &symbol) in order.iter().enumerate() {
        symbol_index.insert(symbol, (i + 1) as u32);
    }

    // --- .symtab ---
    let symtab_logical_size = (SIZEOF_SYM * (infos.len() + 1)) as u64;
    let mut symtab_bytes = vec![0u8; symtab_logical_size as usize];
    // entry 0: reserved null symbol, already all-zero.
    for (i, info) in infos.iter().enumerate() {
        let shndx = if info.defined {
            match info.section {
                Section::Code => SectionIndex::Text as u16,
                Section::Data => SectionIndex::Rodata as u16,
                Section::Static => SectionIndex::Data as u16,
            }
        } else {
            SHN_UNDEF
        };
        let binding = if info.global { STB_GLOBAL } else { STB_LOCAL };
        let sym = Sym {
            st_name: info.name_offset,
            st_info: st_info(binding, STT_NOTYPE),
            st_other: STV_DEFAULT,
            st_shndx: shndx,
            st_value: if info.defined { info.offset } else { 0 },
            st_size: 0,
        };
        let entry_offset = (i + 1) * SIZEOF_SYM;
        symtab_bytes.pwrite_with(sym, entry_offset, scroll::LE)?;
    }
    pad_to(&mut symtab_bytes, SECTION_PAD);

    // --- relocation tables, partitioned by the section being patched ---
    let mut rela_text = Vec::new();
    let mut rela_rodata = Vec::new();
    let mut rela_data = Vec::new();
    let mut n_text = 0u64;
    let mut n_rodata = 0u64;
    let mut n_data = 0u64;

    for reloc in &asm.relocs {
        if config.target != TargetArch::X86_64 {
            return Err(Error::UnsupportedRelocation(
                "ELF relocation emission is only implemented for AMD64",
            ));
        }

        let (reloc_type, width) = match reloc.kind {
            RelocKind::Rel8 => (R_X86_64_PC8, 1u64),
            RelocKind::Rel16Le => (R_X86_64_PC16, 2),
            RelocKind::Rel32Le => (R_X86_64_PC32, 4),
            RelocKind::Rel64Le => (R_X86_64_PC64, 8),
            RelocKind::Rel16Be | RelocKind::Rel32Be | RelocKind::Rel64Be => {
                return Err(Error::UnsupportedRelocation(
                    "big-endian relocation kinds are unsupported on AMD64",
                ));
            }
        };

        let sym_index = symbol_index[&reloc.symbol];
        let rela = Rela {
            r_offset: reloc.offset - width,
            r_info: r_info(sym_index, reloc_type),
            r_addend: -(width as i64),
        };

        let (buf, count) = match reloc.section {
            Section::Code => (&mut rela_text, &mut n_text),
            Section::Data => (&mut rela_rodata, &mut n_rodata),
            Section::Static => (&mut rela_data, &mut n_data),
        };
        let entry_offset = buf.len();
        buf.resize(entry_offset + SIZEOF_RELA, 0);
        buf.pwrite_with(rela, entry_offset, scroll::LE)?;
        *count += 1;
    }
    pad_to(&mut rela_text, SECTION_PAD);
    pad_to(&mut rela_rodata, SECTION_PAD);
    pad_to(&mut rela_data, SECTION_PAD);

    // --- running file offsets ---
    let off_shstrtab = FIRST_SECTION_OFFSET as u64;
    let off_text = off_shstrtab + shstrtab_bytes.len() as u64;
    let off_rodata = off_text + text.len() as u64;
    let off_data = off_rodata + rodata.len() as u64;
    let off_strtab = off_data + data.len() as u64;
    let off_symtab = off_strtab + strtab_bytes.len() as u64;
    let off_rela_text = off_symtab + symtab_bytes.len() as u64;
    let off_rela_rodata = off_rela_text + rela_text.len() as u64;
    let off_rela_data = off_rela_rodata + rela_rodata.len() as u64;

    trace!(
        "writing elf object: text={text_size} rodata={rodata_size} data={data_size} symbols={} relocs={}",
        infos.len(),
        asm.relocs.len()
    );

    // --- section header table ---
    let mut shdrs = [SectionHeader::default(); 10];
    shdrs[SectionIndex::Null as usize] = SectionHeader {
        sh_type: SHT_NULL,
        ..Default::default()
    };
    shdrs[SectionIndex::ShStrtab as usize] = SectionHeader {
        sh_name: name_offsets[0],
        sh_type: SHT_STRTAB,
        sh_flags: SHF_STRINGS | SHF_MERGE,
        sh_offset: off_shstrtab,
        sh_size: shstrtab_size,
        ..Default::default()
    };
    shdrs[SectionIndex::Text as usize] = SectionHeader {
        sh_name: name_offsets[1],
        sh_type: SHT_PROGBITS,
        sh_flags: SHF_ALLOC | SHF_EXECINSTR,
        sh_offset: off_text,
        sh_size: text_size,
        sh_addralign: 16,
        ..Default::default()
    };
    shdrs[SectionIndex::Rodata as usize] = SectionHeader {
        sh_name: name_offsets[2],
        sh_type: SHT_PROGBITS,
        sh_flags: SHF_ALLOC,
        sh_offset: off_rodata,
        sh_size: rodata_size,
        sh_addralign: 16,
        ..Default::default()
    };
    shdrs[SectionIndex::Data as usize] = SectionHeader {
        sh_name: name_offsets[3],
        sh_type: SHT_PROGBITS,
        sh_flags: SHF_ALLOC | SHF_WRITE,
        sh_offset: off_data,
        sh_size: data_size,
        sh_addralign: 16,
        ..Default::default()
    };
    shdrs[SectionIndex::Strtab as usize] = SectionHeader {
        sh_name: name_offsets[4],
        sh_type: SHT_STRTAB,
        sh_flags: SHF_STRINGS | SHF_MERGE,
        sh_offset: off_strtab,
        sh_size: strtab_size,
        ..Default::default()
    };
    shdrs[SectionIndex::Symtab as usize] = SectionHeader {
        sh_name: name_offsets[5],
        sh_type: SHT_SYMTAB,
        sh_flags: SHF_ALLOC | SHF_MERGE,
        sh_offset: off_symtab,
        sh_size: symtab_logical_size,
        sh_link: SectionIndex::Strtab as u32,
        // Number of local symbols, including the reserved null entry,
        // computed from the actual local/global split rather than pinned
        // to 1 regardless of how many locals actually precede the globals.
        sh_info: 1 + infos.iter().take_while(|i| !i.global).count() as u32,
        sh_entsize: SIZEOF_SYM as u64,
        ..Default::default()
    };
    shdrs[SectionIndex::RelaText as usize] = SectionHeader {
        sh_name: name_offsets[6],
        sh_type: SHT_RELA,
        sh_flags: SHF_MERGE | SHF_INFO_LINK,
        sh_offset: off_rela_text,
        sh_size: SIZEOF_RELA as u64 * n_text,
        sh_link: SectionIndex::Symtab as u32,
        sh_info: SectionIndex::Text as u32,
        sh_entsize: SIZEOF_RELA as u64,
        ..Default::default()
    };
    shdrs[SectionIndex::RelaRodata as usize] = SectionHeader {
        sh_name: name_offsets[7],
        sh_type: SHT_RELA,
        sh_flags: SHF_MERGE | SHF_INFO_LINK,
        sh_offset: off_rela_rodata,
        sh_size: SIZEOF_RELA as u64 * n_rodata,
        sh_link: SectionIndex::Symtab as u32,
        sh_info: SectionIndex::Rodata as u32,
        sh_entsize: SIZEOF_RELA as u64,
        ..Default::default()
    };
    shdrs[SectionIndex::RelaData as usize] = SectionHeader {
        sh_name: name_offsets[8],
        sh_type: SHT_RELA,
        sh_flags: SHF_MERGE | SHF_INFO_LINK,
        sh_offset: off_rela_data,
        sh_size: SIZEOF_RELA as u64 * n_data,
        sh_link: SectionIndex::Symtab as u32,
        sh_info: SectionIndex::Data as u32,
        sh_entsize: SIZEOF_RELA as u64,
        ..Default::default()
    };

    let mut shdr_table = vec![0u8; SHDR_TABLE_SIZE];
    for (i, shdr) in shdrs.iter().enumerate() {
        shdr_table.pwrite_with(*shdr, i * SIZEOF_SHDR, scroll::LE)?;
    }

    let header = Header::new_rel(e_machine, 10, SectionIndex::ShStrtab as u16);
    let mut header_bytes = vec![0u8; HEADER_SIZE];
    header_bytes.pwrite_with(header, 0, scroll::LE)?;

    out.write_all(&header_bytes)?;
    out.write_all(&shdr_table)?;
    out.write_all(&shstrtab_bytes)?;
    out.write_all(&text)?;
    out.write_all(&rodata)?;
    out.write_all(&data)?;
    out.write_all(&strtab_bytes)?;
    out.write_all(&symtab_bytes)?;
    out.write_all(&rela_text)?;
    out.write_all(&rela_rodata)?;
    out.write_all(&rela_data)?;

    Ok(())
}

/// Declared stub: fully linked executable ELF emission is out of scope.
pub fn write_elf_executable<W: Write>(_asm: &Assembly, _config: &EmitConfig, _out: &mut W) -> Result<()> {
    Err(Error::Unimplemented("ELF executable emission is out of scope"))
}
