//! Section header table entries and their constants.

use scroll::{Pwrite, SizeWith};

/// Undefined section index.
pub const SHN_UNDEF: u16 = 0;

// === sh_type ===
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;

// === sh_flags ===
pub const SHF_WRITE: u64 = 1 << 0;
pub const SHF_ALLOC: u64 = 1 << 1;
pub const SHF_EXECINSTR: u64 = 1 << 2;
pub const SHF_MERGE: u64 = 1 << 4;
pub const SHF_STRINGS: u64 = 1 << 5;
pub const SHF_INFO_LINK: u64 = 1 << 6;

/// Size in bytes of one `Elf64_Shdr` entry.
pub const SIZEOF_SHDR: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pwrite, SizeWith)]
pub struct SectionHeader {
    /// Byte offset of the name in `.shstrtab`.
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    /// Always 0: this writer never assigns virtual addresses.
    pub sh_addr: u64,
    pub sh_offset: u64,
    /// Logical (pre-padding) payload size.
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// The ten sections this writer always emits, in their contractual order.
/// Indices into this array are the same indices used in `st_shndx` and in
/// `sh_info` for the `.rela.*` tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionIndex {
    Null = 0,
    ShStrtab = 1,
    Text = 2,
    Rodata = 3,
    Data = 4,
    Strtab = 5,
    Symtab = 6,
    RelaText = 7,
    RelaRodata = 8,
    RelaData = 9,
}

pub const SECTION_NAMES: [&str; 9] = [
    ".shstrtab",
    ".text",
    ".rodata",
    ".data",
    ".strtab",
    ".symtab",
    ".rela.text",
    ".rela.rodata",
    ".rela.data",
];

pub const NUM_SECTIONS: u16 = 10;
