//! Lays a producing [`Assembly`](crate::assembly::Assembly) out into a fresh
//! page-aligned virtual mapping, copies its bytes in, resolves every
//! relocation against the addresses chosen at map time, and (once) narrows
//! each region to its final protection.

use std::collections::HashMap;
use std::fmt;

use log::{debug, trace};
use memmap2::MmapMut;

use crate::assembly::{Assembly, Binding, RelocKind, Section, Symbol, SymbolTable};
use crate::error::{Error, Result};

/// Which target architecture the current build is linking/emitting for.
/// Spec'd as a compile-time switch; modeled as a runtime value here so both
/// arms are exercisable from one compiled test binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    Aarch64,
}

impl Default for TargetArch {
    fn default() -> Self {
        if cfg!(target_arch = "aarch64") {
            TargetArch::Aarch64
        } else {
            TargetArch::X86_64
        }
    }
}

/// Host pointer width. Only `W64` is fully supported by the ELF writer (see
/// `elf::writer`); carried here for API completeness per spec's §6
/// compile-time switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    W32,
    W64,
}

impl Default for Word {
    fn default() -> Self {
        if cfg!(target_pointer_width = "32") {
            Word::W32
        } else {
            Word::W64
        }
    }
}

/// Runtime knobs for [`Assembly::link`]. Not a persisted/file-backed
/// configuration, this subsystem has no CLI or environment surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkerConfig {
    pub target: TargetArch,
    pub word: Word,
    /// Print every byte of the linked `.text` section as two hex digits per
    /// line to stdout, for diagnostic inspection.
    pub dump_text: bool,
}

fn ceil_page(n: usize, page_size: usize) -> usize {
    (n + page_size - 1) & !(page_size - 1)
}

/// The result of linking: a page-aligned virtual mapping holding the three
/// copied-in sections, plus the resolved `symbol -> absolute address` table.
pub struct LinkedAssembly<'a> {
    mapping: MmapMut,
    code_size: usize,
    data_size: usize,
    stat_size: usize,
    symtab: &'a SymbolTable,
    defs: HashMap<Symbol, u64>,
    loaded: bool,
}

impl<'a> fmt::Debug for LinkedAssembly<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedAssembly")
            .field("code_size", &self.code_size)
            .field("data_size", &self.data_size)
            .field("stat_size", &self.stat_size)
            .field("loaded", &self.loaded)
            .finish()
    }
}

impl<'a> LinkedAssembly<'a> {
    fn base(&self) -> *mut u8 {
        self.mapping.as_ptr() as *mut u8
    }

    pub fn codesize(&self) -> usize {
        self.code_size
    }

    pub fn datasize(&self) -> usize {
        self.data_size
    }

    pub fn statsize(&self) -> usize {
        self.stat_size
    }

    /// Byte offset of the start of `section` within the mapping.
    fn section_start(&self, section: Section) -> usize {
        match section {
            Section::Code => 0,
            Section::Data => self.code_size,
            Section::Static => self.code_size + self.data_size,
        }
    }

    fn section_len(&self, section: Section) -> usize {
        match section {
            Section::Code => self.code_size,
            Section::Data => self.data_size,
            Section::Static => self.stat_size,
        }
    }

    pub fn code(&self) -> &[u8] {
        &self.mapping[0..self.code_size]
    }

    pub fn data(&self) -> &[u8] {
        &self.mapping[self.code_size..self.code_size + self.data_size]
    }

    pub fn stat(&self) -> &[u8] {
        let start = self.code_size + self.data_size;
        &self.mapping[start..start + self.stat_size]
    }

    pub fn code_ptr(&self) -> *const u8 {
        self.base()
    }

    pub fn data_ptr(&self) -> *const u8 {
        unsafe { self.base().add(self.code_size) }
    }

    pub fn stat_ptr(&self) -> *const u8 {
        unsafe { self.base().add(self.code_size + self.data_size) }
    }

    pub fn resolve(&self, symbol: Symbol) -> Option<u64> {
        self.defs.get(&symbol).copied()
    }

    pub fn symtab(&self) -> &SymbolTable {
        self.symtab
    }

    /// Re-tag the three page runs with their final protections. Callable at
    /// most once; a second call is a programmer error (spec: "`load()` may
    /// be called at most once to finalize protections").
    pub fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Err(Error::AlreadyLoaded);
        }

        let code_len = ceil_page(self.code_size, region::page::size());
        let data_len = ceil_page(self.data_size, region::page::size());
        let stat_len = ceil_page(self.stat_size, region::page::size());

        unsafe {
            region::protect(self.base(), code_len, region::Protection::READ_EXECUTE)
                .map_err(|e| Error::MapFailed(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            region::protect(
                self.base().add(code_len),
                data_len,
                region::Protection::READ,
            )
            .map_err(|e| Error::MapFailed(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            region::protect(
                self.base().add(code_len + data_len),
                stat_len,
                region::Protection::READ_WRITE,
            )
            .map_err(|e| Error::MapFailed(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        }

        self.loaded = true;
        debug!("linked assembly loaded: code={code_len} data={data_len} stat={stat_len}");
        Ok(())
    }

    /// Cast the code region to a nullary function pointer and call it.
    ///
    /// # Safety
    ///
    /// The caller must have called [`load`](Self::load) first, and must know
    /// that the linked code's calling convention is `extern "C" fn() -> R`
    /// with no arguments. This crate imposes no calling convention of its
    /// own (spec §6).
    pub unsafe fn call0<R>(&self) -> R {
        let f: extern "C" fn() -> R = unsafe { std::mem::transmute(self.code_ptr()) };
        f()
    }
}

impl Assembly {
    /// Lay `self` out into a fresh virtual mapping, copy its bytes in, and
    /// resolve every relocation. Does not call [`LinkedAssembly::load`]:
    /// the mapping starts out read/write so relocations can be patched.
    pub fn link(&self, config: &LinkerConfig) -> Result<LinkedAssembly<'_>> {
        let page_size = region::page::size();
        let code_size = ceil_page(self.code.len(), page_size);
        let data_size = ceil_page(self.data.len(), page_size);
        let stat_size = ceil_page(self.stat.len(), page_size);
        let total = code_size + data_size + stat_size;

        trace!(
            "linking: code={} data={} stat={} (rounded {})",
            self.code.len(),
            self.data.len(),
            self.stat.len(),
            total
        );

        // mmap(2) rejects a zero-length mapping; an empty Assembly still
        // needs *some* backing allocation even though every section size
        // reported to callers stays zero.
        let mut mapping = MmapMut::map_anon(total.max(1)).map_err(Error::MapFailed)?;

        mapping[0..self.code.len()].copy_from_slice(&self.code);
        mapping[code_size..code_size + self.data.len()].copy_from_slice(&self.data);
        mapping[code_size + data_size..code_size + data_size + self.stat.len()]
            .copy_from_slice(&self.stat);

        let mut linked = LinkedAssembly {
            mapping,
            code_size,
            data_size,
            stat_size,
            symtab: &self.symtab,
            defs: HashMap::new(),
            loaded: false,
        };

        for def in &self.defs {
            let base = linked.section_start(def.section) as u64;
            linked.defs.insert(def.symbol, base + def.offset);
        }

        for reloc in &self.relocs {
            apply_reloc(&mut linked, reloc, config)?;
        }

        if config.dump_text {
            let mut line = String::new();
            for byte in linked.code() {
                line.push_str(&format!("{byte:02x}"));
            }
            println!("{line}");
        }

        Ok(linked)
    }
}

fn apply_reloc(linked: &mut LinkedAssembly<'_>, reloc: &crate::assembly::Reloc, _config: &LinkerConfig) -> Result<()> {
    let symbol_addr = linked
        .resolve(reloc.symbol)
        .ok_or(Error::UndefinedSymbol(reloc.symbol))?;

    let base = linked.section_start(reloc.section) as u64;
    debug_assert!(reloc.offset as usize <= linked.section_len(reloc.section));
    let reloc_addr = base + reloc.offset;

    let diff = symbol_addr as i64 - reloc_addr as i64;

    check_range(reloc, diff)?;

    let width = reloc.kind.width();
    let field_start = (reloc_addr - width as u64) as usize;
    let bytes = encode(reloc.kind, diff);
    linked.mapping[field_start..field_start + width].copy_from_slice(&bytes[..width]);

    Ok(())
}

fn check_range(reloc: &crate::assembly::Reloc, diff: i64) -> Result<()> {
    let in_range = match reloc.kind {
        RelocKind::Rel8 => (-128..=127).contains(&diff),
        RelocKind::Rel16Le | RelocKind::Rel16Be => (-32768..=32767).contains(&diff),
        // The corrected bound: the original source compares against
        // 0xffffffff (an unsigned upper bound), which would wrongly accept
        // any positive diff up to 2^32-1. The correct signed range is
        // [-2^31, 2^31-1].
        RelocKind::Rel32Le | RelocKind::Rel32Be => {
            (i32::MIN as i64..=i32::MAX as i64).contains(&diff)
        }
        RelocKind::Rel64Le | RelocKind::Rel64Be => true,
    };
    if !in_range {
        return Err(Error::DisplacementOutOfRange {
            symbol: reloc.symbol,
            section: reloc.section,
            offset: reloc.offset,
            displacement: diff,
        });
    }
    Ok(())
}

/// Encode `diff` into an 8-byte little-endian scratch buffer per `kind`'s
/// width and byte order; callers take only the first `kind.width()` bytes.
fn encode(kind: RelocKind, diff: i64) -> [u8; 8] {
    if kind.little_endian() {
        match kind.width() {
            1 => {
                let mut buf = [0u8; 8];
                buf[0] = diff as i8 as u8;
                buf
            }
            2 => {
                let mut buf = [0u8; 8];
                buf[..2].copy_from_slice(&(diff as i16).to_le_bytes());
                buf
            }
            4 => {
                let mut buf = [0u8; 8];
                buf[..4].copy_from_slice(&(diff as i32).to_le_bytes());
                buf
            }
            8 => diff.to_le_bytes(),
            _ => unreachable!(),
        }
    } else {
        match kind.width() {
            2 => {
                let mut buf = [0u8; 8];
                buf[..2].copy_from_slice(&(diff as i16).to_be_bytes());
                buf
            }
            4 => {
                let mut buf = [0u8; 8];
                buf[..4].copy_from_slice(&(diff as i32).to_be_bytes());
                buf
            }
            8 => diff.to_be_bytes(),
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_rel8_roundtrip() {
        let bytes = encode(RelocKind::Rel8, -5);
        assert_eq!(bytes[0] as i8, -5);
    }

    #[test]
    fn encode_rel32_le() {
        let bytes = encode(RelocKind::Rel32Le, 4);
        assert_eq!(&bytes[..4], &4i32.to_le_bytes());
    }

    #[test]
    fn encode_rel32_be() {
        let bytes = encode(RelocKind::Rel32Be, -10);
        assert_eq!(&bytes[..4], &(-10i32).to_be_bytes());
    }

    #[test]
    fn check_range_rejects_overflowing_rel8() {
        let reloc = crate::assembly::Reloc {
            symbol: Symbol(0),
            section: Section::Code,
            offset: 1,
            kind: RelocKind::Rel8,
        };
        assert!(check_range(&reloc, 199).is_err());
        assert!(check_range(&reloc, 127).is_ok());
        assert!(check_range(&reloc, -128).is_ok());
    }

    #[test]
    fn check_range_uses_signed_32bit_bound() {
        let reloc = crate::assembly::Reloc {
            symbol: Symbol(0),
            section: Section::Code,
            offset: 1,
            kind: RelocKind::Rel32Le,
        };
        // The buggy original-source check (`diff > 0xffffffff`) would accept
        // this; the corrected signed check must reject it.
        assert!(check_range(&reloc, i32::MAX as i64 + 1).is_err());
        assert!(check_range(&reloc, i32::MAX as i64).is_ok());
        assert!(check_range(&reloc, i32::MIN as i64).is_ok());
    }

    fn toy_assembly() -> Assembly {
        let mut asm = Assembly::new();
        let main = asm.symtab.intern(b"main");
        asm.code.push(0x90);
        asm.define(main, Section::Code, 0, Binding::Local);
        asm
    }

    #[test]
    fn link_empty_assembly_has_zero_pages() {
        let asm = Assembly::new();
        let linked = asm.link(&LinkerConfig::default()).unwrap();
        assert_eq!(linked.codesize() % region::page::size(), 0);
        assert_eq!(linked.datasize() % region::page::size(), 0);
        assert_eq!(linked.statsize() % region::page::size(), 0);
    }

    #[test]
    fn link_single_local_def() {
        let asm = toy_assembly();
        let linked = asm.link(&LinkerConfig::default()).unwrap();
        let main = Symbol(0);
        assert_eq!(linked.resolve(main), Some(linked.code_ptr() as u64));
    }

    #[test]
    fn link_undefined_symbol_errors() {
        let mut asm = Assembly::new();
        let missing = asm.symtab.intern(b"missing");
        asm.code = vec![0u8; 10];
        asm.relocate(missing, Section::Code, 5, RelocKind::Rel32Le);
        let err = asm.link(&LinkerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::UndefinedSymbol(_)));
    }

    #[test]
    fn link_intra_section_pc_relative_patch() {
        let mut asm = Assembly::new();
        let target = asm.symtab.intern(b"target");
        asm.code = vec![0u8; 10];
        asm.define(target, Section::Code, 9, Binding::Local);
        asm.relocate(target, Section::Code, 5, RelocKind::Rel32Le);
        let linked = asm.link(&LinkerConfig::default()).unwrap();
        let patched = &linked.code()[1..5];
        assert_eq!(patched, &4i32.to_le_bytes());
    }

    #[test]
    fn link_out_of_range_rel8_errors() {
        let mut asm = Assembly::new();
        let target = asm.symtab.intern(b"target");
        asm.code = vec![0u8; 300];
        asm.define(target, Section::Code, 200, Binding::Local);
        asm.relocate(target, Section::Code, 1, RelocKind::Rel8);
        let err = asm.link(&LinkerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::DisplacementOutOfRange { .. }));
    }

    #[test]
    fn link_cross_section_relocation() {
        let mut asm = Assembly::new();
        let target = asm.symtab.intern(b"target");
        asm.code = vec![0u8; 10];
        asm.stat = vec![0u8; 10];
        asm.define(target, Section::Static, 4, Binding::Local);
        asm.relocate(target, Section::Code, 8, RelocKind::Rel32Le);
        let linked = asm.link(&LinkerConfig::default()).unwrap();
        let expected = (linked.stat_ptr() as i64 + 4) - (linked.code_ptr() as i64 + 8);
        let patched = i32::from_le_bytes(linked.code()[4..8].try_into().unwrap());
        assert_eq!(patched as i64, expected);
    }

    #[test]
    fn load_then_load_again_errors() {
        let asm = toy_assembly();
        let mut linked = asm.link(&LinkerConfig::default()).unwrap();
        linked.load().unwrap();
        assert!(matches!(linked.load(), Err(Error::AlreadyLoaded)));
    }
}
