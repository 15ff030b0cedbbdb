//! The symbolic input consumed by this subsystem: three raw byte sections
//! plus unresolved definitions and relocation references, as produced by an
//! upstream instruction encoder. Read-only once handed to the linker or the
//! ELF writer.

use std::collections::HashMap;

/// One of the three byte regions an `Assembly` carries. Ordering is fixed
/// (code, then data, then static) and is relied on by both the in-memory
/// layout and the ELF section indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Code,
    Data,
    Static,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Code, Section::Data, Section::Static];
}

/// Local symbols are not visible outside the object; global symbols are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Local,
    Global,
}

/// An interned symbol name. Opaque outside of a `SymbolTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u32);

/// Append-only interner from symbol name to `Symbol` handle.
///
/// Indexes by integer handle instead of byte offset since this side of the
/// pipeline never needs to read a name back out of a foreign byte stream,
/// only to resolve handles to names when serializing.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    names: Vec<Vec<u8>>,
    by_name: HashMap<Vec<u8>, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Intern `name`, returning its existing handle if already present.
    pub fn intern(&mut self, name: &[u8]) -> Symbol {
        if let Some(sym) = self.by_name.get(name) {
            return *sym;
        }
        let sym = Symbol(self.names.len() as u32);
        self.names.push(name.to_vec());
        self.by_name.insert(name.to_vec(), sym);
        sym
    }

    pub fn name(&self, sym: Symbol) -> &[u8] {
        &self.names[sym.0 as usize]
    }
}

/// A width- and endianness-tagged PC-relative relocation kind. All seven
/// kinds encode `symbol_address - relocation_address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    Rel8,
    Rel16Le,
    Rel32Le,
    Rel64Le,
    Rel16Be,
    Rel32Be,
    Rel64Be,
}

impl RelocKind {
    /// Width in bytes of the field this relocation patches.
    pub fn width(self) -> usize {
        match self {
            RelocKind::Rel8 => 1,
            RelocKind::Rel16Le | RelocKind::Rel16Be => 2,
            RelocKind::Rel32Le | RelocKind::Rel32Be => 4,
            RelocKind::Rel64Le | RelocKind::Rel64Be => 8,
        }
    }

    /// `true` for the three `*_LE` / 8-bit kinds, `false` for `*_BE`.
    pub fn little_endian(self) -> bool {
        !matches!(self, RelocKind::Rel16Be | RelocKind::Rel32Be | RelocKind::Rel64Be)
    }
}

/// A symbolic definition: `symbol` resolves to `offset` bytes into `section`.
#[derive(Debug, Clone, Copy)]
pub struct Def {
    pub symbol: Symbol,
    pub section: Section,
    pub offset: u64,
    pub binding: Binding,
}

/// A deferred PC-relative patch. `section`/`offset` locate the byte
/// immediately *past* the field to patch (see the linker's relocation
/// module for the rationale).
#[derive(Debug, Clone, Copy)]
pub struct Reloc {
    pub symbol: Symbol,
    pub section: Section,
    pub offset: u64,
    pub kind: RelocKind,
}

/// The producing side's view of an assembly unit: three growable byte
/// buffers, a symbol interner, and the ordered defs/relocs that tie them
/// together. Built incrementally by a front end; read-only to everything in
/// this crate.
#[derive(Debug, Default)]
pub struct Assembly {
    pub code: Vec<u8>,
    pub data: Vec<u8>,
    pub stat: Vec<u8>,
    pub symtab: SymbolTable,
    pub defs: Vec<Def>,
    pub relocs: Vec<Reloc>,
}

impl Assembly {
    pub fn new() -> Self {
        Assembly::default()
    }

    pub fn section_mut(&mut self, section: Section) -> &mut Vec<u8> {
        match section {
            Section::Code => &mut self.code,
            Section::Data => &mut self.data,
            Section::Static => &mut self.stat,
        }
    }

    pub fn section(&self, section: Section) -> &[u8] {
        match section {
            Section::Code => &self.code,
            Section::Data => &self.data,
            Section::Static => &self.stat,
        }
    }

    /// Record a definition. Panics if `symbol` is already defined: within
    /// one `Assembly` at most one definition per symbol is allowed, and a
    /// front end producing two is a bug in the front end, not a linker
    /// error (nothing downstream observes it before this point).
    pub fn define(&mut self, symbol: Symbol, section: Section, offset: u64, binding: Binding) {
        debug_assert!(
            !self.defs.iter().any(|d| d.symbol == symbol),
            "symbol defined twice in one Assembly"
        );
        self.defs.push(Def { symbol, section, offset, binding });
    }

    pub fn relocate(&mut self, symbol: Symbol, section: Section, offset: u64, kind: RelocKind) {
        self.relocs.push(Reloc { symbol, section, offset, kind });
    }
}
