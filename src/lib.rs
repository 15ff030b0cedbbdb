//! An in-memory linker and ELF64 relocatable object emitter for a compiler
//! toolchain back end.
//!
//! An [`Assembly`] is the producing side's handoff: three byte sections plus
//! unresolved definitions and relocations. From there, two independent
//! consumers exist:
//!
//! - [`Assembly::link`] lays the assembly out into a fresh page-aligned
//!   virtual mapping, patches every relocation, and hands back a
//!   [`LinkedAssembly`] ready to be [loaded](LinkedAssembly::load) and
//!   executed in-process.
//! - [`elf::writer::write_elf_object`] serializes the same assembly to a
//!   byte-exact ELF64 relocatable object file, for handoff to an external
//!   linker.

pub mod assembly;
pub mod elf;
pub mod error;
pub mod linker;

pub use assembly::{Assembly, Binding, Def, Reloc, RelocKind, Section, Symbol, SymbolTable};
pub use elf::writer::EmitConfig;
pub use error::{Error, Result};
pub use linker::{LinkedAssembly, LinkerConfig, TargetArch, Word};
