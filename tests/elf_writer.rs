use linkcore::elf::writer::{write_elf_object, EmitConfig};
use linkcore::{Assembly, Binding, Section};

fn emit(asm: &Assembly) -> Vec<u8> {
    let mut out = Vec::new();
    write_elf_object(asm, &EmitConfig::default(), &mut out).unwrap();
    out
}

#[test]
fn empty_assembly_produces_ten_sections() {
    let asm = Assembly::new();
    let bytes = emit(&asm);

    assert_eq!(&bytes[0..4], b"\x7fELF");
    let e_shnum = u16::from_le_bytes(bytes[60..62].try_into().unwrap());
    assert_eq!(e_shnum, 10);
}

#[test]
fn object_is_a_multiple_of_the_section_padding() {
    let mut asm = Assembly::new();
    let main = asm.symtab.intern(b"main");
    asm.code = vec![0x90; 5];
    asm.define(main, Section::Code, 0, Binding::Global);

    let bytes = emit(&asm);
    assert_eq!(bytes.len() % 64, 0);
}

#[test]
fn shstrtab_holds_all_nine_section_names_in_order() {
    let asm = Assembly::new();
    let bytes = emit(&asm);

    // sh_offset/sh_size of .shstrtab itself (section header index 1).
    let shdr1 = 64 + 64;
    let sh_offset = u64::from_le_bytes(bytes[shdr1 + 24..shdr1 + 32].try_into().unwrap()) as usize;
    let sh_size = u64::from_le_bytes(bytes[shdr1 + 32..shdr1 + 40].try_into().unwrap()) as usize;
    let shstrtab = &bytes[sh_offset..sh_offset + sh_size];

    assert_eq!(shstrtab[0], 0);
    let joined: Vec<&[u8]> = shstrtab[1..].split(|&b| b == 0).filter(|s| !s.is_empty()).collect();
    assert_eq!(
        joined,
        vec![
            b".shstrtab".as_slice(),
            b".text".as_slice(),
            b".rodata".as_slice(),
            b".data".as_slice(),
            b".strtab".as_slice(),
            b".symtab".as_slice(),
            b".rela.text".as_slice(),
            b".rela.rodata".as_slice(),
            b".rela.data".as_slice(),
        ]
    );
}

#[test]
fn global_definition_is_visible_with_correct_section_index() {
    let mut asm = Assembly::new();
    let entry = asm.symtab.intern(b"entry");
    asm.code = vec![0x90; 4];
    asm.define(entry, Section::Code, 0, Binding::Global);

    let bytes = emit(&asm);

    // section header index 6 is .symtab.
    let shdr6 = 64 + 64 * 6;
    let symtab_off = u64::from_le_bytes(bytes[shdr6 + 24..shdr6 + 32].try_into().unwrap()) as usize;

    let entry1 = &bytes[symtab_off + 24..symtab_off + 48];
    let st_info = entry1[4];
    let st_shndx = u16::from_le_bytes(entry1[6..8].try_into().unwrap());
    // binding is the high nibble: STB_GLOBAL == 1.
    assert_eq!(st_info >> 4, 1);
    // .text is section header index 2.
    assert_eq!(st_shndx, 2);
}

#[test]
fn relocation_in_rodata_is_not_mistaken_for_rela_text() {
    let mut asm = Assembly::new();
    let k = asm.symtab.intern(b"k");
    asm.data = vec![0u8; 8];
    asm.define(k, Section::Data, 4, Binding::Local);
    asm.relocate(k, Section::Data, 8, linkcore::RelocKind::Rel32Le);

    let bytes = emit(&asm);

    // .rela.text is section header index 7, .rela.rodata is index 8.
    let rela_text_size =
        u64::from_le_bytes(bytes[64 + 64 * 7 + 32..64 + 64 * 7 + 40].try_into().unwrap());
    let rela_rodata_size =
        u64::from_le_bytes(bytes[64 + 64 * 8 + 32..64 + 64 * 8 + 40].try_into().unwrap());
    assert_eq!(rela_text_size, 0);
    assert_eq!(rela_rodata_size, 24);
}
