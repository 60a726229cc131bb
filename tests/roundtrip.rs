//! Write/read round-trip integration tests.
//!
//! A small module is synthesized with `WriteSession`, written to disk, loaded again
//! with `ReadSession` and compared. The rewrite tests then feed the loaded module back
//! through `WriteSession::from_read` and compare tables and heaps of both generations.

use cilpe::{
    assembly::{InstructionAssembler, Operand},
    metadata::{
        method::MethodBody,
        streams::HeapWrite,
        tables::{Row, TableId},
        token::Token,
    },
    writer::Machine,
    Error, File, ReadOptions, ReadSession, Result, WriteSession, WriterConfig,
};
use tempfile::NamedTempFile;

const FIELD_DATA: [u8; 4] = [0x78, 0x56, 0x34, 0x12];
const RESOURCE: &[u8] = b"embedded resource payload";
const GREETING: &str = "Hello from cilpe";

/// Build a module with one type, one method printing nothing but loading a literal,
/// one static field with initial data and one embedded resource.
fn build_module(config: WriterConfig) -> Result<WriteSession> {
    let mut session = WriteSession::new(config.with_entry_point(Token::new(0x0600_0001)));

    let module_name = session.strings_mut().register(Some("Sample.dll"))?;
    let mvid = session
        .guids_mut()
        .register(Some(&uguid::Guid::from_bytes([0x11; 16])))?;
    session.add_row(TableId::Module, Row::new(vec![0, module_name, mvid, 0, 0]))?;

    let module_type = session.strings_mut().register(Some("<Module>"))?;
    let program = session.strings_mut().register(Some("Program"))?;
    let namespace = session.strings_mut().register(Some("Sample"))?;
    session.add_row(TableId::TypeDef, Row::new(vec![0, module_type, 0, 0, 1, 1]))?;
    session.add_row(
        TableId::TypeDef,
        Row::new(vec![0x0010_0001, program, namespace, 0, 1, 1]),
    )?;

    let field_name = session.strings_mut().register(Some("Seed"))?;
    let field_sig = session.blobs_mut().register(Some(&[0x06, 0x08][..]))?;
    session.add_row(TableId::Field, Row::new(vec![0x0116, field_name, field_sig]))?;
    session.add_row(TableId::FieldRVA, Row::new(vec![0, 1]))?;
    session.add_field_data(1, FIELD_DATA.to_vec())?;

    let method_name = session.strings_mut().register(Some("Main"))?;
    let method_sig = session.blobs_mut().register(Some(&[0x00, 0x00, 0x01][..]))?;
    session.add_row(
        TableId::MethodDef,
        Row::new(vec![0, 0, 0x0096, method_name, method_sig, 1]),
    )?;

    let mut assembler = InstructionAssembler::new();
    assembler
        .emit("ldstr", Operand::String(GREETING.to_string()))?
        .emit("pop", Operand::None)?
        .emit("ret", Operand::None)?;
    let code = assembler.finish(session.user_strings_mut())?;
    session.add_method_body(1, &MethodBody::new(code))?;

    let resource_name = session.strings_mut().register(Some("Sample.payload"))?;
    session.add_row(
        TableId::ManifestResource,
        Row::new(vec![0, 0x0001, resource_name, 0]),
    )?;
    session.add_resource(1, RESOURCE)?;

    Ok(session)
}

/// Write `session` to a temporary file and load it again.
fn write_and_load(session: WriteSession) -> Result<(NamedTempFile, File)> {
    let temp_file = NamedTempFile::new()?;
    session.write_to_file(temp_file.path())?;
    let file = File::from_file(temp_file.path())?;
    Ok((temp_file, file))
}

/// Every column of every present table, raw-value columns excluded
fn column_values(session: &ReadSession<'_>) -> Vec<(TableId, Vec<Vec<u32>>)> {
    session
        .tables()
        .present()
        .map(|table| {
            let raw = table.raw_value_column().map(|(column, _)| column);
            let rows = session
                .tables()
                .rows(table)
                .iter()
                .map(|row| {
                    row.values()
                        .iter()
                        .enumerate()
                        .filter(|(column, _)| Some(*column) != raw)
                        .map(|(_, value)| *value)
                        .collect()
                })
                .collect();
            (table, rows)
        })
        .collect()
}

fn verify_content(session: &ReadSession<'_>) -> Result<()> {
    assert_eq!(session.tables().row_count(TableId::TypeDef), 2);
    assert_eq!(session.entry_point(), Token::new(0x0600_0001));
    assert_eq!(session.root().version, "v4.0.30319");

    let instructions = session
        .instructions(1)?
        .ok_or_else(|| Error::MissingReference("Main has no body".to_string()))?;
    let mnemonics: Vec<&str> = instructions.iter().map(|i| i.mnemonic()).collect();
    assert_eq!(mnemonics, ["ldstr", "pop", "ret"]);
    assert_eq!(instructions[0].operand, Operand::String(GREETING.to_string()));

    assert_eq!(session.field_data(1)?, Some(FIELD_DATA.to_vec()));
    assert_eq!(session.resource(1)?, Some(RESOURCE.to_vec()));
    Ok(())
}

#[test]
fn test_pe32_write_and_read() -> Result<()> {
    let (_temp_file, file) = write_and_load(build_module(WriterConfig::default())?)?;
    assert!(!file.is_pe32_plus());
    assert_eq!(file.machine(), Machine::I386.value());
    assert!(file.imports().iter().any(|(dll, name)| dll == "mscoree.dll" && name == "_CorExeMain"));

    let session = ReadSession::new(&file)?;
    verify_content(&session)
}

#[test]
fn test_pe32_plus_dll_write_and_read() -> Result<()> {
    let config = WriterConfig::default()
        .with_machine(Machine::Amd64)
        .with_dll(true);
    let (_temp_file, file) = write_and_load(build_module(config)?)?;
    assert!(file.is_pe32_plus());
    assert!(file.is_dll());
    assert!(file.imports().iter().any(|(_, name)| name == "_CorDllMain"));

    let session = ReadSession::new(&file)?;
    verify_content(&session)
}

#[test]
fn test_eager_parallel_resolution() -> Result<()> {
    let (_temp_file, file) = write_and_load(build_module(WriterConfig::default())?)?;
    let options = ReadOptions::default()
        .with_eager_raw_values(true)
        .with_parallel(true);

    let session = ReadSession::with_options(&file, options)?;
    assert_eq!(session.resolve_raw_values()?, 3);
    verify_content(&session)
}

#[test]
fn test_rewrite_preserves_tables_and_heaps() -> Result<()> {
    let (_first_file, first) = write_and_load(build_module(WriterConfig::default())?)?;
    let original = ReadSession::new(&first)?;

    let rewrite = WriteSession::from_read(&original, original.writer_config())?;
    let (_second_file, second) = write_and_load(rewrite)?;
    let rewritten = ReadSession::new(&second)?;

    assert_eq!(column_values(&original), column_values(&rewritten));
    for heap in ["#Strings", "#US", "#GUID", "#Blob"] {
        assert_eq!(original.heap_data(heap), rewritten.heap_data(heap), "{heap} differs");
    }
    assert_eq!(original.cor20_header().flags, rewritten.cor20_header().flags);
    verify_content(&rewritten)
}

#[test]
fn test_rewrite_twice_is_stable() -> Result<()> {
    let image = build_module(WriterConfig::default().with_timestamp(0x6000_0000))?.write_to_vec()?;
    let first = File::from_mem(image.clone())?;
    let session = ReadSession::new(&first)?;
    let again = WriteSession::from_read(&session, session.writer_config())?.write_to_vec()?;

    assert_eq!(image, again);
    Ok(())
}

#[test]
fn test_write_failure_leaves_no_file() -> Result<()> {
    let temp_file = NamedTempFile::new()?;
    let path = temp_file.path().to_path_buf();
    drop(temp_file);

    let mut session = build_module(WriterConfig::default())?;
    session.config_mut().file_alignment = 0x300;
    assert!(matches!(
        session.write_to_file(&path),
        Err(Error::LayoutFailed(_))
    ));
    assert!(!path.exists());
    Ok(())
}
