use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use xlsx_kwfilter::table::CellValue;
use xlsx_kwfilter::xlsx::{GridRow, SheetGrid, read_sheet, scan};

fn write_input(path: &Path, rows: &[&[&str]]) -> Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, cells) in rows.iter().enumerate() {
        for (c, value) in cells.iter().enumerate() {
            if !value.is_empty() {
                sheet.write_string(r as u32, c as u16, *value)?;
            }
        }
    }
    workbook.save(path)?;
    Ok(())
}

fn failing_input(path: &Path) -> Result<()> {
    write_input(
        path,
        &[
            &["Message", "Details"],
            &["fail: disk", "none"],
            &["all good", "fail later"],
            &["FAIL: network", ""],
        ],
    )
}

fn kwfilter(args: &[&str]) -> Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_xlsx-kwfilter"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .context("cannot run xlsx-kwfilter")
}

fn arg(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn results(path: &Path) -> Result<SheetGrid> {
    read_sheet(path, Some("results"))?.context("results sheet missing")
}

fn texts(row: &GridRow) -> Vec<String> {
    row.cells.iter().map(CellValue::to_string).collect()
}

#[test]
fn restricted_column_appends_matching_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.xlsx");
    failing_input(&input)?;

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "fail", "-c", "Message"])?;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("scanned 3 row(s) in 1 file(s): 2 match(es), 2 written"), "{stdout}");

    let grid = results(&output)?;
    assert_eq!(grid.rows.len(), 3);
    assert_eq!(
        texts(&grid.rows[0]),
        ["Message", "Details", "matched_keyword", "matched_column", "source"]
    );
    assert_eq!(texts(&grid.rows[1]), ["fail: disk", "none", "fail", "Message", "in.xlsx:2"]);
    assert_eq!(texts(&grid.rows[2]), ["FAIL: network", "", "fail", "Message", "in.xlsx:4"]);
    Ok(())
}

#[test]
fn second_run_appends_after_first() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.xlsx");
    failing_input(&input)?;

    for _ in 0..2 {
        let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "network"])?;
        assert!(out.status.success());
    }

    let grid = results(&output)?;
    assert_eq!(grid.rows.len(), 3);
    assert_eq!(grid.rows[1].cells, grid.rows[2].cells);
    assert_eq!(grid.rows[2].number, 3);
    Ok(())
}

#[test]
fn dry_run_leaves_output_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.xlsx");
    failing_input(&input)?;

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "fail", "--dry-run"])?;
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("3 match(es), 0 written (dry run)"));
    assert!(!output.exists());

    failing_input(&output)?;
    let before = std::fs::read(&output)?;
    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "fail", "--dry-run"])?;
    assert!(out.status.success());
    assert_eq!(std::fs::read(&output)?, before);
    Ok(())
}

#[test]
fn unknown_column_exits_2_without_writing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.xlsx");
    failing_input(&input)?;

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "fail", "-c", "Foo"])?;
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("ConfigError during loading"), "{stderr}");
    assert!(stderr.contains("`Foo`"), "{stderr}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn missing_keywords_exit_2() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    failing_input(&input)?;
    let output = dir.path().join("out.xlsx");

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output)])?;
    assert_eq!(out.status.code(), Some(2));

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", " , "])?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}

#[test]
fn missing_input_exits_3() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("absent.xlsx");
    let output = dir.path().join("out.xlsx");

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "x"])?;
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("IOError"));
    Ok(())
}

#[test]
fn ambiguous_output_header_exits_4() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.xlsx");
    failing_input(&input)?;

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet().set_name("results")?;
    sheet.write_string(0, 0, "Message")?;
    sheet.write_string(0, 1, "Message")?;
    workbook.save(&output)?;
    let before = std::fs::read(&output)?;

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "fail"])?;
    assert_eq!(out.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&out.stderr).contains("SchemaError"));
    assert_eq!(std::fs::read(&output)?, before);
    Ok(())
}

#[test]
fn case_variants_report_first_spelling() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.xlsx");
    write_input(&input, &[&["Status"], &["Error"], &["ok"]])?;

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "Error,error, ERROR"])?;
    assert!(out.status.success());

    let grid = results(&output)?;
    assert_eq!(grid.rows.len(), 2);
    assert_eq!(texts(&grid.rows[1]), ["Error", "Error", "Status", "in.xlsx:2"]);
    Ok(())
}

#[test]
fn directory_input_in_name_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let inputs = dir.path().join("inputs");
    std::fs::create_dir(&inputs)?;
    write_input(&inputs.join("b.xlsx"), &[&["Log"], &["stuck pipe"]])?;
    write_input(&inputs.join("a.xlsx"), &[&["Log", "Rig"], &["ok", "1"], &["Stuck again", "2"]])?;
    let output = dir.path().join("reports").join("out.xlsx");

    let out = kwfilter(&[
        "-i",
        arg(&inputs),
        "-o",
        arg(&output),
        "--keywords",
        "stuck",
        "--sheet",
        "hits",
    ])?;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    assert_eq!(scan(&output)?, ["hits"]);
    let grid = read_sheet(&output, Some("hits"))?.context("hits missing")?;
    assert_eq!(
        texts(&grid.rows[0]),
        ["Log", "Rig", "matched_keyword", "matched_column", "source"]
    );
    assert_eq!(texts(&grid.rows[1]), ["Stuck again", "2", "stuck", "Log", "a.xlsx:3"]);
    assert_eq!(texts(&grid.rows[2]), ["stuck pipe", "", "stuck", "Log", "b.xlsx:2"]);
    Ok(())
}

#[test]
fn keywords_file_merges_with_inline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.xlsx");
    let kw = dir.path().join("kw.txt");
    failing_input(&input)?;
    std::fs::write(&kw, "network\n\nlater\r\n")?;

    let out = kwfilter(&[
        "-i",
        arg(&input),
        "-o",
        arg(&output),
        "-k",
        "disk",
        "--keywords-file",
        arg(&kw),
    ])?;
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("3 match(es), 3 written"));
    Ok(())
}

#[test]
fn all_sheets_source_names_the_sheet() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.xlsx");

    let mut workbook = Workbook::new();
    let day = workbook.add_worksheet().set_name("Day 1")?;
    day.write_string(0, 0, "Details")?;
    day.write_string(1, 0, "kick observed")?;
    let night = workbook.add_worksheet().set_name("Night")?;
    night.write_string(0, 0, "Details")?;
    night.write_string(0, 1, "Remarks")?;
    night.write_string(1, 0, "quiet")?;
    night.write_string(1, 1, "second kick")?;
    workbook.save(&input)?;

    let out = kwfilter(&["-i", arg(&input), "-o", arg(&output), "-k", "kick", "--all-sheets"])?;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("scanned 2 row(s) in 1 file(s): 2 match(es)"));

    let grid = results(&output)?;
    assert_eq!(
        texts(&grid.rows[0]),
        ["Details", "matched_keyword", "matched_column", "source", "Remarks"]
    );
    assert_eq!(texts(&grid.rows[1]), ["kick observed", "kick", "Details", "in.xlsx:Day 1:2"]);
    assert_eq!(texts(&grid.rows[2]), ["quiet", "kick", "Remarks", "in.xlsx:Night:2", "second kick"]);

    let out = kwfilter(&[
        "-i",
        arg(&input),
        "-o",
        arg(&output),
        "-k",
        "kick",
        "--all-sheets",
        "--input-sheet",
        "Night",
    ])?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}
