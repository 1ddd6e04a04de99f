//! Keil MDK `.dep` report parsing.
//!
//! The report lists one record per compiled source file. A record starts
//! on a line whose first character is `F`, carries the source path in an
//! `F (<path>)` group and the compiler invocation in the first
//! parenthesized group starting with `-`, and may spill across several
//! lines before the next `F` line.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"F \(([^)]+)\)").unwrap());
static ARGUMENTS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((-[^)]+)\)").unwrap());

/// One compiled source file and the flags it was compiled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    /// Path as written in the report, possibly relative to the project root.
    pub source_path: PathBuf,
    /// Normalized flags: separated `-I <path>` pairs are fused into one token.
    pub arguments: Vec<String>,
}

/// A structural failure inside a single record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("no `F (<source>)` group found")]
    MissingSourcePath,
    #[error("no `(-...)` compiler argument group found")]
    MissingArguments,
    #[error("malformed argument text: {0}")]
    MalformedArguments(&'static str),
}

/// A failure parsing a whole `.dep` report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepError {
    #[error("no file records found (no line starts with `F`)")]
    NoRecords,
    #[error("record {index} (`{context}`)")]
    Record {
        /// Zero-based position of the record in the report.
        index: usize,
        /// First line of the offending record, shortened.
        context: String,
        source: RecordError,
    },
}

/// Split the report into one text block per record.
///
/// A block starts at a line whose first character is `F` and runs through
/// every following line up to the next such line. Lines before the first
/// record (the report header) are ignored, but a report without any `F`
/// line is an error, never an empty result.
pub fn extract_blocks(text: &str) -> Result<Vec<String>, DepError> {
    let mut blocks: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.starts_with('F') {
            blocks.push(line.to_owned());
        } else if let Some(block) = blocks.last_mut() {
            block.push('\n');
            block.push_str(line);
        }
    }
    if blocks.is_empty() {
        return Err(DepError::NoRecords);
    }
    Ok(blocks)
}

/// Extract the source path and the normalized argument list from one block.
pub fn parse_record(block: &str) -> Result<DependencyRecord, RecordError> {
    let source = SOURCE_RE
        .captures(block)
        .ok_or(RecordError::MissingSourcePath)?;
    let arguments = ARGUMENTS_RE
        .captures(block)
        .ok_or(RecordError::MissingArguments)?;

    Ok(DependencyRecord {
        source_path: PathBuf::from(&source[1]),
        arguments: normalize_arguments(&arguments[1])?,
    })
}

/// Parse a whole report, failing on the first bad record.
pub fn parse(text: &str) -> Result<Vec<DependencyRecord>, DepError> {
    let blocks = extract_blocks(text)?;
    let mut records = Vec::with_capacity(blocks.len());
    for (index, block) in blocks.iter().enumerate() {
        let record = parse_record(block).map_err(|source| DepError::Record {
            index,
            context: snippet(block),
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Fuse separated `-I <path>` flag pairs into single `-I<path>` tokens.
///
/// The toolchain sometimes writes the include flag and its path as two
/// shell words; consumers of the database expect the compact form. Every
/// other word passes through unchanged, in order.
fn normalize_arguments(text: &str) -> Result<Vec<String>, RecordError> {
    let mut arguments = Vec::new();
    let mut pending_include = false;
    for word in split_words(text)? {
        if pending_include {
            arguments.push(format!("-I{word}"));
            pending_include = false;
        } else if word == "-I" {
            pending_include = true;
        } else {
            arguments.push(word);
        }
    }
    if pending_include {
        return Err(RecordError::MalformedArguments("`-I` with no path after it"));
    }
    Ok(arguments)
}

/// Split argument text into shell words: quotes group, backslashes escape,
/// and any whitespace separates, so argument groups spanning several lines
/// need no special handling.
fn split_words(text: &str) -> Result<Vec<String>, RecordError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => {
                            return Err(RecordError::MalformedArguments(
                                "unterminated single quote",
                            ))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        // inside double quotes a backslash only escapes `"` and `\`
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => {
                                return Err(RecordError::MalformedArguments(
                                    "unterminated double quote",
                                ))
                            }
                        },
                        Some(c) => word.push(c),
                        None => {
                            return Err(RecordError::MalformedArguments(
                                "unterminated double quote",
                            ))
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => word.push(c),
                    None => return Err(RecordError::MalformedArguments("trailing backslash")),
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

/// First line of a block, shortened for error messages.
fn snippet(block: &str) -> String {
    const MAX_CHARS: usize = 60;
    let first = block.lines().next().unwrap_or("");
    match first.char_indices().nth(MAX_CHARS) {
        Some((at, _)) => format!("{}...", &first[..at]),
        None => first.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Dependencies for Project 'blinky', Target 'stm32': (DO NOT MODIFY !)
F (src/main.c)(0x5F1E2D3C)(-xc -std=c99 --target=arm-arm-none-eabi -c -I RTE/_stm32 -o build/main.o)
I (inc/board.h)(0x5F1E2D00)
I (inc/clock.h)(0x5F1E2C88)
F (src/board.c)(0x5F1E2D3D)(-xc -std=c99 --target=arm-arm-none-eabi -c -I RTE/_stm32 -o build/board.o)
";

    #[test]
    fn splits_one_block_per_f_line_in_order() {
        let blocks = extract_blocks(REPORT).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("F (src/main.c)"));
        assert!(blocks[1].starts_with("F (src/board.c)"));
    }

    #[test]
    fn continuation_lines_stay_in_their_block() {
        let blocks = extract_blocks(REPORT).unwrap();
        assert!(blocks[0].contains("I (inc/board.h)"));
        assert!(blocks[0].contains("I (inc/clock.h)"));
        assert!(!blocks[1].contains("I ("));
    }

    #[test]
    fn header_lines_before_the_first_record_are_ignored() {
        let blocks = extract_blocks(REPORT).unwrap();
        assert!(!blocks[0].contains("DO NOT MODIFY"));
    }

    #[test]
    fn empty_and_f_less_input_is_an_error() {
        assert_eq!(extract_blocks(""), Err(DepError::NoRecords));
        assert_eq!(
            extract_blocks("I (inc/board.h)(0x00)\nnothing here\n"),
            Err(DepError::NoRecords)
        );
    }

    #[test]
    fn crlf_input_parses_like_lf_input() {
        let crlf = REPORT.replace('\n', "\r\n");
        assert_eq!(parse(&crlf).unwrap(), parse(REPORT).unwrap());
    }

    #[test]
    fn record_yields_verbatim_path_and_normalized_arguments() {
        let blocks = extract_blocks(REPORT).unwrap();
        let record = parse_record(&blocks[0]).unwrap();
        assert_eq!(record.source_path, PathBuf::from("src/main.c"));
        assert_eq!(
            record.arguments,
            [
                "-xc",
                "-std=c99",
                "--target=arm-arm-none-eabi",
                "-c",
                "-IRTE/_stm32",
                "-o",
                "build/main.o",
            ]
        );
    }

    #[test]
    fn embedded_spaces_in_the_path_are_kept() {
        let record = parse_record("F (src dir/main file.c)(0x00)(-c)").unwrap();
        assert_eq!(record.source_path, PathBuf::from("src dir/main file.c"));
    }

    #[test]
    fn parse_record_is_idempotent() {
        let blocks = extract_blocks(REPORT).unwrap();
        assert_eq!(
            parse_record(&blocks[0]).unwrap(),
            parse_record(&blocks[0]).unwrap()
        );
    }

    #[test]
    fn include_pairs_fuse_and_quoting_is_honored() {
        let record = parse_record("F (a.c)(0x00)(-I foo.h -DX -I \"bar baz\")").unwrap();
        assert_eq!(record.arguments, ["-Ifoo.h", "-DX", "-Ibar baz"]);
    }

    #[test]
    fn multi_line_argument_text_tokenizes_like_a_single_line() {
        let multi = "F (a.c)(0x00)(-xc -I\nfoo -DX\n-o a.o)";
        let single = "F (a.c)(0x00)(-xc -I foo -DX -o a.o)";
        assert_eq!(
            parse_record(multi).unwrap().arguments,
            parse_record(single).unwrap().arguments
        );
    }

    #[test]
    fn dangling_include_flag_is_malformed() {
        assert_eq!(
            parse_record("F (a.c)(0x00)(-xc -I)"),
            Err(RecordError::MalformedArguments("`-I` with no path after it"))
        );
    }

    #[test]
    fn unterminated_quote_is_malformed() {
        assert!(matches!(
            parse_record("F (a.c)(0x00)(-xc -DNAME=\"oops)"),
            Err(RecordError::MalformedArguments(_))
        ));
    }

    #[test]
    fn missing_groups_are_reported_separately() {
        assert_eq!(
            parse_record("F no parens here"),
            Err(RecordError::MissingSourcePath)
        );
        assert_eq!(
            parse_record("F (a.c)(0x00)"),
            Err(RecordError::MissingArguments)
        );
    }

    #[test]
    fn whole_report_failure_names_the_record() {
        let report = "\
F (src/main.c)(0x00)(-xc -c)
F (src/board.c)(0x00)
";
        match parse(report) {
            Err(DepError::Record { index, context, source }) => {
                assert_eq!(index, 1);
                assert!(context.contains("src/board.c"));
                assert_eq!(source, RecordError::MissingArguments);
            }
            other => panic!("expected a record error, got {other:?}"),
        }
    }
}
