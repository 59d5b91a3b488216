//! `qc` command line entry point.
//!
//! # Responsibility
//! - Parse arguments and map them onto `qc_core` sessions.
//! - Render reports as plain text.

use clap::{Args, Parser, Subcommand};
use log::error;
use qc_core::repo::{AnnotationFilter, DocumentFilter};
use qc_core::service::{
    list_memos, CodedText, CrosstabQuery, CrosstabValues, FindQuery, StatsQuery, StatsRow,
};
use qc_core::settings::SETTINGS_FILE_NAME;
use qc_core::{init_logging, CodingWorkflow, Corpus, Settings, Unit, UpdateSource};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "qc")]
#[command(about = "Qualitative coding of text corpora")]
#[command(version)]
struct Cli {
    /// Settings file
    #[arg(short, long, value_name = "PATH", default_value = SETTINGS_FILE_NAME, global = true)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the core version
    Version,
    /// Create settings, corpus directory and codebook if absent
    Init,
    /// Report files and documents that disagree
    Check,
    /// Register corpus files as documents
    Register { paths: Vec<PathBuf> },
    /// Show the codebook outline
    Codes {
        #[arg(short, long)]
        depth: Option<usize>,
        #[arg(short, long)]
        expanded: bool,
    },
    /// Code a document in the configured editor
    Code {
        document: PathBuf,
        #[arg(short, long)]
        coder: String,
    },
    /// Apply the codes file of an interrupted coding session
    Recover,
    /// Discard an interrupted coding session
    Abandon,
    /// Count code usage
    Stats {
        codes: Vec<String>,
        #[command(flatten)]
        selection: Selection,
        #[arg(long)]
        min: Option<u64>,
        #[arg(long)]
        max: Option<u64>,
        #[arg(short, long)]
        zeros: bool,
        #[arg(short, long)]
        expanded: bool,
        /// Also report totals including child codes
        #[arg(short = 'a', long)]
        recursive_counts: bool,
        /// Report each coder separately
        #[arg(short = 'C', long)]
        by_coder: bool,
        /// Report each document separately
        #[arg(short = 'D', long)]
        by_document: bool,
    },
    /// Show coded text with surrounding context
    Find {
        #[arg(required = true, num_args = 1..)]
        codes: Vec<String>,
        #[command(flatten)]
        selection: Selection,
        /// Context lines before each coded line
        #[arg(short = 'B', long, default_value_t = 2)]
        before: usize,
        /// Context lines after each coded line
        #[arg(short = 'A', long, default_value_t = 2)]
        after: usize,
        /// Print text without codes
        #[arg(long)]
        no_codes: bool,
    },
    /// Write a memo, or list all memos
    Memo {
        coder: String,
        /// Memo title
        #[arg(short, long)]
        message: Option<String>,
        /// Print every memo in order
        #[arg(short, long)]
        list: bool,
    },
    /// Cross-tabulate code cooccurrence
    Crosstab {
        codes: Vec<String>,
        #[command(flatten)]
        selection: Selection,
        #[arg(long)]
        recursive_counts: bool,
        #[arg(long)]
        probs: bool,
        #[arg(long)]
        tidy: bool,
        #[arg(long)]
        min: Option<u64>,
        #[arg(long)]
        max: Option<u64>,
        #[arg(short, long)]
        expanded: bool,
    },
    /// Replace a document's text, carrying its annotations across
    Update {
        document: PathBuf,
        /// File holding the new text
        #[arg(long, value_name = "PATH")]
        new: PathBuf,
        /// Unified diff describing the change (generated when omitted)
        #[arg(long, value_name = "PATH")]
        diff: Option<PathBuf>,
        #[arg(long)]
        dryrun: bool,
    },
    /// Move a document or directory of documents
    Mv {
        from: PathBuf,
        to: PathBuf,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Remove a document or directory of documents
    Rm {
        path: PathBuf,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Rename codes
    Rename {
        #[arg(required = true, num_args = 1..)]
        old: Vec<String>,
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        coder: Vec<String>,
        #[command(flatten)]
        documents: DocumentSelection,
    },
}

#[derive(Args, Debug)]
struct DocumentSelection {
    /// GLOB over corpus-relative paths
    #[arg(short, long)]
    pattern: Option<String>,
    /// File listing corpus-relative paths, one per line
    #[arg(short = 'f', long, value_name = "PATH")]
    filenames: Option<PathBuf>,
    /// Select the documents that do not match
    #[arg(short, long)]
    invert: bool,
}

impl DocumentSelection {
    fn filter(&self) -> std::io::Result<DocumentFilter> {
        let file_list = match &self.filenames {
            Some(path) => Some(read_file_list(path)?),
            None => None,
        };
        Ok(DocumentFilter {
            pattern: self.pattern.clone(),
            file_list,
            invert: self.invert,
        })
    }
}

#[derive(Args, Debug)]
struct Selection {
    /// Unit of analysis: line, paragraph or document
    #[arg(short, long, default_value = "line")]
    unit: Unit,
    #[command(flatten)]
    documents: DocumentSelection,
    /// Restrict to these coders
    #[arg(short, long)]
    coder: Vec<String>,
    #[arg(short, long)]
    depth: Option<usize>,
    #[arg(short, long)]
    recursive_codes: bool,
}

impl Selection {
    fn filter(&self) -> std::io::Result<AnnotationFilter> {
        Ok(AnnotationFilter {
            codes: None,
            coders: (!self.coder.is_empty()).then(|| self.coder.clone()),
            documents: self.documents.filter()?,
        })
    }
}

/// Non-empty trimmed lines of `path`.
fn read_file_list(path: &Path) -> std::io::Result<Vec<String>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=command module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Version = cli.command {
        println!("qc {}", qc_core::core_version());
        return Ok(());
    }
    let settings = match cli.command {
        Command::Init => {
            let project_dir = cli
                .settings
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            Settings::initialize(&project_dir)?
        }
        _ => Settings::load(&cli.settings)?,
    };
    init_logging(settings.log_level, &settings.logs_dir)?;
    let mut corpus = Corpus::open(settings)?;

    match cli.command {
        Command::Version | Command::Init => {}
        Command::Check => {
            let report = corpus.session(|session| session.validate_corpus_paths())?;
            println!("{report}");
        }
        Command::Register { paths } => {
            corpus.session(|session| {
                for path in &paths {
                    let document = session.register_document(path)?;
                    println!("registered {}", document.file_path);
                }
                Ok(())
            })?;
        }
        Command::Codes { depth, expanded } => {
            let tree = corpus.session(|session| Ok(session.codebook().clone()))?;
            if expanded {
                for name in tree.flatten_names(depth, true) {
                    println!("{name}");
                }
            } else {
                print!("{}", tree.render_outline(depth));
            }
        }
        Command::Code { document, coder } => {
            let changes = CodingWorkflow::with_process_editor().code_document(
                &mut corpus,
                &document,
                &coder,
            )?;
            println!("added {} removed {}", changes.added, changes.removed);
        }
        Command::Recover => {
            let changes = CodingWorkflow::with_process_editor().recover(&mut corpus)?;
            println!("added {} removed {}", changes.added, changes.removed);
        }
        Command::Abandon => {
            CodingWorkflow::with_process_editor().abandon(&corpus)?;
        }
        Command::Stats {
            codes,
            selection,
            min,
            max,
            zeros,
            expanded,
            recursive_counts,
            by_coder,
            by_document,
        } => {
            let query = StatsQuery {
                codes,
                unit: selection.unit,
                filter: selection.filter()?,
                recursive_codes: selection.recursive_codes,
                depth: selection.depth,
                min,
                max,
                zeros,
                expanded,
                recursive_counts,
                by_coder,
                by_document,
            };
            let rows = corpus.session(|session| session.stats(&query))?;
            print_stats(&rows, recursive_counts);
        }
        Command::Find {
            codes,
            selection,
            before,
            after,
            no_codes,
        } => {
            let query = FindQuery {
                codes,
                unit: selection.unit,
                filter: selection.filter()?,
                recursive_codes: selection.recursive_codes,
                depth: selection.depth,
                before,
                after,
            };
            let found = corpus.session(|session| session.find_coded_text(&query))?;
            print_coded_text(&found, !no_codes);
        }
        Command::Memo {
            coder,
            message,
            list,
        } => {
            if list {
                let texts: Vec<String> = list_memos(corpus.settings())?
                    .into_iter()
                    .map(|memo| memo.text)
                    .collect();
                println!("{}", texts.join("\n\n"));
            } else {
                let path = CodingWorkflow::with_process_editor().write_memo(
                    corpus.settings(),
                    &coder,
                    message.as_deref(),
                )?;
                println!("wrote {}", path.display());
            }
        }
        Command::Crosstab {
            codes,
            selection,
            recursive_counts,
            probs,
            tidy,
            min,
            max,
            expanded,
        } => {
            let query = CrosstabQuery {
                codes,
                unit: selection.unit,
                filter: selection.filter()?,
                options: qc_core::matrix::MatrixOptions {
                    recursive_codes: selection.recursive_codes,
                    recursive_counts,
                    depth: selection.depth,
                },
                expanded,
                probs,
                tidy,
                min,
                max,
            };
            let crosstab = corpus.session(|session| session.crosstab(&query))?;
            print_crosstab(&crosstab.labels, &crosstab.values);
        }
        Command::Update {
            document,
            new,
            diff,
            dryrun,
        } => {
            let new_text = std::fs::read_to_string(&new)?;
            let source = match diff {
                Some(path) => UpdateSource::ExternalDiff {
                    diff: std::fs::read_to_string(path)?,
                    new_text,
                },
                None => UpdateSource::NewText(new_text),
            };
            let update =
                corpus.session(|session| session.update_document(&document, source, dryrun))?;
            if dryrun {
                print!("{}", update.diff);
            }
            println!(
                "{}: kept {} dropped {}",
                update.document,
                update.kept.len(),
                update.dropped.len()
            );
        }
        Command::Mv {
            from,
            to,
            recursive,
        } => {
            let moved = corpus.session(|session| session.move_document(&from, &to, recursive))?;
            for (old, new) in moved {
                println!("{old} -> {new}");
            }
        }
        Command::Rm { path, recursive } => {
            let removed = corpus.session(|session| session.remove_document(&path, recursive))?;
            for path in removed {
                println!("removed {path}");
            }
        }
        Command::Rename {
            old,
            to,
            coder,
            documents,
        } => {
            let scope = AnnotationFilter {
                codes: None,
                coders: (!coder.is_empty()).then_some(coder),
                documents: documents.filter()?,
            };
            let outcome = corpus.session(|session| session.rename_codes(&old, &to, &scope))?;
            println!("renamed {} dropped {}", outcome.renamed, outcome.dropped);
        }
    }
    Ok(())
}

fn print_stats(rows: &[StatsRow], with_total: bool) {
    let mut group = None;
    for row in rows {
        let current = (row.coder.as_deref(), row.document.as_deref());
        if group != Some(current) {
            if current != (None, None) {
                let label: Vec<&str> = [current.0, current.1].into_iter().flatten().collect();
                println!("\n[{}]", label.join(" "));
            }
            if with_total {
                println!("{:<32} {:>8} {:>8}", "code", "count", "total");
            } else {
                println!("{:<32} {:>8}", "code", "count");
            }
            group = Some(current);
        }
        match row.total {
            Some(total) => println!("{:<32} {:>8} {:>8}", row.name, row.count, total),
            None => println!("{:<32} {:>8}", row.name, row.count),
        }
    }
}

fn print_coded_text(found: &[CodedText], show_codes: bool) {
    const TEXT_WIDTH: usize = 80;
    for document in found {
        println!("\n{} ({})", document.document, document.count);
        println!("{}", "=".repeat(TEXT_WIDTH));
        for excerpt in &document.excerpts {
            println!("\n[{}:{}]", excerpt.start, excerpt.end);
            for line in &excerpt.lines {
                let text: String = line.text.trim().chars().take(TEXT_WIDTH).collect();
                if show_codes {
                    let codes: Vec<&str> = line.codes.iter().map(String::as_str).collect();
                    println!("{text:<width$} | {}", codes.join(", "), width = TEXT_WIDTH);
                } else {
                    println!("{text}");
                }
            }
        }
    }
}

fn print_crosstab(labels: &[String], values: &CrosstabValues) {
    match values {
        CrosstabValues::Patterns(patterns) => {
            println!("count\t{}", labels.join("\t"));
            for pattern in patterns {
                let cells: Vec<&str> = labels
                    .iter()
                    .map(|label| if pattern.codes.contains(label) { "1" } else { "0" })
                    .collect();
                println!("{}\t{}", pattern.count, cells.join("\t"));
            }
        }
        CrosstabValues::Counts(rows) => {
            println!("code\t{}", labels.join("\t"));
            for (i, (label, row)) in labels.iter().zip(rows).enumerate() {
                let cells: Vec<String> = row
                    .iter()
                    .enumerate()
                    .map(|(j, count)| if j < i { String::new() } else { count.to_string() })
                    .collect();
                println!("{label}\t{}", cells.join("\t"));
            }
        }
        CrosstabValues::Probabilities(rows) => {
            println!("code\t{}", labels.join("\t"));
            for (label, row) in labels.iter().zip(rows) {
                let cells: Vec<String> = row
                    .iter()
                    .map(|value| value.map_or_else(|| "-".to_string(), |p| format!("{p:.3}")))
                    .collect();
                println!("{label}\t{}", cells.join("\t"));
            }
        }
    }
}
