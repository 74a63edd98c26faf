//! Command-line interface for hanviet.

use clap::{Parser, Subcommand, ValueEnum};
use hanviet::text::{self, TextError};
use hanviet::{
    ConversionService, ConvertError, ConvertOptions, Converter, Dictionary, ImportError,
    OutputFormat, Rule, SqliteStore, StoreError, load_in_background,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fs;
use std::io::{self, BufReader, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
enum CliOutputFormat {
    #[default]
    Html,
    Plain,
    Json,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(cli_format: CliOutputFormat) -> Self {
        match cli_format {
            CliOutputFormat::Html => OutputFormat::Html,
            CliOutputFormat::Plain => OutputFormat::Plain,
            CliOutputFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error("Failed to create output file '{path}': {source}")]
    OutputFileCreate { path: PathBuf, source: io::Error },

    #[error("Could not determine a data directory; pass --db explicitly")]
    NoDataDir,

    #[error("Page {page} does not exist (the input has {pages} pages)")]
    PageOutOfRange { page: usize, pages: usize },

    #[error("Invalid rule '{0}': expected 'start=end=translation_start=translation_end'")]
    InvalidRule(String),

    #[error("The dictionary loader stopped before reporting")]
    LoaderStopped,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("REPL error: {0}")]
    Repl(#[from] ReadlineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Import failed: {0} No changes were made to the database.")]
    Import(#[from] ImportError),

    #[error(transparent)]
    Text(#[from] TextError),

    #[error("Conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Direct text input to be converted.
    #[arg(value_name = "DIRECT_INPUT")]
    direct_input: Vec<String>,

    /// Input file path (default: stdin).
    #[arg(short, long, value_name = "FILE")]
    input_filename: Option<PathBuf>,

    /// Output file path (default: stdout).
    #[arg(short, long, value_name = "FILE")]
    output_filename: Option<PathBuf>,

    /// Dictionary database (default: <data dir>/hanviet/dictionary.db).
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Name set to layer over the general dictionary.
    #[arg(short = 'n', long, value_name = "ID")]
    name_set: Option<i64>,

    /// Output format. 'html' prints the anchor-tagged source and target streams.
    #[arg(short = 'f', long, value_enum, default_value_t = CliOutputFormat::default())]
    format: CliOutputFormat,

    /// Minimum characters per page; pages end on a line boundary.
    #[arg(long, default_value_t = text::DEFAULT_PAGE_LENGTH)]
    page_length: usize,

    /// Convert only this page (1-based).
    #[arg(long)]
    page: Option<usize>,

    /// How many characters ahead a rule's closing token is searched for.
    #[arg(long, default_value_t = hanviet::DEFAULT_RULE_LOOKAHEAD)]
    rule_lookahead: usize,

    /// Convert all pages in parallel.
    #[arg(short = 'p', long = "use-parallel", action = clap::ArgAction::SetTrue)]
    use_parallel: bool,

    /// Suppress progress indicators.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    silent: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a meaning (it becomes the default) or, with --name, set the name translation.
    Add {
        key: String,
        value: String,
        #[arg(long)]
        name: bool,
    },
    /// Remove the name translation, one meaning, or every meaning of a key.
    Remove {
        key: String,
        #[arg(long, conflicts_with = "meaning")]
        name: bool,
        #[arg(long)]
        meaning: Option<String>,
    },
    /// Replace the ranked meanings of a key.
    Reorder {
        key: String,
        #[arg(required = true)]
        meanings: Vec<String>,
    },
    /// Show what the dictionary holds for a key.
    Lookup { key: String },
    /// Set the reading used for a single unmatched character.
    Reading { character: char, reading: String },
    /// Manage bracket rules.
    #[command(subcommand)]
    Rule(RuleCommand),
    /// Manage name sets.
    #[command(subcommand)]
    NameSet(NameSetCommand),
}

#[derive(Subcommand, Debug)]
enum RuleCommand {
    /// Add or replace a rule given as 'start=end=translation_start=translation_end'.
    Set { line: String },
    /// Remove the rule keyed by its start and end tokens.
    Remove { start: String, end: String },
}

#[derive(Subcommand, Debug)]
enum NameSetCommand {
    /// List name sets with their entry counts.
    List,
    Create { title: String },
    Rename { id: i64, title: String },
    /// Delete a name set and all names inside it.
    Delete { id: i64 },
    /// Create a name set from a file of 'original=translated' lines.
    Import { title: String, file: PathBuf },
    /// Write a name set as 'original=translated' lines (default: stdout).
    Export { id: i64, file: Option<PathBuf> },
    Add { id: i64, original: String, translated: String },
    Remove { id: i64, original: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hanviet=info")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run() {
        if let CliError::Io(e) = &err
            && e.kind() == io::ErrorKind::BrokenPipe
        {
            return;
        }

        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => default_db_path().ok_or(CliError::NoDataDir)?,
    };

    if let Some(command) = &cli.command {
        let mut store = SqliteStore::open(&db_path)?;
        return run_command(&mut store, command);
    }

    let mut dictionary = load_dictionary(db_path.clone())?;
    if let Some(id) = cli.name_set {
        let store = SqliteStore::open(&db_path)?;
        dictionary.load_name_set(id, &store)?;
    }

    if cli.direct_input.is_empty() && cli.input_filename.is_none() && io::stdin().is_terminal() {
        return run_repl(&dictionary, &cli);
    }

    let mut writer = get_writer(&cli.output_filename)?;

    if !cli.direct_input.is_empty() {
        process_direct_input(&dictionary, &cli, &mut writer)?;
    }

    if cli.input_filename.is_some() || cli.direct_input.is_empty() {
        process_stream(dictionary, &cli, &mut writer)?;
    }

    writer.flush()?;
    Ok(())
}

fn default_db_path() -> Option<PathBuf> {
    let mut path = dirs::data_dir()?;
    path.push("hanviet");
    path.push("dictionary.db");
    Some(path)
}

/// Loads the dictionary on a worker and waits for its single completion report.
fn load_dictionary(path: PathBuf) -> Result<Dictionary, CliError> {
    let (tx, rx) = mpsc::channel();
    load_in_background(path, move |result| {
        let _ = tx.send(result);
    });
    Ok(rx.recv().map_err(|_| CliError::LoaderStopped)??)
}

fn options(cli: &Cli) -> ConvertOptions {
    ConvertOptions {
        rule_lookahead: cli.rule_lookahead,
    }
}

fn process_direct_input(
    dictionary: &Dictionary,
    cli: &Cli,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let converter = Converter::with_options(dictionary, options(cli));
    for s in &cli.direct_input {
        let conversion = converter.convert(s);
        writeln!(writer, "{}", Converter::render(&conversion, cli.format.into())?)?;
    }
    Ok(())
}

fn process_stream(
    dictionary: Dictionary,
    cli: &Cli,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let input = match &cli.input_filename {
        Some(path) => text::load_from_file(path)?,
        None => text::load_from_reader(BufReader::new(io::stdin()))?,
    };

    let mut pages = text::paginate(&input, cli.page_length);
    if let Some(page) = cli.page {
        if page == 0 || page > pages.len() {
            return Err(CliError::PageOutOfRange {
                page,
                pages: pages.len(),
            });
        }
        pages = vec![pages[page - 1]];
    }

    if cli.use_parallel {
        let converter = Converter::with_options(&dictionary, options(cli));
        for conversion in converter.convert_pages(&pages) {
            writeln!(writer, "{}", Converter::render(&conversion, cli.format.into())?)?;
        }
        return Ok(());
    }

    let service = ConversionService::new(dictionary, options(cli));
    let page_count = pages.len();
    for (index, page) in pages.into_iter().enumerate() {
        let task = service.submit(page)?;
        let result = task.wait_with_progress(|processed, total| {
            if !cli.silent && total > 0 {
                eprint!(
                    "\rConverting page {}/{}: {:>3}%",
                    index + 1,
                    page_count,
                    processed * 100 / total
                );
            }
        })?;
        if let Some(conversion) = result {
            writeln!(writer, "{}", Converter::render(&conversion, cli.format.into())?)?;
        }
    }

    if !cli.silent && page_count > 0 {
        eprintln!();
    }
    Ok(())
}

fn get_writer(path: &Option<PathBuf>) -> Result<Box<dyn Write>, CliError> {
    match path {
        Some(p) => {
            let file = fs::File::create(p).map_err(|e| CliError::OutputFileCreate {
                path: p.clone(),
                source: e,
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

fn run_command(store: &mut SqliteStore, command: &Command) -> Result<(), CliError> {
    match command {
        Command::Add { key, value, name } => {
            if *name {
                store.set_name(key, value)?;
            } else {
                store.add_meaning(key, value)?;
            }
        }
        Command::Remove { key, name, meaning } => match (*name, meaning) {
            (true, _) => store.remove_name(key)?,
            (false, Some(meaning)) => store.remove_meaning(key, meaning)?,
            (false, None) => store.remove_phrases(key)?,
        },
        Command::Reorder { key, meanings } => store.reorder(key, meanings)?,
        Command::Lookup { key } => {
            let mut dictionary = Dictionary::new();
            dictionary.load(&*store)?;
            print_entry(&dictionary, key);
        }
        Command::Reading { character, reading } => store.set_reading(*character, reading)?,
        Command::Rule(RuleCommand::Set { line }) => {
            let rule = parse_rule(line)?;
            store.upsert_rule(&rule)?;
        }
        Command::Rule(RuleCommand::Remove { start, end }) => store.remove_rule(start, end)?,
        Command::NameSet(command) => run_name_set_command(store, command)?,
    }
    Ok(())
}

fn parse_rule(line: &str) -> Result<Rule, CliError> {
    Rule::from_line(line).ok_or_else(|| CliError::InvalidRule(line.to_string()))
}

fn print_entry(dictionary: &Dictionary, key: &str) {
    let entry = dictionary.find_exact(key);
    if let Some(name) = entry.name {
        println!("name:     {name}");
    }
    if let Some(phrases) = entry.phrases {
        println!("meanings: {}", phrases.join(" / "));
    }
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next())
        && let Some(reading) = dictionary.side_tables().reading(c)
    {
        println!("reading:  {reading}");
    }
    if entry.name.is_none() && entry.phrases.is_none() {
        let chars: Vec<char> = key.chars().collect();
        let m = dictionary.find(&chars, 0);
        if m.is_none() {
            println!("No entry for '{key}'.");
        } else {
            let matched: String = chars[..m.len].iter().collect();
            println!("longest prefix: {matched} -> {} ({:?})", m.translation, m.priority);
        }
    }
}

fn run_name_set_command(store: &mut SqliteStore, command: &NameSetCommand) -> Result<(), CliError> {
    match command {
        NameSetCommand::List => {
            for set in store.name_sets()? {
                println!("{:>4}  {:<32} {:>6}", set.id, set.title, set.entries);
            }
        }
        NameSetCommand::Create { title } => {
            let set = store.create_name_set(title)?;
            println!("Created name set {} '{}'.", set.id, set.title);
        }
        NameSetCommand::Rename { id, title } => store.rename_name_set(*id, title)?,
        NameSetCommand::Delete { id } => store.delete_name_set(*id)?,
        NameSetCommand::Import { title, file } => {
            let reader = open_import(file)?;
            let set = store.import_name_set(title, reader)?;
            println!("Name set {} '{}' imported successfully.", set.id, set.title);
        }
        NameSetCommand::Export { id, file } => {
            let count = match file {
                Some(path) => store.export_name_set(*id, get_writer(&Some(path.clone()))?)?,
                None => store.export_name_set(*id, io::stdout().lock())?,
            };
            eprintln!("Exported {count} names.");
        }
        NameSetCommand::Add {
            id,
            original,
            translated,
        } => store.add_name_set_entry(*id, original, translated)?,
        NameSetCommand::Remove { id, original } => store.remove_name_set_entry(*id, original)?,
    }
    Ok(())
}

fn open_import(path: &Path) -> Result<BufReader<fs::File>, CliError> {
    let file = fs::File::open(path).map_err(|source| TextError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

fn run_repl(dictionary: &Dictionary, cli: &Cli) -> Result<(), CliError> {
    let mut rl = DefaultEditor::new()?;

    let history_path = || -> Option<PathBuf> {
        let mut path = dirs::cache_dir()?;
        path.push("hanviet");
        fs::create_dir_all(&path).ok()?;
        path.push("history.txt");
        Some(path)
    };

    if let Some(path) = history_path() {
        let _ = rl.load_history(&path);
    }

    let converter = Converter::with_options(dictionary, options(cli));
    let format = match cli.format {
        CliOutputFormat::Html => OutputFormat::Plain,
        other => other.into(),
    };

    loop {
        let readline = rl.readline(">> ");

        match readline {
            Ok(line) => {
                rl.add_history_entry(&line)?;

                if line.trim() == ":exit" || line.trim() == ":quit" {
                    break;
                }

                if let Some(key) = line.trim().strip_prefix(":lookup ") {
                    print_entry(dictionary, key.trim());
                    continue;
                }

                if line.trim().is_empty() {
                    continue;
                }

                match Converter::render(&converter.convert(&line), format) {
                    Ok(output) => println!("{output}"),
                    Err(e) => eprintln!("Error formatting output: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted. To exit, press Ctrl-D or type :exit.");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Exiting.");
                break;
            }
            Err(err) => {
                eprintln!("REPL Error: {err}");
                break;
            }
        }
    }

    if let Some(path) = history_path()
        && let Err(err) = rl.save_history(&path)
    {
        eprintln!("Warning: could not save history to {path:?}: {err}");
    }

    Ok(())
}
