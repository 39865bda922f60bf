use std::io::Read;

use clap::{Parser, Subcommand};

use cmdlang::{
    CmdResult, CommandStore, ErrorShower, Inliner, MapCatalogue, MapConfigView, MapMacroResolver, MapVariableResolver, OutputMode, ShowMode,
    ValueStore, VecCommandSequenceWriter,
};

#[derive(Parser)]
#[command(name = "cmdlang")]
#[command(about = "Compile and render build-description command language scripts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, inline, pre-evaluate and compile a command source to its
    /// compact postfix word stream, deduplicating it in a fresh in-memory
    /// command store.
    Compile {
        /// Command source; read from stdin if omitted.
        source: Option<String>,
        /// Output the word stream as JSON instead of Rust debug format.
        #[arg(long)]
        json: bool,
    },
    /// Compile and render a command source into its shell argv sequence.
    Render {
        /// Command source; read from stdin if omitted.
        source: Option<String>,
        /// A NAME=VALUE binding consulted when resolving variables. May be repeated.
        #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
        defines: Vec<String>,
        /// Output the rendered commands as JSON instead of one line per command.
        #[arg(long)]
        json: bool,
    },
}

fn read_source(source: Option<String>) -> String {
    match source {
        Some(s) => s,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
            buf
        }
    }
}

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("error: {err}");
    std::process::exit(1);
}

/// No variables or macros are bound by the standalone CLI — it exists for
/// manual inspection of the compiler/renderer, not as a build-system
/// embedding, so every scope the inliner consults is empty.
fn compile_source(source: &str, values: &mut ValueStore) -> CmdResult<(cmdlang::CmdId, CommandStore)> {
    let mut store = CommandStore::new();
    let catalogue = MapCatalogue::new();
    let all_visible = MapVariableResolver::new();
    let inline_visible = MapVariableResolver::new();
    let macros = MapMacroResolver::new();
    let mut inliner = Inliner::new(&all_visible, &inline_visible, &macros, &catalogue);
    let mut shower = ErrorShower::new(ShowMode::All);
    let (id, _tables) = store.compile(source, values, &catalogue, &mut inliner, OutputMode::Default, &mut shower)?;
    for message in shower.messages() {
        eprintln!("warning: {message}");
    }
    Ok((id, store))
}

fn run_compile(source: Option<String>, json: bool) {
    let source = read_source(source);
    let mut values = ValueStore::new();

    match compile_source(&source, &mut values) {
        Ok((id, store)) => {
            let words = &store.get(id).expect("just-inserted id is present").words;
            if json {
                println!("{}", serde_json::json!({ "id": id.to_repr(), "words": words }));
            } else {
                println!("id={} words={words:?}", id.to_repr());
            }
        }
        Err(e) => fail(e),
    }
}

fn run_render(source: Option<String>, defines: Vec<String>, json: bool) {
    let source = read_source(source);
    let mut values = ValueStore::new();
    let mut config = MapConfigView::new();
    for define in &defines {
        match define.split_once('=') {
            Some((name, value)) => {
                config.set(name, value);
            }
            None => fail(format!("invalid --define `{define}`, expected NAME=VALUE")),
        }
    }

    let commands: CmdResult<Vec<Vec<String>>> = (|| {
        let (id, store) = compile_source(&source, &mut values)?;
        let words = &store.get(id).expect("just-inserted id is present").words;
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        cmdlang::render(words, &values, &config, &mut shower, &mut writer)?;
        for message in shower.messages() {
            eprintln!("warning: {message}");
        }
        Ok(writer.into_commands())
    })();

    match commands {
        Ok(commands) => {
            if json {
                println!("{}", serde_json::json!({ "commands": commands }));
            } else {
                for argv in commands {
                    println!("{}", argv.join(" "));
                }
            }
        }
        Err(e) => fail(e),
    }
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Compile { source, json } => run_compile(source, json),
        Commands::Render { source, defines, json } => run_render(source, defines, json),
    }
}
