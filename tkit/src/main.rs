use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;
use std::process::exit;
use strum::IntoEnumIterator;
use tokenkit::{
    context_window, known_models, AllowedSpecial, EncodeOptions, EncodingType, ProfileRegistry,
    TokenInt, Tokenizer,
};
use tracing::*;
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

/// The encoding used when neither `--encoding` nor `--model` is given
const DEFAULT_ENCODING: EncodingType = EncodingType::Cl100kBase;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: Globals,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Globals {
    /// The encoding to tokenize with, e.g. `cl100k_base`.  Defaults to `cl100k_base`.
    #[arg(short, long, env = "TKIT_ENCODING", global = true, conflicts_with = "model")]
    encoding: Option<String>,

    /// Tokenize with the encoding used by this OpenAI model, e.g. `gpt-4o`
    #[arg(short, long, env = "TKIT_MODEL", global = true)]
    model: Option<String>,

    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,
}

impl Globals {
    fn tokenizer(&self, registry: &ProfileRegistry) -> anyhow::Result<Tokenizer> {
        let tokenizer = match (&self.model, &self.encoding) {
            (Some(model), _) => Tokenizer::for_model(registry, model)?,
            (None, Some(encoding)) => Tokenizer::for_profile(registry, encoding)?,
            (None, None) => Tokenizer::for_encoding(registry, DEFAULT_ENCODING)?,
        };

        debug!(encoding = tokenizer.profile().name(), "Using encoding");

        Ok(tokenizer)
    }
}

/// Where to read the input text from
#[derive(Args)]
struct TextInput {
    /// The text to process.
    ///
    /// If no text or file is specified, the text is read from stdin.
    text: Option<String>,

    /// Read the text from a file on the filesystem.
    #[arg(short, long, value_name = "FILE", conflicts_with = "text")]
    file: Option<PathBuf>,
}

impl TextInput {
    fn read(self) -> anyhow::Result<String> {
        if let Some(text) = self.text {
            Ok(text)
        } else if let Some(path) = self.file {
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read text from {}", path.display()))
        } else {
            debug!("No text or file specified, reading text from stdin");
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read text from stdin")?;
            Ok(text)
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode text into tokens, printed as space separated integers
    Encode {
        #[command(flatten)]
        input: TextInput,

        /// Encode this special token as its reserved id rather than as ordinary text.
        /// May be given more than once.
        #[arg(short, long, value_name = "TOKEN")]
        allow_special: Vec<String>,

        /// Encode every special token of the encoding as its reserved id
        #[arg(long, conflicts_with = "allow_special")]
        all_special: bool,

        /// Remove carriage returns before encoding
        #[arg(long)]
        clean_cr: bool,
    },

    /// Decode tokens back into text
    Decode {
        /// The tokens to decode.
        ///
        /// If no tokens are specified, whitespace separated tokens are read from stdin.
        tokens: Vec<TokenInt>,
    },

    /// Count the tokens in text, without regard for special tokens
    Count {
        #[command(flatten)]
        input: TextInput,
    },

    /// Print the longest leading part of the text that fits in a number of tokens
    Truncate {
        /// The maximum number of tokens the printed text may encode to
        #[arg(short = 'n', long)]
        max_tokens: usize,

        #[command(flatten)]
        input: TextInput,
    },

    /// List the special tokens of the encoding
    Special,

    /// List the OpenAI models with a known encoding
    Models,

    /// List the supported encodings
    Encodings,
}

impl Commands {
    fn execute(self, globals: &Globals) -> anyhow::Result<()> {
        use Commands::*;

        let registry = ProfileRegistry::embedded();

        match self {
            Encode {
                input,
                allow_special,
                all_special,
                clean_cr,
            } => {
                let tokenizer = globals.tokenizer(&registry)?;
                let text = input.read()?;

                let allowed = allow_special
                    .iter()
                    .map(String::as_str)
                    .collect::<HashSet<_>>();
                for literal in &allowed {
                    if tokenizer.profile().special_token(literal).is_none() {
                        warn!(
                            token = literal,
                            encoding = tokenizer.profile().name(),
                            "Not a special token of this encoding"
                        );
                    }
                }

                let options = EncodeOptions {
                    allowed_special: if all_special {
                        AllowedSpecial::All
                    } else {
                        AllowedSpecial::Only(&allowed)
                    },
                    clean_cr,
                };

                let tokens = tokenizer.encode_with_options(&text, &options);
                println!(
                    "{}",
                    tokens
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" ")
                );
            }
            Decode { tokens } => {
                let tokenizer = globals.tokenizer(&registry)?;
                let tokens = if tokens.is_empty() {
                    debug!("No tokens specified, reading tokens from stdin");
                    let mut input = String::new();
                    std::io::stdin()
                        .read_to_string(&mut input)
                        .context("Failed to read tokens from stdin")?;

                    input
                        .split_whitespace()
                        .map(|token| {
                            token
                                .parse::<TokenInt>()
                                .with_context(|| format!("'{token}' is not a token"))
                        })
                        .collect::<anyhow::Result<Vec<_>>>()?
                } else {
                    tokens
                };

                print!("{}", tokenizer.decode(&tokens)?);
            }
            Count { input } => {
                let tokenizer = globals.tokenizer(&registry)?;
                let text = input.read()?;

                println!("{}", tokenizer.count_tokens(&text));

                if let Some(model) = &globals.model {
                    match context_window(model) {
                        Some(window) => println!("Context window of {model}: {window}"),
                        None => info!(model, "Context window is not known"),
                    }
                }
            }
            Truncate { max_tokens, input } => {
                let tokenizer = globals.tokenizer(&registry)?;
                let text = input.read()?;

                let (head, tail) = tokenizer.truncate(&text, max_tokens);
                if let Some(tail) = tail {
                    info!(
                        kept_bytes = head.len(),
                        dropped_bytes = tail.len(),
                        "Text truncated"
                    );
                }

                print!("{head}");
            }
            Special => {
                let tokenizer = globals.tokenizer(&registry)?;
                let mut special_tokens = tokenizer.special_tokens().collect::<Vec<_>>();
                special_tokens.sort_by_key(|(_, token)| *token);

                for (literal, token) in special_tokens {
                    println!("{token}\t{literal}");
                }
            }
            Models => {
                for (model, encoding) in known_models() {
                    match context_window(model) {
                        Some(window) => println!("{model}\t{encoding}\t{window}"),
                        None => println!("{model}\t{encoding}\t-"),
                    }
                }
            }
            Encodings => {
                for encoding in EncodingType::iter() {
                    println!("{encoding}");
                }
            }
        }

        Ok(())
    }
}

fn main() {
    let cli = Cli::parse();
    // You can see how many times a particular flag or argument occurred
    // Note, only flags can have multiple occurrences
    let default_log_directive = match cli.globals.debug {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Initialize tracing with JSON formatting, on stderr so it doesn't mix with the output
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_log_directive.into())
                .from_env_lossy(),
        )
        .json()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    if let Err(e) = cli.command.execute(&cli.globals) {
        error!("{:#}", e);
        exit(1);
    } else {
        debug!("command executed successfully");
    }
}
