use std::path::PathBuf;

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Version,
    Match(Args),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args {
    pub source: PathBuf,
    pub reference: PathBuf,
    /// `key=value` match parameter overrides, in command-line order
    pub assignments: Vec<String>,
    pub config: Option<PathBuf>,
    pub all: bool,
    pub json: bool,
    pub verbose: bool,
    /// Log every intermediate search image
    pub log_stages: bool,
}

impl Command {
    /// Parse arguments, excluding the program name.
    pub fn parse<I, S>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Args::default();
        let mut positional: Vec<String> = Vec::new();

        for arg in args.into_iter().map(Into::into) {
            if arg == "--help" || arg == "-h" {
                return Ok(Command::Help);
            } else if arg == "--version" {
                return Ok(Command::Version);
            } else if arg == "--verbose" || arg == "-v" {
                parsed.verbose = true;
            } else if arg == "--all" {
                parsed.all = true;
            } else if arg == "--json" {
                parsed.json = true;
            } else if arg == "--log-stages" {
                parsed.log_stages = true;
            } else if let Some(path) = arg.strip_prefix("--config=") {
                if path.is_empty() {
                    return Err("--config needs a path".to_string());
                }
                parsed.config = Some(PathBuf::from(path));
            } else if arg.starts_with('-') && arg.len() > 1 {
                return Err(format!("Unknown argument: {arg}"));
            } else if positional.len() >= 2 && arg.contains('=') {
                parsed.assignments.push(arg);
            } else if positional.len() < 2 {
                positional.push(arg);
            } else {
                return Err(format!("Expected key=value, got '{arg}'"));
            }
        }

        let mut positional = positional.into_iter();
        match (positional.next(), positional.next()) {
            (Some(source), Some(reference)) => {
                parsed.source = PathBuf::from(source);
                parsed.reference = PathBuf::from(reference);
                Ok(Command::Match(parsed))
            }
            _ => Err("Expected SOURCE and REFERENCE images".to_string()),
        }
    }

    /// Parse the arguments of the running process.
    pub fn from_env() -> Result<Self, String> {
        Self::parse(std::env::args().skip(1))
    }
}

/// Version banner, e.g. `frame-match v0.1.0-dev+1a2b3c4 (built 2026)`.
pub fn version_line() -> String {
    format!(
        "frame-match v{} (built {})",
        env!("FRAME_MATCH_VERSION_DISPLAY"),
        env!("FRAME_MATCH_BUILD_YEAR")
    )
}

pub fn print_help() {
    println!("frame-match: find a reference image inside a screenshot");
    println!();
    println!("USAGE:");
    println!("    frame-match [FLAGS] SOURCE REFERENCE [key=value ...]");
    println!();
    println!("FLAGS:");
    println!("    --all               Report every non-overlapping match");
    println!("    --json              Print a JSON report instead of one line per result");
    println!("    --config=PATH       Load matcher settings from a JSON file");
    println!("    --verbose, -v       Enable debug logging");
    println!("    --log-stages        Log each intermediate image at debug level (implies -v,");
    println!("                        disables the equal-size fast path)");
    println!("    --help, -h          Show this help message");
    println!("    --version           Show version information");
    println!();
    println!("PARAMETERS:");
    println!("    match_method        sqdiff | sqdiff-normed | ccorr-normed | ccoeff-normed");
    println!("    match_threshold     0.0 - 1.0 (default 0.98)");
    println!("    confirm_method      none | absdiff | normed-absdiff");
    println!("    confirm_threshold   0.0 - 1.0 (default 0.70)");
    println!("    erode_passes        integer (default 1)");
    println!();
    println!("ENVIRONMENT:");
    println!("    FRAME_MATCH_PYRAMID_LEVELS   Override pyramid_levels");
    println!("    FRAME_MATCH_SQDIFF_KERNEL    portable | unrolled");
    println!("    RUST_LOG                     Log filter (default: info)");
    println!();
    println!("EXIT STATUS:");
    println!("    0 if anything matched, 1 if nothing did, 2 on error");
    println!();
    println!("EXAMPLES:");
    println!("    frame-match screenshot.png button.png");
    println!("    frame-match --all --json screenshot.png icon.png match_threshold=0.95");
}
