use frame_match::args::{Args, Command, print_help, version_line};
use frame_match::match_image::{
    EngineResult, Frame, Image, LogSink, MatchConfig, MatchReport, MatchResult, Matcher, Region,
    Template,
};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let args = match Command::from_env() {
        Ok(Command::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            println!("{}", version_line());
            return ExitCode::SUCCESS;
        }
        Ok(Command::Match(args)) => args,
        Err(e) => {
            eprintln!("❌ {e}");
            eprintln!("Run 'frame-match --help' for usage");
            return ExitCode::from(2);
        }
    };

    let default_level = if args.verbose || args.log_stages {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::from(2)
        }
    }
}

/// Search once (or for every match with `--all`) and print the results.
/// Returns whether anything matched.
fn run(args: &Args) -> EngineResult<bool> {
    let mut config = match &args.config {
        Some(path) => MatchConfig::from_json_file(path)?,
        None => MatchConfig::default(),
    };
    config.apply_env()?;
    let mut params = config.parameters;
    for assignment in &args.assignments {
        params.apply_assignment(assignment)?;
    }
    let mut matcher = Matcher::new(config)?;
    if args.log_stages {
        matcher = matcher.with_diagnostics(Arc::new(LogSink));
    }

    let frame = Frame::new(Image::open(&args.source)?);
    let template = Template::open(&args.reference)?;
    log::debug!(
        "Searching {} ({:?}) for {} ({:?}) with {:?}",
        args.source.display(),
        frame.image,
        args.reference.display(),
        template.shape(),
        params
    );

    let results: Vec<MatchResult> = if args.all {
        matcher
            .match_all(template, frame, Some(&params), Region::ALL)?
            .collect()
    } else {
        vec![matcher.match_image(template, frame, Some(&params), Region::ALL)?]
    };
    let any_matched = results.iter().any(|r| r.matched);

    if args.json {
        let report = MatchReport {
            parameters: params,
            results: results.iter().map(MatchResult::summary).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &results {
            println!("{result}");
        }
    }
    Ok(any_matched)
}
