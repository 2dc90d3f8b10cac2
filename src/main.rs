use std::process;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use variant_sudoku_solver::io;
use variant_sudoku_solver::solver::{Config, ProgressState, Solver, StepGuides};

/// Solver for sudoku variants driven by constraint propagation.
#[derive(Parser)]
#[clap(version, about)]
struct Args {
    /// Puzzle file, or - for stdin.
    input: String,

    /// Count all solutions instead of printing them.
    #[clap(long)]
    count: bool,

    /// Print, per cell, the values appearing in any solution.
    #[clap(long)]
    all_possibilities: bool,

    /// Check whether the houses alone admit any solution.
    #[clap(long)]
    validate: bool,

    /// Show the search state after the given step number.
    #[clap(long)]
    step: Option<u64>,

    /// Maximum number of solutions to print.
    #[clap(long, default_value_t = 2)]
    max_solutions: usize,

    /// Shuffle the initial cell order.
    #[clap(long)]
    randomize: bool,

    /// How often to report progress (every 2^n search iterations).
    #[clap(long, default_value_t = 17)]
    log_progress_frequency: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    ctrlc::set_handler(|| {
        eprintln!("\ninterrupted");
        process::exit(130);
    })
    .expect("installing the interrupt handler");

    let input = match io::input::read(&args.input) {
        Ok(input) => input,
        Err(error) => {
            eprintln!("cannot read {}: {error}", args.input);
            process::exit(2);
        }
    };

    let constraint = match io::parser::parse_text(&input) {
        Ok(constraint) => constraint,
        Err(error) => {
            eprintln!("{error}");
            process::exit(2);
        }
    };

    let mut config = Config::default();
    if args.randomize {
        use rand::SeedableRng;
        config.search_randomizer = Some(rand::rngs::StdRng::from_entropy());
    }

    let mut solver = match Solver::with_config(&constraint, config) {
        Ok(solver) => solver,
        Err(error) => {
            eprintln!("{error}");
            process::exit(2);
        }
    };

    // A live counter line while the search runs, but only on a terminal.
    let progress = if atty::is(atty::Stream::Stderr) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}"));
        let bar_handle = bar.clone();
        solver.set_progress_callback(
            Some(Box::new(move |state: &ProgressState| {
                bar_handle.set_message(format!(
                    "guesses: {} backtracks: {} progress: {:.2}%",
                    state.counters.guesses,
                    state.counters.backtracks,
                    state.counters.progress_ratio * 100.0
                ));
                bar_handle.tick();
            })),
            args.log_progress_frequency,
        );
        Some(bar)
    } else {
        None
    };

    let shape = constraint.shape;

    if args.validate {
        let valid = solver.validate_layout();
        finish_progress(&progress);
        println!("{}", if valid { "valid" } else { "invalid" });
        process::exit(if valid { 0 } else { 1 });
    }

    if args.count {
        let count = solver.count_solutions();
        finish_progress(&progress);
        println!("{count} solutions");
        println!("{}", io::output::counters(&solver.state().counters));
        return;
    }

    if args.all_possibilities {
        let pencilmarks = solver.solve_all_possibilities();
        finish_progress(&progress);
        print!("{}", io::output::pencilmarks_as_grid(&shape, &pencilmarks));
        println!("{}", io::output::counters(&solver.state().counters));
        return;
    }

    if let Some(step) = args.step {
        let result = solver.nth_step(step, StepGuides::new());
        finish_progress(&progress);
        match result {
            Some(step) => {
                print!("{}", io::output::pencilmarks_as_grid(&shape, &step.pencilmarks));
                if step.has_contradiction {
                    println!("contradiction");
                }
                if let Some(values) = step.values {
                    println!("solution: {}", io::output::solution_compact(&values));
                }
            }
            None => println!("search finished before that step"),
        }
        return;
    }

    let mut found = 0;
    for n in 0..args.max_solutions {
        match solver.nth_solution(n) {
            Some(solution) => {
                found += 1;
                print!("{}", io::output::solution_as_grid(&shape, &solution));
                println!();
            }
            None => break,
        }
    }
    finish_progress(&progress);
    match found {
        0 => println!("no solutions"),
        _ => println!("{}", io::output::counters(&solver.state().counters)),
    }
}

fn finish_progress(progress: &Option<ProgressBar>) {
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
}
